use resilience::RetryConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::{retry_on_conflict, within_deadline};
use crate::domain::FollowOutcome;
use crate::error::{ServiceError, ServiceResult};
use crate::locks::{KeyedLocks, LockKey};
use crate::metrics::{ASYMMETRIC_EDGES_TOTAL, FOLLOW_TOGGLES_TOTAL};
use crate::repository::UserRepository;

/// Maintains follow edges stored redundantly as `actor.following` and
/// `target.followers`.
#[derive(Clone)]
pub struct RelationshipManager {
    users: Arc<dyn UserRepository>,
    locks: KeyedLocks,
    retry: RetryConfig,
    request_timeout: Duration,
}

impl RelationshipManager {
    pub fn new(
        users: Arc<dyn UserRepository>,
        locks: KeyedLocks,
        retry: RetryConfig,
        request_timeout: Duration,
    ) -> Self {
        Self {
            users,
            locks,
            retry,
            request_timeout,
        }
    }

    /// Follow `target_id` if not yet followed, otherwise unfollow.
    ///
    /// The actor's aggregate is written first, then the target's. If the
    /// target write keeps failing the edge is left one-sided and the error is
    /// returned; the reconciliation pass restores symmetry from the actor side.
    pub async fn toggle_follow(&self, actor_id: Uuid, target_id: Uuid) -> ServiceResult<FollowOutcome> {
        if actor_id == target_id {
            return Err(ServiceError::SelfReference(actor_id));
        }

        // Both user keys, so a concurrent deletion of either endpoint either
        // snapshots the finished edge or makes this toggle see NotFound.
        let _users = self.locks.acquire_users(actor_id, target_id).await;
        let _pair = self.locks.acquire(LockKey::pair(actor_id, target_id)).await;

        let result = within_deadline(
            self.request_timeout,
            "toggle_follow",
            self.toggle_locked(actor_id, target_id),
        )
        .await;

        match &result {
            Ok(outcome) => {
                let label = if outcome.followed { "followed" } else { "unfollowed" };
                FOLLOW_TOGGLES_TOTAL.with_label_values(&[label]).inc();
                info!(
                    actor_id = %actor_id,
                    target_id = %target_id,
                    followed = outcome.followed,
                    "Follow toggled"
                );
            }
            Err(e) => {
                FOLLOW_TOGGLES_TOTAL.with_label_values(&["failed"]).inc();
                warn!(actor_id = %actor_id, target_id = %target_id, error = %e, "Follow toggle failed");
            }
        }
        result
    }

    async fn toggle_locked(&self, actor_id: Uuid, target_id: Uuid) -> ServiceResult<FollowOutcome> {
        let followed =
            retry_on_conflict(&self.retry, || self.write_actor_side(actor_id, target_id)).await?;

        if let Err(e) = retry_on_conflict(&self.retry, || {
            self.write_target_side(actor_id, target_id, followed)
        })
        .await
        {
            ASYMMETRIC_EDGES_TOTAL
                .with_label_values(&["toggle_follow"])
                .inc();
            warn!(
                actor_id = %actor_id,
                target_id = %target_id,
                followed,
                error = %e,
                "Actor side committed but target side failed; edge is asymmetric until reconciled"
            );
            return Err(e);
        }

        Ok(FollowOutcome { followed })
    }

    /// Flip the forward entry; returns the new membership.
    async fn write_actor_side(&self, actor_id: Uuid, target_id: Uuid) -> ServiceResult<bool> {
        // Target must exist before anything is written.
        self.users.get(target_id).await?;
        let mut actor = self.users.get(actor_id).await?;

        let followed = if actor.following.remove(&target_id) {
            false
        } else {
            actor.following.insert(target_id);
            true
        };

        self.users.save(&actor).await?;
        Ok(followed)
    }

    /// Make the backward entry match `followed`; idempotent across retries.
    async fn write_target_side(
        &self,
        actor_id: Uuid,
        target_id: Uuid,
        followed: bool,
    ) -> ServiceResult<()> {
        let mut target = self.users.get(target_id).await?;

        let changed = if followed {
            target.followers.insert(actor_id)
        } else {
            target.followers.remove(&actor_id)
        };

        if changed {
            self.users.save(&target).await?;
        }
        Ok(())
    }

    /// Current forward membership, without locking
    pub async fn is_following(&self, actor_id: Uuid, target_id: Uuid) -> ServiceResult<bool> {
        Ok(self.users.get(actor_id).await?.is_following(target_id))
    }
}
