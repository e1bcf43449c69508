//! Cascading account deletion.
//!
//! Order: snapshot, avatar, user aggregate, owned posts, follower edges,
//! following edges. Every step tolerates its target already being gone, so
//! an abandoned run can simply be invoked again. The snapshot is persisted as
//! a checkpoint before anything is destroyed; once the user aggregate is
//! removed the checkpoint is the only record of what is left to clean up.

use resilience::RetryConfig;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::assets::{delete_if_present, AssetStore};
use super::retry_on_conflict;
use crate::domain::{DeletionReport, DeletionSnapshot, DeletionStep};
use crate::error::{ServiceError, ServiceResult};
use crate::locks::{KeyedLocks, LockKey};
use crate::metrics::{ACCOUNT_DELETIONS_TOTAL, DELETION_ISSUES_TOTAL};
use crate::repository::{DeletionCheckpointStore, PostRepository, UserRepository};

/// Which redundant list on the neighbour still references the deleted user
#[derive(Debug, Clone, Copy)]
enum NeighbourList {
    /// Neighbour followed the deleted user: entry lives in `neighbour.following`
    Following,
    /// Deleted user followed the neighbour: entry lives in `neighbour.followers`
    Followers,
}

#[derive(Clone)]
pub struct AccountDeletionCoordinator {
    users: Arc<dyn UserRepository>,
    posts: Arc<dyn PostRepository>,
    assets: Arc<dyn AssetStore>,
    checkpoints: Arc<dyn DeletionCheckpointStore>,
    locks: KeyedLocks,
    retry: RetryConfig,
}

impl AccountDeletionCoordinator {
    pub fn new(
        users: Arc<dyn UserRepository>,
        posts: Arc<dyn PostRepository>,
        assets: Arc<dyn AssetStore>,
        checkpoints: Arc<dyn DeletionCheckpointStore>,
        locks: KeyedLocks,
        retry: RetryConfig,
    ) -> Self {
        Self {
            users,
            posts,
            assets,
            checkpoints,
            locks,
            retry,
        }
    }

    /// Delete the account and everything hanging off it.
    ///
    /// Best-effort steps never abort the cascade; their failures are listed in
    /// the report. Errors before the snapshot is durable, or while removing the
    /// user aggregate itself, are returned.
    pub async fn delete_account(&self, user_id: Uuid) -> ServiceResult<DeletionReport> {
        let _user_lock = self.locks.acquire(LockKey::user(user_id)).await;

        let mut report = DeletionReport::new(user_id);

        let snapshot = match self.users.get(user_id).await {
            Ok(user) => {
                let snapshot = DeletionSnapshot::capture(&user);
                self.checkpoints.record(&snapshot).await?;
                snapshot
            }
            Err(e) => match ServiceError::from(e) {
                ServiceError::NotFound(_) => match self.checkpoints.load(user_id).await? {
                    Some(snapshot) => {
                        info!(user_id = %user_id, "Resuming account deletion from checkpoint");
                        report.resumed = true;
                        snapshot
                    }
                    None => {
                        debug!(user_id = %user_id, "Account already deleted; nothing to do");
                        ACCOUNT_DELETIONS_TOTAL.with_label_values(&["noop"]).inc();
                        return Ok(report);
                    }
                },
                other => {
                    ACCOUNT_DELETIONS_TOTAL.with_label_values(&["failed"]).inc();
                    return Err(other);
                }
            },
        };

        if let Some(avatar) = &snapshot.avatar {
            if let Err(e) = delete_if_present(self.assets.as_ref(), &avatar.public_id).await {
                warn!(user_id = %user_id, error = %e, "Failed to delete avatar asset");
                report.record(DeletionStep::Avatar, &avatar.public_id, e);
            }
        }

        match self.users.delete(user_id).await.map_err(ServiceError::from) {
            Ok(()) => report.user_removed = true,
            Err(ServiceError::NotFound(_)) => {}
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Failed to remove user aggregate");
                ACCOUNT_DELETIONS_TOTAL.with_label_values(&["failed"]).inc();
                return Err(e);
            }
        }

        for post_id in &snapshot.posts {
            self.delete_post(user_id, *post_id, &mut report).await;
        }

        // Posts whose id never made it onto the user's list.
        match self.posts.list_by_owner(user_id).await {
            Ok(stray) => {
                for post in stray.iter().filter(|p| !snapshot.posts.contains(&p.id)) {
                    self.delete_post(user_id, post.id, &mut report).await;
                }
            }
            Err(e) => report.record(DeletionStep::Post, user_id, e),
        }

        for follower_id in &snapshot.followers {
            self.detach(user_id, *follower_id, NeighbourList::Following, &mut report)
                .await;
        }

        for followee_id in &snapshot.following {
            self.detach(user_id, *followee_id, NeighbourList::Followers, &mut report)
                .await;
        }

        for issue in &report.errors {
            DELETION_ISSUES_TOTAL
                .with_label_values(&[issue.step.as_str()])
                .inc();
        }

        if report.is_clean() {
            self.checkpoints.clear(user_id).await?;
            ACCOUNT_DELETIONS_TOTAL.with_label_values(&["clean"]).inc();
        } else {
            ACCOUNT_DELETIONS_TOTAL.with_label_values(&["partial"]).inc();
        }

        info!(
            user_id = %user_id,
            resumed = report.resumed,
            posts_deleted = report.posts_deleted,
            edges_repaired = report.edges_repaired,
            issues = report.errors.len(),
            "Account deletion finished"
        );
        Ok(report)
    }

    async fn delete_post(&self, user_id: Uuid, post_id: Uuid, report: &mut DeletionReport) {
        let post = match self.posts.get(post_id).await.map_err(ServiceError::from) {
            Ok(post) => post,
            Err(ServiceError::NotFound(_)) => return,
            Err(e) => {
                report.record(DeletionStep::Post, post_id, e);
                return;
            }
        };

        if post.owner_id != user_id {
            warn!(
                user_id = %user_id,
                post_id = %post_id,
                owner_id = %post.owner_id,
                "Listed post belongs to another user; skipping"
            );
            report.record(
                DeletionStep::Post,
                post_id,
                format!("owned by {}", post.owner_id),
            );
            return;
        }

        if let Err(e) = delete_if_present(self.assets.as_ref(), &post.image.public_id).await {
            warn!(post_id = %post_id, error = %e, "Failed to delete post image");
            report.record(DeletionStep::PostAsset, &post.image.public_id, e);
        }

        match self.posts.delete(post_id).await.map_err(ServiceError::from) {
            Ok(()) => report.posts_deleted += 1,
            Err(ServiceError::NotFound(_)) => {}
            Err(e) => {
                warn!(post_id = %post_id, error = %e, "Failed to remove post");
                report.record(DeletionStep::Post, post_id, e);
            }
        }
    }

    async fn detach(
        &self,
        user_id: Uuid,
        neighbour_id: Uuid,
        list: NeighbourList,
        report: &mut DeletionReport,
    ) {
        let _pair = self.locks.acquire(LockKey::pair(user_id, neighbour_id)).await;

        let result = retry_on_conflict(&self.retry, || {
            self.remove_reference(neighbour_id, user_id, list)
        })
        .await;

        match result {
            Ok(true) => report.edges_repaired += 1,
            Ok(false) => {}
            Err(e) => {
                let step = match list {
                    NeighbourList::Following => DeletionStep::FollowerEdge,
                    NeighbourList::Followers => DeletionStep::FollowingEdge,
                };
                warn!(
                    user_id = %user_id,
                    neighbour_id = %neighbour_id,
                    error = %e,
                    "Failed to detach edge"
                );
                report.record(step, neighbour_id, e);
            }
        }
    }

    /// Returns whether an entry was actually removed.
    async fn remove_reference(
        &self,
        neighbour_id: Uuid,
        user_id: Uuid,
        list: NeighbourList,
    ) -> ServiceResult<bool> {
        let mut neighbour = match self.users.get(neighbour_id).await.map_err(ServiceError::from) {
            Ok(user) => user,
            Err(ServiceError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        let removed = match list {
            NeighbourList::Following => neighbour.following.remove(&user_id),
            NeighbourList::Followers => neighbour.followers.remove(&user_id),
        };

        if !removed {
            return Ok(false);
        }

        match self.users.save(&neighbour).await.map_err(ServiceError::from) {
            Ok(_) => Ok(true),
            // Deleted between read and write: nothing left to detach.
            Err(ServiceError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
