//! Repair pass for one-sided follow edges.
//!
//! `follower.following` is written first by a toggle, so it is treated as the
//! source of truth and `followee.followers` is brought in line with it. Entries
//! pointing at users that no longer exist are dropped.

use resilience::RetryConfig;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::retry_on_conflict;
use crate::domain::{ReconcileReport, RepairOutcome, User};
use crate::error::{ServiceError, ServiceResult};
use crate::locks::{KeyedLocks, LockKey};
use crate::metrics::RECONCILE_REPAIRS_TOTAL;
use crate::repository::UserRepository;

#[derive(Clone)]
pub struct EdgeReconciler {
    users: Arc<dyn UserRepository>,
    locks: KeyedLocks,
    retry: RetryConfig,
}

impl EdgeReconciler {
    pub fn new(users: Arc<dyn UserRepository>, locks: KeyedLocks, retry: RetryConfig) -> Self {
        Self { users, locks, retry }
    }

    /// Make both sides of `follower -> followee` agree. Idempotent.
    pub async fn repair_edge(&self, follower_id: Uuid, followee_id: Uuid) -> ServiceResult<RepairOutcome> {
        if follower_id == followee_id {
            return self.drop_self_edge(follower_id).await;
        }

        let _users = self.locks.acquire_users(follower_id, followee_id).await;
        let _pair = self.locks.acquire(LockKey::pair(follower_id, followee_id)).await;
        let outcome =
            retry_on_conflict(&self.retry, || self.repair_once(follower_id, followee_id)).await?;

        observe(outcome);
        if outcome != RepairOutcome::Consistent {
            info!(
                follower_id = %follower_id,
                followee_id = %followee_id,
                outcome = ?outcome,
                "Repaired follow edge"
            );
        }
        Ok(outcome)
    }

    async fn repair_once(&self, follower_id: Uuid, followee_id: Uuid) -> ServiceResult<RepairOutcome> {
        let follower = self.find(follower_id).await?;
        let followee = self.find(followee_id).await?;

        match (follower, followee) {
            (None, None) => Ok(RepairOutcome::Consistent),
            (None, Some(mut followee)) => {
                if !followee.followers.remove(&follower_id) {
                    return Ok(RepairOutcome::Consistent);
                }
                self.users.save(&followee).await?;
                Ok(RepairOutcome::DanglingRemoved)
            }
            (Some(mut follower), None) => {
                if !follower.following.remove(&followee_id) {
                    return Ok(RepairOutcome::Consistent);
                }
                self.users.save(&follower).await?;
                Ok(RepairOutcome::DanglingRemoved)
            }
            (Some(follower), Some(mut followee)) => {
                let forward = follower.following.contains(&followee_id);
                let backward = followee.followers.contains(&follower_id);

                let outcome = match (forward, backward) {
                    (true, false) => {
                        followee.followers.insert(follower_id);
                        RepairOutcome::BackEdgeAdded
                    }
                    (false, true) => {
                        followee.followers.remove(&follower_id);
                        RepairOutcome::BackEdgeRemoved
                    }
                    _ => return Ok(RepairOutcome::Consistent),
                };
                self.users.save(&followee).await?;
                Ok(outcome)
            }
        }
    }

    /// Self edges can only come from writes that bypassed validation.
    async fn drop_self_edge(&self, user_id: Uuid) -> ServiceResult<RepairOutcome> {
        let _user = self.locks.acquire(LockKey::user(user_id)).await;
        let _pair = self.locks.acquire(LockKey::pair(user_id, user_id)).await;
        let outcome = retry_on_conflict(&self.retry, move || async move {
            let Some(mut user) = self.find(user_id).await? else {
                return Ok(RepairOutcome::Consistent);
            };
            let removed_forward = user.following.remove(&user_id);
            let removed_backward = user.followers.remove(&user_id);
            if !(removed_forward || removed_backward) {
                return Ok(RepairOutcome::Consistent);
            }
            self.users.save(&user).await?;
            Ok(RepairOutcome::DanglingRemoved)
        })
        .await?;

        observe(outcome);
        Ok(outcome)
    }

    async fn find(&self, id: Uuid) -> ServiceResult<Option<User>> {
        match self.users.get(id).await.map_err(ServiceError::from) {
            Ok(user) => Ok(Some(user)),
            Err(ServiceError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Repair every edge the user's own lists mention.
    pub async fn reconcile_user(&self, user_id: Uuid) -> ServiceResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let Some(user) = self.find(user_id).await? else {
            return Ok(report);
        };
        report.users_scanned = 1;

        let edges = user
            .following
            .iter()
            .map(|followee| (user_id, *followee))
            .chain(user.followers.iter().map(|follower| (*follower, user_id)));

        for (follower_id, followee_id) in edges {
            match self.repair_edge(follower_id, followee_id).await {
                Ok(outcome) => report.tally(outcome),
                Err(e) => {
                    warn!(
                        follower_id = %follower_id,
                        followee_id = %followee_id,
                        error = %e,
                        "Edge repair failed"
                    );
                    report
                        .errors
                        .push(format!("{follower_id} -> {followee_id}: {e}"));
                }
            }
        }
        Ok(report)
    }

    /// Reconcile every user, paging through ids in ascending order.
    pub async fn sweep(&self, batch_size: usize) -> ServiceResult<ReconcileReport> {
        let batch_size = batch_size.max(1);
        let mut report = ReconcileReport::default();
        let mut after = None;

        loop {
            let page = self.users.list_ids(after, batch_size).await?;
            debug!(page_len = page.len(), "Reconciling user page");

            for user_id in &page {
                match self.reconcile_user(*user_id).await {
                    Ok(user_report) => report.merge(user_report),
                    Err(e) => report.errors.push(format!("{user_id}: {e}")),
                }
            }

            if page.len() < batch_size {
                break;
            }
            after = page.last().copied();
        }

        info!(
            users_scanned = report.users_scanned,
            repairs = report.repairs(),
            errors = report.errors.len(),
            "Reconciliation sweep finished"
        );
        Ok(report)
    }
}

fn observe(outcome: RepairOutcome) {
    let kind = match outcome {
        RepairOutcome::Consistent => return,
        RepairOutcome::BackEdgeAdded => "back_edge_added",
        RepairOutcome::BackEdgeRemoved => "back_edge_removed",
        RepairOutcome::DanglingRemoved => "dangling_removed",
    };
    RECONCILE_REPAIRS_TOTAL.with_label_values(&[kind]).inc();
}
