use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::models::{AssetRef, User};

/// Result of a follow toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowOutcome {
    /// Edge membership after the toggle
    pub followed: bool,
}

/// Identifier lists captured before any destructive deletion step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionSnapshot {
    pub user_id: Uuid,
    pub avatar: Option<AssetRef>,
    pub posts: Vec<Uuid>,
    pub followers: Vec<Uuid>,
    pub following: Vec<Uuid>,
    pub captured_at: DateTime<Utc>,
}

impl DeletionSnapshot {
    pub fn capture(user: &User) -> Self {
        Self {
            user_id: user.id,
            avatar: user.avatar.clone(),
            posts: user.posts.clone(),
            followers: user.followers.iter().copied().collect(),
            following: user.following.iter().copied().collect(),
            captured_at: Utc::now(),
        }
    }
}

/// Cascade step an issue was recorded against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionStep {
    Avatar,
    PostAsset,
    Post,
    FollowerEdge,
    FollowingEdge,
}

impl DeletionStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionStep::Avatar => "avatar",
            DeletionStep::PostAsset => "post_asset",
            DeletionStep::Post => "post",
            DeletionStep::FollowerEdge => "follower_edge",
            DeletionStep::FollowingEdge => "following_edge",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionIssue {
    pub step: DeletionStep,
    /// Post id, user id or asset public id the step was acting on
    pub target: String,
    pub reason: String,
}

/// Best-effort completion report for an account deletion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionReport {
    pub user_id: Uuid,
    /// The user aggregate was removed by this run
    pub user_removed: bool,
    /// This run continued a cascade from a stored checkpoint
    pub resumed: bool,
    pub posts_deleted: u32,
    pub edges_repaired: u32,
    pub errors: Vec<DeletionIssue>,
}

impl DeletionReport {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            user_removed: false,
            resumed: false,
            posts_deleted: 0,
            edges_repaired: 0,
            errors: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub(crate) fn record(&mut self, step: DeletionStep, target: impl ToString, reason: impl ToString) {
        self.errors.push(DeletionIssue {
            step,
            target: target.to_string(),
            reason: reason.to_string(),
        });
    }
}

/// What a single edge repair did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairOutcome {
    Consistent,
    BackEdgeAdded,
    BackEdgeRemoved,
    DanglingRemoved,
}

/// Summary of a reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub users_scanned: u64,
    pub back_edges_added: u64,
    pub back_edges_removed: u64,
    pub dangling_removed: u64,
    pub errors: Vec<String>,
}

impl ReconcileReport {
    pub fn repairs(&self) -> u64 {
        self.back_edges_added + self.back_edges_removed + self.dangling_removed
    }

    pub(crate) fn tally(&mut self, outcome: RepairOutcome) {
        match outcome {
            RepairOutcome::Consistent => {}
            RepairOutcome::BackEdgeAdded => self.back_edges_added += 1,
            RepairOutcome::BackEdgeRemoved => self.back_edges_removed += 1,
            RepairOutcome::DanglingRemoved => self.dangling_removed += 1,
        }
    }

    pub(crate) fn merge(&mut self, other: ReconcileReport) {
        self.users_scanned += other.users_scanned;
        self.back_edges_added += other.back_edges_added;
        self.back_edges_removed += other.back_edges_removed;
        self.dangling_removed += other.dangling_removed;
        self.errors.extend(other.errors);
    }
}
