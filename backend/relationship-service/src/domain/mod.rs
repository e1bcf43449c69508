pub mod models;
pub mod reports;

pub use models::{AssetRef, Comment, Post, ProfileView, ResetToken, User, UserSummary};
pub use reports::{
    DeletionIssue, DeletionReport, DeletionSnapshot, DeletionStep, FollowOutcome,
    ReconcileReport, RepairOutcome,
};
