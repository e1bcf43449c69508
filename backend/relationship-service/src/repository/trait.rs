use thiserror::Error;
use uuid::Uuid;

use crate::domain::{DeletionSnapshot, Post, User};

/// Storage-level failures shared by every repository implementation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("{0} not found")]
    NotFound(String),

    /// The stored version no longer matches the version the caller read
    #[error("{0} was modified concurrently")]
    Conflict(String),

    #[error("{0} already exists")]
    Duplicate(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// User aggregate storage.
///
/// `save` is version-checked: it succeeds only when the stored version equals
/// `user.version`, and returns the new version.
#[async_trait::async_trait]
pub trait UserRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> RepositoryResult<User>;

    async fn find_by_email(&self, email: &str) -> RepositoryResult<Option<User>>;

    async fn find_by_reset_token_hash(&self, token_hash: &str) -> RepositoryResult<Option<User>>;

    /// Insert a new user; fails with `Duplicate` on an id or email collision
    async fn insert(&self, user: &User) -> RepositoryResult<()>;

    async fn save(&self, user: &User) -> RepositoryResult<i64>;

    async fn delete(&self, id: Uuid) -> RepositoryResult<()>;

    /// Keyset page of user ids strictly greater than `after`, ascending
    async fn list_ids(&self, after: Option<Uuid>, limit: usize) -> RepositoryResult<Vec<Uuid>>;
}

/// Post aggregate storage, same contract as [`UserRepository`]
#[async_trait::async_trait]
pub trait PostRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> RepositoryResult<Post>;

    async fn insert(&self, post: &Post) -> RepositoryResult<()>;

    async fn save(&self, post: &Post) -> RepositoryResult<i64>;

    async fn delete(&self, id: Uuid) -> RepositoryResult<()>;

    async fn list_by_owner(&self, owner_id: Uuid) -> RepositoryResult<Vec<Post>>;
}

/// Durable record of in-flight account deletions so a cascade can resume
/// after the user aggregate is gone.
#[async_trait::async_trait]
pub trait DeletionCheckpointStore: Send + Sync {
    /// Upsert the snapshot for `snapshot.user_id`
    async fn record(&self, snapshot: &DeletionSnapshot) -> RepositoryResult<()>;

    async fn load(&self, user_id: Uuid) -> RepositoryResult<Option<DeletionSnapshot>>;

    /// Idempotent
    async fn clear(&self, user_id: Uuid) -> RepositoryResult<()>;
}
