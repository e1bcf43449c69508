mod memory;
mod postgres;
mod r#trait;

pub use memory::{InMemoryDeletionCheckpoints, InMemoryPostRepository, InMemoryUserRepository};
pub use postgres::{PgDeletionCheckpoints, PgPostRepository, PgUserRepository};
pub use r#trait::{
    DeletionCheckpointStore, PostRepository, RepositoryError, RepositoryResult, UserRepository,
};
