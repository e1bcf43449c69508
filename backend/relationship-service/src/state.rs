//! Wiring of repositories and collaborators into the service layer.

use sqlx::PgPool;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::{ConsistencyConfig, ResetSettings};
use crate::locks::KeyedLocks;
use crate::repository::{
    DeletionCheckpointStore, InMemoryDeletionCheckpoints, InMemoryPostRepository,
    InMemoryUserRepository, PgDeletionCheckpoints, PgPostRepository, PgUserRepository,
    PostRepository, UserRepository,
};
use crate::security::CredentialHasher;
use crate::services::{
    AccountDeletionCoordinator, AssetStore, EdgeReconciler, Mailer, PasswordResetTokenService,
    ProfileService, RelationshipManager,
};

/// Repository set for one storage backend
#[derive(Clone)]
pub struct Storage {
    pub users: Arc<dyn UserRepository>,
    pub posts: Arc<dyn PostRepository>,
    pub checkpoints: Arc<dyn DeletionCheckpointStore>,
}

impl Storage {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            users: Arc::new(PgUserRepository::new(pool.clone())),
            posts: Arc::new(PgPostRepository::new(pool.clone())),
            checkpoints: Arc::new(PgDeletionCheckpoints::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            users: Arc::new(InMemoryUserRepository::new()),
            posts: Arc::new(InMemoryPostRepository::new()),
            checkpoints: Arc::new(InMemoryDeletionCheckpoints::new()),
        }
    }
}

/// External collaborators injected by the host process
#[derive(Clone)]
pub struct Collaborators {
    pub assets: Arc<dyn AssetStore>,
    pub mailer: Arc<dyn Mailer>,
    pub hasher: Arc<dyn CredentialHasher>,
    pub clock: Arc<dyn Clock>,
}

/// Every operation the service exposes, sharing one lock table
#[derive(Clone)]
pub struct AppState {
    pub relationships: RelationshipManager,
    pub deletions: AccountDeletionCoordinator,
    pub resets: PasswordResetTokenService,
    pub profiles: ProfileService,
    pub reconciler: EdgeReconciler,
}

impl AppState {
    pub fn new(
        storage: Storage,
        collaborators: Collaborators,
        consistency: &ConsistencyConfig,
        reset: &ResetSettings,
    ) -> Self {
        let locks = KeyedLocks::new();
        let retry = consistency.retry_config();
        let timeout = consistency.request_timeout();

        Self {
            relationships: RelationshipManager::new(
                storage.users.clone(),
                locks.clone(),
                retry.clone(),
                timeout,
            ),
            deletions: AccountDeletionCoordinator::new(
                storage.users.clone(),
                storage.posts.clone(),
                collaborators.assets.clone(),
                storage.checkpoints.clone(),
                locks.clone(),
                retry.clone(),
            ),
            resets: PasswordResetTokenService::new(
                storage.users.clone(),
                collaborators.mailer.clone(),
                collaborators.hasher.clone(),
                collaborators.clock.clone(),
                reset,
                retry.clone(),
                timeout,
            ),
            profiles: ProfileService::new(
                storage.users.clone(),
                storage.posts.clone(),
                collaborators.assets.clone(),
                collaborators.hasher.clone(),
                retry.clone(),
            ),
            reconciler: EdgeReconciler::new(storage.users, locks, retry),
        }
    }
}
