#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use relationship_service::clock::Clock;
use relationship_service::config::{ConsistencyConfig, ResetSettings};
use relationship_service::domain::{AssetRef, Post, User};
use relationship_service::error::ServiceResult;
use relationship_service::repository::{
    InMemoryDeletionCheckpoints, InMemoryPostRepository, InMemoryUserRepository, PostRepository,
    RepositoryError, RepositoryResult, UserRepository,
};
use relationship_service::security::CredentialHasher;
use relationship_service::services::{
    AssetError, AssetStore, InMemoryAssetStore, MailError, Mailer, NewAccount,
};
use relationship_service::{AppState, Collaborators, Storage};

pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new() -> Self {
        Self(Mutex::new(Utc::now()))
    }

    pub fn advance(&self, by: ChronoDuration) {
        let mut now = self.0.lock().unwrap();
        *now = *now + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// Cheap reversible "hash" so tests don't pay for Argon2
pub struct PlainHasher;

impl CredentialHasher for PlainHasher {
    fn hash(&self, password: &str) -> ServiceResult<String> {
        Ok(format!("plain:{password}"))
    }

    fn verify(&self, password: &str, password_hash: &str) -> ServiceResult<bool> {
        Ok(password_hash == format!("plain:{password}"))
    }
}

#[derive(Debug, Clone)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentMail>>,
    failing: AtomicBool,
}

impl RecordingMailer {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }

    /// Raw token from the last reset link sent
    pub fn last_token(&self) -> Option<String> {
        let sent = self.sent.lock().unwrap();
        let body = &sent.last()?.body;
        let link = body.split_whitespace().find(|w| w.starts_with("http"))?;
        link.rsplit('/').next().map(str::to_string)
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MailError::Delivery("connection refused".into()));
        }
        self.sent.lock().unwrap().push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// Handles for a save held open after it has committed
#[derive(Clone)]
pub struct SaveGate {
    user_id: Uuid,
    /// Notified once the held save has committed
    pub committed: Arc<Notify>,
    /// Notify to let the held save return
    pub release: Arc<Notify>,
}

/// In-memory users with injectable save failures
#[derive(Default)]
pub struct FlakyUserRepository {
    inner: InMemoryUserRepository,
    broken: Mutex<HashSet<Uuid>>,
    pending_conflicts: AtomicU32,
    save_latency: Mutex<Option<Duration>>,
    gate: Mutex<Option<SaveGate>>,
}

impl FlakyUserRepository {
    /// Every save of `id` fails with a backend error until healed
    pub fn break_saves_for(&self, id: Uuid) {
        self.broken.lock().unwrap().insert(id);
    }

    pub fn heal(&self) {
        self.broken.lock().unwrap().clear();
    }

    /// The next `n` saves (of any user) fail with a version conflict
    pub fn inject_conflicts(&self, n: u32) {
        self.pending_conflicts.store(n, Ordering::SeqCst);
    }

    /// Every save sleeps for `latency` before touching storage
    pub fn set_save_latency(&self, latency: Option<Duration>) {
        *self.save_latency.lock().unwrap() = latency;
    }

    /// The next save of `id` commits, then waits until released
    pub fn hold_next_save_of(&self, id: Uuid) -> SaveGate {
        let gate = SaveGate {
            user_id: id,
            committed: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        };
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    fn take_gate(&self, id: Uuid) -> Option<SaveGate> {
        let mut gate = self.gate.lock().unwrap();
        if gate.as_ref().map(|g| g.user_id == id).unwrap_or(false) {
            gate.take()
        } else {
            None
        }
    }

    fn take_conflict(&self) -> bool {
        self.pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl UserRepository for FlakyUserRepository {
    async fn get(&self, id: Uuid) -> RepositoryResult<User> {
        self.inner.get(id).await
    }

    async fn find_by_email(&self, email: &str) -> RepositoryResult<Option<User>> {
        self.inner.find_by_email(email).await
    }

    async fn find_by_reset_token_hash(&self, token_hash: &str) -> RepositoryResult<Option<User>> {
        self.inner.find_by_reset_token_hash(token_hash).await
    }

    async fn insert(&self, user: &User) -> RepositoryResult<()> {
        self.inner.insert(user).await
    }

    async fn save(&self, user: &User) -> RepositoryResult<i64> {
        if self.broken.lock().unwrap().contains(&user.id) {
            return Err(RepositoryError::Backend("connection reset".into()));
        }
        if self.take_conflict() {
            return Err(RepositoryError::Conflict(format!("user {}", user.id)));
        }
        let latency = *self.save_latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let gate = self.take_gate(user.id);
        let version = self.inner.save(user).await?;
        if let Some(gate) = gate {
            gate.committed.notify_one();
            gate.release.notified().await;
        }
        Ok(version)
    }

    async fn delete(&self, id: Uuid) -> RepositoryResult<()> {
        self.inner.delete(id).await
    }

    async fn list_ids(&self, after: Option<Uuid>, limit: usize) -> RepositoryResult<Vec<Uuid>> {
        self.inner.list_ids(after, limit).await
    }
}

/// In-memory assets whose deletes can be made to fail
#[derive(Default)]
pub struct FlakyAssetStore {
    inner: InMemoryAssetStore,
    failing_deletes: AtomicBool,
}

impl FlakyAssetStore {
    pub fn set_failing_deletes(&self, failing: bool) {
        self.failing_deletes.store(failing, Ordering::SeqCst);
    }

    pub async fn contains(&self, public_id: &str) -> bool {
        self.inner.contains(public_id).await
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }
}

#[async_trait]
impl AssetStore for FlakyAssetStore {
    async fn upload(&self, blob: Vec<u8>, folder: &str) -> Result<AssetRef, AssetError> {
        self.inner.upload(blob, folder).await
    }

    async fn delete(&self, public_id: &str) -> Result<(), AssetError> {
        if self.failing_deletes.load(Ordering::SeqCst) {
            return Err(AssetError::Backend("asset store unavailable".into()));
        }
        self.inner.delete(public_id).await
    }
}

pub struct Harness {
    pub state: AppState,
    pub users: Arc<FlakyUserRepository>,
    pub posts: Arc<InMemoryPostRepository>,
    pub assets: Arc<FlakyAssetStore>,
    pub mailer: Arc<RecordingMailer>,
    pub clock: Arc<ManualClock>,
}

pub fn harness() -> Harness {
    harness_with_timeout(2_000)
}

pub fn harness_with_timeout(request_timeout_ms: u64) -> Harness {
    let users = Arc::new(FlakyUserRepository::default());
    let posts = Arc::new(InMemoryPostRepository::new());
    let assets = Arc::new(FlakyAssetStore::default());
    let mailer = Arc::new(RecordingMailer::default());
    let clock = Arc::new(ManualClock::new());

    let consistency = ConsistencyConfig {
        conflict_backoff_ms: 1,
        request_timeout_ms,
        ..ConsistencyConfig::default()
    };

    let state = AppState::new(
        Storage {
            users: users.clone(),
            posts: posts.clone(),
            checkpoints: Arc::new(InMemoryDeletionCheckpoints::new()),
        },
        Collaborators {
            assets: assets.clone(),
            mailer: mailer.clone(),
            hasher: Arc::new(PlainHasher),
            clock: clock.clone(),
        },
        &consistency,
        &ResetSettings::default(),
    );

    Harness {
        state,
        users,
        posts,
        assets,
        mailer,
        clock,
    }
}

impl Harness {
    pub async fn user(&self, name: &str) -> User {
        self.state
            .profiles
            .register(NewAccount {
                name: name.to_string(),
                email: format!("{name}@example.com"),
                password: "password123".to_string(),
                avatar: name.as_bytes().to_vec(),
            })
            .await
            .unwrap()
    }

    /// Create a post owned by `owner` and list it on the owner's aggregate
    pub async fn post(&self, owner: Uuid, caption: &str) -> Post {
        let image = self
            .assets
            .upload(caption.as_bytes().to_vec(), "posts")
            .await
            .unwrap();
        let post = Post::new(owner, caption.to_string(), image);
        self.posts.insert(&post).await.unwrap();

        let mut user = self.users.get(owner).await.unwrap();
        user.posts.push(post.id);
        self.users.save(&user).await.unwrap();
        post
    }

    pub async fn get(&self, id: Uuid) -> User {
        self.users.get(id).await.unwrap()
    }

    /// Snapshot of every user's (following, followers) for diffing
    pub async fn graph(&self) -> Vec<(Uuid, Vec<Uuid>, Vec<Uuid>)> {
        let ids = self.users.list_ids(None, usize::MAX).await.unwrap();
        let mut graph = Vec::new();
        for id in ids {
            let user = self.get(id).await;
            graph.push((
                id,
                user.following.iter().copied().collect(),
                user.followers.iter().copied().collect(),
            ));
        }
        graph
    }
}
