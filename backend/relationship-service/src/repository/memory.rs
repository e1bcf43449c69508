//! In-process repositories.
//!
//! Used for local development (`STORAGE_BACKEND=memory`) and by the test
//! suites. They honour the same version-checked save contract as the
//! PostgreSQL implementations.

use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::r#trait::{
    DeletionCheckpointStore, PostRepository, RepositoryError, RepositoryResult, UserRepository,
};
use crate::domain::{DeletionSnapshot, Post, User};

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<Uuid, User>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }
}

#[async_trait::async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn get(&self, id: Uuid) -> RepositoryResult<User> {
        self.users
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("user {id}")))
    }

    async fn find_by_email(&self, email: &str) -> RepositoryResult<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_by_reset_token_hash(&self, token_hash: &str) -> RepositoryResult<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| {
                u.reset_token
                    .as_ref()
                    .map(|t| t.token_hash == token_hash)
                    .unwrap_or(false)
            })
            .cloned())
    }

    async fn insert(&self, user: &User) -> RepositoryResult<()> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.id) {
            return Err(RepositoryError::Duplicate(format!("user {}", user.id)));
        }
        if users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(RepositoryError::Duplicate(format!("email {}", user.email)));
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn save(&self, user: &User) -> RepositoryResult<i64> {
        let mut users = self.users.write().await;
        if users
            .values()
            .any(|u| u.id != user.id && u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(RepositoryError::Duplicate(format!("email {}", user.email)));
        }
        let stored = users
            .get_mut(&user.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("user {}", user.id)))?;
        if stored.version != user.version {
            return Err(RepositoryError::Conflict(format!("user {}", user.id)));
        }
        let mut next = user.clone();
        next.version = user.version + 1;
        *stored = next;
        Ok(user.version + 1)
    }

    async fn delete(&self, id: Uuid) -> RepositoryResult<()> {
        self.users
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(format!("user {id}")))
    }

    async fn list_ids(&self, after: Option<Uuid>, limit: usize) -> RepositoryResult<Vec<Uuid>> {
        let users = self.users.read().await;
        let mut ids: Vec<Uuid> = users
            .keys()
            .copied()
            .filter(|id| after.map(|a| *id > a).unwrap_or(true))
            .collect();
        ids.sort();
        ids.truncate(limit);
        Ok(ids)
    }
}

#[derive(Default)]
pub struct InMemoryPostRepository {
    posts: RwLock<HashMap<Uuid, Post>>,
}

impl InMemoryPostRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PostRepository for InMemoryPostRepository {
    async fn get(&self, id: Uuid) -> RepositoryResult<Post> {
        self.posts
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("post {id}")))
    }

    async fn insert(&self, post: &Post) -> RepositoryResult<()> {
        let mut posts = self.posts.write().await;
        if posts.contains_key(&post.id) {
            return Err(RepositoryError::Duplicate(format!("post {}", post.id)));
        }
        posts.insert(post.id, post.clone());
        Ok(())
    }

    async fn save(&self, post: &Post) -> RepositoryResult<i64> {
        let mut posts = self.posts.write().await;
        let stored = posts
            .get_mut(&post.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("post {}", post.id)))?;
        if stored.version != post.version {
            return Err(RepositoryError::Conflict(format!("post {}", post.id)));
        }
        let mut next = post.clone();
        next.version = post.version + 1;
        *stored = next;
        Ok(post.version + 1)
    }

    async fn delete(&self, id: Uuid) -> RepositoryResult<()> {
        self.posts
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(format!("post {id}")))
    }

    async fn list_by_owner(&self, owner_id: Uuid) -> RepositoryResult<Vec<Post>> {
        let mut posts: Vec<Post> = self
            .posts
            .read()
            .await
            .values()
            .filter(|p| p.owner_id == owner_id)
            .cloned()
            .collect();
        posts.sort_by_key(|p| p.created_at);
        Ok(posts)
    }
}

#[derive(Default)]
pub struct InMemoryDeletionCheckpoints {
    snapshots: RwLock<HashMap<Uuid, DeletionSnapshot>>,
}

impl InMemoryDeletionCheckpoints {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl DeletionCheckpointStore for InMemoryDeletionCheckpoints {
    async fn record(&self, snapshot: &DeletionSnapshot) -> RepositoryResult<()> {
        self.snapshots
            .write()
            .await
            .insert(snapshot.user_id, snapshot.clone());
        Ok(())
    }

    async fn load(&self, user_id: Uuid) -> RepositoryResult<Option<DeletionSnapshot>> {
        Ok(self.snapshots.read().await.get(&user_id).cloned())
    }

    async fn clear(&self, user_id: Uuid) -> RepositoryResult<()> {
        self.snapshots.write().await.remove(&user_id);
        Ok(())
    }
}
