use resilience::RetryConfig;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::assets::{delete_if_present, AssetStore};
use super::retry_on_conflict;
use crate::domain::{AssetRef, Post, ProfileView, User, UserSummary};
use crate::error::{ServiceError, ServiceResult};
use crate::repository::{PostRepository, UserRepository};
use crate::security::password::{
    hash_blocking, validate_new_password, verify_blocking, CredentialHasher,
};

const AVATAR_FOLDER: &str = "avatars";

/// Largest page returned by [`ProfileService::list_users`]
pub const MAX_PAGE_SIZE: usize = 100;

/// Registration input
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub password: String,
    /// Raw avatar image; empty means no avatar
    pub avatar: Vec<u8>,
}

/// Partial profile update; `None` leaves the field untouched
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<Vec<u8>>,
}

/// Account and profile operations around the user aggregate
#[derive(Clone)]
pub struct ProfileService {
    users: Arc<dyn UserRepository>,
    posts: Arc<dyn PostRepository>,
    assets: Arc<dyn AssetStore>,
    hasher: Arc<dyn CredentialHasher>,
    retry: RetryConfig,
}

fn validate_name(name: &str) -> ServiceResult<()> {
    if name.trim().is_empty() {
        return Err(ServiceError::Validation("Name is required".to_string()));
    }
    Ok(())
}

fn validate_email(email: &str) -> ServiceResult<()> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(ServiceError::Validation(format!("Invalid email: {email}"))),
    }
}

impl ProfileService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        posts: Arc<dyn PostRepository>,
        assets: Arc<dyn AssetStore>,
        hasher: Arc<dyn CredentialHasher>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            users,
            posts,
            assets,
            hasher,
            retry,
        }
    }

    /// Create an account. The uploaded avatar is removed again if the insert
    /// fails.
    pub async fn register(&self, account: NewAccount) -> ServiceResult<User> {
        validate_name(&account.name)?;
        validate_email(&account.email)?;
        validate_new_password(&account.password)?;

        let email = account.email.trim().to_string();
        if self.users.find_by_email(&email).await?.is_some() {
            return Err(ServiceError::AlreadyExists(format!("email {email}")));
        }

        let password_hash = hash_blocking(self.hasher.clone(), account.password.clone()).await?;
        let avatar = self.upload_avatar(account.avatar).await?;

        let user = User::new(account.name.trim().to_string(), email, password_hash, avatar);
        if let Err(e) = self.users.insert(&user).await {
            self.discard_upload(user.avatar.as_ref()).await;
            return Err(e.into());
        }

        info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    /// Look up the account by email and check the password
    pub async fn authenticate(&self, email: &str, password: &str) -> ServiceResult<User> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(ServiceError::Validation(
                "Email and password are required".to_string(),
            ));
        }

        let user = self
            .users
            .find_by_email(email.trim())
            .await?
            .ok_or(ServiceError::InvalidCredentials)?;

        let verified = verify_blocking(
            self.hasher.clone(),
            password.to_string(),
            user.password_hash.clone(),
        )
        .await?;
        if !verified {
            return Err(ServiceError::InvalidCredentials);
        }
        Ok(user)
    }

    pub async fn update_password(
        &self,
        user_id: Uuid,
        old_password: &str,
        new_password: &str,
    ) -> ServiceResult<()> {
        if old_password.is_empty() || new_password.is_empty() {
            return Err(ServiceError::Validation(
                "Please provide old and new password".to_string(),
            ));
        }
        validate_new_password(new_password)?;

        let new_hash = hash_blocking(self.hasher.clone(), new_password.to_string()).await?;
        let new_hash = new_hash.as_str();
        retry_on_conflict(&self.retry, move || async move {
            let mut user = self.users.get(user_id).await?;
            let verified = verify_blocking(
                self.hasher.clone(),
                old_password.to_string(),
                user.password_hash.clone(),
            )
            .await?;
            if !verified {
                return Err(ServiceError::InvalidCredentials);
            }
            user.password_hash = new_hash.to_string();
            self.users.save(&user).await?;
            Ok(())
        })
        .await?;

        info!(user_id = %user_id, "Password updated");
        Ok(())
    }

    /// Apply a partial update. A replacement avatar is uploaded before the
    /// save and the previous one deleted only after it.
    pub async fn update_profile(&self, user_id: Uuid, update: ProfileUpdate) -> ServiceResult<User> {
        if let Some(name) = &update.name {
            validate_name(name)?;
        }
        if let Some(email) = &update.email {
            validate_email(email)?;
            if let Some(owner) = self.users.find_by_email(email.trim()).await? {
                if owner.id != user_id {
                    return Err(ServiceError::AlreadyExists(format!("email {}", email.trim())));
                }
            }
        }

        // Fail fast before uploading anything.
        self.users.get(user_id).await?;

        let new_avatar = match update.avatar.clone() {
            Some(blob) => self.upload_avatar(blob).await?,
            None => None,
        };

        let result = retry_on_conflict(&self.retry, || {
            self.apply_update(user_id, &update, new_avatar.as_ref())
        })
        .await;

        let (user, previous_avatar) = match result {
            Ok(saved) => saved,
            Err(e) => {
                self.discard_upload(new_avatar.as_ref()).await;
                return Err(e);
            }
        };

        if new_avatar.is_some() {
            if let Some(previous) = previous_avatar {
                if let Err(e) = delete_if_present(self.assets.as_ref(), &previous.public_id).await {
                    warn!(user_id = %user_id, error = %e, "Failed to delete replaced avatar");
                }
            }
        }

        info!(user_id = %user_id, "Profile updated");
        Ok(user)
    }

    async fn apply_update(
        &self,
        user_id: Uuid,
        update: &ProfileUpdate,
        new_avatar: Option<&AssetRef>,
    ) -> ServiceResult<(User, Option<AssetRef>)> {
        let mut user = self.users.get(user_id).await?;
        let previous_avatar = user.avatar.clone();

        if let Some(name) = &update.name {
            user.name = name.trim().to_string();
        }
        if let Some(email) = &update.email {
            user.email = email.trim().to_string();
        }
        if let Some(avatar) = new_avatar {
            user.avatar = Some(avatar.clone());
        }

        user.version = self.users.save(&user).await?;
        Ok((user, previous_avatar))
    }

    /// User plus resolved followers, following and posts. Ids that no longer
    /// resolve are skipped.
    pub async fn get_profile(&self, user_id: Uuid) -> ServiceResult<ProfileView> {
        let user = self.users.get(user_id).await?;

        let followers = self.resolve_summaries(user.followers.iter().copied()).await?;
        let following = self.resolve_summaries(user.following.iter().copied()).await?;
        let posts = self.resolve_posts(&user).await?;

        Ok(ProfileView {
            user,
            followers,
            following,
            posts,
        })
    }

    /// The user's posts, oldest first
    pub async fn user_posts(&self, user_id: Uuid) -> ServiceResult<Vec<Post>> {
        let user = self.users.get(user_id).await?;
        self.resolve_posts(&user).await
    }

    /// Page through all accounts in id order, starting after `after`.
    ///
    /// `limit` is clamped to `1..=MAX_PAGE_SIZE`. Pass the last id of a page
    /// to fetch the next one.
    pub async fn list_users(
        &self,
        after: Option<Uuid>,
        limit: usize,
    ) -> ServiceResult<Vec<UserSummary>> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let ids = self.users.list_ids(after, limit).await?;
        self.resolve_summaries(ids.into_iter()).await
    }

    async fn resolve_summaries(
        &self,
        ids: impl Iterator<Item = Uuid>,
    ) -> ServiceResult<Vec<UserSummary>> {
        let mut summaries = Vec::new();
        for id in ids {
            match self.users.get(id).await.map_err(ServiceError::from) {
                Ok(user) => summaries.push(user.summary()),
                Err(ServiceError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(summaries)
    }

    async fn resolve_posts(&self, user: &User) -> ServiceResult<Vec<Post>> {
        let mut posts = Vec::with_capacity(user.posts.len());
        for post_id in &user.posts {
            match self.posts.get(*post_id).await.map_err(ServiceError::from) {
                Ok(post) if post.owner_id == user.id => posts.push(post),
                Ok(_) | Err(ServiceError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(posts)
    }

    async fn upload_avatar(&self, blob: Vec<u8>) -> ServiceResult<Option<AssetRef>> {
        if blob.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.assets.upload(blob, AVATAR_FOLDER).await?))
    }

    async fn discard_upload(&self, avatar: Option<&AssetRef>) {
        if let Some(avatar) = avatar {
            if let Err(e) = delete_if_present(self.assets.as_ref(), &avatar.public_id).await {
                warn!(public_id = %avatar.public_id, error = %e, "Failed to discard uploaded avatar");
            }
        }
    }
}
