use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Opaque reference to a binary asset held by the asset store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    /// Store-side identifier used for deletion
    pub public_id: String,
    /// Publicly reachable URL
    pub url: String,
}

/// Hashed single-use password reset token.
///
/// Hash and expiry live in one value so neither can be set without the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetToken {
    /// SHA-256 hex digest of the raw token
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

impl ResetToken {
    pub fn is_usable(&self, token_hash: &str, now: DateTime<Utc>) -> bool {
        self.token_hash == token_hash && self.expires_at > now
    }
}

/// User aggregate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub avatar: Option<AssetRef>,
    /// Users following this user
    pub followers: BTreeSet<Uuid>,
    /// Users this user follows
    pub following: BTreeSet<Uuid>,
    /// Owned posts, oldest first
    pub posts: Vec<Uuid>,
    #[serde(skip_serializing)]
    pub reset_token: Option<ResetToken>,
    /// Optimistic concurrency version; bumped by every successful save
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: String, email: String, password_hash: String, avatar: Option<AssetRef>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            email,
            password_hash,
            avatar,
            followers: BTreeSet::new(),
            following: BTreeSet::new(),
            posts: Vec::new(),
            reset_token: None,
            version: 0,
            created_at: Utc::now(),
        }
    }

    pub fn is_following(&self, user_id: Uuid) -> bool {
        self.following.contains(&user_id)
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            name: self.name.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

/// Lightweight projection used when resolving follower/following lists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub avatar: Option<AssetRef>,
}

/// Comment on a post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub user_id: Uuid,
    pub text: String,
}

/// Post aggregate; `owner_id` is a back-reference only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub caption: String,
    pub image: AssetRef,
    pub likes: BTreeSet<Uuid>,
    pub comments: Vec<Comment>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl Post {
    pub fn new(owner_id: Uuid, caption: String, image: AssetRef) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            caption,
            image,
            likes: BTreeSet::new(),
            comments: Vec::new(),
            version: 0,
            created_at: Utc::now(),
        }
    }
}

/// Profile view with relationships resolved through the repositories
#[derive(Debug, Clone, Serialize)]
pub struct ProfileView {
    pub user: User,
    pub followers: Vec<UserSummary>,
    pub following: Vec<UserSummary>,
    pub posts: Vec<Post>,
}
