use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use super::r#trait::{
    DeletionCheckpointStore, PostRepository, RepositoryError, RepositoryResult, UserRepository,
};
use crate::domain::{AssetRef, Comment, DeletionSnapshot, Post, ResetToken, User};

const UNIQUE_VIOLATION: &str = "23505";

fn map_db_error(what: String, err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound(what),
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            RepositoryError::Duplicate(what)
        }
        _ => RepositoryError::Backend(format!("{what}: {err}")),
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    password_hash: String,
    avatar_public_id: Option<String>,
    avatar_url: Option<String>,
    followers: Vec<Uuid>,
    following: Vec<Uuid>,
    posts: Vec<Uuid>,
    reset_token_hash: Option<String>,
    reset_token_expires_at: Option<DateTime<Utc>>,
    version: i64,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        let avatar = match (row.avatar_public_id, row.avatar_url) {
            (Some(public_id), Some(url)) => Some(AssetRef { public_id, url }),
            _ => None,
        };
        let reset_token = match (row.reset_token_hash, row.reset_token_expires_at) {
            (Some(token_hash), Some(expires_at)) => Some(ResetToken {
                token_hash,
                expires_at,
            }),
            (None, None) => None,
            _ => {
                warn!(user_id = %row.id, "Half-populated reset token columns; treating as absent");
                None
            }
        };

        User {
            id: row.id,
            name: row.name,
            email: row.email,
            password_hash: row.password_hash,
            avatar,
            followers: row.followers.into_iter().collect(),
            following: row.following.into_iter().collect(),
            posts: row.posts,
            reset_token,
            version: row.version,
            created_at: row.created_at,
        }
    }
}

const USER_COLUMNS: &str = "id, name, email, password_hash, avatar_public_id, avatar_url, \
     followers, following, posts, reset_token_hash, reset_token_expires_at, version, created_at";

/// PostgreSQL user store; edge sets and post ids are `UUID[]` columns
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(&self, clause: &str, bind: &str) -> RepositoryResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {clause}");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(bind)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_error("user lookup".to_string(), e))?;
        Ok(row.map(User::from))
    }

    async fn exists(&self, id: Uuid) -> RepositoryResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_db_error(format!("user {id}"), e))
    }
}

#[async_trait::async_trait]
impl UserRepository for PgUserRepository {
    async fn get(&self, id: Uuid) -> RepositoryResult<User> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map(User::from)
            .map_err(|e| map_db_error(format!("user {id}"), e))
    }

    async fn find_by_email(&self, email: &str) -> RepositoryResult<Option<User>> {
        self.fetch_one_where("LOWER(email) = LOWER($1)", email).await
    }

    async fn find_by_reset_token_hash(&self, token_hash: &str) -> RepositoryResult<Option<User>> {
        self.fetch_one_where("reset_token_hash = $1", token_hash).await
    }

    async fn insert(&self, user: &User) -> RepositoryResult<()> {
        let followers: Vec<Uuid> = user.followers.iter().copied().collect();
        let following: Vec<Uuid> = user.following.iter().copied().collect();

        sqlx::query(
            r#"
            INSERT INTO users (
                id, name, email, password_hash, avatar_public_id, avatar_url,
                followers, following, posts, reset_token_hash, reset_token_expires_at,
                version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW())
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.avatar.as_ref().map(|a| a.public_id.as_str()))
        .bind(user.avatar.as_ref().map(|a| a.url.as_str()))
        .bind(&followers)
        .bind(&following)
        .bind(&user.posts)
        .bind(user.reset_token.as_ref().map(|t| t.token_hash.as_str()))
        .bind(user.reset_token.as_ref().map(|t| t.expires_at))
        .bind(user.version)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_error(format!("user {}", user.email), e))?;

        debug!(user_id = %user.id, "Inserted user");
        Ok(())
    }

    async fn save(&self, user: &User) -> RepositoryResult<i64> {
        let followers: Vec<Uuid> = user.followers.iter().copied().collect();
        let following: Vec<Uuid> = user.following.iter().copied().collect();

        let new_version = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE users SET
                name = $2,
                email = $3,
                password_hash = $4,
                avatar_public_id = $5,
                avatar_url = $6,
                followers = $7,
                following = $8,
                posts = $9,
                reset_token_hash = $10,
                reset_token_expires_at = $11,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $12
            RETURNING version
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.avatar.as_ref().map(|a| a.public_id.as_str()))
        .bind(user.avatar.as_ref().map(|a| a.url.as_str()))
        .bind(&followers)
        .bind(&following)
        .bind(&user.posts)
        .bind(user.reset_token.as_ref().map(|t| t.token_hash.as_str()))
        .bind(user.reset_token.as_ref().map(|t| t.expires_at))
        .bind(user.version)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_error(format!("user {}", user.id), e))?;

        match new_version {
            Some(v) => Ok(v),
            None if self.exists(user.id).await? => {
                Err(RepositoryError::Conflict(format!("user {}", user.id)))
            }
            None => Err(RepositoryError::NotFound(format!("user {}", user.id))),
        }
    }

    async fn delete(&self, id: Uuid) -> RepositoryResult<()> {
        let affected = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_error(format!("user {id}"), e))?
            .rows_affected();

        if affected == 0 {
            return Err(RepositoryError::NotFound(format!("user {id}")));
        }
        Ok(())
    }

    async fn list_ids(&self, after: Option<Uuid>, limit: usize) -> RepositoryResult<Vec<Uuid>> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM users
            WHERE ($1::uuid IS NULL OR id > $1)
            ORDER BY id
            LIMIT $2
            "#,
        )
        .bind(after)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_error("user id page".to_string(), e))
    }
}

#[derive(sqlx::FromRow)]
struct PostRow {
    id: Uuid,
    owner_id: Uuid,
    caption: String,
    image_public_id: String,
    image_url: String,
    likes: Vec<Uuid>,
    comments: Json<Vec<Comment>>,
    version: i64,
    created_at: DateTime<Utc>,
}

impl From<PostRow> for Post {
    fn from(row: PostRow) -> Self {
        Post {
            id: row.id,
            owner_id: row.owner_id,
            caption: row.caption,
            image: AssetRef {
                public_id: row.image_public_id,
                url: row.image_url,
            },
            likes: row.likes.into_iter().collect(),
            comments: row.comments.0,
            version: row.version,
            created_at: row.created_at,
        }
    }
}

const POST_COLUMNS: &str =
    "id, owner_id, caption, image_public_id, image_url, likes, comments, version, created_at";

#[derive(Clone)]
pub struct PgPostRepository {
    pool: PgPool,
}

impl PgPostRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PostRepository for PgPostRepository {
    async fn get(&self, id: Uuid) -> RepositoryResult<Post> {
        let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1");
        sqlx::query_as::<_, PostRow>(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map(Post::from)
            .map_err(|e| map_db_error(format!("post {id}"), e))
    }

    async fn insert(&self, post: &Post) -> RepositoryResult<()> {
        let likes: Vec<Uuid> = post.likes.iter().copied().collect();

        sqlx::query(
            r#"
            INSERT INTO posts (
                id, owner_id, caption, image_public_id, image_url,
                likes, comments, version, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(post.id)
        .bind(post.owner_id)
        .bind(&post.caption)
        .bind(&post.image.public_id)
        .bind(&post.image.url)
        .bind(&likes)
        .bind(Json(&post.comments))
        .bind(post.version)
        .bind(post.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_error(format!("post {}", post.id), e))?;
        Ok(())
    }

    async fn save(&self, post: &Post) -> RepositoryResult<i64> {
        let likes: Vec<Uuid> = post.likes.iter().copied().collect();

        let new_version = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE posts SET
                caption = $2,
                image_public_id = $3,
                image_url = $4,
                likes = $5,
                comments = $6,
                version = version + 1
            WHERE id = $1 AND version = $7
            RETURNING version
            "#,
        )
        .bind(post.id)
        .bind(&post.caption)
        .bind(&post.image.public_id)
        .bind(&post.image.url)
        .bind(&likes)
        .bind(Json(&post.comments))
        .bind(post.version)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_error(format!("post {}", post.id), e))?;

        if let Some(v) = new_version {
            return Ok(v);
        }

        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM posts WHERE id = $1)")
                .bind(post.id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| map_db_error(format!("post {}", post.id), e))?;

        if exists {
            Err(RepositoryError::Conflict(format!("post {}", post.id)))
        } else {
            Err(RepositoryError::NotFound(format!("post {}", post.id)))
        }
    }

    async fn delete(&self, id: Uuid) -> RepositoryResult<()> {
        let affected = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_error(format!("post {id}"), e))?
            .rows_affected();

        if affected == 0 {
            return Err(RepositoryError::NotFound(format!("post {id}")));
        }
        Ok(())
    }

    async fn list_by_owner(&self, owner_id: Uuid) -> RepositoryResult<Vec<Post>> {
        let sql =
            format!("SELECT {POST_COLUMNS} FROM posts WHERE owner_id = $1 ORDER BY created_at");
        let rows = sqlx::query_as::<_, PostRow>(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_db_error(format!("posts of {owner_id}"), e))?;
        Ok(rows.into_iter().map(Post::from).collect())
    }
}

/// `account_deletions` table keyed by user id
#[derive(Clone)]
pub struct PgDeletionCheckpoints {
    pool: PgPool,
}

impl PgDeletionCheckpoints {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl DeletionCheckpointStore for PgDeletionCheckpoints {
    async fn record(&self, snapshot: &DeletionSnapshot) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO account_deletions (user_id, snapshot, started_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (user_id) DO UPDATE SET snapshot = EXCLUDED.snapshot
            "#,
        )
        .bind(snapshot.user_id)
        .bind(Json(snapshot))
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_error(format!("deletion checkpoint {}", snapshot.user_id), e))?;
        Ok(())
    }

    async fn load(&self, user_id: Uuid) -> RepositoryResult<Option<DeletionSnapshot>> {
        let snapshot = sqlx::query_scalar::<_, Json<DeletionSnapshot>>(
            "SELECT snapshot FROM account_deletions WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_error(format!("deletion checkpoint {user_id}"), e))?;
        Ok(snapshot.map(|s| s.0))
    }

    async fn clear(&self, user_id: Uuid) -> RepositoryResult<()> {
        sqlx::query("DELETE FROM account_deletions WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_error(format!("deletion checkpoint {user_id}"), e))?;
        Ok(())
    }
}
