//! Single-use password reset tokens.
//!
//! Only the SHA-256 hash of a token is stored, together with its expiry, on
//! the user aggregate. The raw token exists only in the mail that carries it.

use chrono::{DateTime, Utc};
use resilience::RetryConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::email::Mailer;
use super::{retry_on_conflict, within_deadline};
use crate::clock::Clock;
use crate::config::ResetSettings;
use crate::domain::ResetToken;
use crate::error::{ServiceError, ServiceResult};
use crate::metrics::RESET_TOKENS_TOTAL;
use crate::repository::UserRepository;
use crate::security::password::{hash_blocking, validate_new_password, CredentialHasher};
use crate::security::token::{generate_token, hash_token};

const RESET_SUBJECT: &str = "Reset Password";

/// Raw token handed back by `issue`, for out-of-band delivery only
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedResetToken {
    pub raw_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of a mailed reset request; never carries the raw token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetDispatch {
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PasswordResetTokenService {
    users: Arc<dyn UserRepository>,
    mailer: Arc<dyn Mailer>,
    hasher: Arc<dyn CredentialHasher>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    base_url: String,
    retry: RetryConfig,
    request_timeout: Duration,
}

impl PasswordResetTokenService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: Arc<dyn UserRepository>,
        mailer: Arc<dyn Mailer>,
        hasher: Arc<dyn CredentialHasher>,
        clock: Arc<dyn Clock>,
        settings: &ResetSettings,
        retry: RetryConfig,
        request_timeout: Duration,
    ) -> Self {
        Self {
            users,
            mailer,
            hasher,
            clock,
            ttl: chrono::Duration::minutes(settings.token_ttl_minutes),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            retry,
            request_timeout,
        }
    }

    /// Store a fresh token hash and expiry on the user, replacing any earlier
    /// token, and return the raw token.
    pub async fn issue(&self, user_id: Uuid) -> ServiceResult<IssuedResetToken> {
        let issued = within_deadline(
            self.request_timeout,
            "issue_reset_token",
            retry_on_conflict(&self.retry, || self.store_new_token(user_id)),
        )
        .await?;

        RESET_TOKENS_TOTAL.with_label_values(&["issued"]).inc();
        info!(user_id = %user_id, expires_at = %issued.expires_at, "Password reset token issued");
        Ok(issued)
    }

    async fn store_new_token(&self, user_id: Uuid) -> ServiceResult<IssuedResetToken> {
        let mut user = self.users.get(user_id).await?;

        let raw_token = generate_token();
        let expires_at = self.clock.now() + self.ttl;
        user.reset_token = Some(ResetToken {
            token_hash: hash_token(&raw_token),
            expires_at,
        });

        self.users.save(&user).await?;
        Ok(IssuedResetToken {
            raw_token,
            expires_at,
        })
    }

    /// Issue a token for the account registered under `email` and mail the
    /// reset link. When delivery fails the token is withdrawn again.
    pub async fn request_reset(&self, email: &str) -> ServiceResult<ResetDispatch> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(ServiceError::Validation("A valid email is required".to_string()));
        }

        let user = self
            .users
            .find_by_email(email)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("user with email {email}")))?;

        let issued = self.issue(user.id).await?;
        let link = format!("{}/{}", self.base_url, issued.raw_token);
        let body = format!(
            "Reset your password by clicking on the link below:\n\n{link}\n\nThe link expires at {}.",
            issued.expires_at.to_rfc3339()
        );

        let sent = within_deadline(self.request_timeout, "send_reset_mail", async {
            self.mailer
                .send(&user.email, RESET_SUBJECT, &body)
                .await
                .map_err(ServiceError::from)
        })
        .await;

        if let Err(e) = sent {
            RESET_TOKENS_TOTAL.with_label_values(&["mail_failed"]).inc();
            warn!(user_id = %user.id, error = %e, "Reset mail not delivered; withdrawing token");

            if let Err(revoke_err) = self
                .revoke_matching(user.id, &hash_token(&issued.raw_token))
                .await
            {
                error!(
                    user_id = %user.id,
                    error = %revoke_err,
                    "Failed to withdraw undelivered reset token"
                );
            }
            return Err(ServiceError::ExternalService(e.to_string()));
        }

        Ok(ResetDispatch {
            user_id: user.id,
            expires_at: issued.expires_at,
        })
    }

    /// Clear any pending token on the user
    pub async fn revoke(&self, user_id: Uuid) -> ServiceResult<()> {
        retry_on_conflict(&self.retry, || self.clear_token(user_id, None)).await?;
        Ok(())
    }

    /// Clear the pending token only if it is still the one with `token_hash`;
    /// a newer token issued in the meantime is left alone.
    async fn revoke_matching(&self, user_id: Uuid, token_hash: &str) -> ServiceResult<()> {
        let cleared =
            retry_on_conflict(&self.retry, || self.clear_token(user_id, Some(token_hash))).await?;
        if cleared {
            RESET_TOKENS_TOTAL.with_label_values(&["revoked"]).inc();
        }
        Ok(())
    }

    async fn clear_token(&self, user_id: Uuid, only_hash: Option<&str>) -> ServiceResult<bool> {
        let mut user = self.users.get(user_id).await?;

        let matches = match (&user.reset_token, only_hash) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(token), Some(hash)) => token.token_hash == hash,
        };
        if !matches {
            return Ok(false);
        }

        user.reset_token = None;
        self.users.save(&user).await?;
        Ok(true)
    }

    /// Set a new password using a raw reset token.
    ///
    /// The token is cleared in the same write as the credential change, so a
    /// second call with the same token fails.
    pub async fn consume(&self, raw_token: &str, new_password: &str) -> ServiceResult<Uuid> {
        if raw_token.trim().is_empty() {
            return Err(ServiceError::Validation("Reset token is required".to_string()));
        }
        validate_new_password(new_password)?;

        let token_hash = hash_token(raw_token);
        let password_hash = hash_blocking(self.hasher.clone(), new_password.to_string()).await?;

        let result = within_deadline(
            self.request_timeout,
            "consume_reset_token",
            retry_on_conflict(&self.retry, || {
                self.apply_reset(&token_hash, &password_hash)
            }),
        )
        .await;

        match &result {
            Ok(user_id) => {
                RESET_TOKENS_TOTAL.with_label_values(&["consumed"]).inc();
                info!(user_id = %user_id, "Password reset completed");
            }
            Err(ServiceError::InvalidOrExpiredToken) => {
                RESET_TOKENS_TOTAL.with_label_values(&["rejected"]).inc();
            }
            Err(e) => warn!(error = %e, "Password reset failed"),
        }
        result
    }

    async fn apply_reset(&self, token_hash: &str, password_hash: &str) -> ServiceResult<Uuid> {
        let mut user = self
            .users
            .find_by_reset_token_hash(token_hash)
            .await?
            .ok_or(ServiceError::InvalidOrExpiredToken)?;

        let now = self.clock.now();
        let usable = user
            .reset_token
            .as_ref()
            .is_some_and(|token| token.is_usable(token_hash, now));
        if !usable {
            return Err(ServiceError::InvalidOrExpiredToken);
        }

        user.password_hash = password_hash.to_string();
        user.reset_token = None;
        self.users.save(&user).await?;
        Ok(user.id)
    }
}
