/// Credential hashing using Argon2id
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use std::sync::Arc;

use crate::error::{ServiceError, ServiceResult};

/// Minimum accepted password length
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Narrow credential interface; hashing mechanics live behind it.
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, password: &str) -> ServiceResult<String>;

    fn verify(&self, password: &str, password_hash: &str) -> ServiceResult<bool>;
}

/// Argon2id with default parameters, PHC-formatted output
#[derive(Debug, Clone, Default)]
pub struct Argon2CredentialHasher;

impl CredentialHasher for Argon2CredentialHasher {
    fn hash(&self, password: &str) -> ServiceResult<String> {
        let salt = SaltString::generate(&mut OsRng);

        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| ServiceError::Internal(format!("Password hashing failed: {}", e)))
    }

    fn verify(&self, password: &str, password_hash: &str) -> ServiceResult<bool> {
        let parsed_hash = PasswordHash::new(password_hash)
            .map_err(|e| ServiceError::Internal(format!("Invalid password hash format: {}", e)))?;

        match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
            Ok(_) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(ServiceError::Internal(format!(
                "Password verification failed: {}",
                e
            ))),
        }
    }
}

/// Hash on the blocking pool; Argon2 would stall a runtime worker.
pub async fn hash_blocking(
    hasher: Arc<dyn CredentialHasher>,
    password: String,
) -> ServiceResult<String> {
    tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await
        .map_err(|e| ServiceError::Internal(format!("Password hashing task panicked: {e}")))?
}

pub async fn verify_blocking(
    hasher: Arc<dyn CredentialHasher>,
    password: String,
    password_hash: String,
) -> ServiceResult<bool> {
    tokio::task::spawn_blocking(move || hasher.verify(&password, &password_hash))
        .await
        .map_err(|e| ServiceError::Internal(format!("Password verification task panicked: {e}")))?
}

/// Reject passwords shorter than [`MIN_PASSWORD_LENGTH`]
pub fn validate_new_password(password: &str) -> ServiceResult<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ServiceError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}
