/// Reset token generation and one-way hashing
use rand::{distributions::Alphanumeric, Rng};
use sha2::{Digest, Sha256};

/// Raw token length (before hashing)
pub const TOKEN_LENGTH: usize = 40;

/// Generate a high-entropy alphanumeric token
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// SHA-256 hex digest; only this is ever stored
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
