pub mod password;
pub mod token;

pub use password::{Argon2CredentialHasher, CredentialHasher};
