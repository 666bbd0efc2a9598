//! Password hashing via bcrypt.
//!
//! bcrypt is CPU-bound, so the async helpers move the work onto the blocking
//! thread pool.

use thiserror::Error;

/// Default bcrypt cost factor.
pub const DEFAULT_COST: u32 = bcrypt::DEFAULT_COST;

/// bcrypt only looks at the first 72 bytes of its input.
pub const MAX_PASSWORD_BYTES: usize = 72;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("bcrypt: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),
    #[error("hashing task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Hash a password with the given cost.
pub fn hash_password(password: &str, cost: u32) -> Result<String, PasswordError> {
    Ok(bcrypt::hash(password, cost)?)
}

/// Verify a password against a bcrypt hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    Ok(bcrypt::verify(password, hash)?)
}

pub async fn hash_password_async(password: String, cost: u32) -> Result<String, PasswordError> {
    tokio::task::spawn_blocking(move || hash_password(&password, cost)).await?
}

pub async fn verify_password_async(password: String, hash: String) -> Result<bool, PasswordError> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash)).await?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("longenough1", 4).unwrap();
        assert!(hash.starts_with("$2"));
        assert!(verify_password("longenough1", &hash).unwrap());
        assert!(!verify_password("wrong-password", &hash).unwrap());
    }

    #[test]
    fn test_hashes_are_salted() {
        let a = hash_password("longenough1", 4).unwrap();
        let b = hash_password("longenough1", 4).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_hash_is_error() {
        assert!(verify_password("longenough1", "not-a-hash").is_err());
    }

    #[tokio::test]
    async fn test_async_helpers() {
        let hash = hash_password_async("longenough1".to_string(), 4).await.unwrap();
        assert!(verify_password_async("longenough1".to_string(), hash).await.unwrap());
    }
}
