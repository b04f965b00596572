//! Password hashing with Argon2id
//!
//! Stored hashes are PHC strings, so parameters travel with the hash.

use crate::error::{CoreError, Result};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::rngs::OsRng;
use rand::RngCore;

/// Hash a plaintext password with a fresh random salt
///
/// # Errors
/// Returns [`CoreError::Password`] if the hasher rejects its input
pub fn hash_password(plain: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    OsRng.fill_bytes(&mut salt_bytes);
    let salt =
        SaltString::encode_b64(&salt_bytes).map_err(|e| CoreError::Password(e.to_string()))?;

    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CoreError::Password(e.to_string()))
}

/// Verify a plaintext password against a stored PHC string
///
/// A malformed stored hash never verifies.
#[must_use]
pub fn verify_password(plain: &str, phc: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(phc) else {
        tracing::warn!("stored password hash is malformed");
        return false;
    };
    Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let phc = hash_password("Admin@123").unwrap();
        assert!(phc.starts_with("$argon2"));
        assert!(verify_password("Admin@123", &phc));
        assert!(!verify_password("admin@123", &phc));
    }

    #[test]
    fn salts_differ() {
        let a = hash_password("Secret#99").unwrap();
        let b = hash_password("Secret#99").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
        assert!(!verify_password("anything", ""));
    }
}
