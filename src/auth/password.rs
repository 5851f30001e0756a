//! Password hashing and verification using Argon2id

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;

use crate::types::SpendbookError;

/// Shortest password accepted at signup
pub const MIN_PASSWORD_LEN: usize = 8;

/// Reject passwords too weak to store
pub fn check_password_strength(password: &str) -> Result<(), SpendbookError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(SpendbookError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if password.trim().is_empty() {
        return Err(SpendbookError::BadRequest(
            "Password must not be blank".into(),
        ));
    }
    Ok(())
}

/// Hash a password, returning a PHC string with salt and parameters
pub fn hash_password(password: &str) -> Result<String, SpendbookError> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| SpendbookError::Auth(format!("Failed to hash password: {e}")))
}

/// Check a password against a stored PHC hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool, SpendbookError> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| SpendbookError::Auth(format!("Invalid password hash format: {e}")))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("monthly-budget-2024").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("monthly-budget-2024", &hash).unwrap());
        assert!(!verify_password("monthly-budget-2025", &hash).unwrap());
    }

    #[test]
    fn test_salts_differ() {
        let a = hash_password("same-password").unwrap();
        let b = hash_password("same-password").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_corrupt_hash_is_error() {
        assert!(verify_password("password", "plaintext").is_err());
    }

    #[test]
    fn test_password_strength() {
        assert!(check_password_strength("short").is_err());
        assert!(check_password_strength("        ").is_err());
        assert!(check_password_strength("long-enough").is_ok());
    }
}
