//! Authentication for Spendbook
//!
//! Provides:
//! - JWT bearer token generation and validation
//! - Password hashing with Argon2

pub mod jwt;
pub mod password;

pub use jwt::{extract_token_from_header, Claims, JwtValidator, TokenInput, TokenValidationResult};
pub use password::{check_password_strength, hash_password, verify_password, MIN_PASSWORD_LEN};
