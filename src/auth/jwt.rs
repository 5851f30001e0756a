//! JWT bearer tokens
//!
//! Tokens are HS256-signed and carry the user's id as `sub`. The `version`
//! claim must match the user's `token_version`; bumping it on the user
//! document revokes every token issued before.

use bson::oid::ObjectId;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::SpendbookError;

/// Minimum secret length accepted outside dev mode
const MIN_SECRET_LEN: usize = 32;

/// Payload stored in a token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// User document id (hex)
    pub sub: String,
    pub email: String,
    /// Must equal the user's `token_version`
    pub version: u32,
    pub iat: u64,
    pub exp: u64,
}

impl Claims {
    /// Parse the subject back into a document id
    pub fn user_id(&self) -> Result<ObjectId, SpendbookError> {
        ObjectId::parse_str(&self.sub)
            .map_err(|_| SpendbookError::Unauthorized("Malformed token subject".into()))
    }
}

/// Input for creating a new token
#[derive(Debug, Clone)]
pub struct TokenInput {
    pub user_id: ObjectId,
    pub email: String,
    pub token_version: u32,
}

/// Result of token validation
#[derive(Debug)]
pub struct TokenValidationResult {
    pub valid: bool,
    pub claims: Option<Claims>,
    pub error: Option<String>,
}

impl TokenValidationResult {
    pub fn valid(claims: Claims) -> Self {
        Self {
            valid: true,
            claims: Some(claims),
            error: None,
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            claims: None,
            error: Some(error.into()),
        }
    }

    /// Convert into claims or an `Unauthorized` error
    pub fn into_claims(self) -> Result<Claims, SpendbookError> {
        match self.claims {
            Some(claims) if self.valid => Ok(claims),
            _ => Err(SpendbookError::Unauthorized(
                self.error.unwrap_or_else(|| "Invalid token".into()),
            )),
        }
    }
}

/// JWT validator and generator
#[derive(Clone)]
pub struct JwtValidator {
    secret: String,
    expiry_seconds: u64,
}

impl JwtValidator {
    /// Create a validator, rejecting empty or short secrets
    pub fn new(secret: String, expiry_seconds: u64) -> Result<Self, SpendbookError> {
        if secret.is_empty() {
            return Err(SpendbookError::Config(
                "JWT_SECRET is required in production mode".into(),
            ));
        }

        if secret.len() < MIN_SECRET_LEN {
            return Err(SpendbookError::Config(format!(
                "JWT_SECRET must be at least {MIN_SECRET_LEN} characters"
            )));
        }

        Ok(Self {
            secret,
            expiry_seconds,
        })
    }

    /// Validator for dev mode with a fixed, insecure secret
    pub fn new_dev(expiry_seconds: u64) -> Self {
        Self {
            secret: "dev-mode-secret-not-for-production-use-123456".into(),
            expiry_seconds,
        }
    }

    /// Build the validator described by the service configuration
    pub fn from_args(args: &crate::config::Args) -> Result<Self, SpendbookError> {
        match (&args.jwt_secret, args.dev_mode) {
            (Some(secret), _) => Self::new(secret.clone(), args.jwt_expiry_seconds),
            (None, true) => Ok(Self::new_dev(args.jwt_expiry_seconds)),
            (None, false) => Err(SpendbookError::Config(
                "JWT_SECRET is required in production mode".into(),
            )),
        }
    }

    /// Sign a token; returns the token and its expiry (Unix seconds)
    pub fn generate_token(&self, input: TokenInput) -> Result<(String, u64), SpendbookError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| SpendbookError::Auth(format!("System time error: {}", e)))?
            .as_secs();

        let claims = Claims {
            sub: input.user_id.to_hex(),
            email: input.email,
            version: input.token_version,
            iat: now,
            exp: now + self.expiry_seconds,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| SpendbookError::Auth(format!("Failed to generate token: {}", e)))?;

        Ok((token, claims.exp))
    }

    /// Verify and decode a token
    pub fn verify_token(&self, token: &str) -> TokenValidationResult {
        match decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        ) {
            Ok(data) => TokenValidationResult::valid(data.claims),
            Err(err) => {
                use jsonwebtoken::errors::ErrorKind;
                let error_msg = match err.kind() {
                    ErrorKind::ExpiredSignature => "Token expired",
                    ErrorKind::InvalidToken => "Invalid token",
                    ErrorKind::InvalidSignature => "Invalid signature",
                    _ => "Token validation failed",
                };
                TokenValidationResult::invalid(error_msg)
            }
        }
    }
}

/// Extract token from an Authorization header value.
/// Accepts "Bearer <token>" and raw tokens.
pub fn extract_token_from_header(auth_header: Option<&str>) -> Option<&str> {
    let header = auth_header?;

    if let Some(token) = header.strip_prefix("Bearer ") {
        let token = token.trim();
        return (!token.is_empty()).then_some(token);
    }

    let token = header.trim();
    (!token.is_empty() && !token.contains(' ')).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> JwtValidator {
        JwtValidator::new("test-secret-that-is-at-least-32-characters-long".into(), 3600).unwrap()
    }

    fn input() -> TokenInput {
        TokenInput {
            user_id: ObjectId::new(),
            email: "ada@example.com".into(),
            token_version: 1,
        }
    }

    #[test]
    fn test_generate_and_verify_token() {
        let jwt = validator();
        let input = input();
        let user_id = input.user_id;

        let (token, exp) = jwt.generate_token(input).unwrap();
        let claims = jwt.verify_token(&token).into_claims().unwrap();

        assert_eq!(claims.user_id().unwrap(), user_id);
        assert_eq!(claims.email, "ada@example.com");
        assert_eq!(claims.version, 1);
        assert_eq!(claims.exp, exp);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_invalid_token() {
        let result = validator().verify_token("not.a.token");
        assert!(!result.valid);
        assert!(matches!(
            result.into_claims(),
            Err(SpendbookError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_wrong_secret() {
        let other =
            JwtValidator::new("another-secret-that-is-at-least-32-characters".into(), 3600)
                .unwrap();
        let (token, _) = validator().generate_token(input()).unwrap();

        assert!(!other.verify_token(&token).valid);
    }

    #[test]
    fn test_secret_validation() {
        assert!(JwtValidator::new("short".into(), 3600).is_err());
        assert!(JwtValidator::new(String::new(), 3600).is_err());
        assert!(JwtValidator::new("x".repeat(32), 3600).is_ok());
    }

    #[test]
    fn test_extract_token_from_header() {
        assert_eq!(extract_token_from_header(Some("Bearer abc123")), Some("abc123"));
        assert_eq!(extract_token_from_header(Some("abc123")), Some("abc123"));
        assert_eq!(extract_token_from_header(None), None);
        assert_eq!(extract_token_from_header(Some("")), None);
        assert_eq!(extract_token_from_header(Some("Bearer ")), None);
        assert_eq!(extract_token_from_header(Some("Basic abc123")), None);
    }

    #[test]
    fn test_malformed_subject() {
        let claims = Claims {
            sub: "nope".into(),
            email: "a@b.c".into(),
            version: 1,
            iat: 0,
            exp: 0,
        };
        assert!(claims.user_id().is_err());
    }
}
