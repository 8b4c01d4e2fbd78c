//! JWT issuing and validation
//!
//! HS256 bearer tokens carrying the owner id. The secret is injected at
//! construction; there is no process-global key state.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{HoldfastError, Result};

/// Claims carried by an access token
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Owner id (hyphenated UUID)
    pub sub: String,
    /// Expiry, seconds since epoch
    pub exp: u64,
    /// Issued at, seconds since epoch
    pub iat: u64,
}

/// Validates and issues bearer tokens
#[derive(Clone)]
pub struct JwtValidator {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtValidator {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Issue a token for an owner
    pub fn issue(&self, owner_id: Uuid, ttl_secs: u64) -> Result<String> {
        let now = chrono::Utc::now().timestamp() as u64;
        let claims = Claims {
            sub: owner_id.to_string(),
            exp: now + ttl_secs,
            iat: now,
        };

        encode(&Header::default(), &claims, &self.encoding).map_err(Into::into)
    }

    /// Validate a token and return the owner id
    pub fn validate(&self, token: &str) -> Result<Uuid> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())?;

        Uuid::parse_str(&data.claims.sub)
            .map_err(|_| HoldfastError::Unauthorized("malformed subject claim".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let validator = JwtValidator::new("test-secret");
        let owner = Uuid::new_v4();

        let token = validator.issue(owner, 3600).unwrap();
        assert_eq!(validator.validate(&token).unwrap(), owner);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let issuer = JwtValidator::new("secret-a");
        let verifier = JwtValidator::new("secret-b");

        let token = issuer.issue(Uuid::new_v4(), 3600).unwrap();
        assert!(verifier.validate(&token).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        let validator = JwtValidator::new("test-secret");
        assert!(validator.validate("not.a.token").is_err());
    }
}
