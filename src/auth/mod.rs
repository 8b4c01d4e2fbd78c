//! Authentication for the request-facing surface
//!
//! Accepts either a bearer JWT or an API key. Keys are looked up hashed
//! in MongoDB and resolve to the owning account; tokens are validated
//! locally. Authorization failures surface as 401 with no detail about
//! which mechanism failed.

pub mod token;

use bson::doc;
use hyper::header::HeaderMap;

use crate::db::schemas::{hash_key, ApiKeyDoc};
use crate::db::MongoCollection;
use crate::types::{HoldfastError, Result};
use uuid::Uuid;

pub use token::{Claims, JwtValidator};

/// Pull a credential out of the request: `Authorization: Bearer <token>`,
/// `X-API-Key`, or a `token` query parameter, in that order.
pub fn extract_token(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        let mut parts = auth.splitn(2, ' ');
        if let (Some(scheme), Some(token)) = (parts.next(), parts.next()) {
            if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        if !key.is_empty() {
            return Some(key.to_string());
        }
    }

    query.and_then(|q| {
        q.split('&').find_map(|pair| {
            pair.strip_prefix("token=")
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string())
        })
    })
}

/// Resolve a credential to an owner id. JWT first, then API key.
pub async fn authenticate(
    jwt: &JwtValidator,
    api_keys: Option<&MongoCollection<ApiKeyDoc>>,
    credential: &str,
) -> Result<Uuid> {
    if let Ok(owner) = jwt.validate(credential) {
        return Ok(owner);
    }

    if let Some(collection) = api_keys {
        let found = collection
            .find_one(doc! {
                "key_hash": hash_key(credential),
                "is_active": true,
            })
            .await?;

        if let Some(key) = found {
            return Ok(key.owner_id);
        }
    }

    Err(HoldfastError::Unauthorized("invalid credentials".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    #[test]
    fn test_extract_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc123"));
        assert_eq!(extract_token(&headers, None), Some("abc123".to_string()));
    }

    #[test]
    fn test_extract_api_key_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("key456"));
        assert_eq!(extract_token(&headers, None), Some("key456".to_string()));
    }

    #[test]
    fn test_bearer_takes_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc"));
        headers.insert("x-api-key", HeaderValue::from_static("key"));
        assert_eq!(extract_token(&headers, None), Some("abc".to_string()));
    }

    #[test]
    fn test_extract_query_token() {
        let headers = HeaderMap::new();
        assert_eq!(
            extract_token(&headers, Some("page=1&token=qtok")),
            Some("qtok".to_string())
        );
        assert_eq!(extract_token(&headers, Some("page=1")), None);
    }

    #[test]
    fn test_missing_credential() {
        assert_eq!(extract_token(&HeaderMap::new(), None), None);
    }
}
