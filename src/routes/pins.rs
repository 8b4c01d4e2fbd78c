//! Pin request endpoints
//!
//! - POST   /api/v1/pin       - submit a pin request (202 Accepted)
//! - GET    /api/v1/pin/{id}  - fetch one request
//! - GET    /api/v1/pins      - list the caller's requests, paginated
//! - DELETE /api/v1/pin/{id}  - cancel a pending request

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::schemas::PinRequestDoc;
use crate::server::AppState;
use crate::services::DEFAULT_PAGE_LIMIT;
use crate::types::HoldfastError;

use super::{error_response, json_response, timestamp_string};

#[derive(Deserialize)]
struct SubmitBody {
    cid: String,
    duration_days: i64,
}

#[derive(Serialize)]
struct SubmitResponse {
    id: String,
    message: &'static str,
}

/// One pin request as returned to callers
#[derive(Serialize)]
pub struct PinResponse {
    pub id: String,
    pub cid: String,
    pub status: String,
    pub size_bytes: i64,
    pub price_fil: Decimal,
    pub duration_days: i64,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl From<&PinRequestDoc> for PinResponse {
    fn from(doc: &PinRequestDoc) -> Self {
        Self {
            id: doc.id.to_string(),
            cid: doc.cid.clone(),
            status: doc.status.to_string(),
            size_bytes: doc.size_bytes,
            price_fil: doc.price_fil,
            duration_days: doc.duration_days,
            created_at: timestamp_string(doc.metadata.created_at),
            failure_reason: doc.failure_reason.clone(),
        }
    }
}

#[derive(Serialize)]
struct ListResponse {
    pins: Vec<PinResponse>,
    total: u64,
    page: u64,
    limit: u64,
}

/// POST /pin
pub async fn handle_submit(
    state: Arc<AppState>,
    owner_id: Uuid,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let parsed: SubmitBody = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            return error_response(&HoldfastError::Validation(format!(
                "invalid request body: {e}"
            )))
        }
    };

    match state
        .gateway
        .submit(owner_id, &parsed.cid, parsed.duration_days)
        .await
    {
        Ok(id) => json_response(
            StatusCode::ACCEPTED,
            &SubmitResponse {
                id: id.to_string(),
                message: "pin request accepted",
            },
        ),
        Err(e) => error_response(&e),
    }
}

/// GET /pin/{id}
pub async fn handle_get_pin(
    state: Arc<AppState>,
    owner_id: Uuid,
    id: &str,
) -> Response<Full<Bytes>> {
    let id = match parse_request_id(id) {
        Ok(id) => id,
        Err(e) => return error_response(&e),
    };

    match state.gateway.get(id, owner_id).await {
        Ok(request) => json_response(StatusCode::OK, &PinResponse::from(&request)),
        Err(e) => error_response(&e),
    }
}

/// GET /pins?page&limit&status
pub async fn handle_list_pins(
    state: Arc<AppState>,
    owner_id: Uuid,
    query: Option<&str>,
) -> Response<Full<Bytes>> {
    let mut page: u64 = 1;
    let mut limit: u64 = DEFAULT_PAGE_LIMIT;
    let mut status: Option<String> = None;

    for (key, value) in parse_query(query) {
        match key {
            "page" => {
                page = match value.parse() {
                    Ok(v) => v,
                    Err(_) => {
                        return error_response(&HoldfastError::Validation(
                            "page must be a positive integer".into(),
                        ))
                    }
                }
            }
            "limit" => {
                limit = match value.parse() {
                    Ok(v) => v,
                    Err(_) => {
                        return error_response(&HoldfastError::Validation(
                            "limit must be a positive integer".into(),
                        ))
                    }
                }
            }
            "status" => status = Some(value.to_string()),
            _ => {}
        }
    }

    match state
        .gateway
        .list(owner_id, page, limit, status.as_deref())
        .await
    {
        Ok((items, total)) => json_response(
            StatusCode::OK,
            &ListResponse {
                pins: items.iter().map(PinResponse::from).collect(),
                total,
                page,
                limit,
            },
        ),
        Err(e) => error_response(&e),
    }
}

/// DELETE /pin/{id}
pub async fn handle_cancel(
    state: Arc<AppState>,
    owner_id: Uuid,
    id: &str,
) -> Response<Full<Bytes>> {
    let id = match parse_request_id(id) {
        Ok(id) => id,
        Err(e) => return error_response(&e),
    };

    match state.gateway.cancel(id, owner_id).await {
        Ok(()) => json_response(
            StatusCode::OK,
            &serde_json::json!({ "message": "pin request cancelled" }),
        ),
        Err(e) => error_response(&e),
    }
}

fn parse_request_id(raw: &str) -> Result<Uuid, HoldfastError> {
    Uuid::parse_str(raw)
        .map_err(|_| HoldfastError::Validation(format!("invalid pin request id: {raw}")))
}

/// Split a query string into key/value pairs. No percent decoding; none
/// of the accepted parameters need it.
pub(crate) fn parse_query(query: Option<&str>) -> impl Iterator<Item = (&str, &str)> {
    query
        .unwrap_or("")
        .split('&')
        .filter_map(|pair| pair.split_once('='))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query() {
        let pairs: Vec<_> = parse_query(Some("page=2&limit=20&status=pinned")).collect();
        assert_eq!(
            pairs,
            vec![("page", "2"), ("limit", "20"), ("status", "pinned")]
        );
    }

    #[test]
    fn test_parse_query_empty() {
        assert_eq!(parse_query(None).count(), 0);
        assert_eq!(parse_query(Some("")).count(), 0);
    }

    #[test]
    fn test_parse_request_id() {
        assert!(parse_request_id(&Uuid::new_v4().to_string()).is_ok());
        assert!(parse_request_id("not-a-uuid").is_err());
    }
}
