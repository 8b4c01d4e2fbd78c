//! HTTP routes for Holdfast

pub mod deals;
pub mod health;
pub mod pins;
pub mod pricing;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::types::HoldfastError;

pub use deals::{handle_deals_for_cid, handle_providers, handle_renew};
pub use health::{handle_stats, health_check, readiness_check, version_info};
pub use pins::{handle_cancel, handle_get_pin, handle_list_pins, handle_submit};
pub use pricing::handle_quote;

/// Serialize a value into a JSON response
pub(crate) fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_string(value)
        .unwrap_or_else(|_| r#"{"error":"internal_error"}"#.to_string());

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

/// Map a service error to its JSON response. Client errors carry their
/// message; server-side errors only leak the stable classification.
pub(crate) fn error_response(err: &HoldfastError) -> Response<Full<Bytes>> {
    let status = err.status_code();
    let detail = err.to_string();

    let message = if status.is_client_error() {
        Some(detail.as_str())
    } else {
        None
    };

    json_response(
        status,
        &ErrorBody {
            error: err.classification(),
            message,
        },
    )
}

/// Format a BSON timestamp for response bodies
pub(crate) fn timestamp_string(stamp: Option<bson::DateTime>) -> String {
    stamp
        .and_then(|t| t.try_to_rfc3339_string().ok())
        .unwrap_or_default()
}
