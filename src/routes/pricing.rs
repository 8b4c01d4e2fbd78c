//! Price quote endpoint
//!
//! GET /pricing?size_bytes&duration_days - public, no auth

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::pricing::PricingInfo;
use crate::server::AppState;
use crate::types::HoldfastError;

use super::{error_response, json_response};
use super::pins::parse_query;

/// Defaults when no parameters are given: 1 GiB for 30 days
const DEFAULT_SIZE_BYTES: u64 = 1 << 30;
const DEFAULT_DURATION_DAYS: i64 = 30;

#[derive(Serialize)]
struct QuoteResponse {
    size_bytes: u64,
    duration_days: i64,
    price_fil: rust_decimal::Decimal,
    pricing: PricingInfo,
}

/// GET /pricing
pub async fn handle_quote(state: Arc<AppState>, query: Option<&str>) -> Response<Full<Bytes>> {
    let mut size_bytes = DEFAULT_SIZE_BYTES;
    let mut duration_days = DEFAULT_DURATION_DAYS;

    for (key, value) in parse_query(query) {
        match key {
            "size_bytes" => {
                size_bytes = match value.parse() {
                    Ok(v) => v,
                    Err(_) => {
                        return error_response(&HoldfastError::Validation(
                            "size_bytes must be a non-negative integer".into(),
                        ))
                    }
                }
            }
            "duration_days" => {
                duration_days = match value.parse() {
                    Ok(v) if v > 0 => v,
                    _ => {
                        return error_response(&HoldfastError::Validation(
                            "duration_days must be a positive integer".into(),
                        ))
                    }
                }
            }
            _ => {}
        }
    }

    json_response(
        StatusCode::OK,
        &QuoteResponse {
            size_bytes,
            duration_days,
            price_fil: state.gateway.quote(size_bytes, duration_days),
            pricing: state.gateway.pricing_info(),
        },
    )
}
