//! Deal endpoints
//!
//! - GET  /api/v1/deals/{cid}       - deals across the caller's requests for a CID
//! - POST /api/v1/deals/{cid}/renew - negotiate successor deals for a CID
//! - GET  /providers                - ledger provider list (public)

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::db::schemas::StorageDealDoc;
use crate::server::AppState;

use super::{error_response, json_response, timestamp_string};

/// One storage deal as returned to callers
#[derive(Serialize)]
pub struct DealResponse {
    pub id: String,
    pub pin_request_id: String,
    pub deal_cid: String,
    pub provider_id: String,
    pub start_epoch: i64,
    pub end_epoch: i64,
    pub status: String,
    pub storage_price_fil: f64,
    pub created_at: String,
}

impl From<&StorageDealDoc> for DealResponse {
    fn from(doc: &StorageDealDoc) -> Self {
        Self {
            id: doc.id.to_string(),
            pin_request_id: doc.pin_request_id.to_string(),
            deal_cid: doc.deal_cid.clone(),
            provider_id: doc.provider_id.clone(),
            start_epoch: doc.start_epoch,
            end_epoch: doc.end_epoch,
            status: doc.status.to_string(),
            storage_price_fil: doc.storage_price_fil,
            created_at: timestamp_string(doc.metadata.created_at),
        }
    }
}

/// GET /deals/{cid}
pub async fn handle_deals_for_cid(
    state: Arc<AppState>,
    owner_id: Uuid,
    cid: &str,
) -> Response<Full<Bytes>> {
    match state.gateway.deals_for_cid(cid, owner_id).await {
        Ok(deals) => json_response(
            StatusCode::OK,
            &serde_json::json!({
                "deals": deals.iter().map(DealResponse::from).collect::<Vec<_>>(),
            }),
        ),
        Err(e) => error_response(&e),
    }
}

/// POST /deals/{cid}/renew
///
/// Negotiates one successor deal per pinned request the caller has for
/// this CID. Per-request failures are reported in the count, not as an
/// overall error.
pub async fn handle_renew(
    state: Arc<AppState>,
    owner_id: Uuid,
    cid: &str,
) -> Response<Full<Bytes>> {
    let requests = match state.gateway.renewable_requests(cid, owner_id).await {
        Ok(requests) => requests,
        Err(e) => return error_response(&e),
    };

    let mut renewed = 0usize;
    for request in &requests {
        match state.renewal.negotiate_successor(request).await {
            Ok(_) => renewed += 1,
            Err(e) => {
                warn!(request_id = %request.id, error = %e, "Manual renewal failed");
            }
        }
    }

    json_response(
        StatusCode::OK,
        &serde_json::json!({
            "message": "deal renewal initiated",
            "requests": requests.len(),
            "renewed": renewed,
        }),
    )
}

/// GET /providers
pub async fn handle_providers(state: Arc<AppState>) -> Response<Full<Bytes>> {
    match state.gateway.providers().await {
        Ok(providers) => {
            json_response(StatusCode::OK, &serde_json::json!({ "providers": providers }))
        }
        Err(e) => error_response(&e),
    }
}
