//! HTTP server implementation
//!
//! hyper http1 with a manual (method, path) router. Authenticated routes
//! resolve an owner id first, then pass through the shared rate limiter
//! before reaching their handler.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::{self, JwtValidator};
use crate::config::Args;
use crate::db::schemas::ApiKeyDoc;
use crate::db::MongoCollection;
use crate::ratelimit::RateLimiter;
use crate::routes;
use crate::services::{PinGateway, RenewalManager};
use crate::types::HoldfastError;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub gateway: Arc<PinGateway>,
    pub renewal: Arc<RenewalManager>,
    pub jwt: JwtValidator,
    pub api_keys: Option<MongoCollection<ApiKeyDoc>>,
    pub limiter: RateLimiter,
    pub database_connected: bool,
    pub queue_connected: bool,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        args: Args,
        gateway: Arc<PinGateway>,
        renewal: Arc<RenewalManager>,
        api_keys: Option<MongoCollection<ApiKeyDoc>>,
        limiter: RateLimiter,
    ) -> Self {
        let jwt = JwtValidator::new(&args.jwt_secret());
        Self {
            args,
            gateway,
            renewal,
            jwt,
            api_keys,
            limiter,
            database_connected: true,
            queue_connected: true,
            started_at: Instant::now(),
        }
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<(), HoldfastError> {
    let listener = TcpListener::bind(state.args.listen)
        .await
        .map_err(|e| HoldfastError::Config(format!("Failed to bind {}: {e}", state.args.listen)))?;

    info!(
        "Holdfast gateway listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - anonymous access allowed");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(|q| q.to_string());

    let request_id = Uuid::new_v4();
    info!(request_id = %request_id, client = %addr, %method, %path, "HTTP request");

    let mut response = route(state, method, &path, query.as_deref(), req).await;
    if let Ok(value) = request_id.to_string().parse() {
        response.headers_mut().insert("X-Request-ID", value);
    }

    Ok(response)
}

async fn route(
    state: Arc<AppState>,
    method: Method,
    path: &str,
    query: Option<&str>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    // CORS preflight
    if method == Method::OPTIONS {
        return preflight_response();
    }

    // The versioned prefix is an alias for every route
    let path = path.strip_prefix("/api/v1").unwrap_or(path);

    // Public endpoints
    match (&method, path) {
        (&Method::GET, "/health") | (&Method::GET, "/healthz") => {
            return routes::health_check(state);
        }
        (&Method::GET, "/ready") | (&Method::GET, "/readyz") => {
            return routes::readiness_check(state);
        }
        (&Method::GET, "/version") => return routes::version_info(),
        (&Method::GET, "/pricing") => return routes::handle_quote(state, query).await,
        (&Method::GET, "/providers") => return routes::handle_providers(state).await,
        (&Method::GET, "/stats") => return routes::handle_stats(state).await,
        _ => {}
    }

    // Everything else requires a resolved owner
    let owner_id = match resolve_owner(&state, &req, query).await {
        Ok(owner) => owner,
        Err(e) => return routes::error_response(&e),
    };

    if let Err(e) = state.limiter.check(owner_id).await {
        return routes::error_response(&e);
    }

    match (&method, path) {
        (&Method::POST, "/pin") => {
            let body = match read_body(req).await {
                Ok(body) => body,
                Err(e) => return routes::error_response(&e),
            };
            routes::handle_submit(state, owner_id, body).await
        }
        (&Method::GET, "/pins") => routes::handle_list_pins(state, owner_id, query).await,
        (&Method::GET, p) if p.starts_with("/pin/") => {
            let id = &p["/pin/".len()..];
            routes::handle_get_pin(state, owner_id, id).await
        }
        (&Method::DELETE, p) if p.starts_with("/pin/") => {
            let id = &p["/pin/".len()..];
            routes::handle_cancel(state, owner_id, id).await
        }
        (&Method::POST, p) if p.starts_with("/deals/") && p.ends_with("/renew") => {
            let cid = &p["/deals/".len()..p.len() - "/renew".len()];
            routes::handle_renew(state, owner_id, cid).await
        }
        (&Method::GET, p) if p.starts_with("/deals/") => {
            let cid = &p["/deals/".len()..];
            routes::handle_deals_for_cid(state, owner_id, cid).await
        }
        _ => not_found_response(path),
    }
}

/// Authenticate the request to an owner id. Dev mode admits anonymous
/// callers under the nil owner.
async fn resolve_owner(
    state: &AppState,
    req: &Request<Incoming>,
    query: Option<&str>,
) -> Result<Uuid, HoldfastError> {
    let credential = auth::extract_token(req.headers(), query);

    match credential {
        Some(credential) => {
            auth::authenticate(&state.jwt, state.api_keys.as_ref(), &credential).await
        }
        None if state.args.dev_mode => Ok(Uuid::nil()),
        None => Err(HoldfastError::Unauthorized(
            "missing authentication token".into(),
        )),
    }
}

async fn read_body(req: Request<Incoming>) -> Result<Bytes, HoldfastError> {
    req.into_body()
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| HoldfastError::Validation(format!("failed to read request body: {e}")))
}

fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, DELETE, OPTIONS")
        .header(
            "Access-Control-Allow-Headers",
            "Content-Type, Authorization, X-API-Key",
        )
        .header("Access-Control-Max-Age", "86400")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    routes::error_response(&HoldfastError::NotFound(format!("no route for {path}")))
}
