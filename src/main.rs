//! Holdfast gateway - the request-facing HTTP service

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use holdfast::clients::LotusClient;
use holdfast::config::Args;
use holdfast::db::schemas::API_KEY_COLLECTION;
use holdfast::db::MongoClient;
use holdfast::jobs::JobQueue;
use holdfast::pricing::PricingService;
use holdfast::ratelimit::{RateLimiter, WINDOW};
use holdfast::server::{self, AppState};
use holdfast::services::{DealBroker, PinGateway, RenewalManager};
use holdfast::store::{MongoDealStore, MongoPinStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("holdfast={},info", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Holdfast - pinning orchestration");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {}", args.mongodb_uri);
    info!("NATS: {}", args.nats.nats_url);
    info!("IPFS API: {}", args.ipfs_api_url);
    info!("Lotus API: {}", args.lotus_api_url);
    info!("======================================");

    // Persistence
    let mongo = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => client,
        Err(e) => {
            error!("MongoDB connection failed: {}", e);
            std::process::exit(1);
        }
    };
    let pins = Arc::new(MongoPinStore::new(&mongo).await?);
    let deals = Arc::new(MongoDealStore::new(&mongo).await?);
    let api_keys = mongo.collection(API_KEY_COLLECTION).await?;

    // Job queue and rate-limit counters
    let queue = match JobQueue::connect(&args.nats, &format!("holdfast-{}", args.node_id)).await {
        Ok(queue) => queue,
        Err(e) => {
            error!("NATS connection failed: {}", e);
            std::process::exit(1);
        }
    };
    queue.ensure_stream().await?;

    let limiter = match queue.rate_limit_bucket(WINDOW).await {
        Ok(bucket) => RateLimiter::new(bucket, args.rate_limit_per_minute),
        Err(e) => {
            // Fail-open: limiting degrades, ingestion does not
            warn!("Rate-limit bucket unavailable ({}), admitting all requests", e);
            RateLimiter::disabled()
        }
    };

    // Ledger collaborator (provider list, stats, manual renewal)
    let ledger = Arc::new(LotusClient::new(&args.lotus_api_url, args.lotus_token.clone())?);

    let pricing = PricingService::from_args(&args);
    let broker = DealBroker::new(ledger.clone(), args.wallet_address.clone(), args.epochs_per_day);

    let renewal = Arc::new(RenewalManager::new(
        pins.clone(),
        deals.clone(),
        broker,
        pricing.clone(),
        args.renewal_threshold_epochs,
    ));

    let gateway = Arc::new(PinGateway::new(
        pins,
        deals,
        Arc::new(queue),
        ledger,
        pricing,
        args.wallet_address.clone(),
    ));

    let state = Arc::new(AppState::new(
        args,
        gateway,
        renewal,
        Some(api_keys),
        limiter,
    ));

    tokio::select! {
        result = server::run(Arc::clone(&state)) => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    info!("Gateway exited");
    Ok(())
}
