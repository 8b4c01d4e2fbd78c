//! Holdfast worker - job executors plus the periodic managers

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use holdfast::clients::{IpfsClient, LotusClient};
use holdfast::config::Args;
use holdfast::db::MongoClient;
use holdfast::jobs::scheduler::{shutdown_channel, SchedulerConfig};
use holdfast::jobs::{JobQueue, JobScheduler};
use holdfast::pricing::PricingService;
use holdfast::services::{CleanupManager, DealBroker, DealMonitor, PinProcessor, RenewalManager};
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
    info!("  Holdfast worker");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Executors: {}", args.worker_concurrency);
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

    // Queue
    let queue = match JobQueue::connect(&args.nats, &format!("holdfast-worker-{}", args.node_id)).await
    {
        Ok(queue) => queue,
        Err(e) => {
            error!("NATS connection failed: {}", e);
            std::process::exit(1);
        }
    };

    // Collaborators
    let content = Arc::new(IpfsClient::new(
        &args.ipfs_api_url,
        Duration::from_secs(args.ipfs_timeout_secs),
    )?);
    let ledger = Arc::new(LotusClient::new(&args.lotus_api_url, args.lotus_token.clone())?);

    let pricing = PricingService::from_args(&args);

    // Services
    let processor = Arc::new(PinProcessor::new(
        pins.clone(),
        deals.clone(),
        content,
        DealBroker::new(ledger.clone(), args.wallet_address.clone(), args.epochs_per_day),
        pricing.clone(),
        args.unpin_on_failure,
    ));

    let monitor = Arc::new(DealMonitor::new(
        deals.clone(),
        ledger.clone(),
        args.worker_concurrency,
    ));

    let renewal = Arc::new(RenewalManager::new(
        pins.clone(),
        deals.clone(),
        DealBroker::new(ledger, args.wallet_address.clone(), args.epochs_per_day),
        pricing,
        args.renewal_threshold_epochs,
    ));

    let cleanup = Arc::new(CleanupManager::new(
        pins.clone(),
        args.cleanup_retention_days,
        args.cleanup_action,
    ));

    let scheduler = JobScheduler::new(
        queue,
        processor,
        monitor,
        renewal,
        cleanup,
        pins,
        SchedulerConfig::from_args(&args),
    );

    let (handle, shutdown_rx) = shutdown_channel();

    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        handle.shutdown();
    });

    scheduler.run(shutdown_rx).await?;

    info!("Worker exited");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
