use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use stockpulse::application::usecases::InventoryService;
use stockpulse::infrastructure::{
    broadcast_notifier::BroadcastNotifier, entry_broker::EntryEventBroker,
    log_notifier::LogNotifier, memory_store::InMemoryEntryStore, multi_notifier::MultiNotifier,
};
use stockpulse::interfaces::config::Config;
use stockpulse::interfaces::http_api::{ApiState, build_router};

#[derive(Parser, Debug)]
#[command(name = "stockpulse")]
struct Args {
    /// Path to config.yaml
    #[arg(long, default_value = "config.yaml")]
    config: String,

    /// Override the per-subscriber event queue size (0 disables buffering)
    #[arg(long)]
    queue_size: Option<usize>,

    /// Override the listen address, e.g. 0.0.0.0:8080
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("stockpulse=info".parse().unwrap()),
        )
        .init();
    if dotenvy::dotenv().is_err() {
        let _ = dotenvy::from_path(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env"));
    }
    let args = Args::parse();

    // 1) config
    let mut cfg = match Config::load_or_default(&args.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config {}: {}", args.config, e);
            std::process::exit(1);
        }
    };
    if let Some(q) = args.queue_size {
        cfg.entry_event_queue_size = q;
    }
    if let Some(b) = args.bind {
        cfg.bind_addr = b;
    }

    // 2) broker, bound to this runtime before any traffic
    let broker = Arc::new(EntryEventBroker::new());
    broker.configure(cfg.entry_event_queue_size);
    broker.set_loop(&tokio::runtime::Handle::current());

    // 3) mutation path: store + notifiers fanout
    let notifier = MultiNotifier::new(vec![
        Box::new(LogNotifier::new()),
        Box::new(BroadcastNotifier::new(broker.clone())),
    ]);
    let inventory = InventoryService::new(Arc::new(InMemoryEntryStore::new()), Arc::new(notifier));

    if cfg.api_token.is_none() {
        tracing::warn!("api_token not set, API and entry streams are open");
    }

    let app = build_router(ApiState {
        inventory,
        broker: broker.clone(),
        api_token: cfg.api_token.clone(),
    });

    // 4) serve
    let listener = match tokio::net::TcpListener::bind(&cfg.bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind {}: {e}", cfg.bind_addr);
            std::process::exit(1);
        }
    };
    tracing::info!(
        addr = %cfg.bind_addr,
        queue_size = cfg.entry_event_queue_size,
        "stockpulse listening"
    );

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(broker.clone()))
        .await
    {
        tracing::error!("server failed: {e}");
        std::process::exit(1);
    }
    tracing::info!(stats = ?broker.stats(), "stockpulse stopped");
}

/// Waits for Ctrl-C, then closes every subscriber queue so open streams end
/// and graceful shutdown can complete.
async fn shutdown_signal(broker: Arc<EntryEventBroker>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
    broker.flush().await;
    broker.shutdown().await;
}
