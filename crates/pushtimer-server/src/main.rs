//! pushtimer server
//!
//! Accepts web-push subscriptions over HTTP and delivers one push per
//! subscriber after a fixed delay.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use pushtimer_core::config::{self, FailurePolicy};
use pushtimer_core::tracing_init::{TelemetryGuard, init_tracing_with_metrics};

use pushtimer_server::delivery::{DeliverySettings, DeliveryWorker};
use pushtimer_server::partition::{PartitionRouter, RouterSettings, StorageLocation};
use pushtimer_server::push::WebPushClient;
use pushtimer_server::routes::{AppState, build_router};

#[derive(Parser, Debug)]
#[command(name = "pushtimer-server")]
#[command(version, about = "pushtimer server - delayed web-push delivery per subscriber")]
struct Args {
    /// Address to listen on (overrides `server.listen_addr`).
    #[arg(long, env = "PUSHTIMER_ADDR")]
    addr: Option<SocketAddr>,

    /// Root directory for partition databases.
    #[arg(long, env = "PUSHTIMER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Settings file layered over the global one.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seconds between registration and delivery.
    #[arg(long)]
    delay_secs: Option<u64>,

    /// What to do when the push service rejects a message.
    #[arg(long)]
    failure_policy: Option<FailurePolicy>,

    /// Default log level when `RUST_LOG` is unset.
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,

    /// OTLP collector endpoint (requires the `metrics` feature).
    #[cfg(feature = "metrics")]
    #[arg(long, env = "PUSHTIMER_METRICS_ENDPOINT")]
    metrics_endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = config::load_config(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.server.listen_addr = addr.to_string();
    }
    if let Some(dir) = args.data_dir {
        config.server.data_dir = Some(dir);
    }
    if let Some(delay) = args.delay_secs {
        config.delivery.delay_secs = delay;
    }
    if let Some(policy) = args.failure_policy {
        config.delivery.failure_policy = policy;
    }
    if let Some(level) = args.log_level {
        config.server.log_level = level;
    }

    #[cfg(feature = "metrics")]
    let metrics_endpoint = args.metrics_endpoint.as_deref();
    #[cfg(not(feature = "metrics"))]
    let metrics_endpoint = None;
    let telemetry = init_tracing_with_metrics(
        &format!("pushtimer_server={}", config.server.log_level),
        args.log_json,
        metrics_endpoint,
    );

    let data_dir = config
        .server
        .data_dir
        .clone()
        .or_else(config::default_data_dir)
        .ok_or_else(|| anyhow::anyhow!("Cannot determine data directory"))?;
    let addr: SocketAddr = config.server.listen_addr.parse()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %addr,
        data_dir = %data_dir.display(),
        delay_secs = config.delivery.delay_secs,
        failure_policy = ?config.delivery.failure_policy,
        "Starting pushtimer-server"
    );

    let delivery = DeliverySettings::from_config(&config)?;
    if delivery.vapid.is_none() {
        info!("VAPID keys not configured; deliveries will fail until they are");
    }
    let worker = DeliveryWorker::new(Arc::new(WebPushClient::new()?), delivery);

    let mut settings = RouterSettings::new(
        StorageLocation::Disk(data_dir),
        Duration::from_secs(config.delivery.delay_secs),
    );
    settings.idle_timeout = config.server.idle_timeout();
    settings.mailbox_capacity = config.server.mailbox_capacity;
    let router = PartitionRouter::new(settings, worker);

    router.recover().await?;

    let app = build_router(AppState {
        router: router.clone(),
    });
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "HTTP server listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    router.shutdown().await;

    shutdown_telemetry(telemetry);
    info!("pushtimer-server stopped");
    Ok(())
}

#[cfg(feature = "metrics")]
fn shutdown_telemetry(guard: TelemetryGuard) {
    if let Some(guard) = guard
        && let Err(e) = guard.shutdown()
    {
        tracing::warn!(error = %e, "Failed to flush telemetry");
    }
}

#[cfg(not(feature = "metrics"))]
const fn shutdown_telemetry(_guard: TelemetryGuard) {}
