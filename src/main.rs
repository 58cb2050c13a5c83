//! Mihoscope - CLI entry point
//!
//! Connects to a mihomo-compatible daemon's external controller, streams
//! connection snapshots through the reconciliation core, and logs a
//! periodic summary. Rendering proper lives in external front ends; this
//! binary exists to run the core against a live daemon.

use clap::Parser;
use mihoscope::client::HttpDaemonApi;
use mihoscope::prefs::MemoryPrefs;
use mihoscope::series::{METRIC_DOWN, METRIC_UP};
use mihoscope::stream::PollingTransport;
use mihoscope::{Dashboard, VERSION};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "mihoscope")]
#[command(version = VERSION)]
#[command(about = "Telemetry reconciliation core for mihomo-compatible dashboards")]
struct Args {
    /// External controller URL of the daemon
    #[arg(short = 'u', long = "url", default_value = "http://127.0.0.1:9090")]
    url: String,

    /// External controller secret
    #[arg(long = "secret")]
    secret: Option<String>,

    /// Snapshot poll interval in seconds
    #[arg(long = "interval", default_value_t = 1)]
    interval: u64,

    /// Summary log interval in seconds
    #[arg(long = "summary-interval", default_value_t = 5)]
    summary_interval: u64,
}

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("mihoscope-worker")
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mihoscope=info".parse()?),
        )
        .init();

    let args = Args::parse();
    info!("Mihoscope v{}", VERSION);
    info!("Connecting to daemon at {}", args.url);

    let api = match HttpDaemonApi::new(&args.url, args.secret.clone()) {
        Ok(api) => Arc::new(api),
        Err(e) => {
            error!("Invalid daemon URL: {}", e);
            std::process::exit(1);
        }
    };

    let transport = Arc::new(PollingTransport::with_interval(
        api.clone(),
        Duration::from_secs(args.interval.max(1)),
    ));
    let prefs = Arc::new(MemoryPrefs::new());
    let dashboard = Dashboard::new(api, transport, prefs);
    dashboard.start();

    let mut summary = tokio::time::interval(Duration::from_secs(args.summary_interval.max(1)));
    summary.tick().await;

    loop {
        tokio::select! {
            _ = summary.tick() => {
                let active = dashboard.active_connections();
                let closed = dashboard.closed_connections();
                let up = dashboard
                    .series(METRIC_UP)
                    .and_then(|s| s.values.last().copied())
                    .unwrap_or(0);
                let down = dashboard
                    .series(METRIC_DOWN)
                    .and_then(|s| s.values.last().copied())
                    .unwrap_or(0);
                info!(
                    "{} - {} active, {} closed, up {} B/s, down {} B/s",
                    if dashboard.is_connected() { "connected" } else { "disconnected" },
                    active.len(),
                    closed.len(),
                    up,
                    down,
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    dashboard.stop();
    info!("Mihoscope stopped");
    Ok(())
}
