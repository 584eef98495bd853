use anyhow::Context;
use clap::Parser;
use ndef_writer::config::Config;
use ndef_writer::reader::ReaderMonitor;
use ndef_writer::tracker::{run_event_loop, SharedTracker, Tracker};
use ndef_writer::{server, utils, Orchestrator};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG=debug logs every APDU exchange
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::parse();

    let tracker = SharedTracker::new(Tracker::new(config.reader_policy()));
    let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
    tokio::spawn(run_event_loop(events_rx, tracker.clone()));

    let _monitor =
        ReaderMonitor::spawn(events_tx).context("failed to start PC/SC monitor thread")?;

    let orchestrator = Orchestrator::new(tracker, config.verify_blocks);
    let app = server::router(orchestrator, config.cors_policy());

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!(version = utils::get_version(), "Writer service listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Shutting down");
        })
        .await
        .context("HTTP server failed")?;

    Ok(())
}
