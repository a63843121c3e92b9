//! Ferry agent daemon.
//!
//! Accepts envelopes from local processes and relays them in batches to the
//! aggregation tier over a recycled TCP connection.
//!
//! Usage:
//!   ferry-agent --aggregator agg-lb.internal:8082 [--ingress 127.0.0.1:3458]

use std::sync::Arc;
use std::time::Duration;

// ---

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ---

mod config;
mod conn_manager;
mod framing;
mod ingress;
mod tcp_connector;

// ---

use config::Config;

// Re-exports so sibling modules import via super::Symbol
pub use conn_manager::ConnManager;
pub use tcp_connector::TcpConnector;

// ---

/// Envelopes buffered between the ingress readers and the batcher.
const INGRESS_QUEUE_DEPTH: usize = 10_000;

/// How long shutdown waits for connected ingress clients to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---

    let cfg = Config::parse();

    let no_color = std::env::var("NO_COLOR").is_ok()
        || std::env::var("CARGO_TERM_COLOR").as_deref() == Ok("never")
        || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_ansi(!no_color)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        aggregators = ?cfg.aggregators,
        max_writes = cfg.max_writes,
        poll_interval_ms = cfg.poll_interval_ms,
        "ferry-agent starting",
    );

    let connector = TcpConnector::new(cfg.aggregators.clone(), cfg.connect_timeout())?;
    let manager = Arc::new(ConnManager::new(
        Arc::new(connector),
        cfg.max_writes,
        cfg.poll_interval(),
    )?);

    let listener = TcpListener::bind(cfg.ingress).await?;
    info!("ingress listening on {}", cfg.ingress);

    let (env_tx, env_rx) = mpsc::channel(INGRESS_QUEUE_DEPTH);
    let ingress = tokio::spawn(ingress::serve(listener, env_tx));
    let batcher = tokio::spawn(ingress::run_batcher(
        env_rx,
        Arc::clone(&manager),
        cfg.batch_size(),
        cfg.flush_interval(),
    ));

    let hangup = spawn_reset_on_hangup(Arc::clone(&manager))?;

    tokio::signal::ctrl_c().await?;
    info!(connection = ?manager.current_label(), "shutting down");

    // Stopping the accept loop closes the envelope channel once the
    // per-client readers finish; the batcher then flushes and returns.
    // Clients that stay connected past the grace period lose their tail.
    ingress.abort();
    let batcher_abort = batcher.abort_handle();
    match tokio::time::timeout(SHUTDOWN_GRACE, batcher).await {
        Ok(Ok(stats)) => info!(?stats, "batcher drained"),
        Ok(Err(e)) => tracing::warn!("batcher ended abnormally: {e}"),
        Err(_) => {
            tracing::warn!("batcher did not drain within {SHUTDOWN_GRACE:?}; abandoning");
            batcher_abort.abort();
        }
    }

    hangup.abort();
    let _ = hangup.await;

    // An abandoned batcher may still hold its handle for a moment; the
    // manager's task then exits on its own when the last handle drops.
    match Arc::try_unwrap(manager) {
        Ok(manager) => manager.shutdown().await,
        Err(_) => tracing::warn!("connection manager still shared at shutdown"),
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// spawn_reset_on_hangup
// ---------------------------------------------------------------------------

/// SIGHUP forces the current connection to be recycled, e.g. after the
/// aggregator pool has been scaled out.
#[cfg(unix)]
fn spawn_reset_on_hangup(manager: Arc<ConnManager>) -> anyhow::Result<JoinHandle<()>> {
    // ---
    use tokio::signal::unix::{signal, SignalKind};

    let mut hup = signal(SignalKind::hangup())?;
    Ok(tokio::spawn(async move {
        while hup.recv().await.is_some() {
            info!("SIGHUP — resetting upstream connection");
            manager.reset();
        }
    }))
}

#[cfg(not(unix))]
fn spawn_reset_on_hangup(manager: Arc<ConnManager>) -> anyhow::Result<JoinHandle<()>> {
    drop(manager);
    Ok(tokio::spawn(async {}))
}
