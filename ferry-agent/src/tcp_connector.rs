//! [`TcpConnector`] — dials the aggregation tier over plain TCP.
//!
//! Each dial picks one of the configured front-door addresses at random, so
//! a fleet of agents recycling their connections spreads over every
//! aggregator replica instead of piling onto the first one listed.
//!
//! The returned [`Connection`] shares one write half between its sender and
//! its closer. The sender writes framed batches under a `tokio::sync::Mutex`
//! (frames must not interleave); the closer takes the write half out of the
//! slot and shuts it down, after which sends fail with
//! [`FerryError::SessionClosed`].

use std::sync::Arc;
use std::time::Duration;

// ---

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

// ---

use ferry_domain::{
    // ---
    BatchSender,
    Closer,
    Connection,
    Connector,
    EnvelopeBatch,
    FerryError,
    Result,
};

// ---

use super::framing::encode_batch;

// ---

type SharedWriter = Arc<Mutex<Option<OwnedWriteHalf>>>;

// ---------------------------------------------------------------------------
// TcpConnector
// ---------------------------------------------------------------------------

pub struct TcpConnector {
    // ---
    /// Aggregator front doors, `host:port`. Never empty.
    targets: Vec<String>,

    /// Upper bound on a single dial, including DNS resolution.
    connect_timeout: Duration,
}

// ---

impl TcpConnector {
    // ---
    pub fn new(targets: Vec<String>, connect_timeout: Duration) -> Result<Self> {
        // ---
        if targets.is_empty() {
            return Err(FerryError::Config("at least one aggregator address is required".into()));
        }

        Ok(Self {
            targets,
            connect_timeout,
        })
    }

    // ---

    fn pick_target(&self) -> &str {
        // ---
        self.targets
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or_default()
    }
}

// ---

#[async_trait]
impl Connector for TcpConnector {
    // ---
    async fn connect(&self) -> Result<Connection> {
        // ---
        let target = self.pick_target().to_string();

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&target))
            .await
            .map_err(|_| {
                FerryError::Connect(format!(
                    "{target}: timed out after {}ms",
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| FerryError::Connect(format!("{target}: {e}")))?;

        stream.set_nodelay(true)?;

        // The aggregator never writes back on this stream; the read half is
        // dropped, which leaves the socket open for writing.
        let (_read_half, write_half) = stream.into_split();
        let writer: SharedWriter = Arc::new(Mutex::new(Some(write_half)));

        tracing::debug!(%target, "tcp stream established");

        Ok(Connection::new(
            target,
            Box::new(TcpSender {
                writer: Arc::clone(&writer),
            }),
            Box::new(TcpCloser { writer }),
        ))
    }

    // ---

    fn target(&self) -> String {
        self.targets.join(",")
    }
}

// ---------------------------------------------------------------------------
// TcpSender / TcpCloser
// ---------------------------------------------------------------------------

struct TcpSender {
    // ---
    writer: SharedWriter,
}

// ---

#[async_trait]
impl BatchSender for TcpSender {
    // ---
    async fn send(&self, batch: &EnvelopeBatch) -> Result<()> {
        // ---
        let frame = encode_batch(batch)?;

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(FerryError::SessionClosed)?;

        writer
            .write_all(&frame)
            .await
            .map_err(|e| FerryError::Transport(format!("tcp write: {e}")))
    }
}

// ---

struct TcpCloser {
    // ---
    writer: SharedWriter,
}

// ---

#[async_trait]
impl Closer for TcpCloser {
    // ---
    async fn close(&self) -> Result<()> {
        // ---
        let taken = self.writer.lock().await.take();
        match taken {
            Some(mut writer) => writer.shutdown().await.map_err(FerryError::from),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
