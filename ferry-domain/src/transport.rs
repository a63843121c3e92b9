use async_trait::async_trait;

// ---

use super::connection::Connection;
use super::envelope::EnvelopeBatch;
use super::error::Result;

// ---------------------------------------------------------------------------
// ConnState
// ---------------------------------------------------------------------------

/// Whether the connection manager currently holds a usable upstream link.
///
/// There is no degraded or draining state: replacement is always a hard
/// cutover from `Active` to `Absent` and back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    // ---
    /// No link installed. Writes fail fast with `FerryError::NoConnection`.
    Absent,

    /// A link is installed and accepting writes.
    Active,
}

// ---------------------------------------------------------------------------
// BatchSender
// ---------------------------------------------------------------------------

/// Transmits one [`EnvelopeBatch`] over an established link.
///
/// Called concurrently by every producer that shares a connection, so
/// implementations serialize access to the underlying stream themselves.
#[async_trait]
pub trait BatchSender: Send + Sync {
    // ---
    async fn send(&self, batch: &EnvelopeBatch) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Closer
// ---------------------------------------------------------------------------

/// Releases the resources behind a link.
///
/// The connection manager invokes this at most once per [`Connection`].
#[async_trait]
pub trait Closer: Send + Sync {
    // ---
    async fn close(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Factory for new upstream links.
///
/// Supplied by the surrounding system, which knows the dial targets and how
/// to spread calls across the aggregation tier's front doors. A failed
/// `connect` is always transient from the caller's point of view.
///
/// Implementations: `ferry_agent::TcpConnector`, `ferry_link_sim::LinkSimConnector`.
#[async_trait]
pub trait Connector: Send + Sync {
    // ---
    /// Dial the aggregation tier and return a live connection.
    async fn connect(&self) -> Result<Connection>;

    /// Human-readable description of the dial target, for logs.
    fn target(&self) -> String;
}
