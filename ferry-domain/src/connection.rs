//! [`Connection`] — one established link to the upstream aggregator.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// ---

use uuid::Uuid;

// ---

use super::envelope::EnvelopeBatch;
use super::error::Result;
use super::transport::{BatchSender, Closer};

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// An established upstream link: a sender, a closer and a write counter.
///
/// Everything except the counter is fixed at construction. The connection
/// manager shares a `Connection` behind an `Arc` and swaps whole instances,
/// so readers never see a partially built value.
pub struct Connection {
    // ---
    /// Unique per instance; distinguishes successive links to one target.
    id: Uuid,

    /// Diagnostic label, usually the dialed address.
    label: String,

    sender: Box<dyn BatchSender>,
    closer: Box<dyn Closer>,

    /// Successful writes so far.
    writes: AtomicU64,
}

// ---

impl Connection {
    // ---
    pub fn new(
        label: impl Into<String>,
        sender: Box<dyn BatchSender>,
        closer: Box<dyn Closer>,
    ) -> Self {
        // ---
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            sender,
            closer,
            writes: AtomicU64::new(0),
        }
    }

    // ---

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Current value of the write counter.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    // ---

    /// Count one successful write and return the post-increment value.
    pub fn record_write(&self) -> u64 {
        self.writes.fetch_add(1, Ordering::Relaxed) + 1
    }

    // ---

    /// Forward `batch` through the sender capability.
    pub async fn send(&self, batch: &EnvelopeBatch) -> Result<()> {
        self.sender.send(batch).await
    }

    // ---

    /// Release the link through the closer capability.
    pub async fn close(&self) -> Result<()> {
        self.closer.close().await
    }
}

// ---

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("writes", &self.writes())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::FerryError;

    // ---

    struct Refusing;

    #[async_trait]
    impl BatchSender for Refusing {
        async fn send(&self, _batch: &EnvelopeBatch) -> Result<()> {
            Err(FerryError::Transport("broken pipe".into()))
        }
    }

    struct CountingCloser(Arc<AtomicUsize>);

    #[async_trait]
    impl Closer for CountingCloser {
        async fn close(&self) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    // ---

    #[test]
    fn record_write_returns_post_increment_value() {
        // ---
        let closes = Arc::new(AtomicUsize::new(0));
        let conn = Connection::new("a:1", Box::new(Refusing), Box::new(CountingCloser(closes)));
        assert_eq!(conn.writes(), 0);
        assert_eq!(conn.record_write(), 1);
        assert_eq!(conn.record_write(), 2);
        assert_eq!(conn.writes(), 2);
    }

    // ---

    #[tokio::test]
    async fn capabilities_are_forwarded() {
        // ---
        let closes = Arc::new(AtomicUsize::new(0));
        let conn = Connection::new(
            "a:1",
            Box::new(Refusing),
            Box::new(CountingCloser(Arc::clone(&closes))),
        );

        let err = conn.send(&EnvelopeBatch::default()).await.unwrap_err();
        assert!(err.to_string().contains("broken pipe"));

        conn.close().await.unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(conn.label(), "a:1");
    }

    // ---

    #[test]
    fn ids_are_unique_per_instance() {
        // ---
        let closes = Arc::new(AtomicUsize::new(0));
        let a = Connection::new("x", Box::new(Refusing), Box::new(CountingCloser(closes.clone())));
        let b = Connection::new("x", Box::new(Refusing), Box::new(CountingCloser(closes)));
        assert_ne!(a.id(), b.id());
    }
}
