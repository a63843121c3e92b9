use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

// ---

use async_trait::async_trait;
use rand::rngs::SmallRng;
use rand::Rng;

// ---

use ferry_domain::{BatchSender, Closer, EnvelopeBatch, FerryError, Result};

// ---------------------------------------------------------------------------
// SimLink
// ---------------------------------------------------------------------------

/// Observable record of one simulated link handed out by the connector.
#[derive(Debug)]
pub struct SimLink {
    // ---
    /// Position in dial order, starting at 0.
    index: usize,

    sends: AtomicU64,
    envelopes: AtomicU64,
    closes: AtomicUsize,
    closed: AtomicBool,
}

// ---

impl SimLink {
    // ---
    pub(crate) fn new(index: usize) -> Self {
        // ---
        Self {
            index,
            sends: AtomicU64::new(0),
            envelopes: AtomicU64::new(0),
            closes: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Batches accepted by this link.
    pub fn sends(&self) -> u64 {
        self.sends.load(Ordering::SeqCst)
    }

    /// Envelopes accepted by this link, summed over all batches.
    pub fn envelopes(&self) -> u64 {
        self.envelopes.load(Ordering::SeqCst)
    }

    /// Number of times the closer was invoked. Anything above 1 is a bug
    /// in the caller.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// SimSender
// ---------------------------------------------------------------------------

pub(crate) struct SimSender {
    // ---
    pub(crate) link: Arc<SimLink>,

    /// Shared runtime switch owned by the connector.
    pub(crate) fail_sends: Arc<AtomicBool>,

    pub(crate) rng: Arc<Mutex<SmallRng>>,
    pub(crate) fail_percent: f64,
    pub(crate) delay: Option<Duration>,
}

// ---

#[async_trait]
impl BatchSender for SimSender {
    // ---
    async fn send(&self, batch: &EnvelopeBatch) -> Result<()> {
        // ---
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.link.is_closed() {
            return Err(FerryError::SessionClosed);
        }

        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(FerryError::Transport(format!(
                "sim link {} send failed",
                self.link.index
            )));
        }

        if self.fail_percent > 0.0 {
            let dropped = self
                .rng
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .gen_bool(self.fail_percent.clamp(0.0, 1.0));
            if dropped {
                return Err(FerryError::Transport(format!(
                    "sim link {} lost batch",
                    self.link.index
                )));
            }
        }

        self.link.sends.fetch_add(1, Ordering::SeqCst);
        self.link
            .envelopes
            .fetch_add(batch.len() as u64, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SimCloser
// ---------------------------------------------------------------------------

pub(crate) struct SimCloser {
    // ---
    pub(crate) link: Arc<SimLink>,
    pub(crate) delay: Option<Duration>,
}

// ---

#[async_trait]
impl Closer for SimCloser {
    // ---
    async fn close(&self) -> Result<()> {
        // ---
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.link.closed.store(true, Ordering::SeqCst);
        self.link.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
