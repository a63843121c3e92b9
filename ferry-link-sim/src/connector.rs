use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

// ---

use async_trait::async_trait;
use rand::rngs::SmallRng;
use rand::SeedableRng;

// ---

use ferry_domain::{Connection, Connector, FerryError, Result};

// ---

use super::link::{SimCloser, SimSender};
use super::{LinkSimConfig, SimLink};

// ---------------------------------------------------------------------------
// LinkSimConnector
// ---------------------------------------------------------------------------

/// In-process [`Connector`]. Does not use real sockets.
///
/// Cheap to clone; clones share counters and runtime switches, so a test can
/// hand one clone to the connection manager and keep another to observe it.
#[derive(Clone)]
pub struct LinkSimConnector {
    // ---
    config: LinkSimConfig,
    state: Arc<SimState>,
}

// ---

struct SimState {
    // ---
    connect_calls: AtomicUsize,

    /// Dials still to be refused under `refuse_first_connects`.
    refusals_left: AtomicUsize,

    /// `false` refuses every dial until flipped back.
    available: AtomicBool,

    /// `true` fails every send on every link, present and future.
    fail_sends: Arc<AtomicBool>,

    /// Every link handed out, in dial order.
    links: Mutex<Vec<Arc<SimLink>>>,

    rng: Arc<Mutex<SmallRng>>,
}

// ---

impl LinkSimConnector {
    // ---
    pub fn new(config: LinkSimConfig) -> Self {
        // ---
        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };

        let state = SimState {
            connect_calls: AtomicUsize::new(0),
            refusals_left: AtomicUsize::new(config.refuse_first_connects),
            available: AtomicBool::new(true),
            fail_sends: Arc::new(AtomicBool::new(false)),
            links: Mutex::new(Vec::new()),
            rng: Arc::new(Mutex::new(rng)),
        };

        Self {
            config,
            state: Arc::new(state),
        }
    }

    // ---

    /// Total `connect` calls so far, successful or not.
    pub fn connect_calls(&self) -> usize {
        self.state.connect_calls.load(Ordering::SeqCst)
    }

    /// Snapshot of every link handed out, in dial order.
    pub fn links(&self) -> Vec<Arc<SimLink>> {
        // ---
        self.state
            .links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Most recently dialed link, if any.
    pub fn last_link(&self) -> Option<Arc<SimLink>> {
        self.links().last().cloned()
    }

    /// Sum of closer invocations across all links.
    pub fn total_closes(&self) -> usize {
        self.links().iter().map(|l| l.closes()).sum()
    }

    // ---

    /// Simulate the aggregator going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
    }

    /// Force every send to fail (`true`) or restore normal behaviour.
    pub fn set_fail_sends(&self, fail: bool) {
        self.state.fail_sends.store(fail, Ordering::SeqCst);
    }
}

// ---

#[async_trait]
impl Connector for LinkSimConnector {
    // ---
    async fn connect(&self) -> Result<Connection> {
        // ---
        let call = self.state.connect_calls.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(delay) = self.config.connect_delay {
            tokio::time::sleep(delay).await;
        }

        if !self.state.available.load(Ordering::SeqCst) {
            return Err(FerryError::Connect(format!("dial {call}: aggregator unavailable")));
        }

        let refused = self
            .state
            .refusals_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(FerryError::Connect(format!("dial {call}: connection refused")));
        }

        let link = {
            let mut links = self
                .state
                .links
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let link = Arc::new(SimLink::new(links.len()));
            links.push(Arc::clone(&link));
            link
        };

        let sender = SimSender {
            link: Arc::clone(&link),
            fail_sends: Arc::clone(&self.state.fail_sends),
            rng: Arc::clone(&self.state.rng),
            fail_percent: self.config.send_fail_percent,
            delay: self.config.send_delay,
        };
        let closer = SimCloser {
            link,
            delay: self.config.close_delay,
        };

        Ok(Connection::new(
            self.target(),
            Box::new(sender),
            Box::new(closer),
        ))
    }

    // ---

    fn target(&self) -> String {
        "sim://aggregator".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
