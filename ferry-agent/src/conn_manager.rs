//! [`ConnManager`] — owns the upstream connection and drives the
//! reconciliation loop.
//!
//! # Hot path
//!
//! Producers call [`ConnManager::write`] concurrently. The current
//! [`Connection`] lives in an [`ArcSwapOption`]: `write` takes a lock-free
//! snapshot, sends through it and, on failure or once the connection has
//! carried `max_writes` batches, retires it. Retiring is a compare-and-swap
//! from *that* connection to `None`, so exactly one caller wins the right to
//! close it and a newer connection installed in the meantime is never
//! clobbered.
//!
//! # Reconciliation loop
//!
//! A single background task waits on a poll timer or a reset signal,
//! whichever fires first. If the slot is empty it dials the [`Connector`]
//! and installs the result; if a connection is present it does nothing.
//! Dial failures are logged and retried on the next tick or signal, with no
//! back-off.
//!
//! ```text
//! write() ──load──► ArcSwapOption<Connection> ◄──store── maintain_conn()
//!    │                                                      ▲
//!    └── retire(): CAS → None, spawn close, try_send(()) ───┘ reset_tx (cap 100)
//! ```
//!
//! # Shutdown
//!
//! The loop exits when the reset channel closes, i.e. when the manager is
//! dropped or [`ConnManager::shutdown`] is called. Any installed connection
//! is closed on the way out, and `shutdown` also waits for closes started by
//! earlier retirements. Dropping the manager instead aborts those closes;
//! their sockets are still released when the connections drop.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

// ---

use arc_swap::ArcSwapOption;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

// ---

use ferry_domain::{
    // ---
    ConnState,
    Connection,
    Connector,
    EnvelopeBatch,
    FerryError,
    Result,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Reset channel capacity. Signals beyond this are dropped; the poll timer
/// still guarantees a reconnect attempt every `poll_interval`.
pub const RESET_QUEUE_DEPTH: usize = 100;

// ---------------------------------------------------------------------------
// Retirement
// ---------------------------------------------------------------------------

/// Why a connection is being torn down. Logged only.
#[derive(Debug, Clone, Copy)]
enum Retirement {
    // ---
    WriteFailed,
    Recycled,
    Reset,
}

// ---------------------------------------------------------------------------
// ConnManager
// ---------------------------------------------------------------------------

pub struct ConnManager {
    // ---
    /// Currently installed connection. `None` while reconnecting.
    conn: Arc<ArcSwapOption<Connection>>,

    /// Successful writes after which a connection is recycled.
    max_writes: u64,

    /// Wakes the reconciliation loop early. Never awaited on the write path.
    reset_tx: mpsc::Sender<()>,

    /// Reconciliation task, awaited by [`Self::shutdown`].
    task: JoinHandle<()>,

    /// Closes of retired connections still in flight, drained by
    /// [`Self::shutdown`].
    closes: Mutex<JoinSet<()>>,
}

// ---

impl ConnManager {
    // ---

    /// Create a manager and start its reconciliation loop on the current
    /// tokio runtime.
    ///
    /// An initial dial is requested immediately, so startup waits on one
    /// `connect` call rather than on the first timer tick.
    pub fn new(
        connector: Arc<dyn Connector>,
        max_writes: u64,
        poll_interval: Duration,
    ) -> Result<Self> {
        // ---
        if max_writes == 0 {
            return Err(FerryError::Config("max_writes must be greater than zero".into()));
        }
        if poll_interval.is_zero() {
            return Err(FerryError::Config("poll_interval must be greater than zero".into()));
        }

        let conn = Arc::new(ArcSwapOption::empty());
        let (reset_tx, reset_rx) = mpsc::channel(RESET_QUEUE_DEPTH);

        // Ensure the initial connection does not wait on the timer.
        reset_tx
            .try_send(())
            .map_err(|e| FerryError::Config(format!("reset channel unusable: {e}")))?;

        let task = tokio::spawn(maintain_conn(
            Arc::clone(&conn),
            connector,
            reset_rx,
            poll_interval,
        ));

        Ok(Self {
            conn,
            max_writes,
            reset_tx,
            task,
            closes: Mutex::new(JoinSet::new()),
        })
    }

    // ---

    /// Send one batch over the current connection.
    ///
    /// Fails fast with [`FerryError::NoConnection`] when nothing is
    /// installed; nothing is queued. A transport error tears the connection
    /// down and is returned to the caller unchanged.
    pub async fn write(&self, batch: &EnvelopeBatch) -> Result<()> {
        // ---
        let conn = self.conn.load_full().ok_or(FerryError::NoConnection)?;

        if let Err(e) = conn.send(batch).await {
            tracing::warn!(
                conn = %conn.id(),
                label = conn.label(),
                "error writing to aggregator: {e}"
            );
            self.retire(&conn, Retirement::WriteFailed);
            return Err(e);
        }

        // Several writers may cross the threshold together; only the one
        // whose CAS succeeds in `retire` acts on it.
        let writes = conn.record_write();
        if writes >= self.max_writes {
            tracing::info!(
                conn = %conn.id(),
                label = conn.label(),
                writes,
                "recycling connection to aggregator after {} writes",
                self.max_writes
            );
            self.retire(&conn, Retirement::Recycled);
        }

        Ok(())
    }

    // ---

    /// Tear down the current connection, if any, and request a new one.
    ///
    /// Must be called from within the tokio runtime that owns the manager.
    pub fn reset(&self) {
        // ---
        if let Some(conn) = self.conn.load_full() {
            self.retire(&conn, Retirement::Reset);
        }
    }

    // ---

    /// Non-blocking snapshot of the connection state.
    pub fn state(&self) -> ConnState {
        // ---
        if self.conn.load().is_some() {
            ConnState::Active
        } else {
            ConnState::Absent
        }
    }

    /// Label of the installed connection, for diagnostics.
    pub fn current_label(&self) -> Option<String> {
        self.conn.load_full().map(|c| c.label().to_string())
    }

    // ---

    /// Stop the reconciliation loop, close any installed connection and wait
    /// for pending closes of retired ones.
    ///
    /// A dial already in progress is allowed to finish first.
    pub async fn shutdown(self) {
        // ---
        let Self {
            reset_tx,
            task,
            closes,
            ..
        } = self;
        drop(reset_tx);

        if let Err(e) = task.await {
            tracing::warn!("reconciliation task ended abnormally: {e}");
        }

        let mut closes = closes.into_inner().unwrap_or_else(PoisonError::into_inner);
        if !closes.is_empty() {
            tracing::debug!(pending = closes.len(), "waiting for retired connections to close");
        }
        while let Some(joined) = closes.join_next().await {
            if let Err(e) = joined {
                tracing::warn!("connection close task ended abnormally: {e}");
            }
        }
    }

    // ---

    /// Clear the slot if it still holds `conn`, then close `conn` in the
    /// background and wake the reconciliation loop.
    ///
    /// Losing the CAS means another caller already retired this connection
    /// (or it was never installed); in that case nothing happens, which keeps
    /// close at most once per connection.
    fn retire(&self, conn: &Arc<Connection>, why: Retirement) {
        // ---
        let prev = self.conn.compare_and_swap(conn, None::<Arc<Connection>>);
        let won = matches!(&*prev, Some(p) if Arc::ptr_eq(p, conn));
        if !won {
            return;
        }

        tracing::debug!(conn = %conn.id(), ?why, "connection retired");

        let conn = Arc::clone(conn);
        {
            let mut closes = self.closes.lock().unwrap_or_else(PoisonError::into_inner);
            // Reap finished closes so the set only holds pending ones.
            while closes.try_join_next().is_some() {}
            closes.spawn(async move {
                if let Err(e) = conn.close().await {
                    tracing::warn!(conn = %conn.id(), label = conn.label(), "error closing connection: {e}");
                }
            });
        }

        // Full or closed channel: drop the signal, the timer covers it.
        let _ = self.reset_tx.try_send(());
    }
}

// ---------------------------------------------------------------------------
// maintain_conn
// ---------------------------------------------------------------------------

/// Reconciliation loop. Sole writer of a non-empty value into `slot`.
async fn maintain_conn(
    slot: Arc<ArcSwapOption<Connection>>,
    connector: Arc<dyn Connector>,
    mut reset_rx: mpsc::Receiver<()>,
    poll_interval: Duration,
) {
    // ---
    let mut ticker = interval_at(Instant::now() + poll_interval, poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            signal = reset_rx.recv() => {
                if signal.is_none() {
                    break;
                }
            }
        }

        if slot.load().is_some() {
            continue;
        }

        match connector.connect().await {
            Ok(conn) => {
                tracing::info!(
                    conn = %conn.id(),
                    label = conn.label(),
                    "connected to aggregator"
                );
                slot.store(Some(Arc::new(conn)));
            }
            Err(e) => {
                tracing::warn!(target_addr = %connector.target(), "error dialing aggregator: {e}");
            }
        }
    }

    tracing::info!("reset channel closed — connection manager exiting");

    if let Some(conn) = slot.swap(None) {
        if let Err(e) = conn.close().await {
            tracing::warn!(conn = %conn.id(), "error closing connection on shutdown: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
