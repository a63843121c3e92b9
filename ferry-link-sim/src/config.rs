use std::time::Duration;

// ---------------------------------------------------------------------------
// LinkSimConfig
// ---------------------------------------------------------------------------

/// Configuration for the simulated connector.
///
/// All fields default to a perfect link: every dial succeeds, every send
/// succeeds, nothing is delayed.
#[derive(Debug, Clone)]
pub struct LinkSimConfig {
    // ---
    /// Number of initial `connect` calls that fail before dials succeed.
    pub refuse_first_connects: usize,

    /// Probability `[0.0, 1.0]` that any given send fails.
    pub send_fail_percent: f64,

    /// Latency added to every `connect` call.
    pub connect_delay: Option<Duration>,

    /// Latency added to every send, before the outcome is decided.
    pub send_delay: Option<Duration>,

    /// Latency added to every close, before the link is marked closed.
    pub close_delay: Option<Duration>,

    /// RNG seed for reproducible send failures. `None` = random.
    pub seed: Option<u64>,
}

// ---

impl Default for LinkSimConfig {
    fn default() -> Self {
        // ---
        Self {
            refuse_first_connects: 0,
            send_fail_percent: 0.0,
            connect_delay: None,
            send_delay: None,
            close_delay: None,
            seed: None,
        }
    }
}

// ---

impl LinkSimConfig {
    // ---
    /// Perfect link with no impairments. Useful as a baseline.
    pub fn perfect() -> Self {
        Self::default()
    }

    // ---

    /// Aggregator that refuses the first `refusals` dials, then accepts.
    pub fn flaky_dial(refusals: usize) -> Self {
        // ---
        Self {
            refuse_first_connects: refusals,
            ..Default::default()
        }
    }

    // ---

    /// Link where roughly `percent` of sends fail, seeded for repeatability.
    pub fn lossy(percent: f64, seed: u64) -> Self {
        // ---
        Self {
            send_fail_percent: percent,
            seed: Some(seed),
            ..Default::default()
        }
    }
}
