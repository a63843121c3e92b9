//! CLI configuration for `ferry-agent`.
//!
//! Usage:
//!   ferry-agent --aggregator agg-lb.internal:8082
//!   ferry-agent --aggregator 10.0.0.5:8082,10.0.0.6:8082 --max-writes 500 --poll-interval-ms 250

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "ferry-agent", about = "Per-host telemetry forwarder")]
pub struct Config {
    // ---
    /// Aggregator front-door addresses (`host:port`), comma separated or
    /// repeated. Each dial picks one at random.
    #[arg(long = "aggregator", required = true, value_delimiter = ',')]
    pub aggregators: Vec<String>,

    /// Local TCP address on which host processes submit
    /// newline-delimited JSON envelopes.
    #[arg(long, default_value = "127.0.0.1:3458")]
    pub ingress: SocketAddr,

    /// Successful writes after which a connection is recycled, so that
    /// long-lived agents rebalance across aggregator replicas.
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_writes: u64,

    /// Backstop interval between reconnect attempts while disconnected.
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval_ms: u64,

    /// Upper bound on a single dial.
    #[arg(long, default_value_t = 5000, value_parser = clap::value_parser!(u64).range(1..))]
    pub connect_timeout_ms: u64,

    /// Envelopes per batch before an early flush.
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
    pub batch_size: u64,

    /// Maximum time an envelope waits in a partial batch.
    #[arg(long, default_value_t = 250, value_parser = clap::value_parser!(u64).range(1..))]
    pub flush_interval_ms: u64,
}

// ---

impl Config {
    // ---
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn batch_size(&self) -> usize {
        usize::try_from(self.batch_size).unwrap_or(usize::MAX)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn defaults_apply() {
        // ---
        let cfg = Config::try_parse_from(["ferry-agent", "--aggregator", "agg:8082"]).unwrap();
        assert_eq!(cfg.aggregators, vec!["agg:8082".to_string()]);
        assert_eq!(cfg.max_writes, 1000);
        assert_eq!(cfg.poll_interval(), Duration::from_secs(1));
        assert_eq!(cfg.batch_size(), 100);
        assert_eq!(cfg.ingress.port(), 3458);
    }

    // ---

    #[test]
    fn aggregators_accept_list_and_repeats() {
        // ---
        let cfg = Config::try_parse_from([
            "ferry-agent",
            "--aggregator",
            "a:1,b:2",
            "--aggregator",
            "c:3",
        ])
        .unwrap();
        assert_eq!(cfg.aggregators, vec!["a:1", "b:2", "c:3"]);
    }

    // ---

    #[test]
    fn rejects_zero_and_missing_values() {
        // ---
        assert!(Config::try_parse_from(["ferry-agent"]).is_err());
        assert!(
            Config::try_parse_from(["ferry-agent", "--aggregator", "a:1", "--max-writes", "0"])
                .is_err()
        );
        assert!(Config::try_parse_from([
            "ferry-agent",
            "--aggregator",
            "a:1",
            "--poll-interval-ms",
            "0"
        ])
        .is_err());
    }
}
