//! In-process simulated upstream link for Ferry unit and integration tests.
//!
//! [`LinkSimConnector`] implements [`ferry_domain::Connector`] without any
//! sockets. Every link it hands out is recorded as a [`SimLink`] whose
//! counters (sends, envelopes, closes) tests can assert on. [`LinkSimConfig`]
//! controls injected impairments:
//!
//! - Refusing the first N dials
//! - Send failure probability
//! - Dial and send latency
//! - Deterministic RNG seed for reproducible runs
//!
//! Impairments can also be flipped at runtime with
//! [`LinkSimConnector::set_available`] and [`LinkSimConnector::set_fail_sends`].
//!
//! # Quick start
//!
//! ```rust
//! use ferry_link_sim::{LinkSimConfig, LinkSimConnector};
//!
//! let connector = LinkSimConnector::new(LinkSimConfig::flaky_dial(2));
//! assert_eq!(connector.connect_calls(), 0);
//! ```

mod config;
mod connector;
mod link;

// --- public API
pub use config::LinkSimConfig;
pub use connector::LinkSimConnector;
pub use link::SimLink;
