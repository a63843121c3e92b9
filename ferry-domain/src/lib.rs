//! Core types and capability traits for the Ferry telemetry forwarder.
//!
//! This crate defines the vocabulary of the system. The agent and the link
//! simulator both depend on `ferry-domain` and speak its types. No network
//! code lives here.
//!
//! # Structure
//!
//! - [`error`]      — [`FerryError`] and [`Result<T>`] alias
//! - [`envelope`]   — [`Envelope`], [`Message`], [`EnvelopeBatch`]
//! - [`connection`] — [`Connection`], one established upstream link
//! - [`transport`]  — [`BatchSender`], [`Closer`], [`Connector`] traits and [`ConnState`]

mod connection;
mod envelope;
mod error;
mod transport;

// --- error
pub use error::{FerryError, Result};

// --- envelope
pub use envelope::{Envelope, EnvelopeBatch, Message};

// --- connection
pub use connection::Connection;

// --- transport
pub use transport::{
    // ---
    BatchSender,
    Closer,
    ConnState,
    Connector,
};
