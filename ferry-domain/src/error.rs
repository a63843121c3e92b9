use thiserror::Error;

// ---

#[derive(Debug, Error)]
pub enum FerryError {
    // ---
    /// `write` was called while no upstream connection is installed.
    #[error("no connection to aggregator present")]
    NoConnection,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connect error: {0}")]
    Connect(String),

    #[error("session closed")]
    SessionClosed,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ---

pub type Result<T> = std::result::Result<T, FerryError>;
