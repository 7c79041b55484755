//! Error types for wgfleet

use thiserror::Error;

/// Result type alias using the wgfleet Error
pub type Result<T> = std::result::Result<T, Error>;

/// wgfleet error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("No free address in pool {pool} on node {node}")]
    PoolExhausted { node: String, pool: String },

    #[error("Command failed on node {node}: {detail}")]
    Exec { node: String, detail: String },

    #[error("Operation on node {node} timed out after {seconds}s")]
    Timeout { node: String, seconds: u64 },

    #[error("No active peer for owner {owner} on node {node}")]
    NotFound { owner: i64, node: String },

    #[error("Peer for owner {owner} lives on node {have}, not {requested}")]
    NodeMismatch {
        owner: i64,
        have: String,
        requested: String,
    },

    #[error("Owner {owner} already has an active peer on node {node}")]
    AlreadyProvisioned { owner: i64, node: String },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

impl From<ipnetwork::IpNetworkError> for Error {
    fn from(e: ipnetwork::IpNetworkError) -> Self {
        Error::InvalidAddress(e.to_string())
    }
}

impl Error {
    /// Whether the caller may retry the failed operation as-is.
    ///
    /// Configuration faults and exhausted pools need operator intervention
    /// or a capacity change first; execution and timeout failures may
    /// succeed on a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Exec { .. } | Error::Timeout { .. } | Error::Io(_))
    }
}
