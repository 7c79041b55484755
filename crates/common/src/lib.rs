//! wgfleet common library
//!
//! Shared types, error taxonomy, key material, and the file-backed
//! ledgers used across the wgfleet workspace.

pub mod env;
pub mod error;
pub mod keys;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use env::EnvMap;
pub use error::{Error, Result};
pub use keys::WgKeyPair;
pub use store::{PeerStore, UserStore};
pub use types::*;

/// wgfleet version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default ledger directory, relative to the working directory.
pub fn default_data_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("data")
}

/// Default environment file, relative to the working directory.
pub fn default_env_file() -> std::path::PathBuf {
    std::path::PathBuf::from("env_vars.txt")
}
