//! wgfleet core
//!
//! The engine behind peer provisioning: node descriptor resolution,
//! deterministic address allocation, local/SSH command execution against
//! live WireGuard interfaces, the peer lifecycle manager, and client
//! configuration rendering.

pub mod allocator;
pub mod exec;
pub mod lifecycle;
pub mod reconcile;
pub mod registry;
pub mod render;

// Re-export the main entry points
pub use allocator::PoolSelector;
pub use exec::{ExecOutput, NodeExecutor, WgExecutor, DEFAULT_TIMEOUT};
pub use lifecycle::PeerManager;
pub use reconcile::DriftReport;
pub use registry::NodeRegistry;
