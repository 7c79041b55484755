//! Core types for wgfleet

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Node id whose unprefixed `WG_*` keys act as the configuration defaults.
pub const PRIMARY_NODE: &str = "main";

/// Routing policy tag for a peer.
///
/// Determines which address sub-pool the peer draws from and whether the
/// node applies traffic redirection for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileType {
    /// Plain VPN, the whole pool, no redirection
    Plain,
    /// Split tunnel through the node-side Shadowsocks redirect
    SplitTunnel,
    /// Unified routing, server-side ipset redirection
    Unified,
}

impl std::fmt::Display for ProfileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileType::Plain => write!(f, "plain"),
            ProfileType::SplitTunnel => write!(f, "split_tunnel"),
            ProfileType::Unified => write!(f, "unified"),
        }
    }
}

/// One provisioned VPN identity bound to an owner on a node.
///
/// The private key is never part of the record; it exists only inside the
/// rendered client configuration handed to the caller at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    pub telegram_id: i64,
    /// CIDR-qualified single-host address, e.g. `10.0.0.3/24`
    pub address: String,
    pub public_key: String,
    #[serde(default = "default_node")]
    pub node_id: String,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Absent on records written before profile pools existed
    #[serde(default)]
    pub profile: Option<ProfileType>,
    #[serde(default)]
    pub updated_at: i64,
}

impl PeerRecord {
    /// The bare host address without the prefix length.
    pub fn host_address(&self) -> &str {
        self.address.split('/').next().unwrap_or(self.address.as_str())
    }
}

/// Role of an owner identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    User,
}

impl Default for Role {
    fn default() -> Self {
        Self::User
    }
}

/// Owner identity record.
///
/// The two preference fields drive the lifecycle manager's default
/// routing decisions; everything else belongs to the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub telegram_id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub preferred_node: Option<String>,
    #[serde(default)]
    pub preferred_profile: Option<ProfileType>,
}

impl UserRecord {
    pub fn new(telegram_id: i64, username: Option<String>, role: Role) -> Self {
        Self {
            telegram_id,
            username,
            role,
            active: true,
            preferred_node: None,
            preferred_profile: None,
        }
    }

    pub fn is_owner(&self) -> bool {
        self.role == Role::Owner
    }
}

/// Remote-execution target for a node managed over SSH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub user: Option<String>,
    pub key_path: Option<PathBuf>,
}

impl SshTarget {
    /// `user@host`, or the bare host when no user is configured.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }
}

/// Resolved configuration for one VPN node.
///
/// Derived fresh from the environment on every access; never persisted.
/// A node without an [`SshTarget`] is mutated on the local host.
#[derive(Debug, Clone)]
pub struct NodeDescriptor {
    pub node_id: String,
    pub server_public_key: String,
    pub interface: String,
    pub network_cidr: String,
    pub endpoint_host: String,
    pub endpoint_port: u16,
    pub dns: String,
    pub mtu: Option<String>,
    pub ssh: Option<SshTarget>,
    /// Node-side script adding the Shadowsocks redirect for one client IP
    pub redirect_script: Option<String>,
}

fn default_node() -> String {
    PRIMARY_NODE.to_string()
}

fn default_true() -> bool {
    true
}
