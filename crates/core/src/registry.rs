//! Node descriptor resolution
//!
//! Nodes live in a flat env namespace: the primary node uses unprefixed
//! `WG_*` keys, every other node uses `WG_<ID>_*` with fallback to the
//! unprefixed defaults. Descriptors are derived fresh on every access so
//! configuration edits take effect without a restart.

use std::path::PathBuf;
use tracing::info;
use wgfleet_common::types::{NodeDescriptor, SshTarget, PRIMARY_NODE};
use wgfleet_common::{EnvMap, Error, Result};

const DEFAULT_INTERFACE: &str = "wg0";
const DEFAULT_CIDR: &str = "10.0.0.0/24";
const DEFAULT_PORT: &str = "51820";
const DEFAULT_DNS: &str = "1.1.1.1, 8.8.8.8";
const DEFAULT_REDIRECT_SCRIPT: &str = "/opt/vpnservice/scripts/add-ss-redirect.sh";

/// Resolves node descriptors out of the environment namespace.
#[derive(Debug, Clone)]
pub struct NodeRegistry {
    env: EnvMap,
}

impl NodeRegistry {
    pub fn new(env: EnvMap) -> Self {
        Self { env }
    }

    /// Node ids that are fully configured: the primary node is always
    /// listed, every other id needs its public key and an endpoint host.
    pub fn available_nodes(&self) -> Vec<String> {
        let mut nodes = vec![PRIMARY_NODE.to_string()];
        for key in self.env.keys() {
            let Some(id) = key
                .strip_prefix("WG_")
                .and_then(|rest| rest.strip_suffix("_SERVER_PUBLIC_KEY"))
            else {
                continue;
            };
            if id.is_empty() {
                continue;
            }
            let id = id.to_lowercase();
            if !nodes.contains(&id) && self.resolve(&id).is_ok() {
                nodes.push(id);
            }
        }
        nodes
    }

    /// Resolve the full descriptor for a node.
    ///
    /// Missing public key or endpoint host is a configuration fault, not
    /// a runtime one.
    pub fn resolve(&self, node_id: &str) -> Result<NodeDescriptor> {
        let primary = node_id == PRIMARY_NODE;
        let prefix = if primary {
            "WG_".to_string()
        } else {
            format!("WG_{}_", node_id.to_uppercase())
        };

        // Node-specific key only.
        let direct = |field: &str| self.env.get(&format!("{prefix}{field}"));
        // Node-specific key, falling back to the primary node's default.
        let with_default = |field: &str| {
            direct(field).or_else(|| {
                if primary {
                    None
                } else {
                    self.env.get(&format!("WG_{field}"))
                }
            })
        };

        let server_public_key = with_default("SERVER_PUBLIC_KEY")
            .ok_or_else(|| {
                Error::Config(format!(
                    "{prefix}SERVER_PUBLIC_KEY is not set for node {node_id}"
                ))
            })?
            .to_string();

        let endpoint_host = with_default("ENDPOINT_HOST")
            .or_else(|| self.env.get("VPN_SERVER_HOST"))
            .ok_or_else(|| {
                Error::Config(format!(
                    "{prefix}ENDPOINT_HOST or VPN_SERVER_HOST is not set for node {node_id}"
                ))
            })?
            .to_string();

        let port_raw = with_default("ENDPOINT_PORT").unwrap_or(DEFAULT_PORT);
        let endpoint_port: u16 = port_raw.parse().map_err(|_| {
            Error::Config(format!(
                "{prefix}ENDPOINT_PORT is not a valid port: {port_raw}"
            ))
        })?;

        let mut ssh_host = direct("SSH_HOST").map(str::to_string);
        let mut ssh_user = direct("SSH_USER").map(str::to_string);
        let ssh_key_path = direct("SSH_KEY_PATH").map(PathBuf::from);

        // Remote nodes without an explicit SSH host are reached over the
        // endpoint host itself.
        if !primary && ssh_host.is_none() {
            ssh_host = Some(endpoint_host.clone());
            if ssh_user.is_none() {
                ssh_user = Some("root".to_string());
            }
            info!(
                node = node_id,
                host = %endpoint_host,
                "SSH_HOST not set, using endpoint host"
            );
        }

        let ssh = ssh_host.map(|host| SshTarget {
            host,
            user: ssh_user,
            key_path: ssh_key_path,
        });

        let redirect_script = if primary {
            None
        } else {
            Some(
                direct("ADD_SS_REDIRECT_SCRIPT")
                    .unwrap_or(DEFAULT_REDIRECT_SCRIPT)
                    .to_string(),
            )
        };

        Ok(NodeDescriptor {
            node_id: node_id.to_string(),
            server_public_key,
            interface: with_default("INTERFACE").unwrap_or(DEFAULT_INTERFACE).to_string(),
            network_cidr: with_default("NETWORK_CIDR").unwrap_or(DEFAULT_CIDR).to_string(),
            endpoint_host,
            endpoint_port,
            dns: with_default("DNS").unwrap_or(DEFAULT_DNS).to_string(),
            mtu: direct("MTU").map(str::to_string),
            ssh,
            redirect_script,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_env() -> EnvMap {
        let mut env = EnvMap::default();
        env.insert("WG_SERVER_PUBLIC_KEY", "mainpubkey=");
        env.insert("WG_ENDPOINT_HOST", "198.51.100.10");
        env
    }

    #[test]
    fn test_primary_node_defaults() {
        let registry = NodeRegistry::new(base_env());
        let node = registry.resolve("main").unwrap();
        assert_eq!(node.server_public_key, "mainpubkey=");
        assert_eq!(node.interface, "wg0");
        assert_eq!(node.network_cidr, "10.0.0.0/24");
        assert_eq!(node.endpoint_port, 51820);
        assert_eq!(node.dns, "1.1.1.1, 8.8.8.8");
        assert_eq!(node.mtu, None);
        assert!(node.ssh.is_none());
        assert!(node.redirect_script.is_none());
    }

    #[test]
    fn test_primary_missing_public_key_is_config_fault() {
        let mut env = EnvMap::default();
        env.insert("WG_ENDPOINT_HOST", "198.51.100.10");
        let registry = NodeRegistry::new(env);
        assert!(matches!(registry.resolve("main"), Err(Error::Config(_))));
    }

    #[test]
    fn test_primary_endpoint_falls_back_to_vpn_server_host() {
        let mut env = EnvMap::default();
        env.insert("WG_SERVER_PUBLIC_KEY", "mainpubkey=");
        env.insert("VPN_SERVER_HOST", "198.51.100.10");
        let registry = NodeRegistry::new(env);
        let node = registry.resolve("main").unwrap();
        assert_eq!(node.endpoint_host, "198.51.100.10");
    }

    #[test]
    fn test_secondary_node_prefixed_keys_with_fallback() {
        let mut env = base_env();
        env.insert("WG_EU1_SERVER_PUBLIC_KEY", "eu1pubkey=");
        env.insert("WG_EU1_ENDPOINT_HOST", "203.0.113.7");
        env.insert("WG_EU1_NETWORK_CIDR", "10.1.0.0/24");
        env.insert("WG_EU1_MTU", "1280");
        let registry = NodeRegistry::new(env);

        let node = registry.resolve("eu1").unwrap();
        assert_eq!(node.server_public_key, "eu1pubkey=");
        assert_eq!(node.network_cidr, "10.1.0.0/24");
        assert_eq!(node.mtu.as_deref(), Some("1280"));
        // Unset prefixed fields fall back to the primary defaults.
        assert_eq!(node.interface, "wg0");
        assert_eq!(node.dns, "1.1.1.1, 8.8.8.8");
        assert_eq!(
            node.redirect_script.as_deref(),
            Some("/opt/vpnservice/scripts/add-ss-redirect.sh")
        );
    }

    #[test]
    fn test_secondary_ssh_defaults_to_endpoint_host_as_root() {
        let mut env = base_env();
        env.insert("WG_EU1_SERVER_PUBLIC_KEY", "eu1pubkey=");
        env.insert("WG_EU1_ENDPOINT_HOST", "203.0.113.7");
        let registry = NodeRegistry::new(env);

        let node = registry.resolve("eu1").unwrap();
        let ssh = node.ssh.unwrap();
        assert_eq!(ssh.destination(), "root@203.0.113.7");
    }

    #[test]
    fn test_secondary_explicit_ssh_target() {
        let mut env = base_env();
        env.insert("WG_EU1_SERVER_PUBLIC_KEY", "eu1pubkey=");
        env.insert("WG_EU1_ENDPOINT_HOST", "203.0.113.7");
        env.insert("WG_EU1_SSH_HOST", "10.8.0.1");
        env.insert("WG_EU1_SSH_USER", "admin");
        env.insert("WG_EU1_SSH_KEY_PATH", "/root/.ssh/eu1");
        let registry = NodeRegistry::new(env);

        let ssh = registry.resolve("eu1").unwrap().ssh.unwrap();
        assert_eq!(ssh.destination(), "admin@10.8.0.1");
        assert_eq!(ssh.key_path.as_deref(), Some(std::path::Path::new("/root/.ssh/eu1")));
    }

    #[test]
    fn test_bad_port_is_config_fault() {
        let mut env = base_env();
        env.insert("WG_ENDPOINT_PORT", "fifty-one-eight-twenty");
        let registry = NodeRegistry::new(env);
        assert!(matches!(registry.resolve("main"), Err(Error::Config(_))));
    }

    #[test]
    fn test_available_nodes() {
        let mut env = base_env();
        env.insert("WG_EU1_SERVER_PUBLIC_KEY", "eu1pubkey=");
        env.insert("WG_EU1_ENDPOINT_HOST", "203.0.113.7");
        // Configured key but no endpoint anywhere: not available.
        let mut env2 = EnvMap::default();
        env2.insert("WG_AP1_SERVER_PUBLIC_KEY", "ap1pubkey=");

        assert_eq!(
            NodeRegistry::new(env).available_nodes(),
            vec!["main".to_string(), "eu1".to_string()]
        );
        assert_eq!(
            NodeRegistry::new(env2).available_nodes(),
            vec!["main".to_string()]
        );
    }
}
