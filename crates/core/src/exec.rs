//! Command execution against VPN nodes
//!
//! Local nodes are mutated by invoking `wg` directly with an argument
//! array; remote nodes get the same command line over a non-interactive
//! SSH session. Arbitrary admin commands are escaped before being
//! embedded in the remote `bash -c` invocation.

use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};
use wgfleet_common::types::{NodeDescriptor, SshTarget};
use wgfleet_common::{Error, Result};

/// Default bound on a node round-trip.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Captured output of a node command.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// The seam between the peer lifecycle and live interface mutation.
///
/// Everything that touches a node goes through here, so the lifecycle
/// manager can be exercised against a mock without a live interface.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Add or update a peer on the node's live interface.
    ///
    /// Runtime-only mutation: the change does not survive a node reboot
    /// unless the node syncs its own interface config.
    async fn apply_peer(
        &self,
        node: &NodeDescriptor,
        public_key: &str,
        address: &str,
    ) -> Result<()>;

    /// Remove a peer from the live interface. An already-absent peer is
    /// an acceptable outcome, not an error.
    async fn remove_peer(&self, node: &NodeDescriptor, public_key: &str) -> Result<()>;

    /// Run the node-side redirect script for one client address.
    async fn run_redirect(&self, node: &NodeDescriptor, client_ip: &str) -> Result<()>;

    /// Run an arbitrary command on the node.
    async fn run(
        &self,
        node: &NodeDescriptor,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput>;
}

/// Executor backed by the `wg` tool locally and `ssh` for remote nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct WgExecutor;

#[async_trait]
impl NodeExecutor for WgExecutor {
    async fn apply_peer(
        &self,
        node: &NodeDescriptor,
        public_key: &str,
        address: &str,
    ) -> Result<()> {
        if address.trim().is_empty() {
            return Err(Error::InvalidAddress(
                "empty peer address; check the peer ledger and the node's network CIDR".to_string(),
            ));
        }
        let argv = wg_set_args(&node.interface, public_key, Some(address));
        info!(node = %node.node_id, %public_key, %address, "applying peer to interface");
        self.dispatch(node, &argv, DEFAULT_TIMEOUT).await?;
        Ok(())
    }

    async fn remove_peer(&self, node: &NodeDescriptor, public_key: &str) -> Result<()> {
        let argv = wg_set_args(&node.interface, public_key, None);
        info!(node = %node.node_id, %public_key, "removing peer from interface");
        if let Err(e) = self.dispatch(node, &argv, DEFAULT_TIMEOUT).await {
            // The peer may already be gone, which is fine for every
            // caller we have (regeneration, profile replacement).
            warn!(node = %node.node_id, error = %e, "peer removal failed, continuing");
        }
        Ok(())
    }

    async fn run_redirect(&self, node: &NodeDescriptor, client_ip: &str) -> Result<()> {
        let Some(ssh) = &node.ssh else {
            return Err(Error::Config(format!(
                "redirect script for node {} requires an SSH target",
                node.node_id
            )));
        };
        let Some(script) = &node.redirect_script else {
            return Err(Error::Config(format!(
                "no redirect script configured for node {}",
                node.node_id
            )));
        };
        let remote_cmd = format!("sudo {} {}", script, client_ip);
        info!(node = %node.node_id, %client_ip, "running redirect script");
        run_ssh(ssh, &remote_cmd, &node.node_id, DEFAULT_TIMEOUT).await?;
        Ok(())
    }

    async fn run(
        &self,
        node: &NodeDescriptor,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput> {
        info!(node = %node.node_id, %command, "running node command");
        match &node.ssh {
            Some(ssh) => {
                let wrapped = wrap_remote_command(command);
                run_ssh(ssh, &wrapped, &node.node_id, timeout).await
            }
            None => {
                let argv = vec![
                    "bash".to_string(),
                    "-c".to_string(),
                    command.to_string(),
                ];
                run_argv(&argv, &node.node_id, timeout).await
            }
        }
    }
}

impl WgExecutor {
    /// Route a `wg` invocation to the node: argv locally, one joined
    /// command line over SSH for remote nodes.
    async fn dispatch(
        &self,
        node: &NodeDescriptor,
        argv: &[String],
        timeout: Duration,
    ) -> Result<ExecOutput> {
        match &node.ssh {
            Some(ssh) => run_ssh(ssh, &argv.join(" "), &node.node_id, timeout).await,
            None => run_argv(argv, &node.node_id, timeout).await,
        }
    }
}

fn wg_set_args(interface: &str, public_key: &str, address: Option<&str>) -> Vec<String> {
    let mut argv = vec![
        "wg".to_string(),
        "set".to_string(),
        interface.to_string(),
        "peer".to_string(),
        public_key.to_string(),
    ];
    match address {
        Some(address) => {
            argv.push("allowed-ips".to_string());
            argv.push(address.trim().to_string());
        }
        None => argv.push("remove".to_string()),
    }
    argv
}

/// Escape a command for embedding inside a double-quoted `bash -c "..."`.
fn escape_for_remote(command: &str) -> String {
    command
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('$', "\\$")
        .replace('`', "\\`")
}

/// Non-interactive login shells come up with a minimal PATH; export the
/// usual sbin/bin locations so system utilities resolve.
fn wrap_remote_command(command: &str) -> String {
    format!(
        "bash -c \"export PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin:$PATH && {}\"",
        escape_for_remote(command)
    )
}

fn ssh_args(ssh: &SshTarget, timeout: Duration) -> Vec<String> {
    let mut argv = vec!["ssh".to_string()];
    if let Some(key) = &ssh.key_path {
        argv.push("-i".to_string());
        argv.push(key.display().to_string());
    }
    argv.extend([
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        format!("ConnectTimeout={}", timeout.as_secs()),
    ]);
    argv.push(ssh.destination());
    argv
}

async fn run_ssh(
    ssh: &SshTarget,
    remote_cmd: &str,
    node_id: &str,
    timeout: Duration,
) -> Result<ExecOutput> {
    let mut argv = ssh_args(ssh, timeout);
    argv.push(remote_cmd.to_string());
    run_argv(&argv, node_id, timeout).await
}

async fn run_argv(argv: &[String], node_id: &str, timeout: Duration) -> Result<ExecOutput> {
    let (program, args) = argv.split_first().ok_or_else(|| Error::Exec {
        node: node_id.to_string(),
        detail: "empty command".to_string(),
    })?;

    let output = tokio::time::timeout(timeout, Command::new(program).args(args).output())
        .await
        .map_err(|_| Error::Timeout {
            node: node_id.to_string(),
            seconds: timeout.as_secs(),
        })?
        .map_err(|e| Error::Exec {
            node: node_id.to_string(),
            detail: format!("failed to spawn {program}: {e}"),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(Error::Exec {
            node: node_id.to_string(),
            detail: format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.trim()
            ),
        });
    }

    Ok(ExecOutput { stdout, stderr })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_wg_set_args() {
        let apply = wg_set_args("wg0", "pubkey=", Some("10.0.0.3/24"));
        assert_eq!(
            apply,
            ["wg", "set", "wg0", "peer", "pubkey=", "allowed-ips", "10.0.0.3/24"]
        );
        let remove = wg_set_args("wg0", "pubkey=", None);
        assert_eq!(remove, ["wg", "set", "wg0", "peer", "pubkey=", "remove"]);
    }

    #[test]
    fn test_escape_for_remote() {
        assert_eq!(
            escape_for_remote(r#"echo "hi" $HOME `id` \n"#),
            r#"echo \"hi\" \$HOME \`id\` \\n"#
        );
    }

    #[test]
    fn test_wrap_remote_command_keeps_path_expansion() {
        let wrapped = wrap_remote_command("wg show wg0");
        // The wrapper's own $PATH must stay unescaped so the remote
        // shell expands it.
        assert!(wrapped.contains(":$PATH && wg show wg0\""));
        assert!(wrapped.starts_with("bash -c \"export PATH="));
    }

    #[test]
    fn test_ssh_args_with_key() {
        let ssh = SshTarget {
            host: "203.0.113.7".to_string(),
            user: Some("root".to_string()),
            key_path: Some(PathBuf::from("/root/.ssh/eu1")),
        };
        let argv = ssh_args(&ssh, Duration::from_secs(15));
        assert_eq!(
            argv,
            [
                "ssh",
                "-i",
                "/root/.ssh/eu1",
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "BatchMode=yes",
                "-o",
                "ConnectTimeout=15",
                "root@203.0.113.7",
            ]
        );
    }

    #[tokio::test]
    async fn test_run_local_captures_output() {
        let node = local_node();
        let out = WgExecutor
            .run(&node, "echo hello", DEFAULT_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_local_nonzero_exit_is_exec_error() {
        let node = local_node();
        let err = WgExecutor
            .run(&node, "echo oops >&2; exit 3", DEFAULT_TIMEOUT)
            .await
            .unwrap_err();
        match err {
            Error::Exec { node, detail } => {
                assert_eq!(node, "main");
                assert!(detail.contains("oops"));
            }
            other => panic!("expected Exec error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_run_local_timeout() {
        let node = local_node();
        let err = WgExecutor
            .run(&node, "sleep 5", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    fn local_node() -> NodeDescriptor {
        NodeDescriptor {
            node_id: "main".to_string(),
            server_public_key: "pk=".to_string(),
            interface: "wg0".to_string(),
            network_cidr: "10.0.0.0/24".to_string(),
            endpoint_host: "198.51.100.10".to_string(),
            endpoint_port: 51820,
            dns: "1.1.1.1, 8.8.8.8".to_string(),
            mtu: None,
            ssh: None,
            redirect_script: None,
        }
    }
}
