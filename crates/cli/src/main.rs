//! wgfleet CLI
//!
//! Operator surface over the peer lifecycle core. Chat frontends and
//! dashboards are separate clients of the same core; this binary is what
//! an operator runs on the box next to the ledgers.

use anyhow::bail;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use wgfleet_common::types::{ProfileType, Role, UserRecord};
use wgfleet_common::{EnvMap, Error, PeerStore, UserStore};
use wgfleet_core::{NodeRegistry, PeerManager, WgExecutor};

#[derive(Parser)]
#[command(name = "wgfleet")]
#[command(about = "WireGuard peer provisioning across VPN nodes")]
#[command(version)]
struct Cli {
    /// Environment file with node configuration
    #[arg(long, default_value = "env_vars.txt", global = true)]
    env_file: PathBuf,

    /// Directory holding the peer and user ledgers
    #[arg(long, default_value = "data", global = true)]
    data_dir: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage peers
    #[command(subcommand)]
    Peer(PeerCommands),

    /// Manage owner identities
    #[command(subcommand)]
    User(UserCommands),

    /// Inspect nodes
    #[command(subcommand)]
    Node(NodeCommands),

    /// Run a command on a node over SSH (owner-only capability)
    Exec {
        /// Target node id
        #[arg(long)]
        node: String,

        /// Timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,

        /// Command to run
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
}

#[derive(Subcommand)]
enum PeerCommands {
    /// Create a peer on a node and print the client configuration
    Create {
        #[arg(long)]
        owner: i64,
        #[arg(long, default_value = "main")]
        node: String,
        #[arg(long, value_enum)]
        profile: Option<ProfileArg>,
        /// Write the client configuration to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Create a peer by the owner's stored preferences
    Provision {
        #[arg(long)]
        owner: i64,
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Re-key an existing peer, keeping its address
    Regenerate {
        #[arg(long)]
        owner: i64,
        #[arg(long)]
        node: Option<String>,
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Move a peer to a different profile type (fresh address)
    Replace {
        #[arg(long)]
        owner: i64,
        #[arg(long)]
        node: String,
        #[arg(long, value_enum)]
        profile: ProfileArg,
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// List all ledger records
    List,
}

#[derive(Subcommand)]
enum UserCommands {
    /// Register an owner identity
    Add {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        username: Option<String>,
        /// Grant the owner role
        #[arg(long)]
        owner: bool,
    },

    /// List registered identities
    List,

    /// Set the preferred node for an identity
    SetNode {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        node: String,
    },

    /// Set the preferred profile type for an identity
    SetProfile {
        #[arg(long)]
        id: i64,
        #[arg(long, value_enum)]
        profile: ProfileArg,
    },
}

#[derive(Subcommand)]
enum NodeCommands {
    /// List configured nodes
    List,

    /// Compare the ledger against a node's live interface
    Reconcile {
        #[arg(long)]
        node: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProfileArg {
    Plain,
    SplitTunnel,
    Unified,
}

impl From<ProfileArg> for ProfileType {
    fn from(arg: ProfileArg) -> Self {
        match arg {
            ProfileArg::Plain => ProfileType::Plain,
            ProfileArg::SplitTunnel => ProfileType::SplitTunnel,
            ProfileArg::Unified => ProfileType::Unified,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let env = EnvMap::load(&cli.env_file)?;
    let registry = NodeRegistry::new(env);
    let peers = PeerStore::open(&cli.data_dir);
    let users = UserStore::open(&cli.data_dir);
    let manager = PeerManager::new(registry, peers, users, WgExecutor);

    match cli.command {
        Commands::Peer(cmd) => run_peer(&manager, cmd).await,
        Commands::User(cmd) => run_user(&manager, cmd),
        Commands::Node(cmd) => run_node(&manager, cmd).await,
        Commands::Exec {
            node,
            timeout,
            command,
        } => {
            let out = manager
                .exec(&node, &command.join(" "), Duration::from_secs(timeout))
                .await?;
            if !out.stdout.is_empty() {
                print!("{}", out.stdout);
            }
            if !out.stderr.is_empty() {
                eprint!("{}", out.stderr);
            }
            Ok(())
        }
    }
}

async fn run_peer(manager: &PeerManager<WgExecutor>, cmd: PeerCommands) -> anyhow::Result<()> {
    match cmd {
        PeerCommands::Create {
            owner,
            node,
            profile,
            output,
        } => {
            let (record, config) = manager
                .create(owner, &node, profile.map(ProfileType::from))
                .await?;
            deliver_config(&record.address, &record.node_id, &config, output)
        }
        PeerCommands::Provision { owner, output } => {
            match manager.provision(owner).await {
                Ok((record, config)) => {
                    deliver_config(&record.address, &record.node_id, &config, output)
                }
                Err(Error::AlreadyProvisioned { owner, node }) => {
                    bail!(
                        "owner {owner} already has an active peer on node {node}; \
                         use `peer regenerate` to re-key it"
                    );
                }
                Err(e) => Err(e.into()),
            }
        }
        PeerCommands::Regenerate {
            owner,
            node,
            output,
        } => {
            let (record, config) = manager.regenerate(owner, node.as_deref()).await?;
            deliver_config(&record.address, &record.node_id, &config, output)
        }
        PeerCommands::Replace {
            owner,
            node,
            profile,
            output,
        } => {
            let (record, config) = manager
                .replace_profile(owner, &node, profile.into())
                .await?;
            deliver_config(&record.address, &record.node_id, &config, output)
        }
        PeerCommands::List => {
            let mut records = manager.peers().list_all()?;
            records.sort_by_key(|r| r.telegram_id);
            for record in records {
                let status = if record.active {
                    "active".green()
                } else {
                    "inactive".red()
                };
                let profile = record
                    .profile
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "plain".to_string());
                println!(
                    "{:>12}  {:<6}  {:<18}  {:<12}  {}  {}",
                    record.telegram_id,
                    record.node_id,
                    record.address,
                    profile,
                    status,
                    record.public_key,
                );
            }
            Ok(())
        }
    }
}

fn run_user(manager: &PeerManager<WgExecutor>, cmd: UserCommands) -> anyhow::Result<()> {
    match cmd {
        UserCommands::Add {
            id,
            username,
            owner,
        } => {
            let role = if owner { Role::Owner } else { Role::User };
            manager.users().upsert(&UserRecord::new(id, username, role))?;
            println!("registered {id}");
            Ok(())
        }
        UserCommands::List => {
            let mut users = manager.users().list_all()?;
            users.sort_by_key(|u| u.telegram_id);
            for user in users {
                let role = if user.is_owner() {
                    "owner".yellow()
                } else {
                    "user".normal()
                };
                println!(
                    "{:>12}  {:<20}  {:<5}  node={} profile={}",
                    user.telegram_id,
                    user.username.as_deref().unwrap_or("-"),
                    role,
                    user.preferred_node.as_deref().unwrap_or("main"),
                    user.preferred_profile
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "plain".to_string()),
                );
            }
            Ok(())
        }
        UserCommands::SetNode { id, node } => {
            // Reject ids that do not resolve instead of storing a
            // preference that every later provision would choke on.
            manager.registry().resolve(&node)?;
            let mut user = require_user(manager, id)?;
            user.preferred_node = Some(node.clone());
            manager.users().upsert(&user)?;
            println!("owner {id} now prefers node {node}");
            Ok(())
        }
        UserCommands::SetProfile { id, profile } => {
            let mut user = require_user(manager, id)?;
            user.preferred_profile = Some(profile.into());
            manager.users().upsert(&user)?;
            println!("owner {id} now prefers profile {}", ProfileType::from(profile));
            Ok(())
        }
    }
}

async fn run_node(manager: &PeerManager<WgExecutor>, cmd: NodeCommands) -> anyhow::Result<()> {
    match cmd {
        NodeCommands::List => {
            for node_id in manager.registry().available_nodes() {
                match manager.registry().resolve(&node_id) {
                    Ok(node) => println!(
                        "{:<6}  {}  {}:{}  {}",
                        node_id.bold(),
                        node.network_cidr,
                        node.endpoint_host,
                        node.endpoint_port,
                        if node.ssh.is_some() { "remote" } else { "local" },
                    ),
                    Err(e) => println!("{:<6}  {}", node_id.bold(), e.to_string().red()),
                }
            }
            Ok(())
        }
        NodeCommands::Reconcile { node } => {
            let report = manager.reconcile(&node).await?;
            if report.is_clean() {
                println!("{} ledger and interface agree", "ok:".green());
                return Ok(());
            }
            for record in &report.missing_on_interface {
                println!(
                    "{} owner {} ({}) in ledger but not on interface",
                    "missing:".red(),
                    record.telegram_id,
                    record.address,
                );
            }
            for key in &report.unknown_on_interface {
                println!("{} {} on interface but not in ledger", "unknown:".yellow(), key);
            }
            Ok(())
        }
    }
}

fn require_user(manager: &PeerManager<WgExecutor>, id: i64) -> anyhow::Result<UserRecord> {
    match manager.users().find(id)? {
        Some(user) => Ok(user),
        None => bail!("owner {id} is not registered; run `user add --id {id}` first"),
    }
}

/// Hand the rendered configuration to the operator. The private key is
/// inside; this is its single handoff.
fn deliver_config(
    address: &str,
    node_id: &str,
    config: &str,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    eprintln!(
        "{} peer at {} on node {}",
        "provisioned:".green(),
        address,
        node_id
    );
    match output {
        Some(path) => {
            std::fs::write(&path, config)?;
            eprintln!("client config written to {}", path.display());
        }
        None => print!("{config}"),
    }
    Ok(())
}
