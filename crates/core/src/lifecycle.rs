//! Peer lifecycle orchestration
//!
//! Creates, regenerates, and replaces peers against live interfaces,
//! with the ledger as the source of truth for allocated addresses.
//! Within one operation the order is strict: allocate, generate keys,
//! apply to the interface, persist, render. The ledger is written only
//! after a confirmed apply, and a per-node lock keeps the whole sequence
//! from interleaving with a concurrent writer on the same node.

use crate::allocator::{self, PoolSelector};
use crate::exec::{ExecOutput, NodeExecutor, DEFAULT_TIMEOUT};
use crate::reconcile::{self, DriftReport};
use crate::registry::NodeRegistry;
use crate::render;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use wgfleet_common::keys::WgKeyPair;
use wgfleet_common::store::{PeerStore, UserStore};
use wgfleet_common::types::{NodeDescriptor, PeerRecord, ProfileType, PRIMARY_NODE};
use wgfleet_common::{Error, Result};

/// The one node carrying profile-type sub-pools.
const SPLIT_POOL_NODE: &str = "eu1";
/// Split-tunnel pool bounds on the last octet.
const SPLIT_TUNNEL_POOL: (u8, u8) = (8, 254);
/// Sub-range reserved for unified peers inside the split-tunnel bounds.
const UNIFIED_POOL: (u8, u8) = (20, 50);

/// Orchestrates the peer lifecycle across nodes.
pub struct PeerManager<E> {
    registry: NodeRegistry,
    peers: PeerStore,
    users: UserStore,
    executor: E,
    node_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<E: NodeExecutor> PeerManager<E> {
    pub fn new(registry: NodeRegistry, peers: PeerStore, users: UserStore, executor: E) -> Self {
        Self {
            registry,
            peers,
            users,
            executor,
            node_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn peers(&self) -> &PeerStore {
        &self.peers
    }

    pub fn users(&self) -> &UserStore {
        &self.users
    }

    fn node_lock(&self, node_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.node_locks
            .lock()
            .entry(node_id.to_string())
            .or_default()
            .clone()
    }

    /// The allocation pool for a `(node, profile)` pair. A closed policy:
    /// only the split-pool node carries sub-pools, everything else draws
    /// from the whole pool.
    fn select_pool(node_id: &str, profile: Option<ProfileType>) -> PoolSelector {
        match profile {
            Some(ProfileType::SplitTunnel) if node_id == SPLIT_POOL_NODE => {
                PoolSelector::LastOctetRange {
                    start: SPLIT_TUNNEL_POOL.0,
                    end: SPLIT_TUNNEL_POOL.1,
                    exclude: Some(UNIFIED_POOL),
                    profile: ProfileType::SplitTunnel,
                }
            }
            Some(ProfileType::Unified) if node_id == SPLIT_POOL_NODE => {
                PoolSelector::LastOctetRange {
                    start: UNIFIED_POOL.0,
                    end: UNIFIED_POOL.1,
                    exclude: None,
                    profile: ProfileType::Unified,
                }
            }
            _ => PoolSelector::Whole,
        }
    }

    /// Create a peer for an owner on a node and return the persisted
    /// record together with the rendered client configuration.
    ///
    /// The ledger is owner-keyed: a create supersedes whatever record the
    /// owner had, including one on another node.
    pub async fn create(
        &self,
        owner: i64,
        node_id: &str,
        profile: Option<ProfileType>,
    ) -> Result<(PeerRecord, String)> {
        let node = self.registry.resolve(node_id)?;
        let lock = self.node_lock(node_id);
        let _guard = lock.lock().await;
        self.create_locked(owner, &node, profile).await
    }

    /// Allocate, apply, persist, render. Callers must hold the node lock.
    async fn create_locked(
        &self,
        owner: i64,
        node: &NodeDescriptor,
        profile: Option<ProfileType>,
    ) -> Result<(PeerRecord, String)> {
        let selector = Self::select_pool(&node.node_id, profile);
        let existing = self.peers.list_all()?;
        let address = allocator::allocate(&node.network_cidr, &node.node_id, &selector, &existing)?;

        info!(
            owner,
            node = %node.node_id,
            profile = ?profile,
            %address,
            "creating peer"
        );

        let keys = WgKeyPair::generate();
        let public_key = keys.public_base64();

        self.executor.apply_peer(node, &public_key, &address).await?;

        let stored_profile = selector.profile_tag();
        if stored_profile == Some(ProfileType::SplitTunnel) {
            // Unified peers are redirected node-side via ipset; only the
            // split-tunnel profile needs the per-client script.
            let client_ip = address.split('/').next().unwrap_or(address.as_str());
            self.executor.run_redirect(node, client_ip).await?;
        }

        let record = PeerRecord {
            telegram_id: owner,
            address: address.clone(),
            public_key,
            node_id: node.node_id.clone(),
            active: true,
            profile: stored_profile,
            updated_at: chrono::Utc::now().timestamp(),
        };
        // Persist only after the interface confirmed the apply.
        self.peers.upsert(&record)?;

        let config = render::client_config(node, &keys.private_base64(), &address);
        Ok((record, config))
    }

    /// Issue a fresh key pair for an existing peer, keeping its address
    /// and profile type.
    ///
    /// With an explicit `node_id`, a peer living on a different node is a
    /// hard error rather than an implicit migration.
    pub async fn regenerate(
        &self,
        owner: i64,
        node_id: Option<&str>,
    ) -> Result<(PeerRecord, String)> {
        let existing = self
            .peers
            .find_by_owner(owner, None)?
            .filter(|p| p.active)
            .ok_or_else(|| Error::NotFound {
                owner,
                node: node_id.unwrap_or("any").to_string(),
            })?;

        if let Some(requested) = node_id {
            if requested != existing.node_id {
                return Err(Error::NodeMismatch {
                    owner,
                    have: existing.node_id.clone(),
                    requested: requested.to_string(),
                });
            }
        }

        let node = self.registry.resolve(&existing.node_id)?;
        let lock = self.node_lock(&existing.node_id);
        let _guard = lock.lock().await;

        // Old identity first; an already-absent peer is fine.
        if let Err(e) = self.executor.remove_peer(&node, &existing.public_key).await {
            warn!(owner, node = %node.node_id, error = %e, "old peer removal failed, continuing");
        }

        let keys = WgKeyPair::generate();
        let public_key = keys.public_base64();
        self.executor
            .apply_peer(&node, &public_key, &existing.address)
            .await?;

        let record = PeerRecord {
            telegram_id: owner,
            address: existing.address.clone(),
            public_key,
            node_id: existing.node_id.clone(),
            active: true,
            profile: existing.profile,
            updated_at: chrono::Utc::now().timestamp(),
        };
        self.peers.upsert(&record)?;

        info!(
            owner,
            node = %record.node_id,
            "regenerated peer, same address under a new key"
        );

        let config = render::client_config(&node, &keys.private_base64(), &record.address);
        Ok((record, config))
    }

    /// Move an owner's peer on a node to a different profile type: a
    /// targeted create that discards the previous address and draws a
    /// fresh one from the new pool.
    pub async fn replace_profile(
        &self,
        owner: i64,
        node_id: &str,
        profile: ProfileType,
    ) -> Result<(PeerRecord, String)> {
        let existing = self
            .peers
            .find_by_owner(owner, Some(node_id))?
            .filter(|p| p.active)
            .ok_or_else(|| Error::NotFound {
                owner,
                node: node_id.to_string(),
            })?;

        let node = self.registry.resolve(node_id)?;
        let lock = self.node_lock(node_id);
        let _guard = lock.lock().await;

        info!(
            owner,
            node = node_id,
            from = ?existing.profile,
            to = %profile,
            "replacing peer under a new profile pool"
        );

        // The old address goes back to its pool once the record is
        // overwritten; take the old interface entry down with it.
        if let Err(e) = self.executor.remove_peer(&node, &existing.public_key).await {
            warn!(owner, node = node_id, error = %e, "old peer removal failed, continuing");
        }

        self.create_locked(owner, &node, Some(profile)).await
    }

    /// Provision an owner by their stored preferences: preferred node and
    /// profile type, defaulting to the primary node and the whole pool.
    ///
    /// An active peer already on the preferred node is an error the
    /// caller can act on (regenerate instead); an active peer on another
    /// node gets superseded by the owner-keyed ledger write.
    pub async fn provision(&self, owner: i64) -> Result<(PeerRecord, String)> {
        let user = self.users.find(owner)?;
        let preferred_node = user
            .as_ref()
            .and_then(|u| u.preferred_node.clone())
            .unwrap_or_else(|| PRIMARY_NODE.to_string());
        let preferred_profile = user.as_ref().and_then(|u| u.preferred_profile);

        if let Some(peer) = self.peers.find_by_owner(owner, Some(&preferred_node))? {
            if peer.active {
                return Err(Error::AlreadyProvisioned {
                    owner,
                    node: preferred_node,
                });
            }
        }

        if let Some(peer) = self.peers.find_by_owner(owner, None)? {
            if peer.active && peer.node_id != preferred_node {
                info!(
                    owner,
                    from = %peer.node_id,
                    to = %preferred_node,
                    "owner moving nodes; previous ledger record will be superseded"
                );
            }
        }

        self.create(owner, &preferred_node, preferred_profile).await
    }

    /// Run an arbitrary command on a node. Owner-only surface; callers
    /// are responsible for the restriction.
    pub async fn exec(
        &self,
        node_id: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput> {
        let node = self.registry.resolve(node_id)?;
        self.executor.run(&node, command, timeout).await
    }

    /// Compare the ledger against a node's live interface and report
    /// drift in both directions. Detection only.
    pub async fn reconcile(&self, node_id: &str) -> Result<DriftReport> {
        let node = self.registry.resolve(node_id)?;
        let out = self
            .executor
            .run(
                &node,
                &format!("wg show {} dump", node.interface),
                DEFAULT_TIMEOUT,
            )
            .await?;
        let live = reconcile::parse_wg_dump(&out.stdout);
        let ledger = self.peers.list_all()?;
        Ok(reconcile::diff(node_id, &ledger, &live))
    }
}
