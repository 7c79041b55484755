//! Address allocation
//!
//! Deterministic lowest-free allocation out of a node's CIDR. The used
//! set comes from the peer ledger; the caller must hold the node lock so
//! the read-allocate-persist sequence cannot interleave with another
//! writer.

use ipnetwork::Ipv4Network;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use wgfleet_common::types::{PeerRecord, ProfileType, PRIMARY_NODE};
use wgfleet_common::{Error, Result};

/// Which slice of a node's CIDR an allocation draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolSelector {
    /// The whole host range minus reserved addresses.
    Whole,
    /// Hosts whose final octet falls in `start..=end`, restricted to one
    /// profile type. Only defined for /24 networks.
    LastOctetRange {
        start: u8,
        end: u8,
        exclude: Option<(u8, u8)>,
        profile: ProfileType,
    },
}

impl PoolSelector {
    /// The profile tag stored on peers allocated from this pool.
    pub fn profile_tag(&self) -> Option<ProfileType> {
        match self {
            PoolSelector::Whole => None,
            PoolSelector::LastOctetRange { profile, .. } => Some(*profile),
        }
    }

    fn describe(&self) -> String {
        match self {
            PoolSelector::Whole => "whole".to_string(),
            PoolSelector::LastOctetRange { start, end, exclude, .. } => match exclude {
                Some((x0, x1)) => format!("{start}..{end} excluding {x0}..{x1}"),
                None => format!("{start}..{end}"),
            },
        }
    }
}

/// Pick the next free address for a node.
///
/// Returns the lowest free host in ascending numeric order, rendered
/// `host/prefixlen` for the whole pool and `host/32` for sub-range
/// pools. Exhaustion is an error the caller surfaces; it clears only
/// when capacity changes.
pub fn allocate(
    cidr: &str,
    node_id: &str,
    selector: &PoolSelector,
    peers: &[PeerRecord],
) -> Result<String> {
    let net: Ipv4Network = cidr.parse()?;
    match selector {
        PoolSelector::Whole => allocate_whole(net, node_id, peers),
        PoolSelector::LastOctetRange {
            start,
            end,
            exclude,
            profile,
        } => {
            // Single-octet host addressing only works in a /24; anything
            // else is a configuration error, not something to paper over.
            if net.prefix() != 24 {
                return Err(Error::Config(format!(
                    "last-octet pools require a /24 network, got {cidr}"
                )));
            }
            allocate_last_octet(net, node_id, *start, *end, *exclude, *profile, peers).ok_or_else(
                || Error::PoolExhausted {
                    node: node_id.to_string(),
                    pool: selector.describe(),
                },
            )
        }
    }
}

fn allocate_whole(net: Ipv4Network, node_id: &str, peers: &[PeerRecord]) -> Result<String> {
    let mut taken: HashSet<Ipv4Addr> = peers
        .iter()
        .filter(|p| p.active && p.node_id == node_id)
        .filter_map(|p| p.host_address().parse().ok())
        .collect();

    let network = net.network();
    let broadcast = net.broadcast();
    // First host is the node itself; the second is reserved on the
    // primary node for the manually-managed legacy identity.
    if let Some(node_self) = u32::from(network).checked_add(1).map(Ipv4Addr::from) {
        taken.insert(node_self);
    }
    if node_id == PRIMARY_NODE {
        if let Some(legacy) = u32::from(network).checked_add(2).map(Ipv4Addr::from) {
            taken.insert(legacy);
        }
    }

    for host in net.iter() {
        if host == network || host == broadcast {
            continue;
        }
        if taken.contains(&host) {
            continue;
        }
        return Ok(format!("{}/{}", host, net.prefix()));
    }

    Err(Error::PoolExhausted {
        node: node_id.to_string(),
        pool: PoolSelector::Whole.describe(),
    })
}

fn allocate_last_octet(
    net: Ipv4Network,
    node_id: &str,
    start: u8,
    end: u8,
    exclude: Option<(u8, u8)>,
    profile: ProfileType,
    peers: &[PeerRecord],
) -> Option<String> {
    let taken: HashSet<u8> = peers
        .iter()
        .filter(|p| p.active && p.node_id == node_id && p.profile == Some(profile))
        .filter_map(|p| p.host_address().parse::<Ipv4Addr>().ok())
        .map(|ip| ip.octets()[3])
        .collect();

    for last in start..=end.min(254) {
        if let Some((x0, x1)) = exclude {
            if (x0..=x1).contains(&last) {
                continue;
            }
        }
        if taken.contains(&last) {
            continue;
        }
        let base = net.network().octets();
        let host = Ipv4Addr::new(base[0], base[1], base[2], last);
        if host == net.network() || host == net.broadcast() {
            continue;
        }
        return Some(format!("{}/32", host));
    }

    None
}
