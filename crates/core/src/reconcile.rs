//! Ledger / interface drift detection
//!
//! The ledger and the live interface are mutated as two separate side
//! effects with no rollback path between them. Instead of assuming they
//! agree, this module compares the two views and reports drift in both
//! directions. Detection only; nothing is mutated.

use wgfleet_common::types::PeerRecord;

/// Drift between the peer ledger and a node's live interface.
#[derive(Debug, Clone, Default)]
pub struct DriftReport {
    pub node_id: String,
    /// Active ledger records whose public key is absent from the interface.
    pub missing_on_interface: Vec<PeerRecord>,
    /// Interface peer public keys with no active ledger record.
    pub unknown_on_interface: Vec<String>,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.missing_on_interface.is_empty() && self.unknown_on_interface.is_empty()
    }
}

/// Parse `wg show <interface> dump` output into peer public keys.
///
/// The first line describes the interface itself; every following line is
/// one peer with the public key in the first tab-separated column.
pub fn parse_wg_dump(output: &str) -> Vec<String> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| line.split('\t').next())
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

/// Compare active ledger records for a node against the live peer keys.
pub fn diff(node_id: &str, ledger: &[PeerRecord], live_keys: &[String]) -> DriftReport {
    let missing_on_interface = ledger
        .iter()
        .filter(|p| p.active && p.node_id == node_id)
        .filter(|p| !live_keys.contains(&p.public_key))
        .cloned()
        .collect();

    let unknown_on_interface = live_keys
        .iter()
        .filter(|key| {
            !ledger
                .iter()
                .any(|p| p.active && p.node_id == node_id && &p.public_key == *key)
        })
        .cloned()
        .collect();

    DriftReport {
        node_id: node_id.to_string(),
        missing_on_interface,
        unknown_on_interface,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(owner: i64, node: &str, key: &str) -> PeerRecord {
        PeerRecord {
            telegram_id: owner,
            address: "10.0.0.3/24".to_string(),
            public_key: key.to_string(),
            node_id: node.to_string(),
            active: true,
            profile: None,
            updated_at: 0,
        }
    }

    #[test]
    fn test_parse_wg_dump() {
        let dump = "privkey=\tserverpub=\t51820\toff\n\
                    peerA=\t(none)\t203.0.113.9:7212\t10.0.0.3/32\t1700000000\t1024\t2048\t25\n\
                    peerB=\t(none)\t(none)\t10.0.0.4/32\t0\t0\t0\t25\n";
        assert_eq!(parse_wg_dump(dump), ["peerA=", "peerB="]);
    }

    #[test]
    fn test_parse_empty_dump() {
        assert!(parse_wg_dump("privkey=\tserverpub=\t51820\toff\n").is_empty());
        assert!(parse_wg_dump("").is_empty());
    }

    #[test]
    fn test_diff_both_directions() {
        let ledger = [
            peer(1, "main", "present="),
            peer(2, "main", "vanished="),
            peer(3, "eu1", "elsewhere="),
        ];
        let live = vec!["present=".to_string(), "stray=".to_string()];

        let report = diff("main", &ledger, &live);
        assert_eq!(report.missing_on_interface.len(), 1);
        assert_eq!(report.missing_on_interface[0].public_key, "vanished=");
        assert_eq!(report.unknown_on_interface, ["stray="]);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_diff_clean() {
        let ledger = [peer(1, "main", "present=")];
        let live = vec!["present=".to_string()];
        assert!(diff("main", &ledger, &live).is_clean());
    }

    #[test]
    fn test_inactive_records_do_not_count_as_missing() {
        let mut gone = peer(1, "main", "retired=");
        gone.active = false;
        let report = diff("main", &[gone], &[]);
        assert!(report.missing_on_interface.is_empty());
    }
}
