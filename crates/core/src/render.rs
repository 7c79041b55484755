//! Client configuration rendering
//!
//! Pure formatting of a peer's key material and node parameters into the
//! tunnel-config text client applications consume.

use wgfleet_common::types::NodeDescriptor;

/// Render the client-side tunnel configuration for a freshly issued peer.
///
/// This is the only place the private key surfaces; it lives in the
/// returned text and nowhere else.
pub fn client_config(node: &NodeDescriptor, private_key: &str, address: &str) -> String {
    let mut interface = vec![
        "[Interface]".to_string(),
        format!("PrivateKey = {private_key}"),
        format!("Address = {address}"),
        format!("DNS = {}", node.dns),
    ];
    if let Some(mtu) = node.mtu.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        interface.push(format!("MTU = {mtu}"));
    }

    format!(
        "{}\n\n[Peer]\nPublicKey = {}\nEndpoint = {}:{}\nAllowedIPs = 0.0.0.0/0\nPersistentKeepalive = 25\n",
        interface.join("\n"),
        node.server_public_key,
        node.endpoint_host,
        node.endpoint_port,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(mtu: Option<&str>) -> NodeDescriptor {
        NodeDescriptor {
            node_id: "eu1".to_string(),
            server_public_key: "serverpub=".to_string(),
            interface: "wg0".to_string(),
            network_cidr: "10.1.0.0/24".to_string(),
            endpoint_host: "203.0.113.7".to_string(),
            endpoint_port: 51820,
            dns: "1.1.1.1, 8.8.8.8".to_string(),
            mtu: mtu.map(str::to_string),
            ssh: None,
            redirect_script: None,
        }
    }

    #[test]
    fn test_config_format() {
        let got = client_config(&node(None), "privkey=", "10.1.0.8/32");
        let want = "[Interface]\n\
                    PrivateKey = privkey=\n\
                    Address = 10.1.0.8/32\n\
                    DNS = 1.1.1.1, 8.8.8.8\n\
                    \n\
                    [Peer]\n\
                    PublicKey = serverpub=\n\
                    Endpoint = 203.0.113.7:51820\n\
                    AllowedIPs = 0.0.0.0/0\n\
                    PersistentKeepalive = 25\n";
        assert_eq!(got, want);
    }

    #[test]
    fn test_mtu_line_when_configured() {
        let got = client_config(&node(Some("1280")), "privkey=", "10.1.0.8/32");
        assert!(got.contains("DNS = 1.1.1.1, 8.8.8.8\nMTU = 1280\n\n[Peer]"));
    }

    #[test]
    fn test_blank_mtu_is_omitted() {
        let got = client_config(&node(Some("  ")), "privkey=", "10.1.0.8/32");
        assert!(!got.contains("MTU"));
    }
}
