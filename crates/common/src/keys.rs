//! WireGuard key material
//!
//! X25519 key pairs in the base64 encoding the `wg` tooling exchanges.
//! The private half exists only in memory and crosses the crate boundary
//! exactly once, inside the rendered client configuration.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use x25519_dalek::{PublicKey, StaticSecret};

/// An X25519 key pair for one peer.
#[derive(Clone)]
pub struct WgKeyPair {
    secret: StaticSecret,
}

impl WgKeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        Self {
            secret: StaticSecret::random(),
        }
    }

    /// Base64 of the public half, the form `wg set ... peer <key>` takes.
    pub fn public_base64(&self) -> String {
        BASE64.encode(PublicKey::from(&self.secret).as_bytes())
    }

    /// Base64 of the private half. Hand this out once; never log it.
    pub fn private_base64(&self) -> String {
        BASE64.encode(self.secret.to_bytes())
    }
}

impl std::fmt::Debug for WgKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgKeyPair")
            .field("public_key", &self.public_base64())
            .field("private_key", &"[redacted]")
            .finish()
    }
}
