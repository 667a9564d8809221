//! Deterministic key provider for simulation runs.

use ed25519_dalek::{SigningKey, VerifyingKey};
use isltask_env::NodeId;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;

/// Provides deterministic keys derived from a seed.
///
/// Every node gets its own Ed25519 receipt-signing key; the token issuer
/// gets a biscuit root key. Keys are:
/// - Deterministic: same seed, same keys
/// - Unique: each node gets a different key
/// - Isolated: adding nodes does not change existing nodes' keys
pub struct DeterministicKeyProvider {
    /// Master seed
    master_seed: u64,

    /// Cache of generated keys by node
    key_cache: HashMap<NodeId, SigningKey>,
}

impl DeterministicKeyProvider {
    /// Creates a new key provider with the given master seed.
    pub fn new(master_seed: u64) -> Self {
        Self {
            master_seed,
            key_cache: HashMap::new(),
        }
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    /// Returns the token issuer's root key as a biscuit-auth KeyPair.
    ///
    /// biscuit-auth has its own key type, so it is derived from a separate
    /// salt rather than reusing a node key.
    pub fn biscuit_root_key(&self) -> biscuit_auth::KeyPair {
        let biscuit_seed = self.master_seed.wrapping_mul(0x3c6ef372fe94f82b);
        let mut rng = ChaCha8Rng::seed_from_u64(biscuit_seed);
        biscuit_auth::KeyPair::new_with_rng(&mut rng)
    }

    /// Generates or retrieves the receipt-signing key for a node.
    ///
    /// Derived from `master_seed * golden + node_seed * prime`.
    pub fn node_key(&mut self, node: NodeId) -> SigningKey {
        if let Some(key) = self.key_cache.get(&node) {
            return key.clone();
        }

        let node_seed = self
            .master_seed
            .wrapping_mul(0x9e3779b97f4a7c15)
            .wrapping_add(node.as_seed().wrapping_mul(0x517cc1b727220a95));

        let mut rng = ChaCha8Rng::seed_from_u64(node_seed);
        let key = SigningKey::generate(&mut rng);

        self.key_cache.insert(node, key.clone());
        key
    }

    /// Public half of a node's key.
    pub fn node_public_key(&mut self, node: NodeId) -> VerifyingKey {
        self.node_key(node).verifying_key()
    }
}
