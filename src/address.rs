//! Address Source Module
//!
//! The registry obtains the receiving address for every new session from a
//! pluggable `AddressSource`. The reference deployment watches a single
//! recipient per chain, so the default source hands out that configured
//! recipient; the registry's address index then admits one open session per
//! `(network, address)` at a time. Deployments with per-session deposit
//! addresses plug in their own source.

use sha3::{Digest, Keccak256};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{Config, Network};

/// Issues a receiving EVM address for a new session.
pub trait AddressSource: Send + Sync {
    /// Returns the address the session should be paid on.
    ///
    /// # Arguments
    ///
    /// * `network` - Chain the session lives on
    /// * `session_id` - Id of the session being created
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - A 20-byte hex address
    /// * `Err(String)` - No address can be issued for this network
    fn new_address(&self, network: Network, session_id: &str) -> Result<String, String>;
}

/// Default source: every session on a chain receives on the chain's
/// configured recipient, the same address the watcher filters logs for.
pub struct RecipientAddressSource {
    recipients: HashMap<Network, String>,
}

impl RecipientAddressSource {
    pub fn from_config(config: &Config) -> Arc<Self> {
        let recipients = config
            .chains
            .iter()
            .map(|c| (c.network, c.recipient.to_lowercase()))
            .collect();
        Arc::new(Self { recipients })
    }
}

impl AddressSource for RecipientAddressSource {
    fn new_address(&self, network: Network, _session_id: &str) -> Result<String, String> {
        self.recipients
            .get(&network)
            .filter(|r| !r.is_empty())
            .cloned()
            .ok_or_else(|| format!("no recipient configured for {}", network))
    }
}

/// Deterministic per-session source for multi-address deployments and tests:
/// the address is the last 20 bytes of `keccak256(network || session_id)`.
pub struct DerivedAddressSource;

impl AddressSource for DerivedAddressSource {
    fn new_address(&self, network: Network, session_id: &str) -> Result<String, String> {
        let mut hasher = Keccak256::new();
        hasher.update(network.as_str().as_bytes());
        hasher.update(session_id.as_bytes());
        let digest = hasher.finalize();
        Ok(format!("0x{}", hex::encode(&digest[12..])))
    }
}
