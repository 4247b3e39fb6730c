//! Shared test helpers
//!
//! This module provides constants and builders used by the integration
//! tests: chain/service configuration builders, a registry builder over the
//! in-memory store, and transfer observation builders.
//!
//! Each test binary compiles its own copy, so not every item is used
//! everywhere.
#![allow(dead_code)]

use ethereum_types::U256;
use std::sync::Arc;

use payment_watcher::address::RecipientAddressSource;
use payment_watcher::config::{ApiConfig, ChainConfig, Config, Network};
use payment_watcher::events::{EventBus, Subscription};
use payment_watcher::registry::{
    CreateSessionInput, MemoryStore, SessionRegistry, TransferObservation,
};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Recipient address watched on the test chain (20-byte hex)
pub const RECIPIENT: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

/// Default sender of test transfers (20-byte hex)
pub const SENDER: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

/// A sender that is never on any allowlist (20-byte hex)
#[allow(dead_code)]
pub const OTHER_SENDER: &str = "0xcccccccccccccccccccccccccccccccccccccccc";

/// USDT token contract on the test chain (20-byte hex)
pub const TOKEN_CONTRACT: &str = "0x0000000000000000000000000000000000000001";

/// Dummy transaction hash (32-byte hex)
pub const DUMMY_TX_HASH: &str =
    "0x0000000000000000000000000000000000000000000000000000000000000012";

/// API key used by the test configuration
pub const TEST_API_KEY: &str = "test-api-key";

/// One token in 18-decimal smallest units
pub fn one_token() -> U256 {
    U256::from_dec_str("1000000000000000000").unwrap()
}

// ============================================================================
// CONFIGURATION BUILDERS
// ============================================================================

/// Build the test chain: BEP20_TESTNET, 18 decimals, 2 confirmations.
pub fn build_test_chain() -> ChainConfig {
    ChainConfig {
        network: Network::Bep20Testnet,
        rpc_url: "http://127.0.0.1:18545".to_string(),
        token_contract: TOKEN_CONTRACT.to_string(),
        token_decimals: 18,
        required_confirmations: 2,
        poll_interval_ms: 1000,
        max_block_range: 500,
        recipient: RECIPIENT.to_string(),
        target_amount: None,
        sender_allowlist: Vec::new(),
    }
}

/// Build a valid in-memory test configuration with one chain.
pub fn build_test_config() -> Config {
    Config {
        chains: vec![build_test_chain()],
        api: ApiConfig {
            host: "127.0.0.1".to_string(),
            port: 3999,
            api_key: TEST_API_KEY.to_string(),
            public_reads: false,
        },
        webhook: None,
        expiry_scan_interval_secs: 30,
        shutdown_flush_ms: 1000,
    }
}

// ============================================================================
// REGISTRY BUILDERS
// ============================================================================

/// Build a registry over the in-memory store plus a subscription that sees
/// every event it publishes.
pub fn build_registry(config: Config) -> (Arc<SessionRegistry>, Subscription) {
    let config = Arc::new(config);
    let bus = EventBus::new(1024);
    let subscription = bus.subscribe("test");
    let addresses = RecipientAddressSource::from_config(&config);
    let registry = Arc::new(SessionRegistry::new(
        config,
        Box::new(MemoryStore::new()),
        addresses,
        bus,
    ));
    (registry, subscription)
}

/// Default input for session creation: 1.0 USDT on the test chain.
pub fn create_session_input() -> CreateSessionInput {
    CreateSessionInput {
        amount: "1.0".to_string(),
        currency: "USDT".to_string(),
        network: Network::Bep20Testnet,
        expiration_minutes: Some(30),
        client_ref_id: None,
        metadata: None,
    }
}

// ============================================================================
// OBSERVATION BUILDERS
// ============================================================================

/// Build a transfer observation to the watched recipient. Customize with
/// struct update syntax:
/// ```
/// let obs = TransferObservation { confirmations: 2, ..build_observation() };
/// ```
pub fn build_observation() -> TransferObservation {
    TransferObservation {
        network: Network::Bep20Testnet,
        token_contract: TOKEN_CONTRACT.to_string(),
        tx_hash: DUMMY_TX_HASH.to_string(),
        log_index: 0,
        from: SENDER.to_string(),
        to: RECIPIENT.to_string(),
        raw_value: one_token(),
        block_number: 100,
        confirmations: 1,
    }
}

/// Drain every event currently queued on a subscription into a vector of
/// event kind tags, in delivery order.
pub fn drain_event_kinds(subscription: &mut Subscription) -> Vec<&'static str> {
    let mut kinds = Vec::new();
    while let Ok(event) = subscription.rx.try_recv() {
        kinds.push(event.kind());
    }
    kinds
}
