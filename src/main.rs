//! Payment Watcher Service
//!
//! Accepts USDT payments on multiple EVM-compatible chains. The service
//! creates time-bounded payment sessions over a REST API, watches each
//! configured chain for ERC-20 `Transfer` logs to the session recipient,
//! tracks confirmations against per-chain thresholds, and completes or
//! expires sessions through a deterministic state machine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, warn};

use payment_watcher::address::RecipientAddressSource;
use payment_watcher::api::ApiServer;
use payment_watcher::config::Config;
use payment_watcher::events::{Event, EventBus, DEFAULT_QUEUE_CAPACITY};
use payment_watcher::evm_client::EvmClient;
use payment_watcher::expiry::ExpiryScanner;
use payment_watcher::registry::{MemoryStore, SessionRegistry};
use payment_watcher::verification::ReceiptVerifier;
use payment_watcher::watcher::{ChainWatcher, StatusBoard};
use payment_watcher::webhook::WebhookDispatcher;

// ============================================================================
// MAIN APPLICATION ENTRY POINT
// ============================================================================

/// Main application entry point.
///
/// This function:
/// 1. Initializes logging and tracing
/// 2. Loads the immutable service configuration
/// 3. Wires the registry, event bus and subscribers
/// 4. Initializes and starts one watcher per configured chain
/// 5. Serves the REST API until Ctrl-C, then shuts down gracefully
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    info!("Starting Payment Watcher Service");

    let config = Arc::new(Config::load()?);
    if config.api.api_key.is_empty() {
        warn!("API_KEY is empty, the API is running unauthenticated");
    }
    if config.chains.is_empty() {
        info!("no active networks configured, serving API only");
    }

    let bus = EventBus::new(DEFAULT_QUEUE_CAPACITY);
    let status = Arc::new(StatusBoard::new());
    let addresses = RecipientAddressSource::from_config(&config);
    let registry = Arc::new(SessionRegistry::new(
        config.clone(),
        Box::new(MemoryStore::new()),
        addresses,
        bus.clone(),
    ));

    // Subscribers register before the watchers start so no event is missed.
    if let Some(webhook_config) = config.webhook.clone() {
        let dispatcher = WebhookDispatcher::new(webhook_config, registry.clone());
        dispatcher.start(bus.subscribe("webhook"));
    }

    let mut verifier_clients = HashMap::new();
    for chain in &config.chains {
        if let Ok(client) = EvmClient::new(&chain.rpc_url) {
            verifier_clients.insert(chain.network, client);
        }
    }
    let verifier = ReceiptVerifier::new(registry.clone(), verifier_clients);
    verifier.start(bus.subscribe("verification"));

    // One watcher per configured chain. A chain that fails validation or
    // cannot reach its RPC endpoint is reported halted; the rest continue.
    let mut watchers = Vec::new();
    for chain in &config.chains {
        status.register(chain.network).await;
        let client = match EvmClient::new(&chain.rpc_url) {
            Ok(client) => client,
            Err(e) => {
                error!("[{}] failed to build RPC client: {}", chain.network, e);
                status.set_halted(chain.network).await;
                bus.publish(Event::ChainHalted {
                    network: chain.network,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let watcher = Arc::new(ChainWatcher::new(
            chain.clone(),
            client,
            registry.clone(),
            status.clone(),
        ));
        match watcher.initialize().await {
            Ok(()) => {
                watcher.start()?;
                watchers.push(watcher);
            }
            Err(e) => {
                // `initialize` already reported the halt.
                error!("[{}] watcher not started: {}", chain.network, e);
            }
        }
    }

    let scanner = ExpiryScanner::new(registry.clone(), config.expiry_scan_interval_secs);
    let scanner_handle = scanner.start();

    info!("all components initialized successfully");

    let api_server = ApiServer::new(config.clone(), registry.clone(), status.clone());
    api_server
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // Graceful shutdown: stop producers first, then drain the bus.
    info!("shutting down");
    for watcher in &watchers {
        watcher.stop().await;
    }
    scanner.stop();
    let _ = scanner_handle.await;
    bus.flush(Duration::from_millis(config.shutdown_flush_ms)).await;
    info!("shutdown complete");
    Ok(())
}
