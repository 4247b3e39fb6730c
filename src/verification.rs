//! Receipt Verification Module
//!
//! Event bus subscriber that cross-checks detected transfers against their
//! transaction receipts. A transfer whose transaction reverted on chain is
//! marked FAILED in the registry and drops out of completion candidacy.
//! Pending receipts are left alone; the transfer confirms through the normal
//! watcher path once the chain agrees.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Network;
use crate::events::{Event, Subscription};
use crate::evm_client::EvmClient;
use crate::registry::{RegistryError, SessionRegistry, Transfer};

/// Receipt scanner over all configured chains.
pub struct ReceiptVerifier {
    registry: Arc<SessionRegistry>,
    clients: HashMap<Network, EvmClient>,
}

impl ReceiptVerifier {
    pub fn new(registry: Arc<SessionRegistry>, clients: HashMap<Network, EvmClient>) -> Self {
        Self { registry, clients }
    }

    /// Consumes `transfer.detected` events until the bus closes.
    pub fn start(self, mut subscription: Subscription) -> JoinHandle<()> {
        info!("receipt verifier started for {} chains", self.clients.len());
        tokio::spawn(async move {
            while let Some(event) = subscription.rx.recv().await {
                if let Event::TransferDetected { transfer, .. } = event {
                    self.verify(&transfer).await;
                }
            }
            debug!("receipt verifier stopped, bus closed");
        })
    }

    /// Fetches the receipt for one transfer and fails it when reverted.
    async fn verify(&self, transfer: &Transfer) {
        let client = match self.clients.get(&transfer.network) {
            Some(client) => client,
            None => return,
        };

        match client.get_receipt(&transfer.tx_hash).await {
            Ok(Some(receipt)) if !receipt.success => {
                match self
                    .registry
                    .mark_transfer_failed(&transfer.key(), "transaction reverted")
                    .await
                {
                    Ok(()) | Err(RegistryError::InvalidState(_)) => {}
                    Err(e) => warn!(
                        "failed to mark reverted transfer {}: {}",
                        transfer.tx_hash, e
                    ),
                }
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!("no receipt yet for {}", transfer.tx_hash);
            }
            Err(e) => {
                warn!("receipt check for {} failed: {}", transfer.tx_hash, e);
            }
        }
    }
}
