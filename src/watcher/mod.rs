//! Chain Watcher Module
//!
//! One watcher per chain transforms chain state into a stream of normalized
//! transfer observations for the registry. The watcher tails the chain head
//! with a cursor, fetches ERC-20 `Transfer` logs filtered by token contract
//! and recipient, and feeds every parsed log to `SessionRegistry::apply`.
//!
//! Failure semantics: transient RPC errors skip the tick without advancing
//! the cursor; an oversized block range is retried with a halved window up
//! to three times; fatal errors halt the watcher and emit `chain.halted`.

mod parse;
mod status;

pub use parse::parse_transfer_log;
pub use status::{ChainState, ChainStatus, StatusBoard};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ChainConfig;
use crate::events::Event;
use crate::evm_client::{address_topic, event_topic, EvmClient, LogFilter, RpcError};
use crate::registry::SessionRegistry;

/// Maximum number of halving retries after a range-too-wide response.
const MAX_RANGE_RETRIES: u32 = 3;

/// Errors surfaced by watcher lifecycle operations.
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("watcher init failed: {0}")]
    Init(String),
    #[error("watcher is not initialized")]
    NotInitialized,
}

/// Per-chain polling loop that owns the last-checked-block cursor.
pub struct ChainWatcher {
    chain: ChainConfig,
    client: EvmClient,
    registry: Arc<SessionRegistry>,
    status: Arc<StatusBoard>,
    /// ERC-20 Transfer topic-0, computed once.
    transfer_topic: String,
    /// Last block whose logs were fully processed.
    cursor: AtomicU64,
    initialized: AtomicBool,
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ChainWatcher {
    /// Creates a watcher for one chain. The watcher is inert until
    /// `initialize` and `start` are called.
    pub fn new(
        chain: ChainConfig,
        client: EvmClient,
        registry: Arc<SessionRegistry>,
        status: Arc<StatusBoard>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            chain,
            client,
            registry,
            status,
            transfer_topic: event_topic("Transfer(address,address,uint256)"),
            cursor: AtomicU64::new(0),
            initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
            shutdown_tx,
            handle: Mutex::new(None),
        }
    }

    /// Last fully processed block.
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::SeqCst)
    }

    /// True while the polling loop is scheduled.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Validates the chain configuration and anchors the cursor at the
    /// current head, so the first poll only picks up blocks after startup.
    ///
    /// On failure the chain is reported halted and `chain.halted` is
    /// emitted; the rest of the service keeps running.
    pub async fn initialize(&self) -> Result<(), WatcherError> {
        if let Err(reason) = self.chain.validate() {
            self.halt(&reason).await;
            return Err(WatcherError::Init(reason));
        }
        let head = match self.client.block_number().await {
            Ok(head) => head,
            Err(e) => {
                let reason = format!("failed to fetch head at startup: {}", e);
                self.halt(&reason).await;
                return Err(WatcherError::Init(reason));
            }
        };
        self.cursor.store(head, Ordering::SeqCst);
        self.initialized.store(true, Ordering::SeqCst);
        self.status.set_active(self.chain.network, head).await;
        info!(
            "[{}] watcher initialized at block {}",
            self.chain.network, head
        );
        Ok(())
    }

    /// Schedules the polling loop. Idempotent: calling `start` on a running
    /// watcher is a no-op.
    pub fn start(self: &Arc<Self>) -> Result<(), WatcherError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(WatcherError::NotInitialized);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.shutdown_tx.send(false);

        let watcher = self.clone();
        let handle = tokio::spawn(async move {
            watcher.run_loop().await;
        });
        *self.handle.lock().expect("watcher handle lock poisoned") = Some(handle);
        info!(
            "[{}] watcher started, polling every {}ms",
            self.chain.network, self.chain.poll_interval_ms
        );
        Ok(())
    }

    /// Stops the polling loop, letting any in-flight tick finish. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        let handle = self
            .handle
            .lock()
            .expect("watcher handle lock poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.status.set_inactive(self.chain.network).await;
        info!("[{}] watcher stopped", self.chain.network);
    }

    /// The polling loop. Ticks are coalesced: a tick that overruns the poll
    /// interval delays the next one instead of stacking.
    async fn run_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.chain.poll_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                    self.tick().await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// One poll cycle: advance from `cursor + 1` to the head, bounded by the
    /// configured maximum block range, fetch and parse the transfer logs in
    /// that window, and feed them to the registry.
    ///
    /// The cursor only advances past blocks whose logs were successfully
    /// processed. Exposed for tests.
    pub async fn tick(&self) {
        let network = self.chain.network;

        let head = match self.client.block_number().await {
            Ok(head) => head,
            Err(RpcError::Fatal(msg)) => {
                self.halt(&format!("head fetch failed fatally: {}", msg)).await;
                return;
            }
            Err(e) => {
                warn!("[{}] skipping tick, head fetch failed: {}", network, e);
                return;
            }
        };

        let cursor = self.cursor.load(Ordering::SeqCst);
        let mut from = cursor + 1;
        if head < from {
            return;
        }
        if head - from + 1 > self.chain.max_block_range {
            // Bounded catch-up: older blocks in the gap are sacrificed to
            // keep restart latency bounded.
            from = head - self.chain.max_block_range + 1;
            warn!(
                "[{}] catch-up gap exceeds {} blocks, clamping window to [{}, {}]",
                network, self.chain.max_block_range, from, head
            );
        }

        // Halve the window on range-too-wide responses; the cursor then only
        // advances to the shrunken upper bound.
        let mut to = head;
        let mut attempts = 0;
        let logs = loop {
            let filter = LogFilter {
                address: self.chain.token_contract.clone(),
                topics: vec![
                    Some(self.transfer_topic.clone()),
                    None,
                    Some(address_topic(&self.chain.recipient)),
                ],
                from_block: from,
                to_block: to,
            };
            match self.client.get_logs(&filter).await {
                Ok(logs) => break logs,
                Err(RpcError::RangeTooWide(msg)) => {
                    attempts += 1;
                    let span = to - from + 1;
                    if attempts > MAX_RANGE_RETRIES || span <= 1 {
                        warn!(
                            "[{}] skipping tick, range [{}, {}] still too wide after {} retries: {}",
                            network, from, to, attempts - 1, msg
                        );
                        return;
                    }
                    to = from + span / 2 - 1;
                    debug!(
                        "[{}] range too wide, retrying with [{}, {}]",
                        network, from, to
                    );
                }
                Err(RpcError::Fatal(msg)) => {
                    self.halt(&format!("getLogs failed fatally: {}", msg)).await;
                    return;
                }
                Err(e) => {
                    warn!("[{}] skipping tick, getLogs failed: {}", network, e);
                    return;
                }
            }
        };

        if !logs.is_empty() {
            debug!(
                "[{}] {} transfer logs in blocks [{}, {}]",
                network,
                logs.len(),
                from,
                to
            );
        }
        for log in &logs {
            match parse_transfer_log(&self.chain, log, head) {
                Ok(obs) => self.registry.apply(obs).await,
                Err(e) => {
                    warn!(
                        "[{}] skipping malformed log in tx {}: {}",
                        network, log.transaction_hash, e
                    );
                }
            }
        }

        // Logs are only fetched once per block; confirmation growth for
        // already-recorded transfers comes from the advancing head.
        self.registry.refresh_confirmations(network, head).await;

        self.cursor.store(to, Ordering::SeqCst);
        self.status.set_active(network, to).await;
    }

    /// Halts the watcher: no further ticks, HALTED on the status board, and
    /// a `chain.halted` event on the bus.
    async fn halt(&self, reason: &str) {
        error!("[{}] watcher halted: {}", self.chain.network, reason);
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
        self.status.set_halted(self.chain.network).await;
        self.registry.bus().publish(Event::ChainHalted {
            network: self.chain.network,
            reason: reason.to_string(),
        });
    }
}
