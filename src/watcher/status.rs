//! Chain Status Board
//!
//! Shared liveness view of every configured chain, written by the watchers
//! and read by the network-status API endpoint.

use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::config::Network;

/// Operational state of one chain watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChainState {
    /// Watcher is polling normally.
    #[serde(rename = "ACTIVE")]
    Active,
    /// Watcher hit a fatal error or refused to start.
    #[serde(rename = "HALTED")]
    Halted,
    /// Chain is configured but its watcher is not running.
    #[serde(rename = "INACTIVE")]
    Inactive,
}

/// Snapshot entry for one chain.
#[derive(Debug, Clone, Copy)]
pub struct ChainStatus {
    pub state: ChainState,
    /// Last block the watcher fully processed; 0 until initialized.
    pub last_block: u64,
}

/// Shared per-chain status map.
#[derive(Default)]
pub struct StatusBoard {
    inner: RwLock<HashMap<Network, ChainStatus>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a configured chain as INACTIVE until its watcher starts.
    pub async fn register(&self, network: Network) {
        self.inner.write().await.entry(network).or_insert(ChainStatus {
            state: ChainState::Inactive,
            last_block: 0,
        });
    }

    /// Marks a chain active and records its cursor.
    pub async fn set_active(&self, network: Network, last_block: u64) {
        self.inner.write().await.insert(
            network,
            ChainStatus {
                state: ChainState::Active,
                last_block,
            },
        );
    }

    /// Marks a chain halted, keeping the last processed block.
    pub async fn set_halted(&self, network: Network) {
        let mut inner = self.inner.write().await;
        let last_block = inner.get(&network).map_or(0, |s| s.last_block);
        inner.insert(
            network,
            ChainStatus {
                state: ChainState::Halted,
                last_block,
            },
        );
    }

    /// Marks a chain inactive (watcher stopped), keeping the last block.
    pub async fn set_inactive(&self, network: Network) {
        let mut inner = self.inner.write().await;
        let last_block = inner.get(&network).map_or(0, |s| s.last_block);
        inner.insert(
            network,
            ChainStatus {
                state: ChainState::Inactive,
                last_block,
            },
        );
    }

    /// Current status of one chain.
    pub async fn get(&self, network: Network) -> Option<ChainStatus> {
        self.inner.read().await.get(&network).copied()
    }
}
