//! System Endpoints
//!
//! Operational visibility into the chain watchers.

use serde::Serialize;
use std::sync::Arc;
use warp::{http::StatusCode, Rejection, Reply};

use crate::config::{Config, Network};
use crate::watcher::{ChainState, StatusBoard};

/// One entry of the network-status response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatusEntry {
    pub id: Network,
    pub status: ChainState,
    pub last_block: u64,
    pub required_confirmations: u64,
}

/// Handler for `GET /api/v1/system/network-status`.
///
/// Reports every configured chain: ACTIVE while its watcher polls, HALTED
/// after a fatal error, INACTIVE when no watcher is running for it.
pub async fn network_status_handler(
    config: Arc<Config>,
    status: Arc<StatusBoard>,
) -> Result<impl Reply, Rejection> {
    let mut entries = Vec::with_capacity(config.chains.len());
    for chain in &config.chains {
        let chain_status = status.get(chain.network).await;
        entries.push(NetworkStatusEntry {
            id: chain.network,
            status: chain_status.map_or(ChainState::Inactive, |s| s.state),
            last_block: chain_status.map_or(0, |s| s.last_block),
            required_confirmations: chain.required_confirmations,
        });
    }
    Ok(warp::reply::with_status(
        warp::reply::json(&entries),
        StatusCode::OK,
    ))
}
