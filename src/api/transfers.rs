//! Transfer Endpoints
//!
//! Read-only handlers exposing observed on-chain transfers.

use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use warp::{http::StatusCode, Rejection, Reply};

use super::generic::{error_reply, registry_error_reply};
use crate::config::Network;
use crate::registry::{SessionRegistry, TransferFilter, TransferStatus};

/// Query parameters for `GET /api/v1/transactions`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTransfersQuery {
    pub status: Option<String>,
    pub network: Option<String>,
    pub session_id: Option<String>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

fn parse_status(value: &str) -> Result<TransferStatus, String> {
    match value {
        "PENDING" => Ok(TransferStatus::Pending),
        "CONFIRMED" => Ok(TransferStatus::Confirmed),
        "FAILED" => Ok(TransferStatus::Failed),
        other => Err(format!("unknown transfer status: {}", other)),
    }
}

/// Handler for `GET /api/v1/transactions/{id}`.
pub async fn get_transfer_handler(
    id: String,
    registry: Arc<SessionRegistry>,
) -> Result<impl Reply, Rejection> {
    match registry.get_transfer(&id).await {
        Ok(transfer) => Ok(warp::reply::with_status(
            warp::reply::json(&transfer),
            StatusCode::OK,
        )),
        Err(e) => Ok(registry_error_reply(&e)),
    }
}

/// Handler for `GET /api/v1/transactions`.
pub async fn list_transfers_handler(
    query: ListTransfersQuery,
    registry: Arc<SessionRegistry>,
) -> Result<impl Reply, Rejection> {
    let status = match query.status.as_deref().map(parse_status).transpose() {
        Ok(status) => status,
        Err(e) => return Ok(error_reply(StatusCode::BAD_REQUEST, "invalid_request", &e)),
    };
    let network = match query.network.as_deref().map(Network::from_str).transpose() {
        Ok(network) => network,
        Err(e) => return Ok(error_reply(StatusCode::BAD_REQUEST, "invalid_request", &e)),
    };

    let filter = TransferFilter {
        status,
        network,
        session_id: query.session_id,
    };
    let page = query.page.unwrap_or(1);
    let limit = query.limit.unwrap_or(10);
    match registry.list_transfers(filter, page, limit).await {
        Ok(result) => Ok(warp::reply::with_status(
            warp::reply::json(&result),
            StatusCode::OK,
        )),
        Err(e) => Ok(registry_error_reply(&e)),
    }
}
