//! Payment Session Endpoints
//!
//! Handlers for creating, fetching, listing and recreating payment sessions.

use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use warp::{http::StatusCode, Rejection, Reply};

use super::generic::{error_reply, registry_error_reply};
use crate::config::Network;
use crate::registry::{
    CreateSessionInput, SessionFilter, SessionRegistry, SessionStatus,
};

/// Request body for `POST /api/v1/payment-sessions`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub amount: String,
    pub currency: String,
    pub network: String,
    pub expiration_minutes: Option<u64>,
    pub client_ref_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Query parameters for `GET /api/v1/payment-sessions`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSessionsQuery {
    pub status: Option<String>,
    pub network: Option<String>,
    pub client_ref_id: Option<String>,
    /// Inclusive lower bound on creation time (Unix seconds).
    pub from_date: Option<u64>,
    /// Inclusive upper bound on creation time (Unix seconds).
    pub to_date: Option<u64>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

/// Parses an optional UPPERCASE status string from the query.
fn parse_status(value: &str) -> Result<SessionStatus, String> {
    match value {
        "PENDING" => Ok(SessionStatus::Pending),
        "COMPLETED" => Ok(SessionStatus::Completed),
        "EXPIRED" => Ok(SessionStatus::Expired),
        "FAILED" => Ok(SessionStatus::Failed),
        other => Err(format!("unknown session status: {}", other)),
    }
}

/// Handler for `POST /api/v1/payment-sessions`.
pub async fn create_session_handler(
    body: CreateSessionRequest,
    registry: Arc<SessionRegistry>,
) -> Result<impl Reply, Rejection> {
    let network = match Network::from_str(&body.network) {
        Ok(network) => network,
        Err(e) => return Ok(error_reply(StatusCode::BAD_REQUEST, "invalid_request", &e)),
    };

    let input = CreateSessionInput {
        amount: body.amount,
        currency: body.currency,
        network,
        expiration_minutes: body.expiration_minutes,
        client_ref_id: body.client_ref_id,
        metadata: body.metadata,
    };
    match registry.create_session(input).await {
        Ok(session) => Ok(warp::reply::with_status(
            warp::reply::json(&session),
            StatusCode::OK,
        )),
        Err(e) => Ok(registry_error_reply(&e)),
    }
}

/// Handler for `GET /api/v1/payment-sessions/{id}`.
pub async fn get_session_handler(
    id: String,
    registry: Arc<SessionRegistry>,
) -> Result<impl Reply, Rejection> {
    match registry.get_session(&id).await {
        Ok(session) => Ok(warp::reply::with_status(
            warp::reply::json(&session),
            StatusCode::OK,
        )),
        Err(e) => Ok(registry_error_reply(&e)),
    }
}

/// Handler for `GET /api/v1/payment-sessions`.
pub async fn list_sessions_handler(
    query: ListSessionsQuery,
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

    let filter = SessionFilter {
        status,
        network,
        client_ref_id: query.client_ref_id,
        from_date: query.from_date,
        to_date: query.to_date,
    };
    let page = query.page.unwrap_or(1);
    let limit = query.limit.unwrap_or(10);
    match registry.list_sessions(filter, page, limit).await {
        Ok(result) => Ok(warp::reply::with_status(
            warp::reply::json(&result),
            StatusCode::OK,
        )),
        Err(e) => Ok(registry_error_reply(&e)),
    }
}

/// Handler for `POST /api/v1/payment-sessions/{id}/recreate`.
pub async fn recreate_session_handler(
    id: String,
    registry: Arc<SessionRegistry>,
) -> Result<impl Reply, Rejection> {
    match registry.recreate_session(&id).await {
        Ok(session) => Ok(warp::reply::with_status(
            warp::reply::json(&session),
            StatusCode::OK,
        )),
        Err(e) => Ok(registry_error_reply(&e)),
    }
}
