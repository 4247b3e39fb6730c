//! Generic API structures and handlers
//!
//! This module contains the API server, the bearer-token auth filters, the
//! error envelope shared by all endpoints, and the warp injection helpers
//! used by the resource handlers.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use warp::{http::StatusCode, Filter, Rejection, Reply};

use crate::config::Config;
use crate::registry::{RegistryError, SessionRegistry};
use crate::watcher::StatusBoard;

// ============================================================================
// ERROR ENVELOPE
// ============================================================================

/// Error body returned by every failing endpoint:
/// `{"error": {"code": ..., "message": ..., "details": ...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// One of `invalid_request`, `unauthorized`, `not_found`, `server_error`,
    /// `rate_limited`.
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Builds an error reply with the standard envelope.
pub fn error_reply(
    status: StatusCode,
    code: &str,
    message: &str,
) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(
        warp::reply::json(&ErrorEnvelope {
            error: ErrorDetail {
                code: code.to_string(),
                message: message.to_string(),
                details: None,
            },
        }),
        status,
    )
}

/// Maps a registry error onto the HTTP error contract.
pub fn registry_error_reply(err: &RegistryError) -> warp::reply::WithStatus<warp::reply::Json> {
    match err {
        RegistryError::InvalidInput(msg) => {
            error_reply(StatusCode::BAD_REQUEST, "invalid_request", msg)
        }
        RegistryError::NotFound => {
            error_reply(StatusCode::NOT_FOUND, "not_found", "resource not found")
        }
        RegistryError::InvalidState(msg) => {
            error_reply(StatusCode::BAD_REQUEST, "invalid_request", msg)
        }
        RegistryError::AddressUnavailable(msg) => {
            error_reply(StatusCode::BAD_REQUEST, "invalid_request", msg)
        }
    }
}

// ============================================================================
// WARP FILTER HELPERS
// ============================================================================

/// Creates a warp filter that provides access to the session registry.
pub fn with_registry(
    registry: Arc<SessionRegistry>,
) -> impl Filter<Extract = (Arc<SessionRegistry>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || registry.clone())
}

/// Creates a warp filter that provides access to the service configuration.
pub fn with_config(
    config: Arc<Config>,
) -> impl Filter<Extract = (Arc<Config>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || config.clone())
}

/// Creates a warp filter that provides access to the chain status board.
pub fn with_status_board(
    status: Arc<StatusBoard>,
) -> impl Filter<Extract = (Arc<StatusBoard>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || status.clone())
}

// ============================================================================
// AUTHENTICATION
// ============================================================================

/// Custom rejection for missing or wrong bearer tokens.
#[derive(Debug)]
pub struct Unauthorized;

impl warp::reject::Reject for Unauthorized {}

/// Requires `Authorization: Bearer <API_KEY>` on the request.
///
/// A deployment with an empty API key runs unauthenticated.
pub fn require_auth(
    config: Arc<Config>,
) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and_then(move |header: Option<String>| {
            let config = config.clone();
            async move {
                if config.api.api_key.is_empty() {
                    return Ok(());
                }
                let expected = format!("Bearer {}", config.api.api_key);
                match header {
                    Some(value) if value == expected => Ok(()),
                    _ => Err(warp::reject::custom(Unauthorized)),
                }
            }
        })
        .untuple_one()
}

/// Auth filter for read-only endpoints: skipped entirely when the
/// deployment exposes public reads.
pub fn read_auth(config: Arc<Config>) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    let public_reads = config.api.public_reads;
    require_auth(config).or_else(move |rejection: Rejection| async move {
        if public_reads && rejection.find::<Unauthorized>().is_some() {
            Ok(())
        } else {
            Err(rejection)
        }
    })
}

// ============================================================================
// REJECTION HANDLER
// ============================================================================

/// Global rejection handler converting warp rejections into the error
/// envelope with the matching status code.
pub async fn handle_rejection(rej: Rejection) -> Result<impl Reply, std::convert::Infallible> {
    let (status, code, message) = if rej.find::<Unauthorized>().is_some() {
        (
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing or invalid API key".to_string(),
        )
    } else if let Some(err) = rej.find::<warp::filters::body::BodyDeserializeError>() {
        (
            StatusCode::BAD_REQUEST,
            "invalid_request",
            format!("invalid request body: {}", err),
        )
    } else if let Some(err) = rej.find::<warp::reject::InvalidQuery>() {
        (
            StatusCode::BAD_REQUEST,
            "invalid_request",
            format!("invalid query string: {}", err),
        )
    } else if rej.is_not_found() {
        (
            StatusCode::NOT_FOUND,
            "not_found",
            "endpoint not found".to_string(),
        )
    } else if rej.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "invalid_request",
            "method not allowed".to_string(),
        )
    } else {
        error!("unhandled rejection: {:?}", rej);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "server_error",
            "internal server error".to_string(),
        )
    };

    Ok(error_reply(status, code, &message))
}

// ============================================================================
// API SERVER IMPLEMENTATION
// ============================================================================

/// REST API server for the payment watcher service.
pub struct ApiServer {
    /// Service configuration
    config: Arc<Config>,
    /// Session registry (all reads and mutations go through it)
    registry: Arc<SessionRegistry>,
    /// Chain status board written by the watchers
    status: Arc<StatusBoard>,
}

impl ApiServer {
    /// Creates a new API server over the given components.
    pub fn new(
        config: Arc<Config>,
        registry: Arc<SessionRegistry>,
        status: Arc<StatusBoard>,
    ) -> Self {
        Self {
            config,
            registry,
            status,
        }
    }

    /// Starts the HTTP server and serves until `shutdown` resolves.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Server shut down gracefully
    /// * `Err(anyhow::Error)` - Bind address could not be parsed
    pub async fn run(
        &self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.api.host, self.config.api.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid API bind address: {}", e))?;

        let routes = self.create_routes();
        let (bound, server) = warp::serve(routes).bind_with_graceful_shutdown(addr, shutdown);
        info!("API server listening on {}", bound);
        server.await;
        Ok(())
    }

    /// Creates all API routes for the server.
    pub(crate) fn create_routes(
        &self,
    ) -> impl Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone {
        use super::{sessions, system, transfers};

        let config = self.config.clone();
        let registry = self.registry.clone();
        let status = self.status.clone();

        // POST /api/v1/payment-sessions
        let create_session = warp::path!("api" / "v1" / "payment-sessions")
            .and(warp::post())
            .and(require_auth(config.clone()))
            .and(warp::body::json())
            .and(with_registry(registry.clone()))
            .and_then(sessions::create_session_handler);

        // GET /api/v1/payment-sessions/{id}
        let get_session = warp::path!("api" / "v1" / "payment-sessions" / String)
            .and(warp::get())
            .and(read_auth(config.clone()))
            .and(with_registry(registry.clone()))
            .and_then(sessions::get_session_handler);

        // GET /api/v1/payment-sessions
        let list_sessions = warp::path!("api" / "v1" / "payment-sessions")
            .and(warp::get())
            .and(read_auth(config.clone()))
            .and(warp::query::<sessions::ListSessionsQuery>())
            .and(with_registry(registry.clone()))
            .and_then(sessions::list_sessions_handler);

        // POST /api/v1/payment-sessions/{id}/recreate
        let recreate_session = warp::path!("api" / "v1" / "payment-sessions" / String / "recreate")
            .and(warp::post())
            .and(require_auth(config.clone()))
            .and(with_registry(registry.clone()))
            .and_then(sessions::recreate_session_handler);

        // GET /api/v1/transactions/{id}
        let get_transfer = warp::path!("api" / "v1" / "transactions" / String)
            .and(warp::get())
            .and(read_auth(config.clone()))
            .and(with_registry(registry.clone()))
            .and_then(transfers::get_transfer_handler);

        // GET /api/v1/transactions
        let list_transfers = warp::path!("api" / "v1" / "transactions")
            .and(warp::get())
            .and(read_auth(config.clone()))
            .and(warp::query::<transfers::ListTransfersQuery>())
            .and(with_registry(registry.clone()))
            .and_then(transfers::list_transfers_handler);

        // GET /api/v1/system/network-status
        let network_status = warp::path!("api" / "v1" / "system" / "network-status")
            .and(warp::get())
            .and(read_auth(config.clone()))
            .and(with_config(config.clone()))
            .and(with_status_board(status))
            .and_then(system::network_status_handler);

        create_session
            .or(get_session)
            .or(list_sessions)
            .or(recreate_session)
            .or(get_transfer)
            .or(list_transfers)
            .or(network_status)
            .recover(handle_rejection)
    }

    /// Public method for testing - exposes routes for integration tests
    #[allow(dead_code)] // Used by tests
    pub fn test_routes(
        &self,
    ) -> impl Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone {
        self.create_routes()
    }
}
