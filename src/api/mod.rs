//! REST API Server Module
//!
//! This module provides the REST API for the payment watcher service:
//! payment session creation and lookup, transfer lookup, and per-chain
//! network status. The API layer is a thin facade; every mutation goes
//! through the typed registry operations.

// Generic shared code (server, auth, error envelope)
mod generic;

// Resource-specific handlers
mod sessions;
mod system;
mod transfers;

// Re-export ApiServer for convenience
pub use generic::{ApiServer, ErrorDetail, ErrorEnvelope};
