//! Session Data Model
//!
//! A session is a time-bounded expectation of a specific payment amount on a
//! specific chain. Sessions are created `PENDING` and either complete when a
//! confirmed matching transfer arrives, or expire.

use serde::{Deserialize, Serialize};

use crate::config::Network;

/// Lifecycle status of a payment session.
///
/// `COMPLETED` and `EXPIRED` are terminal: no operation mutates the status of
/// a session once it reaches either. An expired session can only be replaced
/// by recreating it under a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "EXPIRED")]
    Expired,
    #[serde(rename = "FAILED")]
    Failed,
}

/// A payment session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Unique identifier (UUID).
    pub id: String,
    /// Expected amount as a decimal string, strictly positive.
    pub amount: String,
    /// Payment currency; always `USDT`.
    pub currency: String,
    /// Chain this session is watched on.
    pub network: Network,
    /// Recipient address assigned to this session.
    pub address: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Creation time (Unix seconds).
    pub created_at: u64,
    /// Expiry deadline (Unix seconds); always after `created_at`.
    pub expires_at: u64,
    /// Completion time, set when the session transitions to `COMPLETED`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
    /// Optional caller-supplied reference id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ref_id: Option<String>,
    /// Opaque caller-supplied metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Id of the expired session this one was recreated from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_session_id: Option<String>,
    /// Id of the transfer that completed this session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_transfer_id: Option<String>,
}

impl Session {
    /// True while the session can still be completed or expired.
    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Pending
    }
}
