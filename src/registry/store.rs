//! Session and Transfer Storage
//!
//! This module defines the storage seam the registry consumes and the
//! in-memory reference implementation. The store is dumb state: all lifecycle
//! rules live in the registry, which is the only writer. Durability across
//! restarts is a deployment choice made by swapping the implementation.

use std::collections::HashMap;

use crate::config::Network;
use crate::registry::session::{Session, SessionStatus};
use crate::registry::transfer::{Transfer, TransferKey};

/// Storage interface consumed by the session registry.
///
/// Implementations maintain the secondary indices (address lookup, natural
/// transfer key, per-session transfer list) themselves so the registry can
/// stay index-agnostic. `put_session` / `put_transfer` are upserts keyed by
/// record id.
pub trait Store: Send + Sync {
    /// Inserts or replaces a session and refreshes the address index: a
    /// PENDING session claims its `(network, lowercase(address))` slot, any
    /// other status releases it.
    fn put_session(&mut self, session: Session);

    /// Fetches a session by id.
    fn get_session(&self, id: &str) -> Option<Session>;

    /// All sessions, in no particular order.
    fn sessions(&self) -> Vec<Session>;

    /// The open PENDING session claiming `(network, lowercase(address))`.
    fn pending_session_for_address(&self, network: Network, address: &str) -> Option<Session>;

    /// Inserts or replaces a transfer and refreshes the natural key index.
    fn put_transfer(&mut self, transfer: Transfer);

    /// Fetches a transfer by id.
    fn get_transfer(&self, id: &str) -> Option<Transfer>;

    /// Fetches a transfer by natural key.
    fn get_transfer_by_key(&self, key: &TransferKey) -> Option<Transfer>;

    /// All transfers, in no particular order.
    fn transfers(&self) -> Vec<Transfer>;

    /// Appends a transfer to a session's ordered transfer list (idempotent).
    fn link_transfer(&mut self, session_id: &str, transfer_id: &str);

    /// Transfer ids linked to a session, in link order.
    fn session_transfers(&self, session_id: &str) -> Vec<String>;
}

/// In-memory store used by the reference deployment.
///
/// State is volatile: a restart loses sessions and transfers, and watcher
/// cursors reset to the current head.
#[derive(Default)]
pub struct MemoryStore {
    sessions_by_id: HashMap<String, Session>,
    sessions_by_address: HashMap<(Network, String), String>,
    transfers_by_id: HashMap<String, Transfer>,
    transfers_by_key: HashMap<TransferKey, String>,
    transfers_by_session: HashMap<String, Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn put_session(&mut self, session: Session) {
        let slot = (session.network, session.address.to_lowercase());
        if session.status == SessionStatus::Pending {
            self.sessions_by_address.insert(slot, session.id.clone());
        } else if self.sessions_by_address.get(&slot) == Some(&session.id) {
            self.sessions_by_address.remove(&slot);
        }
        self.sessions_by_id.insert(session.id.clone(), session);
    }

    fn get_session(&self, id: &str) -> Option<Session> {
        self.sessions_by_id.get(id).cloned()
    }

    fn sessions(&self) -> Vec<Session> {
        self.sessions_by_id.values().cloned().collect()
    }

    fn pending_session_for_address(&self, network: Network, address: &str) -> Option<Session> {
        let id = self
            .sessions_by_address
            .get(&(network, address.to_lowercase()))?;
        self.sessions_by_id.get(id).cloned()
    }

    fn put_transfer(&mut self, transfer: Transfer) {
        self.transfers_by_key
            .insert(transfer.key(), transfer.id.clone());
        self.transfers_by_id.insert(transfer.id.clone(), transfer);
    }

    fn get_transfer(&self, id: &str) -> Option<Transfer> {
        self.transfers_by_id.get(id).cloned()
    }

    fn get_transfer_by_key(&self, key: &TransferKey) -> Option<Transfer> {
        let id = self.transfers_by_key.get(key)?;
        self.transfers_by_id.get(id).cloned()
    }

    fn transfers(&self) -> Vec<Transfer> {
        self.transfers_by_id.values().cloned().collect()
    }

    fn link_transfer(&mut self, session_id: &str, transfer_id: &str) {
        let list = self
            .transfers_by_session
            .entry(session_id.to_string())
            .or_default();
        if !list.iter().any(|id| id == transfer_id) {
            list.push(transfer_id.to_string());
        }
    }

    fn session_transfers(&self, session_id: &str) -> Vec<String> {
        self.transfers_by_session
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }
}
