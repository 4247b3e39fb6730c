//! Session Registry Module
//!
//! The registry is the authoritative owner of all session and transfer
//! state. It runs the session state machine, the completion match gate, and
//! confirmation tracking. All mutations serialize behind a single writer
//! lock; watchers and the API mutate state only by invoking registry
//! operations. Each operation publishes its domain events to the bus before
//! the write lock is released, so event order equals commit order.

mod session;
mod store;
mod transfer;

pub use session::{Session, SessionStatus};
pub use store::{MemoryStore, Store};
pub use transfer::{Transfer, TransferKey, TransferObservation, TransferStatus};

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::address::AddressSource;
use crate::amount;
use crate::config::{ChainConfig, Config, Network};
use crate::events::{Event, EventBus};

/// Default session lifetime when the caller does not pass one.
const DEFAULT_EXPIRATION_MINUTES: u64 = 30;

/// Current Unix timestamp in seconds.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_secs()
}

// ============================================================================
// OPERATION INPUTS AND RESULTS
// ============================================================================

/// Typed errors returned by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found")]
    NotFound,
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("address unavailable: {0}")]
    AddressUnavailable(String),
}

/// Input to `create_session`.
#[derive(Debug, Clone)]
pub struct CreateSessionInput {
    pub amount: String,
    pub currency: String,
    pub network: Network,
    /// Session lifetime in minutes, in [1, 1440]. Defaults to 30.
    pub expiration_minutes: Option<u64>,
    pub client_ref_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Session listing filter. All fields are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub status: Option<SessionStatus>,
    pub network: Option<Network>,
    pub client_ref_id: Option<String>,
    /// Inclusive lower bound on `created_at` (Unix seconds).
    pub from_date: Option<u64>,
    /// Inclusive upper bound on `created_at` (Unix seconds).
    pub to_date: Option<u64>,
}

/// Transfer listing filter. All fields are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct TransferFilter {
    pub status: Option<TransferStatus>,
    pub network: Option<Network>,
    pub session_id: Option<String>,
}

/// One page of a listing plus pagination metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub limit: usize,
    pub total: usize,
}

/// Validates and normalizes pagination parameters.
fn check_pagination(page: usize, limit: usize) -> Result<(), RegistryError> {
    if page == 0 {
        return Err(RegistryError::InvalidInput("page must be >= 1".to_string()));
    }
    if !(1..=100).contains(&limit) {
        return Err(RegistryError::InvalidInput(
            "limit must be in [1, 100]".to_string(),
        ));
    }
    Ok(())
}

fn paginate<T>(mut items: Vec<T>, page: usize, limit: usize) -> Page<T> {
    let total = items.len();
    let start = (page - 1).saturating_mul(limit);
    let items = if start >= total {
        Vec::new()
    } else {
        items.drain(start..total.min(start + limit)).collect()
    };
    Page {
        items,
        page,
        limit,
        total,
    }
}

// ============================================================================
// REGISTRY IMPLEMENTATION
// ============================================================================

/// Authoritative session and transfer state with a single-writer lock.
pub struct SessionRegistry {
    config: Arc<Config>,
    store: RwLock<Box<dyn Store>>,
    addresses: Arc<dyn AddressSource>,
    bus: EventBus,
}

impl SessionRegistry {
    /// Creates a registry over the given store and address source.
    pub fn new(
        config: Arc<Config>,
        store: Box<dyn Store>,
        addresses: Arc<dyn AddressSource>,
        bus: EventBus,
    ) -> Self {
        Self {
            config,
            store: RwLock::new(store),
            addresses,
            bus,
        }
    }

    /// The bus this registry publishes to.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    // ------------------------------------------------------------------
    // Session operations
    // ------------------------------------------------------------------

    /// Creates a new PENDING session and emits `session.created`.
    ///
    /// # Arguments
    ///
    /// * `input` - Validated constraints: positive decimal amount, currency
    ///   `USDT`, a configured network, expiration in [1, 1440] minutes
    ///
    /// # Returns
    ///
    /// * `Ok(Session)` - The created session
    /// * `Err(RegistryError::InvalidInput)` - Constraint violation
    /// * `Err(RegistryError::AddressUnavailable)` - No unique address free
    pub async fn create_session(
        &self,
        input: CreateSessionInput,
    ) -> Result<Session, RegistryError> {
        let chain = self
            .config
            .chain(input.network)
            .ok_or_else(|| {
                RegistryError::InvalidInput(format!("network {} is not configured", input.network))
            })?
            .clone();

        if input.currency != "USDT" {
            return Err(RegistryError::InvalidInput(format!(
                "unsupported currency: {}",
                input.currency
            )));
        }
        amount::parse_units(&input.amount, chain.token_decimals)
            .map_err(|e| RegistryError::InvalidInput(e.to_string()))?;

        let minutes = input.expiration_minutes.unwrap_or(DEFAULT_EXPIRATION_MINUTES);
        if !(1..=1440).contains(&minutes) {
            return Err(RegistryError::InvalidInput(
                "expiration must be between 1 and 1440 minutes".to_string(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        let address = self
            .addresses
            .new_address(input.network, &id)
            .map_err(RegistryError::AddressUnavailable)?;

        let now = current_timestamp();
        let session = Session {
            id,
            amount: input.amount,
            currency: input.currency,
            network: input.network,
            address: address.clone(),
            status: SessionStatus::Pending,
            created_at: now,
            expires_at: now + minutes * 60,
            completed_at: None,
            client_ref_id: input.client_ref_id,
            metadata: input.metadata.unwrap_or_else(|| serde_json::json!({})),
            original_session_id: None,
            matched_transfer_id: None,
        };

        let mut store = self.store.write().await;
        if store
            .pending_session_for_address(session.network, &address)
            .is_some()
        {
            return Err(RegistryError::AddressUnavailable(format!(
                "a pending session already exists for {} on {}",
                address, session.network
            )));
        }
        store.put_session(session.clone());
        info!(
            "session {} created on {} for {} USDT, expires at {}",
            session.id, session.network, session.amount, session.expires_at
        );
        self.bus.publish(Event::SessionCreated {
            session: session.clone(),
        });
        Ok(session)
    }

    /// Fetches a session by id.
    pub async fn get_session(&self, id: &str) -> Result<Session, RegistryError> {
        self.store
            .read()
            .await
            .get_session(id)
            .ok_or(RegistryError::NotFound)
    }

    /// Lists sessions matching `filter`, newest first, id as the stable
    /// tie-break.
    pub async fn list_sessions(
        &self,
        filter: SessionFilter,
        page: usize,
        limit: usize,
    ) -> Result<Page<Session>, RegistryError> {
        check_pagination(page, limit)?;
        let mut sessions: Vec<Session> = self
            .store
            .read()
            .await
            .sessions()
            .into_iter()
            .filter(|s| filter.status.map_or(true, |status| s.status == status))
            .filter(|s| filter.network.map_or(true, |network| s.network == network))
            .filter(|s| {
                filter
                    .client_ref_id
                    .as_ref()
                    .map_or(true, |r| s.client_ref_id.as_ref() == Some(r))
            })
            .filter(|s| filter.from_date.map_or(true, |t| s.created_at >= t))
            .filter(|s| filter.to_date.map_or(true, |t| s.created_at <= t))
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(paginate(sessions, page, limit))
    }

    /// Recreates an expired session under a fresh id and address.
    ///
    /// The new session copies amount, currency, network, client reference and
    /// metadata from the original, gets the original's lifetime, and records
    /// the original id. Emits `session.recreated`.
    ///
    /// # Returns
    ///
    /// * `Ok(Session)` - The replacement session
    /// * `Err(RegistryError::NotFound)` - Unknown original id
    /// * `Err(RegistryError::InvalidState)` - Original is not EXPIRED
    pub async fn recreate_session(&self, id: &str) -> Result<Session, RegistryError> {
        let original = self.get_session(id).await?;
        if original.status != SessionStatus::Expired {
            return Err(RegistryError::InvalidState(format!(
                "session {} is {:?}, only EXPIRED sessions can be recreated",
                id, original.status
            )));
        }

        let new_id = Uuid::new_v4().to_string();
        let address = self
            .addresses
            .new_address(original.network, &new_id)
            .map_err(RegistryError::AddressUnavailable)?;

        let now = current_timestamp();
        let lifetime = (original.expires_at - original.created_at).max(60);
        let session = Session {
            id: new_id,
            amount: original.amount.clone(),
            currency: original.currency.clone(),
            network: original.network,
            address: address.clone(),
            status: SessionStatus::Pending,
            created_at: now,
            expires_at: now + lifetime,
            completed_at: None,
            client_ref_id: original.client_ref_id.clone(),
            metadata: original.metadata.clone(),
            original_session_id: Some(original.id.clone()),
            matched_transfer_id: None,
        };

        let mut store = self.store.write().await;
        if store
            .pending_session_for_address(session.network, &address)
            .is_some()
        {
            return Err(RegistryError::AddressUnavailable(format!(
                "a pending session already exists for {} on {}",
                address, session.network
            )));
        }
        store.put_session(session.clone());
        info!(
            "session {} recreated from expired session {}",
            session.id, original.id
        );
        self.bus.publish(Event::SessionRecreated {
            session: session.clone(),
            original_session_id: original.id,
        });
        Ok(session)
    }

    /// Moves every PENDING session with `expires_at <= now` to EXPIRED and
    /// emits `session.expired` for each. Idempotent; returns the number of
    /// sessions expired by this call.
    pub async fn expire_due(&self, now: u64) -> usize {
        let mut store = self.store.write().await;
        let due: Vec<Session> = store
            .sessions()
            .into_iter()
            .filter(|s| s.status == SessionStatus::Pending && s.expires_at <= now)
            .collect();

        let expired = due.len();
        for mut session in due {
            session.status = SessionStatus::Expired;
            info!("session {} expired", session.id);
            store.put_session(session.clone());
            self.bus.publish(Event::SessionExpired {
                session_id: session.id,
            });
        }
        expired
    }

    // ------------------------------------------------------------------
    // Transfer operations
    // ------------------------------------------------------------------

    /// Fetches a transfer by id.
    pub async fn get_transfer(&self, id: &str) -> Result<Transfer, RegistryError> {
        self.store
            .read()
            .await
            .get_transfer(id)
            .ok_or(RegistryError::NotFound)
    }

    /// Lists transfers matching `filter`, newest sighting first, id as the
    /// stable tie-break.
    pub async fn list_transfers(
        &self,
        filter: TransferFilter,
        page: usize,
        limit: usize,
    ) -> Result<Page<Transfer>, RegistryError> {
        check_pagination(page, limit)?;
        let store = self.store.read().await;
        // A session-id filter walks the per-session index instead of
        // scanning every transfer.
        let candidates: Vec<Transfer> = match &filter.session_id {
            Some(session_id) => store
                .session_transfers(session_id)
                .iter()
                .filter_map(|id| store.get_transfer(id))
                .collect(),
            None => store.transfers(),
        };
        drop(store);
        let mut transfers: Vec<Transfer> = candidates
            .into_iter()
            .filter(|t| filter.status.map_or(true, |status| t.status == status))
            .filter(|t| filter.network.map_or(true, |network| t.network == network))
            .collect();
        transfers.sort_by(|a, b| b.first_seen_at.cmp(&a.first_seen_at).then(a.id.cmp(&b.id)));
        Ok(paginate(transfers, page, limit))
    }

    /// Applies one normalized chain observation.
    ///
    /// This is the watcher entry point. It deduplicates on the natural key,
    /// keeps confirmation counts monotone, resolves the receiving session,
    /// runs the match gate, and drives confirmation-gated completion. The
    /// call never fails: problems are logged and absorbed so a bad log can
    /// never take a watcher down.
    pub async fn apply(&self, obs: TransferObservation) {
        let chain = match self.config.chain(obs.network) {
            Some(chain) => chain.clone(),
            None => {
                warn!("dropping observation for unconfigured network {}", obs.network);
                return;
            }
        };

        let now = current_timestamp();
        let mut store = self.store.write().await;
        let mut events = Vec::new();

        match store.get_transfer_by_key(&obs.key()) {
            Some(mut transfer) => {
                if obs.confirmations <= transfer.confirmations {
                    // Replayed or stale sighting; confirmations never regress.
                    return;
                }
                transfer.confirmations = obs.confirmations;
                if transfer.status == TransferStatus::Pending {
                    events.push(Event::TransferUpdated {
                        transfer_id: transfer.id.clone(),
                        confirmations: transfer.confirmations,
                    });
                    if transfer.confirmations >= chain.required_confirmations {
                        self.confirm_transfer(&mut **store, &chain, &mut transfer, now, &mut events);
                    }
                }
                store.put_transfer(transfer);
            }
            None => {
                let mut transfer = Transfer::from_observation(&obs, &chain, now);
                let session = store.pending_session_for_address(obs.network, &transfer.to);
                if let Some(session) = &session {
                    transfer.session_id = Some(session.id.clone());
                    store.link_transfer(&session.id, &transfer.id);
                }

                let (matched, reason) = match &session {
                    Some(session) => evaluate_match(&chain, session, &transfer),
                    None => (false, None),
                };
                debug!(
                    "transfer {} detected on {} ({} to {}, {} confirmations, matched={})",
                    transfer.tx_hash, transfer.network, transfer.amount, transfer.to,
                    transfer.confirmations, matched
                );
                events.push(Event::TransferDetected {
                    transfer: transfer.clone(),
                    session_id: transfer.session_id.clone(),
                    matched,
                    reason,
                });
                if transfer.confirmations >= chain.required_confirmations {
                    self.confirm_transfer(&mut **store, &chain, &mut transfer, now, &mut events);
                }
                store.put_transfer(transfer);
            }
        }

        // Published before the write lock drops so delivery order equals
        // commit order. `publish` never blocks.
        self.bus.publish_all(events);
    }

    /// Recomputes confirmations for every pending transfer on a chain
    /// against a newly observed head.
    ///
    /// Called by the chain watcher once per tick: a transfer log is only
    /// fetched once, so confirmation growth comes from the advancing head,
    /// not from re-observation. Emits `transfer.updated` per raised count and
    /// drives confirmation-gated completion exactly like `apply`.
    pub async fn refresh_confirmations(&self, network: Network, head: u64) {
        let chain = match self.config.chain(network) {
            Some(chain) => chain.clone(),
            None => return,
        };

        let now = current_timestamp();
        let mut store = self.store.write().await;
        let mut events = Vec::new();

        let tracked: Vec<Transfer> = store
            .transfers()
            .into_iter()
            .filter(|t| {
                t.network == network
                    && t.status != TransferStatus::Failed
                    && t.block_number <= head
            })
            .collect();
        for mut transfer in tracked {
            let confirmations = head - transfer.block_number + 1;
            if confirmations <= transfer.confirmations {
                continue;
            }
            transfer.confirmations = confirmations;
            if transfer.status == TransferStatus::Pending {
                events.push(Event::TransferUpdated {
                    transfer_id: transfer.id.clone(),
                    confirmations,
                });
                if confirmations >= chain.required_confirmations {
                    self.confirm_transfer(&mut **store, &chain, &mut transfer, now, &mut events);
                }
            }
            store.put_transfer(transfer);
        }

        self.bus.publish_all(events);
    }

    /// Marks a still-pending transfer as FAILED (e.g. its transaction
    /// reverted on chain). FAILED transfers are never completion candidates.
    pub async fn mark_transfer_failed(
        &self,
        key: &TransferKey,
        reason: &str,
    ) -> Result<(), RegistryError> {
        let mut store = self.store.write().await;
        let mut transfer = store
            .get_transfer_by_key(key)
            .ok_or(RegistryError::NotFound)?;
        if transfer.status != TransferStatus::Pending {
            return Err(RegistryError::InvalidState(format!(
                "transfer {} is {:?}",
                transfer.id, transfer.status
            )));
        }
        warn!("transfer {} marked failed: {}", transfer.id, reason);
        transfer.status = TransferStatus::Failed;
        store.put_transfer(transfer);
        Ok(())
    }

    // ------------------------------------------------------------------
    // State machine internals
    // ------------------------------------------------------------------

    /// Confirms a transfer that reached the chain's threshold and, when the
    /// match gate passes against a still-open session, completes the session.
    ///
    /// Transfer confirmation is unconditional at the threshold; session
    /// completion additionally requires an open session and a passing gate.
    /// A confirmed transfer for an expired session stays recorded for audit
    /// and never reopens the session.
    fn confirm_transfer(
        &self,
        store: &mut dyn Store,
        chain: &ChainConfig,
        transfer: &mut Transfer,
        now: u64,
        events: &mut Vec<Event>,
    ) {
        transfer.status = TransferStatus::Confirmed;
        transfer.confirmed_at = Some(now);
        info!(
            "transfer {} confirmed on {} with {} confirmations",
            transfer.tx_hash, transfer.network, transfer.confirmations
        );
        events.push(Event::TransferConfirmed {
            transfer_id: transfer.id.clone(),
            session_id: transfer.session_id.clone(),
        });

        let session_id = match &transfer.session_id {
            Some(id) => id.clone(),
            None => return,
        };
        let mut session = match store.get_session(&session_id) {
            Some(session) => session,
            None => return,
        };
        if !session.is_open() {
            return;
        }
        let (matched, _) = evaluate_match(chain, &session, transfer);
        if !matched {
            return;
        }

        session.status = SessionStatus::Completed;
        session.completed_at = Some(now);
        session.matched_transfer_id = Some(transfer.id.clone());
        store.put_session(session.clone());
        info!(
            "session {} completed by transfer {}",
            session.id, transfer.id
        );
        events.push(Event::SessionCompleted {
            session_id: session.id,
            transfer_id: transfer.id.clone(),
        });
    }
}

/// Evaluates the completion match gate for a transfer against its session.
///
/// Network and currency match implicitly (the session's network is the
/// watcher's network; the currency is always USDT). The gate checks the
/// sender allowlist and the amount tolerance: the target is the chain's
/// fixed target amount when configured, otherwise the session amount, and a
/// transfer is accepted from `target - target*5/100` upwards with no upper
/// bound.
fn evaluate_match(
    chain: &ChainConfig,
    session: &Session,
    transfer: &Transfer,
) -> (bool, Option<String>) {
    if !chain.sender_allowlist.is_empty() {
        let from = transfer.from.to_lowercase();
        let allowed = chain
            .sender_allowlist
            .iter()
            .any(|s| s.to_lowercase() == from);
        if !allowed {
            return (false, Some("sender_not_allowed".to_string()));
        }
    }

    let target = chain.target_amount.as_ref().unwrap_or(&session.amount);
    let target_units = match amount::parse_units(target, chain.token_decimals) {
        Ok(units) => units,
        Err(e) => {
            // A target that fails to parse can never be met; the session
            // amount is validated at creation so this only fires for a bad
            // chain-level target.
            warn!("unusable target amount {} on {}: {}", target, chain.network, e);
            return (false, Some("invalid_target_amount".to_string()));
        }
    };
    if !amount::meets_tolerance(transfer.raw_value, target_units) {
        return (false, Some("amount_below_tolerance".to_string()));
    }
    (true, None)
}
