//! Event Bus Module
//!
//! This module provides the typed publish/subscribe bus that fans registry
//! events out to subscribers (API layer, webhook dispatcher, verification
//! scanner). Each subscriber owns a bounded queue; publishing never blocks
//! the registry. When a subscriber's queue is full the event is dropped for
//! that subscriber and its lag counter is incremented.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::Network;
use crate::registry::{Session, Transfer};

/// Default per-subscriber queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

// ============================================================================
// EVENT TAXONOMY
// ============================================================================

/// Domain events emitted by the session registry and the chain watchers.
///
/// Within a single registry operation events are emitted in the order
/// `transfer.detected` → `transfer.confirmed` → `session.completed`; across
/// operations the order is the registry commit order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Event {
    SessionCreated {
        session: Session,
    },
    SessionRecreated {
        session: Session,
        original_session_id: String,
    },
    SessionExpired {
        session_id: String,
    },
    SessionCompleted {
        session_id: String,
        transfer_id: String,
    },
    TransferDetected {
        transfer: Transfer,
        session_id: Option<String>,
        matched: bool,
        reason: Option<String>,
    },
    TransferUpdated {
        transfer_id: String,
        confirmations: u64,
    },
    TransferConfirmed {
        transfer_id: String,
        session_id: Option<String>,
    },
    ChainHalted {
        network: Network,
        reason: String,
    },
}

impl Event {
    /// Dotted event type tag used on the wire (webhook `type` field).
    pub fn kind(&self) -> &'static str {
        match self {
            Event::SessionCreated { .. } => "session.created",
            Event::SessionRecreated { .. } => "session.recreated",
            Event::SessionExpired { .. } => "session.expired",
            Event::SessionCompleted { .. } => "session.completed",
            Event::TransferDetected { .. } => "transfer.detected",
            Event::TransferUpdated { .. } => "transfer.updated",
            Event::TransferConfirmed { .. } => "transfer.confirmed",
            Event::ChainHalted { .. } => "chain.halted",
        }
    }
}

// ============================================================================
// BUS IMPLEMENTATION
// ============================================================================

struct Subscriber {
    name: String,
    tx: mpsc::Sender<Event>,
    lagged: Arc<AtomicU64>,
}

struct Inner {
    subscribers: Mutex<Vec<Subscriber>>,
    default_capacity: usize,
}

/// Single-producer-multi-consumer broadcast bus with bounded queues.
///
/// Cloning is cheap; all clones publish to the same subscriber set.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

/// One subscriber's receiving end plus its lag counter.
pub struct Subscription {
    /// Subscriber identity, used in lag diagnostics.
    pub name: String,
    /// Receiving end of the bounded queue.
    pub rx: mpsc::Receiver<Event>,
    lagged: Arc<AtomicU64>,
}

impl Subscription {
    /// Number of events dropped for this subscriber because its queue was
    /// full at publish time.
    pub fn lagged(&self) -> u64 {
        self.lagged.load(Ordering::Relaxed)
    }
}

impl EventBus {
    /// Creates a bus whose subscribers get queues of `default_capacity`.
    pub fn new(default_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(Vec::new()),
                default_capacity,
            }),
        }
    }

    /// Registers a subscriber under `name` with the default queue capacity.
    pub fn subscribe(&self, name: &str) -> Subscription {
        self.subscribe_with_capacity(name, self.inner.default_capacity)
    }

    /// Registers a subscriber with an explicit queue capacity.
    pub fn subscribe_with_capacity(&self, name: &str, capacity: usize) -> Subscription {
        let (tx, rx) = mpsc::channel(capacity);
        let lagged = Arc::new(AtomicU64::new(0));
        let mut subscribers = self.inner.subscribers.lock().expect("bus lock poisoned");
        subscribers.push(Subscriber {
            name: name.to_string(),
            tx,
            lagged: lagged.clone(),
        });
        Subscription {
            name: name.to_string(),
            rx,
            lagged,
        }
    }

    /// Publishes one event to every live subscriber without blocking.
    ///
    /// Full queues drop the event for that subscriber and count it as lag;
    /// closed subscribers are pruned.
    pub fn publish(&self, event: Event) {
        let mut subscribers = self.inner.subscribers.lock().expect("bus lock poisoned");
        subscribers.retain(|sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = sub.lagged.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "subscriber {} lagged, dropped {} (total {})",
                    sub.name,
                    event.kind(),
                    dropped
                );
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Publishes a batch in order.
    pub fn publish_all(&self, events: Vec<Event>) {
        for event in events {
            self.publish(event);
        }
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().expect("bus lock poisoned").len()
    }

    /// Waits until every subscriber queue is drained or the deadline passes.
    /// Used during graceful shutdown.
    pub async fn flush(&self, deadline: std::time::Duration) {
        let start = tokio::time::Instant::now();
        loop {
            let drained = {
                let subscribers = self.inner.subscribers.lock().expect("bus lock poisoned");
                subscribers
                    .iter()
                    .all(|s| s.tx.capacity() == s.tx.max_capacity())
            };
            if drained || start.elapsed() >= deadline {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }
}
