//! Payment Watcher Service Library
//!
//! This crate provides a payment session service that watches EVM-compatible
//! chains for USDT `Transfer` events, matches them against open payment
//! sessions, tracks confirmations, and exposes the session lifecycle over a
//! REST API and a typed event bus.

pub mod address;
pub mod amount;
pub mod api;
pub mod config;
pub mod events;
pub mod evm_client;
pub mod expiry;
pub mod registry;
pub mod verification;
pub mod watcher;
pub mod webhook;

// Re-export commonly used types
pub use config::{ApiConfig, ChainConfig, Config, Network, WebhookConfig};
pub use events::{Event, EventBus, Subscription};
pub use evm_client::{EvmClient, RpcError};
pub use registry::{
    CreateSessionInput, RegistryError, Session, SessionRegistry, SessionStatus, Transfer,
    TransferObservation, TransferStatus,
};
pub use watcher::{ChainState, ChainWatcher, StatusBoard};
