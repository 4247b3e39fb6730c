//! Transfer Data Model
//!
//! A transfer is one observed ERC-20 `Transfer` log, normalized to a
//! chain-agnostic record. The natural key `(network, tx_hash, log_index)`
//! identifies a log across repeated sightings; the registry deduplicates on
//! it and only ever raises the confirmation count.

use ethereum_types::U256;
use serde::{Deserialize, Serialize};

use crate::config::{ChainConfig, Network};

/// Lifecycle status of an observed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "CONFIRMED")]
    Confirmed,
    #[serde(rename = "FAILED")]
    Failed,
}

/// Natural key of a transfer log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransferKey {
    pub network: Network,
    /// Transaction hash, lowercase.
    pub tx_hash: String,
    pub log_index: u64,
}

/// A normalized on-chain transfer observation, as produced by a chain
/// watcher for a single parsed log. Confirmations are computed against the
/// head the watcher saw when it fetched the log.
#[derive(Debug, Clone)]
pub struct TransferObservation {
    pub network: Network,
    pub token_contract: String,
    pub tx_hash: String,
    pub log_index: u64,
    pub from: String,
    pub to: String,
    pub raw_value: U256,
    pub block_number: u64,
    pub confirmations: u64,
}

impl TransferObservation {
    /// Natural key of this observation.
    pub fn key(&self) -> TransferKey {
        TransferKey {
            network: self.network,
            tx_hash: self.tx_hash.to_lowercase(),
            log_index: self.log_index,
        }
    }
}

/// A recorded transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    /// Unique identifier (UUID), assigned on first sighting.
    pub id: String,
    /// Transaction hash, lowercase.
    pub tx_hash: String,
    /// Log index within the block.
    pub log_index: u64,
    /// Chain the transfer was observed on.
    pub network: Network,
    /// Token contract that emitted the log.
    pub token_contract: String,
    /// Sender address, lowercase.
    pub from: String,
    /// Recipient address, lowercase.
    pub to: String,
    /// Raw value in token smallest units, serialized as a decimal string.
    #[serde(with = "u256_decimal")]
    pub raw_value: U256,
    /// Human-readable amount derived from `raw_value` and the token decimals.
    pub amount: String,
    /// Block the transfer was mined in.
    pub block_number: u64,
    /// First sighting time (Unix seconds).
    pub first_seen_at: u64,
    /// Confirmation count; monotonically non-decreasing.
    pub confirmations: u64,
    /// Current lifecycle status.
    pub status: TransferStatus,
    /// Confirmation time, set when the status reaches `CONFIRMED`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<u64>,
    /// Session this transfer was resolved to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Transfer {
    /// Builds a fresh record for a first-time observation.
    pub fn from_observation(obs: &TransferObservation, chain: &ChainConfig, now: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tx_hash: obs.tx_hash.to_lowercase(),
            log_index: obs.log_index,
            network: obs.network,
            token_contract: obs.token_contract.to_lowercase(),
            from: obs.from.to_lowercase(),
            to: obs.to.to_lowercase(),
            raw_value: obs.raw_value,
            amount: crate::amount::format_units(obs.raw_value, chain.token_decimals),
            block_number: obs.block_number,
            first_seen_at: now,
            confirmations: obs.confirmations,
            status: TransferStatus::Pending,
            confirmed_at: None,
            session_id: None,
        }
    }

    /// Natural key of this record.
    pub fn key(&self) -> TransferKey {
        TransferKey {
            network: self.network,
            tx_hash: self.tx_hash.clone(),
            log_index: self.log_index,
        }
    }
}

/// Serde adapter rendering a `U256` as a decimal string.
mod u256_decimal {
    use ethereum_types::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        U256::from_dec_str(&s).map_err(serde::de::Error::custom)
    }
}
