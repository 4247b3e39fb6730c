//! EVM Client Module
//!
//! This module provides a client for communicating with EVM-compatible
//! blockchain nodes via their JSON-RPC API. It exposes the three calls the
//! chain watchers need (`eth_blockNumber`, `eth_getLogs`,
//! `eth_getTransactionReceipt`) behind typed errors.
//!
//! The client is pure request/response: it never retries internally. Retry
//! policy (skipping a tick, halving an oversized block range) lives in the
//! watcher.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::time::Duration;
use thiserror::Error;

/// Default per-request timeout.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// ERROR TAXONOMY
// ============================================================================

/// Typed error surfaced by every client call.
///
/// `RangeTooWide` is a specialized transient error: the caller retries with a
/// smaller block range. `Transient` covers timeouts, connection failures,
/// HTTP 5xx/429 and malformed responses; the caller skips the current tick.
/// `Fatal` means the request itself is invalid and retrying cannot help.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("block range too wide: {0}")]
    RangeTooWide(String),
    #[error("transient RPC failure: {0}")]
    Transient(String),
    #[error("fatal RPC failure: {0}")]
    Fatal(String),
}

impl RpcError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        // Network-level failures are always retriable.
        RpcError::Transient(err.to_string())
    }

    fn from_json_rpc(code: i64, message: String) -> Self {
        // -32005 is the conventional "query limit exceeded" code; several
        // providers signal an oversized range only through the message text.
        let lowered = message.to_lowercase();
        if code == -32005
            || lowered.contains("block range")
            || lowered.contains("range is too large")
            || lowered.contains("limit exceeded")
        {
            RpcError::RangeTooWide(message)
        } else if (-32602..=-32600).contains(&code) {
            RpcError::Fatal(format!("{} (code: {})", message, code))
        } else {
            RpcError::Transient(format!("{} (code: {})", message, code))
        }
    }
}

// ============================================================================
// WIRE STRUCTURES
// ============================================================================

/// EVM JSON-RPC request wrapper
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Vec<serde_json::Value>,
    id: u64,
}

/// EVM JSON-RPC response wrapper
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    result: Option<T>,
    error: Option<JsonRpcError>,
    #[allow(dead_code)]
    id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// EVM event log entry as returned by `eth_getLogs`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcLog {
    /// Address of the contract that emitted the event
    pub address: String,
    /// Array of topics (indexed event parameters)
    pub topics: Vec<String>,
    /// Event data (non-indexed parameters)
    pub data: String,
    /// Block number (hex quantity)
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    /// Transaction hash
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
    /// Log index within the block (hex quantity)
    #[serde(rename = "logIndex")]
    pub log_index: String,
}

/// Log filter passed to `eth_getLogs`.
#[derive(Debug, Clone)]
pub struct LogFilter {
    /// Emitting contract address.
    pub address: String,
    /// Topic filter; `None` entries match any value at that position.
    pub topics: Vec<Option<String>>,
    /// First block of the window (inclusive).
    pub from_block: u64,
    /// Last block of the window (inclusive).
    pub to_block: u64,
}

/// Transaction receipt subset used by the verification scanner.
#[derive(Debug, Clone)]
pub struct Receipt {
    /// Block the transaction was mined in.
    pub block_number: u64,
    /// Execution status: true on success, false when reverted.
    pub success: bool,
}

#[derive(Debug, Deserialize)]
struct RpcReceipt {
    #[serde(rename = "blockNumber")]
    block_number: Option<String>,
    status: Option<String>,
}

// ============================================================================
// EVM CLIENT IMPLEMENTATION
// ============================================================================

/// Client for communicating with an EVM-compatible node via JSON-RPC.
pub struct EvmClient {
    /// HTTP client for making requests
    client: Client,
    /// Base URL of the node (e.g. "https://bsc-dataseed.binance.org")
    rpc_url: String,
}

impl EvmClient {
    /// Creates a new client for the given node URL with the default timeout.
    pub fn new(rpc_url: &str) -> Result<Self, RpcError> {
        Self::with_timeout(rpc_url, DEFAULT_RPC_TIMEOUT)
    }

    /// Creates a new client with an explicit per-request timeout.
    ///
    /// # Arguments
    ///
    /// * `rpc_url` - Base URL of the node
    /// * `timeout` - Applied to every request issued by this client
    pub fn with_timeout(rpc_url: &str, timeout: Duration) -> Result<Self, RpcError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Fatal(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            rpc_url: rpc_url.to_string(),
        })
    }

    /// Gets the current head block number via `eth_blockNumber`.
    pub async fn block_number(&self) -> Result<u64, RpcError> {
        let result: String = self.call("eth_blockNumber", vec![]).await?;
        parse_quantity(&result)
            .map_err(|e| RpcError::Transient(format!("bad block number {}: {}", result, e)))
    }

    /// Fetches event logs matching `filter` via `eth_getLogs`.
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<RpcLog>)` - Matching logs, possibly empty
    /// * `Err(RpcError::RangeTooWide)` - Window too large for the provider
    /// * `Err(RpcError)` - Transient or fatal failure
    pub async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RpcLog>, RpcError> {
        let topics: Vec<serde_json::Value> = filter
            .topics
            .iter()
            .map(|t| match t {
                Some(topic) => serde_json::json!(topic),
                None => serde_json::Value::Null,
            })
            .collect();

        let params = serde_json::json!({
            "address": filter.address,
            "topics": topics,
            "fromBlock": format_quantity(filter.from_block),
            "toBlock": format_quantity(filter.to_block),
        });

        let logs: Vec<RpcLog> = self.call("eth_getLogs", vec![params]).await?;
        Ok(logs)
    }

    /// Fetches the receipt for a transaction via `eth_getTransactionReceipt`.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(Receipt))` - Transaction is mined
    /// * `Ok(None)` - Transaction pending or unknown to the node
    /// * `Err(RpcError)` - Transient or fatal failure
    pub async fn get_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>, RpcError> {
        let hash = if tx_hash.starts_with("0x") {
            tx_hash.to_string()
        } else {
            format!("0x{}", tx_hash)
        };

        let receipt: Option<RpcReceipt> = self
            .call_nullable("eth_getTransactionReceipt", vec![serde_json::json!(hash)])
            .await?;

        match receipt {
            Some(r) => {
                let block_number = match r.block_number {
                    Some(ref b) => parse_quantity(b).map_err(|e| {
                        RpcError::Transient(format!("bad receipt block number {}: {}", b, e))
                    })?,
                    // Mined receipts carry a block number; treat its absence
                    // as a still-pending transaction.
                    None => return Ok(None),
                };
                let success = r.status.as_deref() != Some("0x0");
                Ok(Some(Receipt {
                    block_number,
                    success,
                }))
            }
            None => Ok(None),
        }
    }

    /// Issues one JSON-RPC call and decodes a required result.
    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<T, RpcError> {
        self.call_nullable(method, params)
            .await?
            .ok_or_else(|| RpcError::Transient(format!("no result in {} response", method)))
    }

    /// Issues one JSON-RPC call; a null result maps to `None`.
    async fn call_nullable<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<Option<T>, RpcError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: 1,
        };

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(RpcError::from_reqwest)?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(RpcError::Transient(format!(
                "{} returned HTTP {}",
                self.rpc_url, status
            )));
        }

        let body: JsonRpcResponse<T> = response
            .json()
            .await
            .map_err(|e| RpcError::Transient(format!("failed to parse {} response: {}", method, e)))?;

        if let Some(error) = body.error {
            return Err(RpcError::from_json_rpc(error.code, error.message));
        }
        Ok(body.result)
    }
}

// ============================================================================
// QUANTITY AND TOPIC ENCODING
// ============================================================================

/// Formats a block number as a `0x`-prefixed hex quantity.
pub fn format_quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

/// Parses a `0x`-prefixed hex quantity into a u64.
pub fn parse_quantity(value: &str) -> Result<u64, String> {
    let hex_part = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(hex_part, 16).map_err(|e| e.to_string())
}

/// Computes the topic-0 value for an event signature string,
/// e.g. `"Transfer(address,address,uint256)"`.
pub fn event_topic(signature: &str) -> String {
    let mut hasher = Keccak256::new();
    hasher.update(signature.as_bytes());
    format!("0x{}", hex::encode(hasher.finalize()))
}

/// Left-pads a 20-byte address to the 32-byte topic form used for indexed
/// address parameters.
pub fn address_topic(address: &str) -> String {
    let hex_part = address.strip_prefix("0x").unwrap_or(address);
    format!("0x{:0>64}", hex_part.to_lowercase())
}

/// Extracts the 20-byte address from a 32-byte topic value.
pub fn topic_address(topic: &str) -> Result<String, String> {
    let hex_part = topic.strip_prefix("0x").unwrap_or(topic);
    if hex_part.len() != 64 {
        return Err(format!("topic is not 32 bytes: {}", topic));
    }
    Ok(format!("0x{}", &hex_part[24..].to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_encoding_round_trips() {
        assert_eq!(format_quantity(0), "0x0");
        assert_eq!(format_quantity(1000), "0x3e8");
        assert_eq!(parse_quantity("0x3e8").unwrap(), 1000);
        assert_eq!(parse_quantity(&format_quantity(u64::MAX)).unwrap(), u64::MAX);
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn transfer_topic_matches_known_constant() {
        // Canonical ERC-20 Transfer(address,address,uint256) topic.
        assert_eq!(
            event_topic("Transfer(address,address,uint256)"),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn address_topic_pads_and_lowercases() {
        let topic = address_topic("0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA");
        assert_eq!(
            topic,
            "0x000000000000000000000000aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
        );
        assert_eq!(
            topic_address(&topic).unwrap(),
            "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
        );
    }

    #[test]
    fn range_errors_are_classified() {
        assert!(matches!(
            RpcError::from_json_rpc(-32005, "query returned more than 10000 results".into()),
            RpcError::RangeTooWide(_)
        ));
        assert!(matches!(
            RpcError::from_json_rpc(-32000, "block range is too large".into()),
            RpcError::RangeTooWide(_)
        ));
        assert!(matches!(
            RpcError::from_json_rpc(-32602, "invalid params".into()),
            RpcError::Fatal(_)
        ));
        assert!(matches!(
            RpcError::from_json_rpc(-32000, "header not found".into()),
            RpcError::Transient(_)
        ));
    }
}
