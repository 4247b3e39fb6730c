//! Transfer Log Parsing
//!
//! Turns raw `eth_getLogs` entries into normalized transfer observations.
//! Malformed logs are rejected individually; a bad log never aborts the tick
//! that fetched it.

use ethereum_types::U256;

use crate::config::ChainConfig;
use crate::evm_client::{parse_quantity, topic_address, RpcLog};
use crate::registry::TransferObservation;

/// Parses one ERC-20 `Transfer(address,address,uint256)` log.
///
/// Expects the standard layout: `topics[1]` is the indexed sender,
/// `topics[2]` the indexed recipient, and the 32-byte data word the value.
/// The recipient is checked against the chain's configured recipient even
/// though the topic filter already constrains it.
///
/// # Arguments
///
/// * `chain` - Chain the log was fetched for
/// * `log` - Raw log entry
/// * `head` - Head block observed by the tick that fetched the log
///
/// # Returns
///
/// * `Ok(TransferObservation)` - Normalized observation with confirmations
///   computed as `head - block_number + 1`
/// * `Err(String)` - Description of why the log is unusable
pub fn parse_transfer_log(
    chain: &ChainConfig,
    log: &RpcLog,
    head: u64,
) -> Result<TransferObservation, String> {
    if log.topics.len() < 3 {
        return Err(format!(
            "expected 3 topics for Transfer event, got {}",
            log.topics.len()
        ));
    }

    let from = topic_address(&log.topics[1])?;
    let to = topic_address(&log.topics[2])?;
    if to != chain.recipient.to_lowercase() {
        return Err(format!("recipient mismatch: {}", to));
    }

    let raw_value = parse_value_word(&log.data)?;
    let block_number = parse_quantity(&log.block_number)
        .map_err(|e| format!("bad block number {}: {}", log.block_number, e))?;
    if block_number > head {
        return Err(format!(
            "log block {} is ahead of observed head {}",
            block_number, head
        ));
    }
    let log_index = parse_quantity(&log.log_index)
        .map_err(|e| format!("bad log index {}: {}", log.log_index, e))?;

    Ok(TransferObservation {
        network: chain.network,
        token_contract: chain.token_contract.to_lowercase(),
        tx_hash: log.transaction_hash.to_lowercase(),
        log_index,
        from,
        to,
        raw_value,
        block_number,
        confirmations: head - block_number + 1,
    })
}

/// Decodes the single 32-byte value word of a Transfer log's data field.
fn parse_value_word(data: &str) -> Result<U256, String> {
    let hex_part = data.strip_prefix("0x").unwrap_or(data);
    if hex_part.len() != 64 {
        return Err(format!("expected 32-byte data word, got {} hex chars", hex_part.len()));
    }
    let bytes = hex::decode(hex_part).map_err(|e| format!("bad data hex: {}", e))?;
    let mut buf = [0u8; 32];
    buf.copy_from_slice(&bytes);
    Ok(U256::from_big_endian(&buf))
}
