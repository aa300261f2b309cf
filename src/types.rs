//! Ethereum JSON-RPC types
//!
//! Type definitions for blocks, transactions, and `newHeads` notifications
//! returned from Ethereum JSON-RPC endpoints.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Deserializer};

/// Ethereum block with full transaction details.
#[derive(Debug, Clone, Deserialize)]
pub struct Block {
    /// Block number (hex string in JSON, parsed to u64)
    #[serde(rename = "number", deserialize_with = "deserialize_hex_u64")]
    pub number: u64,

    /// Block hash (hex string in JSON)
    #[serde(rename = "hash", deserialize_with = "deserialize_hex_b256")]
    pub hash: B256,

    /// Unix timestamp at which the block was mined (hex string in JSON)
    #[serde(rename = "timestamp", deserialize_with = "deserialize_hex_u64")]
    pub timestamp: u64,

    /// Transactions in the order the node returned them
    #[serde(rename = "transactions", default)]
    pub transactions: Vec<Transaction>,
}

/// Ethereum transaction as returned inside a full block.
#[derive(Debug, Clone, Deserialize)]
pub struct Transaction {
    /// Transaction hash (hex string in JSON)
    #[serde(rename = "hash", deserialize_with = "deserialize_hex_b256")]
    pub hash: B256,

    /// Sender address as recovered by the node
    #[serde(rename = "from", deserialize_with = "deserialize_hex_address")]
    pub from: Address,

    /// Recipient address (None for contract creation)
    #[serde(rename = "to", default, deserialize_with = "deserialize_hex_address_opt")]
    pub to: Option<Address>,

    /// Value transferred in wei (hex string in JSON)
    #[serde(rename = "value", deserialize_with = "deserialize_hex_u256")]
    pub value: U256,

    /// Transaction nonce (hex string in JSON)
    #[serde(rename = "nonce", deserialize_with = "deserialize_hex_u64")]
    pub nonce: u64,

    /// Chain id the transaction was signed for (absent on pre-EIP-155 legacy txs)
    #[serde(rename = "chainId", default, deserialize_with = "deserialize_hex_u64_opt")]
    pub chain_id: Option<u64>,
}

/// Header carried by an `eth_subscription` `newHeads` notification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Header {
    #[serde(rename = "number", deserialize_with = "deserialize_hex_u64")]
    pub number: u64,

    #[serde(rename = "hash", deserialize_with = "deserialize_hex_b256")]
    pub hash: B256,
}

// Hex deserialization helpers

/// Pad an odd-length hex string with a leading zero.
/// This handles cases where RPC returns hex strings without leading zeros.
pub(crate) fn pad_hex_string(s: &str) -> String {
    if s.len() % 2 == 1 {
        format!("0{}", s)
    } else {
        s.to_string()
    }
}

/// Parse a `0x`-prefixed hex quantity into a u64.
pub(crate) fn parse_hex_u64(s: &str) -> Result<u64, std::num::ParseIntError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16)
}

/// Deserialize a hex string to u64.
fn deserialize_hex_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_hex_u64(&s).map_err(serde::de::Error::custom)
}

/// Deserialize an optional hex string to u64.
fn deserialize_hex_u64_opt<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(s) => parse_hex_u64(&s).map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

/// Deserialize a hex string to U256.
fn deserialize_hex_u256<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let s = s.strip_prefix("0x").unwrap_or(&s);
    if s.is_empty() {
        return Ok(U256::ZERO);
    }
    let s = pad_hex_string(s);
    let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
    if bytes.len() > 32 {
        return Err(serde::de::Error::custom(format!(
            "Expected at most 32 bytes for quantity, got {}",
            bytes.len()
        )));
    }
    Ok(U256::from_be_slice(&bytes))
}

/// Deserialize a hex string to B256.
fn deserialize_hex_b256<'de, D>(deserializer: D) -> Result<B256, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let s = s.strip_prefix("0x").unwrap_or(&s);
    let bytes = hex::decode(pad_hex_string(s)).map_err(serde::de::Error::custom)?;
    if bytes.len() != 32 {
        return Err(serde::de::Error::custom(format!(
            "Expected 32 bytes for hash, got {}",
            bytes.len()
        )));
    }
    Ok(B256::from_slice(&bytes))
}

fn parse_address_bytes<E: serde::de::Error>(s: &str) -> Result<Address, E> {
    let bytes = hex::decode(pad_hex_string(s)).map_err(E::custom)?;
    if bytes.len() != 20 {
        return Err(E::custom(format!(
            "Expected 20 bytes for address, got {}",
            bytes.len()
        )));
    }
    Ok(Address::from_slice(&bytes))
}

/// Deserialize a hex string to Address.
fn deserialize_hex_address<'de, D>(deserializer: D) -> Result<Address, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_address_bytes(s.strip_prefix("0x").unwrap_or(&s))
}

/// Deserialize an optional hex string to Address.
///
/// Both JSON `null` and an empty string map to `None`.
fn deserialize_hex_address_opt<'de, D>(deserializer: D) -> Result<Option<Address>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(s) => {
            let s = s.strip_prefix("0x").unwrap_or(&s);
            if s.is_empty() {
                Ok(None)
            } else {
                parse_address_bytes(s).map(Some)
            }
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn block_json() -> serde_json::Value {
        json!({
            "number": "0xc",
            "hash": "0x00000000000000000000000000000000000000000000000000000000000000aa",
            "timestamp": "0x5fee6600",
            "transactions": [
                {
                    "hash": "0x0000000000000000000000000000000000000000000000000000000000000001",
                    "from": "0x0742d35cc6634c0532925a3b844bc9e7595f0beb",
                    "to": "0xdac17f958d2ee523a2206206994597c13d831ec7",
                    "value": "0xde0b6b3a7640000",
                    "nonce": "0x2a",
                    "chainId": "0x1"
                },
                {
                    "hash": "0x0000000000000000000000000000000000000000000000000000000000000002",
                    "from": "0x0742d35cc6634c0532925a3b844bc9e7595f0beb",
                    "to": null,
                    "value": "0x0",
                    "nonce": "0x2b"
                }
            ]
        })
    }

    #[test]
    fn test_block_deserialization() {
        let block: Block = serde_json::from_value(block_json()).unwrap();
        assert_eq!(block.number, 12);
        assert_eq!(block.timestamp, 1609459200);
        assert_eq!(block.transactions.len(), 2);

        let transfer = &block.transactions[0];
        assert_eq!(transfer.value, U256::from(1_000_000_000_000_000_000u64));
        assert_eq!(transfer.nonce, 42);
        assert_eq!(transfer.chain_id, Some(1));
        assert!(transfer.to.is_some());

        let create = &block.transactions[1];
        assert_eq!(create.to, None);
        assert_eq!(create.chain_id, None);
    }

    #[test]
    fn test_empty_recipient_is_contract_creation() {
        let mut value = block_json();
        value["transactions"][0]["to"] = json!("0x");
        let block: Block = serde_json::from_value(value).unwrap();
        assert_eq!(block.transactions[0].to, None);
    }

    #[test]
    fn test_header_deserialization_ignores_extra_fields() {
        let header: Header = serde_json::from_value(json!({
            "number": "0x10",
            "hash": "0x00000000000000000000000000000000000000000000000000000000000000bb",
            "parentHash": "0x00000000000000000000000000000000000000000000000000000000000000aa",
            "miner": "0x0000000000000000000000000000000000000000"
        }))
        .unwrap();
        assert_eq!(header.number, 16);
    }

    #[test]
    fn test_odd_length_hash_is_padded() {
        let mut value = block_json();
        value["hash"] = json!(format!("0x{}", "a".repeat(63)));
        let block: Block = serde_json::from_value(value).unwrap();
        assert_eq!(block.hash.as_slice()[0], 0x0a);
    }
}
