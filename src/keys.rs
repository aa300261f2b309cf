//! Key encoding and decoding utilities
//!
//! All keys use a single-byte prefix followed by binary data.
//! Numbers are big-endian so RocksDB iterates them in numeric order.

use alloy_primitives::B256;
use anyhow::Result;

/// Encode a block key.
///
/// Format: byte 'B' (0x42) + block_number (8 bytes, big-endian)
/// Total length: 9 bytes
pub fn encode_block_key(number: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(b'B');
    key.extend_from_slice(&number.to_be_bytes());
    key
}

/// Decode a block key back into its block number.
pub fn decode_block_key(key: &[u8]) -> Result<u64> {
    if key.len() != 9 || key[0] != b'B' {
        anyhow::bail!("Invalid block key: {}", hex::encode(key));
    }
    let mut number = [0u8; 8];
    number.copy_from_slice(&key[1..9]);
    Ok(u64::from_be_bytes(number))
}

/// Encode a transaction key.
///
/// Format: byte 'T' (0x54) + tx_hash (32 bytes)
/// Total length: 33 bytes
pub fn encode_tx_key(hash: B256) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(b'T');
    key.extend_from_slice(hash.as_slice());
    key
}

/// Encode a block transaction index key.
///
/// Format: byte 'I' (0x49) + block_number (8 bytes, big-endian) + order (4 bytes, big-endian)
/// Total length: 13 bytes
pub fn encode_block_tx_key(number: u64, order: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(13);
    key.push(b'I');
    key.extend_from_slice(&number.to_be_bytes());
    key.extend_from_slice(&order.to_be_bytes());
    key
}

/// Decode a block transaction index key into (block_number, order).
pub fn decode_block_tx_key(key: &[u8]) -> Result<(u64, u32)> {
    if key.len() != 13 || key[0] != b'I' {
        anyhow::bail!("Invalid block tx key: {}", hex::encode(key));
    }
    let mut number = [0u8; 8];
    number.copy_from_slice(&key[1..9]);
    let mut order = [0u8; 4];
    order.copy_from_slice(&key[9..13]);
    Ok((u64::from_be_bytes(number), u32::from_be_bytes(order)))
}
