//! JSON-RPC client for Ethereum nodes
//!
//! Provides a typed interface to Ethereum JSON-RPC endpoints over HTTP and
//! implements [`RemoteNode`] on top of it. New-head subscriptions go through
//! the WebSocket endpoint (see [`crate::ws`]).

use crate::node::{HeadSubscription, RemoteNode, SignerContext};
use crate::types::{parse_hex_u64, Block, Transaction};
use alloy_primitives::{Address, B256};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

/// JSON-RPC client for Ethereum nodes.
pub struct RpcClient {
    client: reqwest::Client,
    url: String,
    ws_url: String,
}

impl RpcClient {
    /// Create a new RPC client.
    ///
    /// When `ws_url` is not given it is derived from `url` by swapping the
    /// scheme (`http` -> `ws`, `https` -> `wss`).
    pub fn new(url: String, ws_url: Option<String>) -> Result<Self> {
        let ws_url = match ws_url {
            Some(ws_url) => ws_url,
            None => ws_url_from_http(&url)?,
        };
        Ok(Self {
            client: reqwest::Client::new(),
            url,
            ws_url,
        })
    }

    /// Make a JSON-RPC call.
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", method))?;

        let json: Value = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", method))?;

        // Check for RPC error
        if let Some(error) = json.get("error") {
            anyhow::bail!("RPC error from {}: {}", method, error);
        }

        json.get("result")
            .cloned()
            .context("RPC response missing 'result' field")
    }

    /// Call a method whose result is a hex quantity.
    async fn call_quantity(&self, method: &str, params: Value) -> Result<u64> {
        let result = self.call(method, params).await?;
        let quantity = result
            .as_str()
            .with_context(|| format!("{} response is not a string", method))?;
        parse_hex_u64(quantity).with_context(|| format!("Failed to parse {} result", method))
    }

    /// Get the chain id of the connected network.
    pub async fn chain_id(&self) -> Result<u64> {
        self.call_quantity("eth_chainId", json!([])).await
    }
}

#[async_trait]
impl RemoteNode for RpcClient {
    async fn latest_block_number(&self) -> Result<u64> {
        self.call_quantity("eth_blockNumber", json!([])).await
    }

    async fn block_by_number(&self, number: u64) -> Result<Block> {
        let params = json!([format!("0x{:x}", number), true]);
        let result = self.call("eth_getBlockByNumber", params).await?;
        if result.is_null() {
            anyhow::bail!("Block {} not found", number);
        }
        serde_json::from_value(result).context("Failed to deserialize block")
    }

    async fn transaction_count(&self, block_hash: B256) -> Result<u64> {
        let params = json!([format!("0x{:x}", block_hash)]);
        self.call_quantity("eth_getBlockTransactionCountByHash", params)
            .await
    }

    async fn signer_context(&self) -> Result<SignerContext> {
        let chain_id = self.chain_id().await?;
        Ok(SignerContext { chain_id })
    }

    fn recover_sender(&self, ctx: &SignerContext, tx: &Transaction) -> Result<Address> {
        recover_sender(ctx, tx)
    }

    async fn subscribe_new_heads(&self, capacity: usize) -> Result<HeadSubscription> {
        crate::ws::subscribe_new_heads(&self.ws_url, capacity).await
    }
}

/// The node already recovers `from` when serving full blocks; what remains is
/// checking the transaction was signed for this chain.
pub fn recover_sender(ctx: &SignerContext, tx: &Transaction) -> Result<Address> {
    match tx.chain_id {
        Some(chain_id) if chain_id != ctx.chain_id => anyhow::bail!(
            "Transaction {:?} signed for chain {} but node serves chain {}",
            tx.hash,
            chain_id,
            ctx.chain_id
        ),
        _ => Ok(tx.from),
    }
}

/// Derive the WebSocket endpoint from an HTTP JSON-RPC endpoint.
pub fn ws_url_from_http(url: &str) -> Result<String> {
    if let Some(rest) = url.strip_prefix("https://") {
        Ok(format!("wss://{}", rest))
    } else if let Some(rest) = url.strip_prefix("http://") {
        Ok(format!("ws://{}", rest))
    } else {
        anyhow::bail!("Endpoint must start with http:// or https://, got {}", url)
    }
}
