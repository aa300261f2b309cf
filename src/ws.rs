//! WebSocket `newHeads` subscription
//!
//! Opens an `eth_subscribe` feed and pumps notifications into the bounded
//! channel of a [`HeadSubscription`]. Any transport error or close frame is
//! reported once on the error channel and ends the reader.

use crate::node::HeadSubscription;
use crate::types::Header;
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SUBSCRIBE_REQUEST_ID: u64 = 1;
const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Connect to `ws_url` and subscribe to new heads.
///
/// Returns once the node has confirmed the subscription.
pub async fn subscribe_new_heads(ws_url: &str, capacity: usize) -> Result<HeadSubscription> {
    info!("Connecting to {}", ws_url);
    let (stream, _response) = tokio_tungstenite::connect_async(ws_url)
        .await
        .with_context(|| format!("Failed to connect to {}", ws_url))?;
    let (mut write, mut read) = stream.split();

    let request = json!({
        "jsonrpc": "2.0",
        "id": SUBSCRIBE_REQUEST_ID,
        "method": "eth_subscribe",
        "params": ["newHeads"]
    });
    write
        .send(Message::Text(request.to_string().into()))
        .await
        .context("Failed to send eth_subscribe")?;

    let subscription_id = tokio::time::timeout(CONFIRMATION_TIMEOUT, async {
        while let Some(msg) = read.next().await {
            match msg.context("WebSocket error while awaiting confirmation")? {
                Message::Text(text) => {
                    if let Some(id) = parse_confirmation(&text)? {
                        return Ok(id);
                    }
                }
                Message::Close(_) => anyhow::bail!("Connection closed before confirmation"),
                _ => {}
            }
        }
        Result::<String, anyhow::Error>::Err(anyhow::anyhow!(
            "Connection ended before confirmation"
        ))
    })
    .await
    .context("Timed out waiting for subscription confirmation")??;

    info!("Subscribed to newHeads (subscription {})", subscription_id);

    let (heads_tx, heads_rx) = mpsc::channel(capacity);
    let (errors_tx, errors_rx) = mpsc::channel(1);
    let stop = CancellationToken::new();
    let reader_stop = stop.clone();

    let reader = tokio::spawn(async move {
        let failure = loop {
            let msg = tokio::select! {
                _ = reader_stop.cancelled() => {
                    let close = write.send(Message::Close(None));
                    if tokio::time::timeout(CLOSE_TIMEOUT, close).await.is_err() {
                        debug!("Timed out sending close frame");
                    }
                    return;
                }
                msg = read.next() => msg,
            };

            match msg {
                Some(Ok(Message::Text(text))) => match parse_notification(&text, &subscription_id) {
                    Ok(Some(header)) => {
                        tokio::select! {
                            _ = reader_stop.cancelled() => return,
                            sent = heads_tx.send(header) => {
                                if sent.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Ignoring malformed notification: {:#}", e),
                },
                Some(Ok(Message::Close(frame))) => {
                    break anyhow::anyhow!("Subscription transport closed: {:?}", frame);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break anyhow::Error::new(e).context("Subscription transport error"),
                None => break anyhow::anyhow!("Subscription transport closed"),
            }
        };
        debug!("newHeads reader stopping: {:#}", failure);
        let _ = errors_tx.send(failure).await;
    });

    Ok(HeadSubscription::new(heads_rx, errors_rx, stop, reader))
}

/// Parse the response to our `eth_subscribe` request.
///
/// Returns `Ok(None)` for unrelated messages.
fn parse_confirmation(text: &str) -> Result<Option<String>> {
    let json: Value = serde_json::from_str(text).context("Invalid JSON from node")?;
    if json.get("id").and_then(Value::as_u64) != Some(SUBSCRIBE_REQUEST_ID) {
        return Ok(None);
    }
    if let Some(error) = json.get("error") {
        anyhow::bail!("eth_subscribe rejected: {}", error);
    }
    json.get("result")
        .and_then(Value::as_str)
        .map(|id| Some(id.to_string()))
        .context("eth_subscribe response missing subscription id")
}

/// Parse an `eth_subscription` notification for `subscription_id`.
///
/// Returns `Ok(None)` for messages that belong to other subscriptions.
fn parse_notification(text: &str, subscription_id: &str) -> Result<Option<Header>> {
    let json: Value = serde_json::from_str(text).context("Invalid JSON from node")?;
    if json.get("method").and_then(Value::as_str) != Some("eth_subscription") {
        return Ok(None);
    }
    let params = json.get("params").context("Notification missing params")?;
    if params.get("subscription").and_then(Value::as_str) != Some(subscription_id) {
        return Ok(None);
    }
    let result = params
        .get("result")
        .cloned()
        .context("Notification missing result")?;
    let header = serde_json::from_value(result).context("Failed to deserialize header")?;
    Ok(Some(header))
}
