//! WebSocket event subscriptions against the consensus RPC.
//!
//! Each subscription sends a JSON-RPC subscribe frame and pushes decoded
//! events into a bounded channel. A slow consumer never stalls the socket:
//! overflowing events are dropped and counted instead.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

use crate::rpc::types::ChainEvent;

pub const NEW_BLOCK_QUERY: &str = "tm.event='NewBlock'";
pub const TX_QUERY: &str = "tm.event='Tx'";

/// Default capacity of the per-subscription event buffer.
pub const DEFAULT_EVENT_BUFFER: usize = 2048;

/// Factory for WebSocket subscriptions with shared delivery counters.
pub struct Subscriber {
    ws_url: String,
    evt_counter: Arc<AtomicU64>,
    skip_counter: Arc<AtomicU64>,
    unknown_counter: Arc<AtomicU64>,
}

#[derive(Deserialize)]
struct WsEnvelope {
    result: Option<WsResult>,
}

#[derive(Deserialize)]
struct WsResult {
    data: Option<WsData>,
}

#[derive(Deserialize)]
struct WsData {
    #[serde(rename = "type")]
    kind: String,
    value: serde_json::Value,
}

#[derive(Deserialize)]
struct NewBlockValue {
    block: NewBlockInner,
}

#[derive(Deserialize)]
struct NewBlockInner {
    header: NewBlockHeader,
}

#[derive(Deserialize)]
struct NewBlockHeader {
    height: String,
    time: DateTime<Utc>,
}

#[derive(Deserialize)]
struct TxValue {
    #[serde(rename = "TxResult")]
    tx_result: TxResultInner,
}

#[derive(Deserialize)]
struct TxResultInner {
    height: String,
    tx: String,
}

impl Subscriber {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            evt_counter: Arc::new(AtomicU64::new(0)),
            skip_counter: Arc::new(AtomicU64::new(0)),
            unknown_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn event_count(&self) -> u64 {
        self.evt_counter.load(Ordering::Relaxed)
    }

    pub fn skipped_count(&self) -> u64 {
        self.skip_counter.load(Ordering::Relaxed)
    }

    pub fn unknown_count(&self) -> u64 {
        self.unknown_counter.load(Ordering::Relaxed)
    }

    /// Opens a subscription for the given event query.
    ///
    /// The returned channel yields events until the socket closes or the
    /// token is cancelled.
    pub async fn subscribe(
        &self,
        query: &str,
        cancel: CancellationToken,
    ) -> anyhow::Result<mpsc::Receiver<ChainEvent>> {
        let (mut ws, _) = connect_async(self.ws_url.as_str())
            .await
            .with_context(|| format!("connecting to {}", self.ws_url))?;

        let frame = json!({
            "jsonrpc": "2.0",
            "method": "subscribe",
            "id": 1,
            "params": { "query": query },
        });
        ws.send(Message::Text(frame.to_string()))
            .await
            .context("sending subscribe frame")?;

        info!("Subscribed to {query}");

        let (tx, rx) = mpsc::channel(DEFAULT_EVENT_BUFFER);
        let query = query.to_string();
        let evt_counter = self.evt_counter.clone();
        let skip_counter = self.skip_counter.clone();
        let unknown_counter = self.unknown_counter.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Subscription {query}: cancelled");
                        break;
                    }
                    msg = ws.next() => {
                        let msg = match msg {
                            Some(Ok(msg)) => msg,
                            Some(Err(e)) => {
                                warn!("Subscription {query}: socket error: {e}");
                                break;
                            }
                            None => {
                                info!("Subscription {query}: socket closed");
                                break;
                            }
                        };

                        match msg {
                            Message::Text(text) => {
                                let Some(event) = parse_event(&text, &unknown_counter) else {
                                    continue;
                                };
                                evt_counter.fetch_add(1, Ordering::Relaxed);
                                if tx.try_send(event).is_err() {
                                    skip_counter.fetch_add(1, Ordering::Relaxed);
                                    warn!("Subscription {query}: buffer full, skipping event");
                                }
                            }
                            Message::Ping(payload) => {
                                if ws.send(Message::Pong(payload)).await.is_err() {
                                    break;
                                }
                            }
                            Message::Close(_) => {
                                info!("Subscription {query}: close frame");
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// Decodes one WebSocket frame into a chain event.
///
/// Returns `None` for frames without event data (such as the subscribe
/// confirmation) and for payloads that fail to decode.
fn parse_event(text: &str, unknown_counter: &AtomicU64) -> Option<ChainEvent> {
    let envelope: WsEnvelope = serde_json::from_str(text).ok()?;
    let data = envelope.result?.data?;

    match data.kind.as_str() {
        "tendermint/event/NewBlock" => {
            let value: NewBlockValue = serde_json::from_value(data.value).ok()?;
            Some(ChainEvent::NewBlock {
                height: value.block.header.height.parse().ok()?,
                time: value.block.header.time,
            })
        }
        "tendermint/event/Tx" => {
            let value: TxValue = serde_json::from_value(data.value).ok()?;
            Some(ChainEvent::Tx {
                height: value.tx_result.height.parse().ok()?,
                raw: value.tx_result.tx,
            })
        }
        kind => {
            unknown_counter.fetch_add(1, Ordering::Relaxed);
            Some(ChainEvent::Unknown {
                kind: kind.to_string(),
            })
        }
    }
}
