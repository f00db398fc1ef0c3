use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

use crate::{
    errors::{WsError, WsResult},
    types::{Notification, OrderBook, TokenId},
};

/// Events surfaced by the push channel after the subscription handshake.
#[derive(Debug)]
pub enum ChannelEvent {
    /// Subscription acknowledged by the server.
    Subscribed,
    /// Server liveness probe was received (and answered).
    Heartbeat,
    Notification(Notification),
    /// The connection ended; the caller decides whether to reconnect.
    Closed,
}

/// One subscribed WebSocket connection: `account` plus `orderbook` for the
/// tracked pair. The reader task answers `ping` with `pong` and decodes the
/// loose notification payloads into typed [`Notification`]s.
pub struct PushChannel {
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    reader: JoinHandle<()>,
}

impl PushChannel {
    pub async fn connect(
        ws_base_url: &str,
        ws_key: &str,
        api_key: &str,
        market: &str,
    ) -> WsResult<Self> {
        let url = Url::parse(&format!("{ws_base_url}/v3/ws?wsApiKey={ws_key}"))?;
        let (mut stream, _) = connect_async(url.as_str()).await?;

        let subscribe = json!({
            "op": "sub",
            "sequence": 10000,
            "apiKey": api_key,
            "unsubscribeAll": true,
            "topics": [
                { "topic": "account" },
                {
                    "topic": "orderbook",
                    "market": market,
                    "level": 0,
                    "snapshot": true,
                    "count": 2
                }
            ]
        });
        stream.send(Message::Text(subscribe.to_string())).await?;

        let (tx, events) = mpsc::unbounded_channel();
        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Ping(payload)) => {
                        if stream.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                        let _ = tx.send(ChannelEvent::Heartbeat);
                        continue;
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(err) => {
                        tracing::error!(error = %err, "websocket error");
                        break;
                    }
                };

                if text == "ping" {
                    // the server expects a text pong, not a control frame
                    if stream.send(Message::Text("pong".to_string())).await.is_err() {
                        break;
                    }
                    let _ = tx.send(ChannelEvent::Heartbeat);
                    continue;
                }

                match decode_message(&text) {
                    Ok(Some(event)) => {
                        let _ = tx.send(event);
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::error!(error = %err, "dropping undecodable channel message");
                        if matches!(err, WsError::SubscriptionFailed { .. }) {
                            break;
                        }
                    }
                }
            }
            let _ = tx.send(ChannelEvent::Closed);
        });

        Ok(Self { events, reader })
    }

    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    pub fn close(self) {
        self.reader.abort();
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[derive(Deserialize)]
struct RawTopic {
    topic: String,
    #[serde(default)]
    market: Option<String>,
}

#[derive(Deserialize)]
struct RawMessage {
    topic: RawTopic,
    #[serde(default, rename = "endVersion")]
    end_version: Option<u64>,
    data: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAccountData {
    token_id: TokenId,
    #[serde(with = "rust_decimal::serde::str")]
    total_amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    amount_locked: Decimal,
}

#[derive(Deserialize)]
struct RawAck {
    result: RawAckResult,
}

#[derive(Deserialize)]
struct RawAckResult {
    status: String,
    #[serde(default)]
    error: Option<RawAckError>,
}

#[derive(Deserialize)]
struct RawAckError {
    code: i64,
    message: String,
}

/// Decode one JSON channel message. `Ok(None)` means a message type the
/// maker does not track.
fn decode_message(text: &str) -> WsResult<Option<ChannelEvent>> {
    let value: serde_json::Value = serde_json::from_str(text)?;

    if value.get("op").and_then(|op| op.as_str()) == Some("sub") {
        let ack: RawAck = serde_json::from_value(value)?;
        if ack.result.status == "OK" {
            return Ok(Some(ChannelEvent::Subscribed));
        }
        let (code, message) = ack
            .result
            .error
            .map(|e| (e.code, e.message))
            .unwrap_or((0, ack.result.status));
        return Err(WsError::SubscriptionFailed { code, message });
    }

    if value.get("topic").is_none() {
        return Ok(None);
    }
    let message: RawMessage = serde_json::from_value(value)?;
    decode_notification(message).map(|n| n.map(ChannelEvent::Notification))
}

fn decode_notification(message: RawMessage) -> WsResult<Option<Notification>> {
    match message.topic.topic.as_str() {
        "account" => {
            let data: RawAccountData = serde_json::from_value(message.data)?;
            Ok(Some(Notification::Account {
                token_id: data.token_id,
                total: data.total_amount,
                locked: data.amount_locked,
            }))
        }
        "orderbook" => {
            let market = message.topic.market.ok_or_else(|| {
                WsError::InvalidMessage("orderbook notification without market".to_string())
            })?;
            let book: OrderBook = serde_json::from_value(message.data)?;
            Ok(Some(Notification::OrderBook {
                market,
                book,
                version: message.end_version,
            }))
        }
        other => {
            tracing::debug!(topic = other, "ignoring unknown notification topic");
            Ok(None)
        }
    }
}
