//! Supabase realtime feed over the Phoenix channel protocol.
//!
//! Joins `realtime:public:<table>` with a `postgres_changes` listener for all
//! events, keeps the socket alive with heartbeats, and forwards every row
//! change to the subscriber's callback.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{ChangeCallback, ChangeEvent, ChangeFeed, ChangeKind, Subscription};
use crate::config::StoreConfig;
use crate::error::RealtimeError;
use secrecy::ExposeSecret;

/// Interval between Phoenix heartbeats.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// How long the WebSocket handshake may take before polling takes over.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// An incoming Phoenix frame.
#[derive(Debug, Deserialize)]
struct PhoenixFrame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
}

/// Change feed for a Supabase-hosted table.
pub struct PhoenixChangeFeed {
    config: StoreConfig,
    heartbeat: Duration,
    connect_timeout: Duration,
}

impl PhoenixChangeFeed {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            heartbeat: HEARTBEAT_INTERVAL,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    fn topic(&self) -> String {
        topic_for(&self.config.table_name)
    }

    fn join_message(&self) -> String {
        json!({
            "topic": self.topic(),
            "event": "phx_join",
            "payload": {
                "config": {
                    "broadcast": { "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [
                        { "event": "*", "schema": "public", "table": self.config.table_name }
                    ]
                },
                "access_token": self.config.key.expose_secret(),
            },
            "ref": "1",
            "join_ref": "1",
        })
        .to_string()
    }
}

fn topic_for(table: &str) -> String {
    format!("realtime:public:{table}")
}

fn heartbeat_message(seq: u64) -> String {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": seq.to_string(),
    })
    .to_string()
}

/// What a frame means for the subscriber.
#[derive(Debug, PartialEq, Eq)]
enum FrameOutcome {
    Change(ChangeEvent),
    Closed(String),
    Ignore,
}

fn classify_frame(text: &str, table: &str) -> Result<FrameOutcome, RealtimeError> {
    let frame: PhoenixFrame = serde_json::from_str(text)?;
    if frame.topic == "phoenix" {
        return Ok(FrameOutcome::Ignore);
    }

    match frame.event.as_str() {
        "postgres_changes" => {
            let data = &frame.payload["data"];
            Ok(change_from(data, table).map_or(FrameOutcome::Ignore, FrameOutcome::Change))
        }
        // Older servers send the row change as the event itself.
        "INSERT" | "UPDATE" | "DELETE" => Ok(change_from(&frame.payload, table)
            .map_or(FrameOutcome::Ignore, FrameOutcome::Change)),
        "phx_reply" if frame.payload["status"] == "error" => Ok(FrameOutcome::Closed(
            frame.payload["response"].to_string(),
        )),
        "phx_error" | "phx_close" => Ok(FrameOutcome::Closed(frame.event)),
        _ => Ok(FrameOutcome::Ignore),
    }
}

fn change_from(data: &Value, table: &str) -> Option<ChangeEvent> {
    let kind = match data["type"].as_str().or_else(|| data["eventType"].as_str())? {
        "INSERT" => ChangeKind::Insert,
        "UPDATE" => ChangeKind::Update,
        "DELETE" => ChangeKind::Delete,
        _ => return None,
    };
    let record_id = data["record"]["id"]
        .as_i64()
        .or_else(|| data["old_record"]["id"].as_i64());
    Some(ChangeEvent {
        kind,
        table: data["table"].as_str().unwrap_or(table).to_string(),
        record_id,
    })
}

#[async_trait]
impl ChangeFeed for PhoenixChangeFeed {
    async fn subscribe(&self, callback: ChangeCallback) -> Result<Subscription, RealtimeError> {
        let (socket, _resp) =
            tokio::time::timeout(self.connect_timeout, connect_async(self.config.realtime_url()))
                .await
                .map_err(|_| {
                    RealtimeError::Connect(format!(
                        "handshake timed out after {}s",
                        self.connect_timeout.as_secs_f32()
                    ))
                })?
                .map_err(|e| RealtimeError::Connect(e.to_string()))?;
        let (mut sink, mut stream) = socket.split();

        sink.send(Message::Text(self.join_message().into()))
            .await
            .map_err(|e| RealtimeError::Connect(e.to_string()))?;

        let table = self.config.table_name.clone();
        let topic = self.topic();
        let heartbeat = self.heartbeat;
        info!(topic = %topic, "Subscribed to change feed");

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + heartbeat,
                heartbeat,
            );
            let mut seq: u64 = 1;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        seq += 1;
                        if sink.send(Message::Text(heartbeat_message(seq).into())).await.is_err() {
                            warn!(topic = %topic, "Change feed heartbeat failed");
                            break;
                        }
                    }
                    frame = stream.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => match classify_frame(&text, &table) {
                                Ok(FrameOutcome::Change(event)) => {
                                    debug!(kind = ?event.kind, record_id = ?event.record_id, "Table change");
                                    callback(event);
                                }
                                Ok(FrameOutcome::Closed(reason)) => {
                                    warn!(topic = %topic, reason = %reason, "Change feed channel closed");
                                    break;
                                }
                                Ok(FrameOutcome::Ignore) => {}
                                Err(e) => debug!(error = %e, "Unparseable change feed frame"),
                            },
                            Some(Ok(Message::Ping(data))) => {
                                if sink.send(Message::Pong(data)).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                warn!(topic = %topic, "Change feed disconnected");
                                break;
                            }
                            Some(Err(e)) => {
                                warn!(topic = %topic, error = %e, "Change feed error");
                                break;
                            }
                            Some(Ok(_)) => {}
                        }
                    }
                }
            }
        });

        Ok(Subscription::new(topic_for(&self.config.table_name), task))
    }
}
