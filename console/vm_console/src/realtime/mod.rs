use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use futures_util::{SinkExt, Stream, StreamExt};
use log::{info, error, warn, debug};
use serde::{Serialize, Deserialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use url::Url;
use status_engine::StatusPayload;

use crate::request::RequestId;


type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

// Change feed error types
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Message send error: {0}")]
    SendError(String),

    #[error("Message receive error: {0}")]
    ReceiveError(String),

    #[error("Join rejected: {0}")]
    JoinRejected(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout waiting for subscription")]
    Timeout,
}

/// A live, filtered stream of row updates for one request id.
///
/// Cancelling the token releases the underlying channel; no rows are
/// delivered after that.
#[derive(Debug)]
pub struct FeedSubscription {
    updates: mpsc::UnboundedReceiver<StatusPayload>,
    cancel: CancellationToken,
}

impl FeedSubscription {
    pub fn new(updates: mpsc::UnboundedReceiver<StatusPayload>, cancel: CancellationToken) -> Self {
        Self { updates, cancel }
    }

    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<StatusPayload>, CancellationToken) {
        (self.updates, self.cancel)
    }
}

/// Source of row-update notifications filtered by request id.
///
/// `open` completes only once the backend acknowledged the subscription.
pub trait ChangeFeed: Send + Sync + 'static {
    fn open(&self, request_id: &RequestId) -> impl Future<Output = Result<FeedSubscription, FeedError>> + Send;
}

// Realtime channel frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
    #[serde(default)]
    pub join_ref: Option<String>,
}

impl PhoenixMessage {
    pub fn new(topic: &str, event: &str, payload: Value, msg_ref: Option<String>) -> Self {
        Self {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            join_ref: None,
            msg_ref,
        }
    }

    pub fn join(topic: &str, join_ref: &str, payload: Value) -> Self {
        let mut message = Self::new(topic, "phx_join", payload, Some(join_ref.to_string()));
        message.join_ref = Some(join_ref.to_string());
        message
    }

    pub fn heartbeat(msg_ref: String) -> Self {
        Self::new("phoenix", "heartbeat", json!({}), Some(msg_ref))
    }

    pub fn leave(topic: &str, msg_ref: String) -> Self {
        Self::new(topic, "phx_leave", json!({}), Some(msg_ref))
    }

    pub fn to_json(&self) -> Result<String, FeedError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, FeedError> {
        Ok(serde_json::from_str(json)?)
    }

    // Reply status for a phx_reply frame ("ok" / "error")
    pub fn reply_status(&self) -> Option<&str> {
        if self.event != "phx_reply" {
            return None;
        }
        self.payload.get("status").and_then(|s| s.as_str())
    }

    /// Post-update row carried by a change frame, if this is one.
    pub fn changed_record(&self) -> Option<&Value> {
        match self.event.as_str() {
            "postgres_changes" => {
                let data = self.payload.get("data")?;
                let change_type = data.get("type").and_then(|t| t.as_str()).unwrap_or("UPDATE");
                if change_type != "UPDATE" {
                    return None;
                }
                data.get("record")
            },
            "UPDATE" => self.payload.get("record"),
            _ => None,
        }
    }
}

// Realtime client configuration
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub store_url: String,
    pub api_key: String,
    pub table: String,
    pub id_column: String,
    pub heartbeat_interval_ms: u64,
    pub join_timeout_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            store_url: "http://127.0.0.1:54321".to_string(),
            api_key: String::new(),
            table: "vm_creation_requests".to_string(),
            id_column: "form_submission_unique_id".to_string(),
            heartbeat_interval_ms: 30000,
            join_timeout_ms: 10000,
        }
    }
}

impl RealtimeConfig {
    pub fn socket_url(&self) -> Result<Url, FeedError> {
        let mut url = Url::parse(&self.store_url)?;

        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| FeedError::ConnectionError(format!("Cannot use {} as websocket url", self.store_url)))?;

        url.set_path("/realtime/v1/websocket");
        url.query_pairs_mut()
            .clear()
            .append_pair("apikey", &self.api_key)
            .append_pair("vsn", "1.0.0");

        Ok(url)
    }

    pub fn topic(&self, request_id: &RequestId) -> String {
        format!("realtime:status-updates-{}", request_id)
    }

    pub fn join_payload(&self, request_id: &RequestId) -> Value {
        json!({
            "config": {
                "broadcast": { "ack": false, "self": false },
                "presence": { "key": "" },
                "postgres_changes": [{
                    "event": "UPDATE",
                    "schema": "public",
                    "table": self.table,
                    "filter": format!("{}=eq.{}", self.id_column, request_id),
                }],
                "private": false,
            },
            "access_token": self.api_key,
        })
    }
}

/// Change feed backed by the store's realtime websocket.
#[derive(Debug, Clone)]
pub struct RealtimeFeed {
    config: RealtimeConfig,
    refs: Arc<AtomicU64>,
}

impl RealtimeFeed {
    pub fn new(config: RealtimeConfig) -> Self {
        Self {
            config,
            refs: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    fn next_ref(refs: &AtomicU64) -> String {
        refs.fetch_add(1, Ordering::Relaxed).to_string()
    }
}

impl ChangeFeed for RealtimeFeed {
    async fn open(&self, request_id: &RequestId) -> Result<FeedSubscription, FeedError> {
        let url = self.config.socket_url()?;
        let topic = self.config.topic(request_id);

        debug!("Connecting to realtime endpoint {}", url.host_str().unwrap_or("?"));

        let (ws_stream, _) = connect_async(url.as_str()).await
            .map_err(|e| FeedError::ConnectionError(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        let join_ref = Self::next_ref(&self.refs);
        let join = PhoenixMessage::join(&topic, &join_ref, self.config.join_payload(request_id));

        write.send(Message::text(join.to_json()?)).await
            .map_err(|e| FeedError::SendError(e.to_string()))?;

        let join_timeout = Duration::from_millis(self.config.join_timeout_ms);
        match timeout(join_timeout, wait_for_join(&mut read, &topic, &join_ref)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("No join reply for {} within {:?}", topic, join_timeout);
                let _ = write.close().await;
                return Err(FeedError::Timeout);
            }
        }

        info!("Subscribed to status updates for request {}", request_id);

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(run_channel(
            write,
            read,
            topic,
            tx,
            cancel.clone(),
            Duration::from_millis(self.config.heartbeat_interval_ms.max(1)),
            self.refs.clone(),
        ));

        Ok(FeedSubscription::new(rx, cancel))
    }
}

// Read frames until the reply to our join arrives
async fn wait_for_join<S>(read: &mut S, topic: &str, join_ref: &str) -> Result<(), FeedError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let message = match PhoenixMessage::from_json(text.as_str()) {
                    Ok(message) => message,
                    Err(e) => {
                        debug!("Skipping unparseable frame while joining: {}", e);
                        continue;
                    }
                };

                if message.topic != topic || message.msg_ref.as_deref() != Some(join_ref) {
                    continue;
                }

                return match message.reply_status() {
                    Some("ok") => Ok(()),
                    _ => {
                        let reason = message.payload.get("response")
                            .map(|r| r.to_string())
                            .unwrap_or_else(|| message.payload.to_string());
                        Err(FeedError::JoinRejected(reason))
                    }
                };
            },
            Ok(Message::Close(_)) => return Err(FeedError::ConnectionClosed),
            Ok(_) => {},
            Err(e) => return Err(FeedError::ReceiveError(e.to_string())),
        }
    }

    Err(FeedError::ConnectionClosed)
}

// Pump change frames into `tx` until cancelled or the socket goes away
async fn run_channel(
    mut write: futures_util::stream::SplitSink<Socket, Message>,
    mut read: futures_util::stream::SplitStream<Socket>,
    topic: String,
    tx: mpsc::UnboundedSender<StatusPayload>,
    cancel: CancellationToken,
    heartbeat_period: Duration,
    refs: Arc<AtomicU64>,
) {
    let mut heartbeat = interval_at(Instant::now() + heartbeat_period, heartbeat_period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let leave = PhoenixMessage::leave(&topic, RealtimeFeed::next_ref(&refs));
                if let Ok(json) = leave.to_json() {
                    if let Err(e) = write.send(Message::text(json)).await {
                        debug!("Failed to send leave for {}: {}", topic, e);
                    }
                }
                let _ = write.close().await;
                debug!("Released channel {}", topic);
                break;
            }
            _ = heartbeat.tick() => {
                let beat = PhoenixMessage::heartbeat(RealtimeFeed::next_ref(&refs));
                match beat.to_json() {
                    Ok(json) => {
                        if let Err(e) = write.send(Message::text(json)).await {
                            error!("Failed to send heartbeat: {}", e);
                            break;
                        }
                    },
                    Err(e) => error!("Failed to serialize heartbeat: {}", e),
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let message = match PhoenixMessage::from_json(text.as_str()) {
                            Ok(message) => message,
                            Err(e) => {
                                error!("Failed to parse message: {}", e);
                                continue;
                            }
                        };

                        if message.topic != topic {
                            continue;
                        }

                        if message.event == "phx_error" || message.event == "phx_close" {
                            warn!("Channel {} reported {}", topic, message.event);
                            continue;
                        }

                        let record = match message.changed_record() {
                            Some(record) => record.clone(),
                            None => continue,
                        };

                        match StatusPayload::from_value(record) {
                            Ok(payload) => {
                                if tx.send(payload).is_err() {
                                    debug!("Subscriber for {} is gone", topic);
                                    break;
                                }
                            },
                            Err(e) => warn!("Dropping malformed row on {}: {}", topic, e),
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Realtime connection for {} closed by server", topic);
                        break;
                    },
                    Some(Ok(_)) => {},
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
        }
    }
}
