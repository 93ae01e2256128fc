//! WebSocket channel to one relay.
//!
//! The connection owns the socket's write half and a background task that
//! parses the read half into typed [`RelayMessage`] frames. Each connect
//! opens a fresh inbound queue whose closure signals that the transport is
//! gone; there is no separate liveness flag to keep in sync. Routing
//! frames to sessions is the caller's job.

use crate::error::{ClientError, Result};
use crate::event::Event;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Inbound frame parsed off the relay channel.
#[derive(Debug, Clone)]
pub enum RelayMessage {
    Event(String, Event),
    Ok(String, bool, String),
    Eose(String),
    Notice(String),
    NegMsg(String, String),
    NegErr(String, String),
}

/// Relay connection configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub connect_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Live half of a connection: the write sink plus the reader task that
/// feeds the inbound queue.
struct Link {
    writer: WsWriter,
    reader_task: JoinHandle<()>,
}

/// A duplex JSON-array message channel to one relay.
pub struct RelayConnection {
    endpoint: Url,
    config: RelayConfig,
    link: Mutex<Option<Link>>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<RelayMessage>>>,
}

impl RelayConnection {
    /// Create a connection handle with default config. Does not dial.
    pub fn new(url: &str) -> Result<Self> {
        Self::with_config(url, RelayConfig::default())
    }

    /// Create a connection handle with custom config. Does not dial.
    pub fn with_config(url: &str, config: RelayConfig) -> Result<Self> {
        let endpoint = Url::parse(url)?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(ClientError::InvalidUrl(format!(
                "relay endpoint must be ws:// or wss://, got {}://",
                endpoint.scheme()
            )));
        }

        Ok(Self {
            endpoint,
            config,
            link: Mutex::new(None),
            inbound: Mutex::new(None),
        })
    }

    /// Relay URL as string.
    pub fn url(&self) -> &str {
        self.endpoint.as_str()
    }

    pub async fn is_connected(&self) -> bool {
        self.link.lock().await.is_some()
    }

    /// Dial the relay and start reading frames into a fresh inbound
    /// queue.
    pub async fn connect(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        if link.is_some() {
            return Err(ClientError::AlreadyConnected);
        }

        let dialed = timeout(
            self.config.connect_timeout,
            connect_async(self.endpoint.as_str()),
        )
        .await
        .map_err(|_| {
            ClientError::Timeout(format!(
                "no WebSocket handshake from {} within {:?}",
                self.endpoint, self.config.connect_timeout
            ))
        })?
        .map_err(|error| ClientError::WebSocket(error.to_string()))?;

        let (socket, _handshake) = dialed;
        let (writer, reader) = socket.split();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let reader_task = tokio::spawn(read_frames(reader, inbound_tx, self.endpoint.to_string()));
        *link = Some(Link {
            writer,
            reader_task,
        });
        *self.inbound.lock().await = Some(inbound_rx);
        Ok(())
    }

    /// Close the socket and stop the reader. Idempotent.
    pub async fn disconnect(&self) -> Result<()> {
        let Some(mut link) = self.link.lock().await.take() else {
            return Ok(());
        };
        if let Err(error) = link.writer.send(Message::Close(None)).await {
            debug!("close frame to {} not delivered: {}", self.endpoint, error);
        }
        link.reader_task.abort();
        self.inbound.lock().await.take();
        Ok(())
    }

    /// Receive the next inbound frame, in relay order. `None` means the
    /// transport is gone.
    pub async fn recv(&self) -> Option<RelayMessage> {
        match self.inbound.lock().await.as_mut() {
            Some(inbound) => inbound.recv().await,
            None => None,
        }
    }

    /// Send one JSON array envelope.
    pub async fn send_json(&self, value: &Value) -> Result<()> {
        let mut link = self.link.lock().await;
        let link = link.as_mut().ok_or(ClientError::NotConnected)?;
        let text = serde_json::to_string(value)?;
        link.writer
            .send(Message::Text(text.into()))
            .await
            .map_err(|error| ClientError::WebSocket(error.to_string()))
    }
}

/// Drain the socket's read half into the inbound queue until the socket
/// or the queue closes. Unparseable frames are logged and skipped; the
/// relay's FIFO order is preserved for everything delivered.
async fn read_frames(
    mut reader: WsReader,
    inbound_tx: mpsc::UnboundedSender<RelayMessage>,
    endpoint: String,
) {
    while let Some(incoming) = reader.next().await {
        let text = match incoming {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            // Control and binary frames carry no protocol payload.
            Ok(_) => continue,
            Err(error) => {
                warn!("read from {} failed: {}", endpoint, error);
                break;
            }
        };

        let frame = match parse_relay_message(text.as_str()) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(error) => {
                debug!("{} sent an unparseable frame: {}", endpoint, error);
                continue;
            }
        };

        if inbound_tx.send(frame).is_err() {
            return;
        }
    }
    debug!("reader for {} finished", endpoint);
}

fn text_at(frame: &[Value], index: usize, kind: &str) -> Result<String> {
    frame
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            ClientError::MalformedFrame(format!("{} frame: element {} must be a string", kind, index))
        })
}

/// Parse relay JSON text into a typed inbound frame. Frame kinds this
/// client has no use for parse to `None`.
pub fn parse_relay_message(text: &str) -> Result<Option<RelayMessage>> {
    let frame: Vec<Value> = serde_json::from_str(text)
        .map_err(|_| ClientError::MalformedFrame("frame is not a JSON array".to_string()))?;
    let kind = frame
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| ClientError::MalformedFrame("frame kind must be a string".to_string()))?;

    match kind {
        "EVENT" => {
            let subscription_id = text_at(&frame, 1, "EVENT")?;
            let payload = frame.get(2).cloned().ok_or_else(|| {
                ClientError::MalformedFrame("EVENT frame: missing event payload".to_string())
            })?;
            let event = serde_json::from_value(payload).map_err(|error| {
                ClientError::MalformedFrame(format!("EVENT frame: {}", error))
            })?;
            Ok(Some(RelayMessage::Event(subscription_id, event)))
        }
        "OK" => {
            let event_id = text_at(&frame, 1, "OK")?;
            let accepted = frame.get(2).and_then(Value::as_bool).ok_or_else(|| {
                ClientError::MalformedFrame("OK frame: element 2 must be a boolean".to_string())
            })?;
            let message = text_at(&frame, 3, "OK")?;
            Ok(Some(RelayMessage::Ok(event_id, accepted, message)))
        }
        "EOSE" => Ok(Some(RelayMessage::Eose(text_at(&frame, 1, "EOSE")?))),
        "NOTICE" => Ok(Some(RelayMessage::Notice(text_at(&frame, 1, "NOTICE")?))),
        "NEG-MSG" => Ok(Some(RelayMessage::NegMsg(
            text_at(&frame, 1, "NEG-MSG")?,
            text_at(&frame, 2, "NEG-MSG")?,
        ))),
        "NEG-ERR" => Ok(Some(RelayMessage::NegErr(
            text_at(&frame, 1, "NEG-ERR")?,
            text_at(&frame, 2, "NEG-ERR")?,
        ))),
        _ => Ok(None),
    }
}
