//! Reconciliation sessions multiplexed over a single relay connection.
//!
//! The relay channel is duplex and FIFO; everything session-shaped lives
//! here. A background dispatcher drains the connection's inbound queue and
//! routes each frame by subscription id: `NEG-MSG`/`NEG-ERR` to the
//! reconciliation session that owns the id, `EVENT`/`EOSE` to a pending
//! fetch, `OK` to a publish waiter. A `NOTICE` mentioning negentropy is
//! fatal to every open session. The protocol core stays synchronous; all
//! waiting happens in this module.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use negentropy::{
    NegClose, NegMsg, NegOpen, ProtocolError, Reconciler, Record, RecordStore,
    DEFAULT_FRAME_SIZE_LIMIT,
};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};
use crate::event::Event;
use crate::relay::{RelayConnection, RelayMessage};

/// Session-layer configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Window for a reconciliation to converge end to end.
    pub reconcile_timeout: Duration,
    /// Window for a follow-up fetch to reach EOSE.
    pub fetch_timeout: Duration,
    /// Window for a publish acknowledgement.
    pub publish_timeout: Duration,
    /// Frame-size hint handed to the reconciliation core.
    pub frame_size_limit: usize,
    /// Optional `idSize` hint appended to NEG-OPEN.
    pub id_size_hint: Option<u8>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconcile_timeout: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(30),
            publish_timeout: Duration::from_secs(10),
            frame_size_limit: DEFAULT_FRAME_SIZE_LIMIT,
            id_size_hint: None,
        }
    }
}

/// Result of a completed reconciliation: lowercase-hex id sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Ids we hold that the relay enumerated without.
    pub have_ids: Vec<String>,
    /// Ids the relay holds that we lack.
    pub need_ids: Vec<String>,
}

/// Publish acknowledgement from the relay.
#[derive(Debug, Clone)]
pub struct PublishConfirmation {
    pub relay_url: String,
    pub event_id: String,
    pub accepted: bool,
    pub message: String,
}

/// Frame delivered to one reconciliation session.
#[derive(Debug, Clone)]
enum SessionFrame {
    /// Hex protocol blob from a NEG-MSG envelope.
    Message(String),
    /// Terminal reason from NEG-ERR or a fatal NOTICE.
    Error(String),
}

/// Frame delivered to one pending fetch request.
#[derive(Debug, Clone)]
enum RequestFrame {
    Event(Event),
    Eose,
}

/// Whether a relay NOTICE must tear down open reconciliation sessions.
fn notice_is_session_fatal(text: &str) -> bool {
    text.to_ascii_lowercase().contains("negentropy")
}

/// Routing table shared between the dispatcher task and the drivers.
#[derive(Default)]
struct Router {
    sessions: Mutex<HashMap<String, mpsc::UnboundedSender<SessionFrame>>>,
    requests: Mutex<HashMap<String, mpsc::UnboundedSender<RequestFrame>>>,
    publishes: Mutex<HashMap<String, oneshot::Sender<(bool, String)>>>,
}

impl Router {
    async fn route(&self, message: RelayMessage) {
        match message {
            RelayMessage::NegMsg(subscription_id, blob) => {
                match self.sessions.lock().await.get(&subscription_id) {
                    Some(tx) => {
                        let _ = tx.send(SessionFrame::Message(blob));
                    }
                    None => debug!("NEG-MSG for unknown session {}", subscription_id),
                }
            }
            RelayMessage::NegErr(subscription_id, reason) => {
                match self.sessions.lock().await.get(&subscription_id) {
                    Some(tx) => {
                        let _ = tx.send(SessionFrame::Error(reason));
                    }
                    None => debug!("NEG-ERR for unknown session {}", subscription_id),
                }
            }
            RelayMessage::Notice(text) => {
                if notice_is_session_fatal(&text) {
                    warn!("session-fatal relay notice: {}", text);
                    for tx in self.sessions.lock().await.values() {
                        let _ = tx.send(SessionFrame::Error(text.clone()));
                    }
                } else {
                    debug!("relay notice: {}", text);
                }
            }
            RelayMessage::Ok(event_id, accepted, message) => {
                match self.publishes.lock().await.remove(&event_id) {
                    Some(tx) => {
                        let _ = tx.send((accepted, message));
                    }
                    None => debug!("OK for unknown publish {}", event_id),
                }
            }
            RelayMessage::Event(subscription_id, event) => {
                match self.requests.lock().await.get(&subscription_id) {
                    Some(tx) => {
                        let _ = tx.send(RequestFrame::Event(event));
                    }
                    None => debug!("EVENT for unknown request {}", subscription_id),
                }
            }
            RelayMessage::Eose(subscription_id) => {
                match self.requests.lock().await.get(&subscription_id) {
                    Some(tx) => {
                        let _ = tx.send(RequestFrame::Eose);
                    }
                    None => debug!("EOSE for unknown request {}", subscription_id),
                }
            }
        }
    }

    /// Drop every registered waiter. Their channels close, which the
    /// drivers surface as `TransportDown`.
    async fn fail_all(&self) {
        self.sessions.lock().await.clear();
        self.requests.lock().await.clear();
        self.publishes.lock().await.clear();
    }
}

/// Client for driving Negentropy reconciliation against one relay.
///
/// Multiple sessions may run concurrently over the shared connection;
/// each owns its record store and reconciliation engine by value, so
/// sessions are isolated and only the routing table is shared.
pub struct SyncClient {
    relay: Arc<RelayConnection>,
    config: SyncConfig,
    router: Arc<Router>,
    counter: AtomicU64,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncClient {
    /// Create a client with default configuration. Does not connect.
    pub fn new(url: &str) -> Result<Self> {
        Self::with_config(url, SyncConfig::default())
    }

    /// Create a client with custom configuration. Does not connect.
    pub fn with_config(url: &str, config: SyncConfig) -> Result<Self> {
        Ok(Self {
            relay: Arc::new(RelayConnection::new(url)?),
            config,
            router: Arc::new(Router::default()),
            counter: AtomicU64::new(1),
            dispatch_task: Mutex::new(None),
        })
    }

    /// Connect the relay channel and start the frame dispatcher.
    pub async fn connect(&self) -> Result<()> {
        self.relay.connect().await?;

        let relay = Arc::clone(&self.relay);
        let router = Arc::clone(&self.router);
        let task = tokio::spawn(async move {
            while let Some(message) = relay.recv().await {
                router.route(message).await;
            }
            debug!("relay channel closed, failing open sessions");
            router.fail_all().await;
        });
        *self.dispatch_task.lock().await = Some(task);
        Ok(())
    }

    fn next_subscription_id(&self) -> String {
        format!("neg_{}", self.counter.fetch_add(1, Ordering::Relaxed))
    }

    /// Reconcile the caller's `id_hex -> created_at` map against the
    /// relay's event set selected by `filter`.
    ///
    /// Opens a session, drives the exchange to convergence, and returns
    /// the two witness sets. The session is closed and deregistered on
    /// every exit path.
    pub async fn sync(&self, my_events: &HashMap<String, u64>, filter: Value) -> Result<SyncOutcome> {
        let mut records = Vec::with_capacity(my_events.len());
        for (id_hex, timestamp) in my_events {
            records.push(Record::from_hex(*timestamp, id_hex)?);
        }
        let store = RecordStore::new(records);
        let mut engine = Reconciler::with_frame_size_limit(store, self.config.frame_size_limit);

        let subscription_id = self.next_subscription_id();
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.router
            .sessions
            .lock()
            .await
            .insert(subscription_id.clone(), tx);

        let driven = timeout(
            self.config.reconcile_timeout,
            self.drive_session(&subscription_id, &mut engine, &mut rx, filter),
        )
        .await;

        self.router.sessions.lock().await.remove(&subscription_id);
        let close = NegClose::new(subscription_id.clone());
        if let Err(error) = self.relay.send_json(&close.to_json()).await {
            debug!("NEG-CLOSE for {} not delivered: {}", subscription_id, error);
        }

        match driven {
            Ok(Ok(())) => {
                let (have_ids, need_ids) = engine.result();
                Ok(SyncOutcome { have_ids, need_ids })
            }
            Ok(Err(error)) => Err(error),
            Err(_) => Err(ClientError::Timeout(format!(
                "reconciliation did not converge within {:?}",
                self.config.reconcile_timeout
            ))),
        }
    }

    async fn drive_session(
        &self,
        subscription_id: &str,
        engine: &mut Reconciler,
        rx: &mut mpsc::UnboundedReceiver<SessionFrame>,
        filter: Value,
    ) -> Result<()> {
        let initial = engine.initiate()?;
        let mut open = NegOpen::new(subscription_id.to_string(), filter, hex::encode(initial));
        if let Some(id_size) = self.config.id_size_hint {
            open = open.with_id_size(id_size);
        }
        self.relay.send_json(&open.to_json()).await?;

        loop {
            let frame = rx.recv().await.ok_or_else(|| {
                ClientError::TransportDown("relay channel closed mid-session".to_string())
            })?;
            match frame {
                SessionFrame::Message(blob) => {
                    let bytes = hex::decode(&blob).map_err(|error| {
                        ProtocolError::Malformed(format!("reply is not hex: {}", error))
                    })?;
                    match engine.reconcile(&bytes)? {
                        Some(reply) => {
                            let envelope =
                                NegMsg::new(subscription_id.to_string(), hex::encode(reply));
                            self.relay.send_json(&envelope.to_json()).await?;
                        }
                        None => return Ok(()),
                    }
                }
                SessionFrame::Error(reason) => return Err(ClientError::peer(&reason)),
            }
        }
    }

    /// [`sync`](Self::sync), then fetch the events behind `need_ids`.
    pub async fn sync_and_fetch(
        &self,
        my_events: &HashMap<String, u64>,
        filter: Value,
    ) -> Result<Vec<Event>> {
        let outcome = self.sync(my_events, filter).await?;
        if outcome.need_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.fetch_events(&outcome.need_ids).await
    }

    /// Fetch events by id over a plain REQ subscription, collecting until
    /// EOSE.
    pub async fn fetch_events(&self, ids: &[String]) -> Result<Vec<Event>> {
        let subscription_id = self.next_subscription_id();
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.router
            .requests
            .lock()
            .await
            .insert(subscription_id.clone(), tx);

        let fetched = timeout(self.config.fetch_timeout, async {
            self.relay
                .send_json(&json!(["REQ", &subscription_id, {"ids": ids}]))
                .await?;
            let mut events = Vec::new();
            loop {
                match rx.recv().await {
                    Some(RequestFrame::Event(event)) => events.push(event),
                    Some(RequestFrame::Eose) => return Ok(events),
                    None => {
                        return Err(ClientError::TransportDown(
                            "relay channel closed mid-request".to_string(),
                        ))
                    }
                }
            }
        })
        .await;

        self.router.requests.lock().await.remove(&subscription_id);
        let _ = self
            .relay
            .send_json(&json!(["CLOSE", &subscription_id]))
            .await;

        match fetched {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(format!(
                "fetch did not reach EOSE within {:?}",
                self.config.fetch_timeout
            ))),
        }
    }

    /// Publish one event and await the relay's acknowledgement frame.
    pub async fn publish(&self, event: &Event) -> Result<PublishConfirmation> {
        if event.id.is_empty() {
            return Err(ClientError::InvalidRequest(
                "event is missing an id".to_string(),
            ));
        }

        let (tx, rx) = oneshot::channel();
        self.router
            .publishes
            .lock()
            .await
            .insert(event.id.clone(), tx);

        if let Err(error) = self.relay.send_json(&json!(["EVENT", event])).await {
            self.router.publishes.lock().await.remove(&event.id);
            return Err(error);
        }

        match timeout(self.config.publish_timeout, rx).await {
            Ok(Ok((accepted, message))) => Ok(PublishConfirmation {
                relay_url: self.relay.url().to_string(),
                event_id: event.id.clone(),
                accepted,
                message,
            }),
            Ok(Err(_)) => Err(ClientError::TransportDown(
                "relay channel closed awaiting publish acknowledgement".to_string(),
            )),
            Err(_) => {
                self.router.publishes.lock().await.remove(&event.id);
                Err(ClientError::Timeout(format!(
                    "no publish acknowledgement within {:?}",
                    self.config.publish_timeout
                )))
            }
        }
    }

    /// Tear down all sessions and the transport.
    pub async fn close(&self) -> Result<()> {
        let open: Vec<String> = self.router.sessions.lock().await.keys().cloned().collect();
        for subscription_id in open {
            let _ = self
                .relay
                .send_json(&NegClose::new(subscription_id).to_json())
                .await;
        }

        if let Some(task) = self.dispatch_task.lock().await.take() {
            task.abort();
        }
        self.router.fail_all().await;
        self.relay.disconnect().await
    }
}
