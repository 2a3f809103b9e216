//! obs-websocket session lifecycle, request correlation, and event dispatch.
//!
//! One `ObsConnection` owns at most one identified session at a time. The
//! handshake (Hello -> Identify -> Identified) runs inline in `connect`; once
//! identified the socket is split into a writer task fed by an mpsc channel
//! and a reader task that completes pending requests and queues events. Event
//! handlers run on a dedicated dispatcher task, in arrival order, so they can
//! never block the socket's receive path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::error::{CallError, ConnectError};
use super::protocol::{
    self, Envelope, EventPayload, Hello, Identified, RequestResponse, SceneItemInfo, SceneItemList,
};
use super::SceneRemote;
use crate::config::ConnectionSettings;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingMap = parking_lot::Mutex<HashMap<u64, oneshot::Sender<Result<Value, CallError>>>>;
type HandlerList = parking_lot::RwLock<Vec<(String, EventHandler)>>;

/// Callback invoked once per matching remote-originated event.
pub type EventHandler = Arc<dyn Fn(&ObsEvent) + Send + Sync>;

/// A remote-originated event, decoded from an op 5 frame.
#[derive(Debug, Clone)]
pub struct ObsEvent {
    pub event_type: String,
    pub data: Value,
}

/// Lifecycle state of the logical connection. Owned by `ObsConnection`;
/// everyone else observes it through the watch channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed(_) => "failed",
        }
    }
}

/// Negotiated session details, reported on a successful connect.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub obs_websocket_version: String,
    pub negotiated_rpc_version: u32,
}

struct Session {
    outgoing: mpsc::UnboundedSender<Message>,
}

/// The single logical connection to OBS.
pub struct ObsConnection {
    state_tx: Arc<watch::Sender<ConnectionState>>,
    session: Arc<parking_lot::RwLock<Option<Session>>>,
    pending: Arc<PendingMap>,
    handlers: Arc<HandlerList>,
    event_tx: mpsc::UnboundedSender<ObsEvent>,
    next_request_id: AtomicU64,
    /// Bumped on every connect/disconnect; a reader task only performs exit
    /// cleanup when its session generation is still current.
    generation: Arc<AtomicU64>,
    call_timeout: Duration,
    connect_timeout: Duration,
}

impl ObsConnection {
    /// Create a disconnected connection and start its event dispatcher.
    pub fn new(call_timeout: Duration, connect_timeout: Duration) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let handlers: Arc<HandlerList> = Arc::new(parking_lot::RwLock::new(Vec::new()));
        spawn_event_dispatcher(event_rx, Arc::clone(&handlers));

        Self {
            state_tx: Arc::new(state_tx),
            session: Arc::new(parking_lot::RwLock::new(None)),
            pending: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            handlers,
            event_tx,
            next_request_id: AtomicU64::new(0),
            generation: Arc::new(AtomicU64::new(0)),
            call_timeout,
            connect_timeout,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    /// Watch for connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Register a handler for one event type. Handlers are invoked by the
    /// dispatcher task in the order events are received.
    pub fn subscribe(&self, event_type: impl Into<String>, handler: EventHandler) {
        self.handlers.write().push((event_type.into(), handler));
    }

    /// Establish an identified session, negotiating protocol and auth.
    ///
    /// Any session left over from a prior attempt is torn down first, so this
    /// is safe to call again after a failure.
    pub async fn connect(
        &self,
        settings: &ConnectionSettings,
    ) -> Result<ConnectionInfo, ConnectError> {
        self.disconnect();
        let base_generation = self.generation.load(Ordering::SeqCst);
        let _ = self.state_tx.send(ConnectionState::Connecting);

        let url = settings.socket_address();
        info!("🔌 Connecting to OBS at {}", url);

        let (mut ws, _response) = match timeout(self.connect_timeout, connect_async(url.as_str())).await
        {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(self.fail(ConnectError::Network(e.to_string()))),
            Err(_) => {
                return Err(self.fail(ConnectError::Network(format!(
                    "connection attempt to {url} timed out"
                ))))
            },
        };

        // Hello (op 0)
        let envelope = match next_envelope(&mut ws, self.connect_timeout).await {
            Ok(envelope) => envelope,
            Err(e) => return Err(self.fail(e)),
        };
        if envelope.op != protocol::OP_HELLO {
            return Err(self.fail(ConnectError::Protocol(format!(
                "expected Hello, got op {}",
                envelope.op
            ))));
        }
        let hello: Hello = match serde_json::from_value(envelope.d) {
            Ok(hello) => hello,
            Err(e) => return Err(self.fail(ConnectError::Protocol(format!("malformed Hello: {e}")))),
        };
        debug!(
            "OBS Hello: version {} (RPC {})",
            hello.obs_web_socket_version, hello.rpc_version
        );

        let authentication = match &hello.authentication {
            Some(challenge) => match settings.password.as_deref().filter(|p| !p.is_empty()) {
                Some(password) => Some(protocol::auth_response(
                    password,
                    &challenge.salt,
                    &challenge.challenge,
                )),
                None => {
                    return Err(self.fail(ConnectError::Auth(
                        "OBS requires a password and none is configured".into(),
                    )))
                },
            },
            None => None,
        };

        // Identify (op 1) -> Identified (op 2)
        let identify = protocol::identify_frame(authentication).to_string();
        if let Err(e) = ws.send(Message::Text(identify)).await {
            return Err(self.fail(ConnectError::Network(e.to_string())));
        }
        let envelope = match next_envelope(&mut ws, self.connect_timeout).await {
            Ok(envelope) => envelope,
            Err(e) => return Err(self.fail(e)),
        };
        if envelope.op != protocol::OP_IDENTIFIED {
            return Err(self.fail(ConnectError::Protocol(format!(
                "expected Identified, got op {}",
                envelope.op
            ))));
        }
        let identified: Identified = match serde_json::from_value(envelope.d) {
            Ok(identified) => identified,
            Err(e) => {
                return Err(self.fail(ConnectError::Protocol(format!("malformed Identified: {e}"))))
            },
        };
        if identified.negotiated_rpc_version != protocol::RPC_VERSION {
            return Err(self.fail(ConnectError::Protocol(format!(
                "OBS negotiated RPC version {}, this client speaks {}",
                identified.negotiated_rpc_version,
                protocol::RPC_VERSION
            ))));
        }

        // A disconnect (or a competing connect) may have superseded us while
        // the handshake was in flight.
        if self.generation.load(Ordering::SeqCst) != base_generation {
            return Err(ConnectError::Network("connection attempt was superseded".into()));
        }

        let session_generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (write, read) = ws.split();
        tokio::spawn(run_writer(write, outgoing_rx));
        tokio::spawn(run_reader(
            read,
            Arc::clone(&self.pending),
            self.event_tx.clone(),
            Arc::clone(&self.state_tx),
            Arc::clone(&self.session),
            Arc::clone(&self.generation),
            session_generation,
        ));

        *self.session.write() = Some(Session {
            outgoing: outgoing_tx,
        });
        let _ = self.state_tx.send(ConnectionState::Connected);

        let info = ConnectionInfo {
            obs_websocket_version: hello.obs_web_socket_version,
            negotiated_rpc_version: identified.negotiated_rpc_version,
        };
        info!(
            "✅ Connected to OBS {} (RPC {})",
            info.obs_websocket_version, info.negotiated_rpc_version
        );
        Ok(info)
    }

    /// One request/response round trip over the current session.
    pub async fn call(&self, request_type: &str, data: Option<Value>) -> Result<Value, CallError> {
        let outgoing = {
            let guard = self.session.read();
            match guard.as_ref() {
                Some(session) => session.outgoing.clone(),
                None => return Err(CallError::NotConnected),
            }
        };

        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let frame = protocol::request_frame(id, request_type, data).to_string();
        if outgoing.send(Message::Text(frame)).is_err() {
            self.pending.lock().remove(&id);
            return Err(CallError::NotConnected);
        }

        match timeout(self.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped without a response: the session died underneath us.
            Ok(Err(_)) => Err(CallError::NotConnected),
            Err(_) => {
                self.pending.lock().remove(&id);
                warn!("OBS request '{}' (id {}) timed out", request_type, id);
                Err(CallError::Timeout)
            },
        }
    }

    /// Tear down the session. Idempotent; always leaves the state
    /// Disconnected and resolves every in-flight call with `NotConnected`.
    pub fn disconnect(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if self.session.write().take().is_some() {
            info!("🔌 Disconnected from OBS");
        }
        drain_pending(&self.pending);
        if *self.state_tx.borrow() != ConnectionState::Disconnected {
            let _ = self.state_tx.send(ConnectionState::Disconnected);
        }
    }

    fn fail(&self, err: ConnectError) -> ConnectError {
        let _ = self.state_tx.send(ConnectionState::Failed(err.to_string()));
        err
    }
}

#[async_trait]
impl SceneRemote for ObsConnection {
    async fn list_scene_items(&self, scene: &str) -> Result<Vec<SceneItemInfo>, CallError> {
        let value = self
            .call("GetSceneItemList", Some(json!({ "sceneName": scene })))
            .await?;
        // A response that does not match the documented shape is reported as
        // a remote error.
        let list: SceneItemList = serde_json::from_value(value).map_err(|e| CallError::Remote {
            code: 0,
            message: format!("malformed GetSceneItemList response: {e}"),
        })?;
        Ok(list.scene_items)
    }

    async fn set_scene_item_enabled(
        &self,
        scene: &str,
        item_id: i64,
        enabled: bool,
    ) -> Result<(), CallError> {
        self.call(
            "SetSceneItemEnabled",
            Some(json!({
                "sceneName": scene,
                "sceneItemId": item_id,
                "sceneItemEnabled": enabled,
            })),
        )
        .await?;
        Ok(())
    }
}

/// Read the next JSON envelope during the handshake, skipping ping/pong.
async fn next_envelope(ws: &mut WsStream, wait: Duration) -> Result<Envelope, ConnectError> {
    loop {
        let message = timeout(wait, ws.next())
            .await
            .map_err(|_| ConnectError::Network("timed out waiting for handshake".into()))?
            .ok_or_else(|| ConnectError::Network("connection closed during handshake".into()))?
            .map_err(|e| ConnectError::Network(e.to_string()))?;

        match message {
            Message::Text(text) => {
                return serde_json::from_str(&text).map_err(|e| {
                    ConnectError::Protocol(format!("unparseable handshake frame: {e}"))
                })
            },
            Message::Close(Some(frame)) => {
                return Err(classify_close(u16::from(frame.code), &frame.reason))
            },
            Message::Close(None) => {
                return Err(ConnectError::Network(
                    "connection closed during handshake".into(),
                ))
            },
            _ => continue,
        }
    }
}

/// Map an obs-websocket close code to the connect error taxonomy.
fn classify_close(code: u16, reason: &str) -> ConnectError {
    match code {
        protocol::CLOSE_AUTH_FAILED => {
            ConnectError::Auth("OBS rejected the password".into())
        },
        protocol::CLOSE_UNSUPPORTED_RPC_VERSION => ConnectError::Protocol(format!(
            "OBS does not support RPC version {}",
            protocol::RPC_VERSION
        )),
        protocol::CLOSE_SESSION_INVALIDATED => {
            ConnectError::Protocol(format!("session invalidated: {reason}"))
        },
        _ => ConnectError::Protocol(format!(
            "OBS closed the connection (code {code}: {reason})"
        )),
    }
}

async fn run_writer(
    mut write: SplitSink<WsStream, Message>,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = outgoing.recv().await {
        if let Err(e) = write.send(message).await {
            debug!("OBS socket write failed: {}", e);
            return;
        }
    }
    // Channel closed: the session was torn down, say goodbye.
    let _ = write.send(Message::Close(None)).await;
}

async fn run_reader(
    mut read: SplitStream<WsStream>,
    pending: Arc<PendingMap>,
    event_tx: mpsc::UnboundedSender<ObsEvent>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    session: Arc<parking_lot::RwLock<Option<Session>>>,
    generation: Arc<AtomicU64>,
    my_generation: u64,
) {
    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => handle_frame(&text, &pending, &event_tx),
            Ok(Message::Close(frame)) => {
                let detail = frame
                    .map(|f| format!("code {}: {}", u16::from(f.code), f.reason))
                    .unwrap_or_else(|| "no close frame".to_string());
                info!("🔌 OBS closed the connection ({})", detail);
                break;
            },
            Ok(_) => {},
            Err(e) => {
                warn!("OBS socket error: {}", e);
                break;
            },
        }
    }

    // A newer session (or an explicit disconnect) owns cleanup once the
    // generation has moved on.
    if generation.load(Ordering::SeqCst) != my_generation {
        return;
    }
    session.write().take();
    drain_pending(&pending);
    let _ = state_tx.send(ConnectionState::Disconnected);
    debug!("OBS reader task exited");
}

fn handle_frame(text: &str, pending: &PendingMap, event_tx: &mpsc::UnboundedSender<ObsEvent>) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Unparseable OBS frame: {}", e);
            return;
        },
    };

    match envelope.op {
        protocol::OP_EVENT => match serde_json::from_value::<EventPayload>(envelope.d) {
            Ok(event) => {
                let _ = event_tx.send(ObsEvent {
                    event_type: event.event_type,
                    data: event.event_data.unwrap_or(Value::Null),
                });
            },
            Err(e) => warn!("Malformed OBS event: {}", e),
        },
        protocol::OP_REQUEST_RESPONSE => {
            match serde_json::from_value::<RequestResponse>(envelope.d) {
                Ok(response) => complete_request(response, pending),
                Err(e) => warn!("Malformed OBS response: {}", e),
            }
        },
        other => debug!("Ignoring OBS frame with op {}", other),
    }
}

fn complete_request(response: RequestResponse, pending: &PendingMap) {
    let Ok(id) = response.request_id.parse::<u64>() else {
        warn!("OBS response with non-numeric request id '{}'", response.request_id);
        return;
    };
    let Some(tx) = pending.lock().remove(&id) else {
        debug!("Response for unknown or timed-out request {}", id);
        return;
    };

    let result = if response.request_status.result {
        Ok(response.response_data.unwrap_or(Value::Null))
    } else {
        Err(CallError::Remote {
            code: response.request_status.code,
            message: response
                .request_status
                .comment
                .unwrap_or_else(|| "request rejected".to_string()),
        })
    };
    let _ = tx.send(result);
}

fn drain_pending(pending: &PendingMap) {
    for (_, tx) in pending.lock().drain() {
        let _ = tx.send(Err(CallError::NotConnected));
    }
}

/// Deliver queued events to matching handlers, preserving arrival order.
fn spawn_event_dispatcher(
    mut events: mpsc::UnboundedReceiver<ObsEvent>,
    handlers: Arc<HandlerList>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let matching: Vec<EventHandler> = handlers
                .read()
                .iter()
                .filter(|(name, _)| name == &event.event_type)
                .map(|(_, handler)| Arc::clone(handler))
                .collect();
            for handler in matching {
                handler(&event);
            }
        }
    })
}
