//! A single control-plane connection.
//!
//! Owns one physical WebSocket at a time plus the table of in-flight
//! requests.  Outbound frames go through a bounded queue drained by a writer
//! task; a reader task decodes every inbound frame and either resolves the
//! matching pending request or hands the frame to a registered handler.
//!
//! ```text
//!   send_message(id, json) ──► pending[id] = oneshot ──► outbound queue ──► writer ──► ws
//!                                   ▲
//!   ws ──► reader ──► on_message ───┘ (status check / handler / resolve)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use gl_protocol::{
    decode, DescribePlayerSessionsResponse, GetComputeCertificateResponse,
    GetFleetRoleCredentialsResponse, ResponseEnvelope, StartMatchBackfillResponse,
};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message as Frame};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::config::SdkSettings;
use crate::error::{GameLiftError, Result};
use crate::retry::{Retryable, RetryingCallable};

// ── Types ────────────────────────────────────────────────────────────

/// Typed result the receive path hands back to a waiting sender.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    /// Acknowledgement without a body.
    Empty,
    PlayerSessions(DescribePlayerSessionsResponse),
    MatchBackfill(StartMatchBackfillResponse),
    ComputeCertificate(GetComputeCertificateResponse),
    FleetRoleCredentials(GetFleetRoleCredentialsResponse),
}

pub type HandlerOutcome = Result<ResponsePayload>;

/// Turns a raw inbound frame for one action into a typed outcome.
pub type EventHandler = Arc<dyn Fn(&str) -> HandlerOutcome + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Posted to the connection manager's control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// The physical link of `connection_id` dropped abnormally.
    Reconnect { connection_id: u64, uri: String },
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

// ── Physical link ────────────────────────────────────────────────────

struct Link {
    generation: u64,
    outbound: mpsc::Sender<Frame>,
    /// Set when we initiated the close.
    closing: AtomicBool,
    /// Cleared by the reader when the socket is gone.
    alive: AtomicBool,
    cancel: CancellationToken,
}

impl Link {
    fn close(&self, reason: &'static str) {
        self.closing.store(true, Ordering::SeqCst);
        let frame = Frame::Close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: reason.into(),
        }));
        let _ = self.outbound.try_send(frame);
        self.cancel.cancel();
    }

    fn is_usable(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.closing.load(Ordering::SeqCst)
    }
}

// ── WebSocketConnection ──────────────────────────────────────────────

pub struct WebSocketConnection {
    id: u64,
    me: Weak<WebSocketConnection>,
    settings: SdkSettings,
    state: Mutex<ConnectionState>,
    link: RwLock<Option<Arc<Link>>>,
    uri: Mutex<Option<String>>,
    /// request_id → slot resolved exactly once by receive, timeout or close.
    pending: Mutex<HashMap<String, oneshot::Sender<HandlerOutcome>>>,
    handlers: RwLock<HashMap<String, EventHandler>>,
    next_generation: AtomicU64,
    events: Option<mpsc::UnboundedSender<ControlEvent>>,
}

impl std::fmt::Debug for WebSocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnection")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl WebSocketConnection {
    /// `events` receives a [`ControlEvent::Reconnect`] whenever the link
    /// drops for a reason other than a normal or locally initiated close.
    pub fn new(
        settings: SdkSettings,
        events: Option<mpsc::UnboundedSender<ControlEvent>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            me: me.clone(),
            settings,
            state: Mutex::new(ConnectionState::Disconnected),
            link: RwLock::new(None),
            uri: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            events,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.link
            .read()
            .as_ref()
            .map(|l| l.is_usable())
            .unwrap_or(false)
    }

    pub fn last_uri(&self) -> Option<String> {
        self.uri.lock().clone()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    // ── Connect ──────────────────────────────────────────────────────

    /// Open a link to `uri`, retrying with the connect backoff.  On success
    /// traffic flips to the new link and any previous link is closed; on
    /// failure the previous link is left as it was.
    pub async fn connect(&self, uri: &str) -> Result<()> {
        tracing::info!(connection_id = self.id, "opening control-plane connection");
        *self.uri.lock() = Some(uri.to_string());
        self.set_state(ConnectionState::Connecting);

        let attempt = ConnectAttempt {
            conn: self,
            uri,
            connected: false,
            last_error: None,
        };
        let attempt = RetryingCallable::new(&self.settings.connect_backoff, attempt)
            .call()
            .await;

        if attempt.connected {
            tracing::info!(connection_id = self.id, "connected to control plane");
            return Ok(());
        }

        let restored = if self.is_connected() {
            ConnectionState::Open
        } else {
            ConnectionState::Disconnected
        };
        self.set_state(restored);
        let err = attempt
            .last_error
            .unwrap_or(GameLiftError::WebsocketConnectTimeout);
        tracing::error!(connection_id = self.id, error = %err, "control-plane connection failed");
        Err(err)
    }

    async fn open_link(&self, uri: &str) -> Result<Arc<Link>> {
        let handshake = tokio_tungstenite::connect_async(uri);
        let ws = match tokio::time::timeout(self.settings.connect_timeout, handshake).await {
            Err(_) => return Err(GameLiftError::WebsocketConnectTimeout),
            Ok(Err(e)) => return Err(classify_connect_error(e)),
            Ok(Ok((ws, _response))) => ws,
        };
        let (mut sink, stream) = ws.split();

        let (outbound_tx, mut outbound_rx) =
            mpsc::channel::<Frame>(self.settings.outbound_queue_depth.max(1));
        let link = Arc::new(Link {
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed) + 1,
            outbound: outbound_tx,
            closing: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            cancel: CancellationToken::new(),
        });

        // Writer task: drains the outbound queue into the socket.
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let is_close = frame.is_close();
                if let Err(e) = sink.send(frame).await {
                    tracing::debug!(error = %e, "websocket write failed");
                    break;
                }
                if is_close {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Reader task: decodes inbound frames until the link ends.
        tokio::spawn(read_loop(self.me.clone(), link.clone(), stream));

        Ok(link)
    }

    fn promote(&self, link: Arc<Link>) {
        let generation = link.generation;
        let previous = self.link.write().replace(link);
        self.set_state(ConnectionState::Open);
        if let Some(old) = previous {
            tracing::info!(
                connection_id = self.id,
                old_generation = old.generation,
                new_generation = generation,
                "transitioning traffic to new link"
            );
            old.close("Websocket client reconnecting");
        }
    }

    // ── Send ─────────────────────────────────────────────────────────

    /// Send `text` and wait for the response correlated by `request_id`.
    pub async fn send_message(&self, request_id: &str, text: String) -> HandlerOutcome {
        if request_id.is_empty() {
            tracing::error!("request has no request id, cannot send");
            return Err(GameLiftError::InternalService(
                "request has no request id".into(),
            ));
        }

        let rx = {
            let mut pending = self.pending.lock();
            if pending.contains_key(request_id) {
                tracing::error!(request_id = %request_id, "request already in flight");
                return Err(GameLiftError::BadRequest(format!(
                    "request {request_id} is already in flight"
                )));
            }
            let (tx, rx) = oneshot::channel();
            pending.insert(request_id.to_string(), tx);
            rx
        };

        let link = match self.wait_for_link().await {
            Ok(link) => link,
            Err(e) => {
                self.pending.lock().remove(request_id);
                return Err(e);
            }
        };

        if let Err(e) = link.outbound.try_send(Frame::Text(text)) {
            self.pending.lock().remove(request_id);
            return Err(match e {
                TrySendError::Full(_) => {
                    tracing::warn!(request_id = %request_id, "outbound queue full");
                    GameLiftError::WebsocketRetriableSendMessageFailure(
                        "outbound queue is full".into(),
                    )
                }
                TrySendError::Closed(_) => GameLiftError::WebsocketSendMessageFailure(
                    "connection writer has stopped".into(),
                ),
            });
        }

        match tokio::time::timeout(self.settings.service_call_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(GameLiftError::WebsocketRetriableSendMessageFailure(
                "response slot dropped".into(),
            )),
            Err(_) => {
                self.pending.lock().remove(request_id);
                let ms = self.settings.service_call_timeout.as_millis() as u64;
                tracing::error!(
                    request_id = %request_id,
                    timeout_ms = ms,
                    connected = self.is_connected(),
                    "response not received in time"
                );
                Err(GameLiftError::WebsocketRetriableSendMessageFailure(format!(
                    "no response within {ms} ms"
                )))
            }
        }
    }

    /// A usable link, waiting a bounded time for a reconnect in progress.
    async fn wait_for_link(&self) -> Result<Arc<Link>> {
        let mut waited = 0;
        loop {
            let current = self.link.read().clone();
            match current {
                Some(link) if link.is_usable() => return Ok(link),
                Some(_) => {}
                None if self.state() == ConnectionState::Connecting => {}
                None => {
                    tracing::warn!(connection_id = self.id, "websocket is not connected");
                    return Err(GameLiftError::WebsocketSendMessageFailure(
                        "websocket is not connected".into(),
                    ));
                }
            }
            waited += 1;
            if waited >= self.settings.wait_for_reconnect_attempts {
                tracing::warn!(connection_id = self.id, "gave up waiting for reconnect");
                return Err(GameLiftError::WebsocketSendMessageFailure(
                    "websocket is not connected".into(),
                ));
            }
            tracing::warn!(
                connection_id = self.id,
                attempt = waited,
                "websocket is not connected, waiting for reconnect"
            );
            tokio::time::sleep(self.settings.wait_for_reconnect_delay).await;
        }
    }

    // ── Receive ──────────────────────────────────────────────────────

    /// Associate `action` with a handler.  Last registration wins.
    pub fn register_handler(&self, action: &str, handler: EventHandler) {
        tracing::debug!(action = %action, "registering handler");
        self.handlers.write().insert(action.to_string(), handler);
    }

    pub(crate) fn on_message(&self, text: &str) {
        let envelope: ResponseEnvelope = match decode(text) {
            Ok(env) => env,
            Err(e) => {
                tracing::error!(error = %e, "failed to decode inbound frame");
                return;
            }
        };
        let action = envelope.action();
        let request_id = envelope.request_id();
        tracing::debug!(action = %action, request_id = %request_id, "inbound frame");

        let outcome = if !envelope.is_success() && !request_id.is_empty() {
            Err(GameLiftError::from_status(envelope.status_code, text))
        } else {
            let handler = self.handlers.read().get(action).cloned();
            match handler {
                Some(handler) => handler(text),
                None => Ok(ResponsePayload::Empty),
            }
        };

        if let Some(slot) = self.pending.lock().remove(request_id) {
            let _ = slot.send(outcome);
        }
    }

    fn on_link_closed(&self, link: &Link, remote_code: Option<CloseCode>) {
        let is_current = self
            .link
            .read()
            .as_ref()
            .map(|l| l.generation == link.generation)
            .unwrap_or(false);
        let intentional = link.closing.load(Ordering::SeqCst);
        let normal = matches!(remote_code, Some(CloseCode::Normal) | Some(CloseCode::Away));
        tracing::info!(
            connection_id = self.id,
            generation = link.generation,
            remote_code = ?remote_code,
            intentional,
            "control-plane link closed"
        );
        if !is_current {
            return;
        }
        self.set_state(ConnectionState::Disconnected);
        if intentional || normal {
            return;
        }

        let failed = self.fail_pending(GameLiftError::WebsocketRetriableSendMessageFailure(
            "connection lost".into(),
        ));
        tracing::warn!(
            connection_id = self.id,
            failed_requests = failed,
            "abnormal closure, requesting reconnect"
        );
        let uri = self.uri.lock().clone();
        if let (Some(events), Some(uri)) = (&self.events, uri) {
            let _ = events.send(ControlEvent::Reconnect {
                connection_id: self.id,
                uri,
            });
        }
    }

    /// Resolve every in-flight request with `err`.  Returns how many.
    fn fail_pending(&self, err: GameLiftError) -> usize {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        let count = drained.len();
        for (_, slot) in drained {
            let _ = slot.send(Err(err.clone()));
        }
        count
    }

    /// Number of requests waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    // ── Close ────────────────────────────────────────────────────────

    /// Close the current link with a going-away code.  Waiting senders get
    /// a retryable failure so they can move to a replacement connection.
    pub fn close(&self) {
        let link = self.link.write().take();
        if let Some(link) = link {
            tracing::info!(connection_id = self.id, "closing control-plane connection");
            self.set_state(ConnectionState::Closing);
            link.close("Websocket client closing");
        }
        self.set_state(ConnectionState::Disconnected);
        self.fail_pending(GameLiftError::WebsocketRetriableSendMessageFailure(
            "connection closed".into(),
        ));
    }
}

impl Drop for WebSocketConnection {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            link.close("Websocket client closing");
        }
    }
}

// ── Connect attempt ──────────────────────────────────────────────────

struct ConnectAttempt<'a> {
    conn: &'a WebSocketConnection,
    uri: &'a str,
    connected: bool,
    last_error: Option<GameLiftError>,
}

#[async_trait::async_trait]
impl Retryable for ConnectAttempt<'_> {
    async fn attempt(&mut self) -> bool {
        match self.conn.open_link(self.uri).await {
            Ok(link) => {
                self.conn.promote(link);
                self.connected = true;
                true
            }
            Err(e) => {
                tracing::warn!(connection_id = self.conn.id, error = %e, "connect attempt failed");
                // Malformed URL and rejected credentials are terminal.
                let fatal = matches!(
                    e,
                    GameLiftError::WebsocketConnectInvalidUrl(_)
                        | GameLiftError::WebsocketConnectForbidden
                );
                self.last_error = Some(e);
                fatal
            }
        }
    }
}

fn classify_connect_error(e: tungstenite::Error) -> GameLiftError {
    match e {
        tungstenite::Error::Http(resp) if resp.status().as_u16() == 403 => {
            GameLiftError::WebsocketConnectForbidden
        }
        tungstenite::Error::Http(resp) => GameLiftError::WebsocketConnectFailure(format!(
            "handshake rejected with HTTP {}",
            resp.status()
        )),
        tungstenite::Error::Url(e) => GameLiftError::WebsocketConnectInvalidUrl(e.to_string()),
        tungstenite::Error::HttpFormat(e) => {
            GameLiftError::WebsocketConnectInvalidUrl(e.to_string())
        }
        tungstenite::Error::Io(e) if e.kind() == std::io::ErrorKind::TimedOut => {
            GameLiftError::WebsocketConnectTimeout
        }
        other => GameLiftError::WebsocketConnectFailure(other.to_string()),
    }
}

// ── Reader ───────────────────────────────────────────────────────────

async fn read_loop(
    conn: Weak<WebSocketConnection>,
    link: Arc<Link>,
    mut stream: SplitStream<WsStream>,
) {
    let mut remote_code = None;
    loop {
        let next = tokio::select! {
            _ = link.cancel.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(Frame::Text(text))) => match conn.upgrade() {
                Some(conn) => conn.on_message(&text),
                None => break,
            },
            Some(Ok(Frame::Close(frame))) => {
                remote_code = frame.map(|f| f.code);
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(error = %e, "websocket read failed");
                break;
            }
            None => break,
        }
    }
    link.alive.store(false, Ordering::SeqCst);
    if let Some(conn) = conn.upgrade() {
        conn.on_link_closed(&link, remote_code);
    }
}
