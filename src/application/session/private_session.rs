//! Private Feed Session
//!
//! One physical connection to the authenticated feed. `connect` obtains a
//! fresh token, performs the transport handshake and spawns three loops:
//! a single writer draining the bounded outbound queue, the reader (the
//! only decoder) and a heartbeat. The authenticate and subscribe frames go
//! out immediately, without waiting for each other's acknowledgment;
//! failures are caught asynchronously by the reader.
//!
//! When the connection dies, the close reason is classified into exactly
//! one of: authentication failure (terminal, no reconnect until the
//! operator resets it), stale session (routine, retry with a fresh token)
//! or unclassified transport error (retry). The class is reported on the
//! disconnect channel the supervisor consumes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::application::dispatcher::PushHandler;
use crate::application::session::frames::{
    self, ConnectRequest, DisconnectClass, Inbound, SubscribeRequest, ERR_TOKEN_EXPIRED,
};
use crate::application::session::supervisor::Reconnectable;
use crate::domain::errors::SessionError;
use crate::domain::repositories::exchange_rest::ExchangeRest;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection lifecycle as observed through [`PrivateSession::subscribe_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Authenticating,
    Subscribing,
    Active,
    Closing,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub url: String,
    pub channel: String,
    pub heartbeat_interval: Duration,
    /// Depth of the outbound queue the writer loop drains.
    pub outbound_queue: usize,
}

impl SessionConfig {
    pub fn new(url: impl Into<String>, channel: impl Into<String>) -> Self {
        SessionConfig {
            url: url.into(),
            channel: channel.into(),
            heartbeat_interval: Duration::from_secs(25),
            outbound_queue: 64,
        }
    }
}

#[derive(Debug, Default)]
struct HandshakeState {
    auth: Option<bool>,
    sub: Option<bool>,
    error: Option<SessionError>,
}

struct ConnHandles {
    outbound: mpsc::Sender<Message>,
    read: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

pub struct PrivateSession {
    config: SessionConfig,
    rest: Arc<dyn ExchangeRest>,
    handler: Arc<dyn PushHandler>,
    state_tx: watch::Sender<ConnState>,
    auth_failed: AtomicBool,
    next_id: AtomicU64,
    /// Connection-state lock; owns the socket handles and write queue.
    conn: Mutex<Option<ConnHandles>>,
    handshake_tx: watch::Sender<HandshakeState>,
    disconnects_tx: mpsc::UnboundedSender<DisconnectClass>,
}

impl PrivateSession {
    /// Returns the session and the disconnect-class channel its
    /// supervisor consumes.
    pub fn new(
        config: SessionConfig,
        rest: Arc<dyn ExchangeRest>,
        handler: Arc<dyn PushHandler>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<DisconnectClass>) {
        let (state_tx, _) = watch::channel(ConnState::Disconnected);
        let (handshake_tx, _) = watch::channel(HandshakeState::default());
        let (disconnects_tx, disconnects_rx) = mpsc::unbounded_channel();
        let session = Arc::new(PrivateSession {
            config,
            rest,
            handler,
            state_tx,
            auth_failed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            conn: Mutex::new(None),
            handshake_tx,
            disconnects_tx,
        });
        (session, disconnects_rx)
    }

    pub fn state(&self) -> ConnState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnState> {
        self.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        !matches!(self.state(), ConnState::Disconnected | ConnState::Closing)
    }

    pub fn auth_failed(&self) -> bool {
        self.auth_failed.load(Ordering::SeqCst)
    }

    /// Clear the terminal auth-failure mark after credentials were fixed.
    pub fn reset_auth(&self) {
        self.auth_failed.store(false, Ordering::SeqCst);
    }

    /// Establish the connection and start the worker loops. Fails if a
    /// connection already exists, if no token can be obtained, or if the
    /// transport handshake fails.
    pub async fn connect(self: &Arc<Self>) -> Result<(), SessionError> {
        let mut conn = self.conn.lock().await;
        if conn.is_some() {
            return Err(SessionError::AlreadyConnected);
        }
        self.state_tx.send_replace(ConnState::Connecting);

        let token = match self.rest.generate_token().await {
            Ok(token) => token,
            Err(e) => {
                self.state_tx.send_replace(ConnState::Disconnected);
                return Err(SessionError::TokenUnavailable(e.to_string()));
            }
        };
        let url = Url::parse(&self.config.url).map_err(|e| {
            self.state_tx.send_replace(ConnState::Disconnected);
            SessionError::Transport(format!("invalid url: {}", e))
        })?;

        let (ws, _) = match connect_async(url.as_str()).await {
            Ok(ok) => ok,
            Err(e) => {
                self.state_tx.send_replace(ConnState::Disconnected);
                return Err(SessionError::Transport(e.to_string()));
            }
        };
        let (sink, stream) = ws.split();
        let (out_tx, out_rx) = mpsc::channel(self.config.outbound_queue);

        self.handshake_tx.send_replace(HandshakeState::default());
        let auth_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let sub_id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.state_tx.send_replace(ConnState::Authenticating);
        // Authenticate and subscribe go out back to back; waiting for the
        // auth ack before subscribing would cost a round trip and the
        // server rejects a premature subscribe with a correlated error we
        // catch in the reader anyway.
        Self::enqueue(&out_tx, encode_frame(&ConnectRequest::new(token, auth_id))?).await?;
        Self::enqueue(&out_tx, encode_frame(&SubscribeRequest::new(&self.config.channel, sub_id))?)
            .await?;

        tokio::spawn(Self::write_loop(Arc::clone(self), sink, out_rx));
        let read = tokio::spawn(Self::read_loop(Arc::clone(self), stream, auth_id, sub_id));
        let heartbeat = tokio::spawn(Self::heartbeat_loop(Arc::clone(self), out_tx.clone()));

        *conn = Some(ConnHandles {
            outbound: out_tx,
            read,
            heartbeat,
        });
        info!(url = %self.config.url, channel = %self.config.channel, "private session connected");
        Ok(())
    }

    async fn enqueue(outbound: &mpsc::Sender<Message>, frame: String) -> Result<(), SessionError> {
        outbound
            .send(Message::Text(frame))
            .await
            .map_err(|_| SessionError::Transport("outbound queue closed".to_string()))
    }

    /// Block until both the authentication and subscription acks have been
    /// observed, or until `timeout`. Never re-issues frames.
    pub async fn wait_for_handshake(&self, timeout: Duration) -> Result<(), SessionError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut handshake = self.handshake_tx.subscribe();
        let mut state = self.state_tx.subscribe();
        loop {
            {
                let hs = handshake.borrow_and_update();
                if hs.auth == Some(false) || hs.sub == Some(false) {
                    return Err(hs
                        .error
                        .clone()
                        .unwrap_or_else(|| SessionError::Protocol("handshake rejected".to_string())));
                }
                if hs.auth == Some(true) && hs.sub == Some(true) {
                    return Ok(());
                }
            }
            if *state.borrow_and_update() == ConnState::Disconnected {
                return Err(SessionError::Transport(
                    "connection closed during handshake".to_string(),
                ));
            }
            tokio::select! {
                changed = handshake.changed() => {
                    if changed.is_err() {
                        return Err(SessionError::Transport("session dropped".to_string()));
                    }
                }
                _ = state.changed() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(SessionError::HandshakeTimeout(timeout));
                }
            }
        }
    }

    /// Idempotent teardown; safe to call concurrently from any task. Does
    /// not report a disconnect class, so no reconnection follows.
    pub async fn close(&self) {
        let mut conn = self.conn.lock().await;
        let Some(handles) = conn.take() else { return };
        drop(conn);
        self.state_tx.send_replace(ConnState::Closing);
        handles.heartbeat.abort();
        handles.read.abort();
        // The writer drains what is queued, sends a close frame and exits.
        drop(handles.outbound);
        self.state_tx.send_replace(ConnState::Disconnected);
        info!("private session closed");
    }

    /// Teardown on a dead connection; reports the class to the supervisor.
    /// Whichever loop observes the failure first wins, the other finds the
    /// handles already taken.
    async fn finish(&self, class: DisconnectClass) {
        let mut conn = self.conn.lock().await;
        let Some(handles) = conn.take() else { return };
        drop(conn);
        handles.heartbeat.abort();
        handles.read.abort();
        drop(handles.outbound);
        self.state_tx.send_replace(ConnState::Disconnected);
        info!(?class, "private session disconnected");
        if self.disconnects_tx.send(class).is_err() {
            debug!("no supervisor listening; disconnect class dropped");
        }
    }

    async fn write_loop(
        session: Arc<Self>,
        mut sink: SplitSink<WsStream, Message>,
        mut outbound: mpsc::Receiver<Message>,
    ) {
        while let Some(message) = outbound.recv().await {
            if let Err(e) = sink.send(message).await {
                debug!(error = %e, "write failed");
                session.finish(DisconnectClass::Retryable).await;
                return;
            }
        }
        // Queue closed by teardown; best-effort goodbye to the server.
        let _ = sink.send(Message::Close(None)).await;
    }

    async fn read_loop(
        session: Arc<Self>,
        mut stream: SplitStream<WsStream>,
        auth_id: u64,
        sub_id: u64,
    ) {
        let class = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let Some(class) = session.handle_text(&text, auth_id, sub_id).await {
                        break class;
                    }
                }
                // tungstenite queues the pong; it goes out with the next write
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code)).unwrap_or(1005);
                    debug!(code, "server closed the connection");
                    break frames::classify_close(code);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "read failed");
                    break DisconnectClass::Retryable;
                }
                None => break DisconnectClass::Retryable,
            }
        };
        if class == DisconnectClass::AuthFailure {
            session.auth_failed.store(true, Ordering::SeqCst);
        }
        session.finish(class).await;
    }

    /// Route one text frame. Returns the disconnect class when the frame
    /// ends the connection.
    async fn handle_text(
        &self,
        text: &str,
        auth_id: u64,
        sub_id: u64,
    ) -> Option<DisconnectClass> {
        match frames::decode(text) {
            Ok(Inbound::Reply { id, error, connect, .. }) if id == auth_id => match error {
                // a successful auth reply carries the connect object
                None if connect.is_some() => {
                    self.record_auth_ack(true, None);
                    None
                }
                None => {
                    warn!("auth reply without error or connect object; ignoring");
                    None
                }
                Some(err) if err.code == ERR_TOKEN_EXPIRED => {
                    warn!("connection token expired; reconnecting with a fresh one");
                    self.record_auth_ack(false, Some(SessionError::Stale));
                    Some(DisconnectClass::Stale)
                }
                Some(err) => {
                    error!(
                        code = err.code,
                        message = %err.message,
                        "authentication rejected; check credentials"
                    );
                    self.record_auth_ack(
                        false,
                        Some(SessionError::Authentication {
                            code: err.code,
                            message: err.message,
                        }),
                    );
                    Some(DisconnectClass::AuthFailure)
                }
            },
            Ok(Inbound::Reply { id, error, .. }) if id == sub_id => {
                match error {
                    None => self.record_sub_ack(true, None),
                    Some(err) => {
                        warn!(code = err.code, message = %err.message, "subscription rejected");
                        self.record_sub_ack(
                            false,
                            Some(SessionError::Protocol(format!(
                                "subscribe rejected (code {}): {}",
                                err.code, err.message
                            ))),
                        );
                    }
                }
                None
            }
            // reply to a request this connection never made
            Ok(Inbound::Reply { id, .. }) => {
                debug!(id, "uncorrelated reply dropped");
                None
            }
            Ok(Inbound::Push { channel, data }) => {
                self.handler.handle_push(&channel, data).await;
                None
            }
            Ok(Inbound::Unknown) => {
                debug!("unrecognized frame dropped");
                None
            }
            Err(e) => {
                debug!(error = %e, "undecodable frame dropped");
                None
            }
        }
    }

    fn record_auth_ack(&self, ok: bool, error: Option<SessionError>) {
        self.handshake_tx.send_modify(|hs| {
            hs.auth = Some(ok);
            if let Some(e) = error {
                hs.error = Some(e);
            }
        });
        let next = {
            let hs = self.handshake_tx.borrow();
            handshake_state(hs.auth, hs.sub)
        };
        if let Some(next) = next {
            self.advance_state(next);
        }
    }

    fn record_sub_ack(&self, ok: bool, error: Option<SessionError>) {
        self.handshake_tx.send_modify(|hs| {
            hs.sub = Some(ok);
            if let Some(e) = error {
                hs.error = Some(e);
            }
        });
        let next = {
            let hs = self.handshake_tx.borrow();
            handshake_state(hs.auth, hs.sub)
        };
        if let Some(next) = next {
            self.advance_state(next);
        }
    }

    /// Advance the handshake states only; never clobbers a concurrent
    /// close's Disconnected.
    fn advance_state(&self, next: ConnState) {
        self.state_tx.send_if_modified(|current| {
            if matches!(current, ConnState::Authenticating | ConnState::Subscribing)
                && *current != next
            {
                *current = next;
                true
            } else {
                false
            }
        });
    }

    async fn heartbeat_loop(session: Arc<Self>, outbound: mpsc::Sender<Message>) {
        let mut ticker = tokio::time::interval(session.config.heartbeat_interval);
        ticker.tick().await; // the first tick is immediate
        loop {
            ticker.tick().await;
            if outbound.send(Message::Ping(Vec::new())).await.is_err() {
                return;
            }
        }
    }
}

fn handshake_state(auth: Option<bool>, sub: Option<bool>) -> Option<ConnState> {
    match (auth, sub) {
        (Some(true), Some(true)) => Some(ConnState::Active),
        (Some(true), _) => Some(ConnState::Subscribing),
        _ => None,
    }
}

fn encode_frame<T: serde::Serialize>(frame: &T) -> Result<String, SessionError> {
    serde_json::to_string(frame).map_err(|e| SessionError::Protocol(e.to_string()))
}

#[async_trait]
impl Reconnectable for Arc<PrivateSession> {
    async fn reconnect(&self) -> Result<(), SessionError> {
        PrivateSession::connect(self).await
    }

    fn is_connected(&self) -> bool {
        PrivateSession::is_connected(self)
    }

    fn auth_failed(&self) -> bool {
        PrivateSession::auth_failed(self)
    }
}
