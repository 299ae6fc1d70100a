//! Public Feed Session
//!
//! Market data over the unauthenticated feed: method-coded subscribe and
//! unsubscribe requests with incrementing IDs, a periodic ping, and
//! broadcast fan-out of channel data. Channel frames arrive either as
//! top-level `{channel, data}` or nested under a `result` envelope; the
//! shared decoder accepts both. Every disconnect is retryable; the public
//! supervisor runs with an unbounded attempt budget.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;

use crate::application::session::frames::{self, DisconnectClass, Inbound, MethodRequest};
use crate::application::session::private_session::ConnState;
use crate::application::session::supervisor::Reconnectable;
use crate::domain::errors::SessionError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct PublicConfig {
    pub url: String,
    pub ping_interval: Duration,
    pub outbound_queue: usize,
    /// Capacity of the broadcast channel consumers subscribe to. Fan-out
    /// is best effort; slow consumers lag and skip.
    pub broadcast_capacity: usize,
}

impl PublicConfig {
    pub fn new(url: impl Into<String>) -> Self {
        PublicConfig {
            url: url.into(),
            ping_interval: Duration::from_secs(30),
            outbound_queue: 64,
            broadcast_capacity: 256,
        }
    }
}

/// One frame of channel data from the public feed.
#[derive(Debug, Clone)]
pub struct MarketEvent {
    pub channel: String,
    pub data: Value,
}

struct ConnHandles {
    outbound: mpsc::Sender<Message>,
    read: JoinHandle<()>,
    ping: JoinHandle<()>,
}

pub struct PublicSession {
    config: PublicConfig,
    events_tx: broadcast::Sender<MarketEvent>,
    state_tx: watch::Sender<ConnState>,
    next_id: AtomicU64,
    /// Channels that should be (re)subscribed on every connection.
    channels: Mutex<HashSet<String>>,
    conn: Mutex<Option<ConnHandles>>,
    disconnects_tx: mpsc::UnboundedSender<DisconnectClass>,
}

impl PublicSession {
    pub fn new(config: PublicConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<DisconnectClass>) {
        let (events_tx, _) = broadcast::channel(config.broadcast_capacity);
        let (state_tx, _) = watch::channel(ConnState::Disconnected);
        let (disconnects_tx, disconnects_rx) = mpsc::unbounded_channel();
        let session = Arc::new(PublicSession {
            config,
            events_tx,
            state_tx,
            next_id: AtomicU64::new(1),
            channels: Mutex::new(HashSet::new()),
            conn: Mutex::new(None),
            disconnects_tx,
        });
        (session, disconnects_rx)
    }

    pub fn state(&self) -> ConnState {
        *self.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        !matches!(self.state(), ConnState::Disconnected | ConnState::Closing)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<MarketEvent> {
        self.events_tx.subscribe()
    }

    pub async fn connect(self: &Arc<Self>) -> Result<(), SessionError> {
        let mut conn = self.conn.lock().await;
        if conn.is_some() {
            return Err(SessionError::AlreadyConnected);
        }
        self.state_tx.send_replace(ConnState::Connecting);

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
        tokio::spawn(Self::write_loop(Arc::clone(self), sink, out_rx));

        // replay the desired channel set on the fresh connection
        for channel in self.channels.lock().await.iter() {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            Self::enqueue(&out_tx, encode_frame(&MethodRequest::subscribe(channel, id))?).await?;
        }

        let read = tokio::spawn(Self::read_loop(Arc::clone(self), stream));
        let ping = tokio::spawn(Self::ping_loop(Arc::clone(self), out_tx.clone()));

        *conn = Some(ConnHandles {
            outbound: out_tx,
            read,
            ping,
        });
        self.state_tx.send_replace(ConnState::Active);
        info!(url = %self.config.url, "public session connected");
        Ok(())
    }

    /// Track the channel and subscribe now when connected. The channel is
    /// replayed automatically after every reconnect.
    pub async fn subscribe(&self, channel: &str) -> Result<(), SessionError> {
        self.channels.lock().await.insert(channel.to_string());
        if let Some(handles) = self.conn.lock().await.as_ref() {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            Self::enqueue(
                &handles.outbound,
                encode_frame(&MethodRequest::subscribe(channel, id))?,
            )
            .await?;
        }
        Ok(())
    }

    pub async fn unsubscribe(&self, channel: &str) -> Result<(), SessionError> {
        self.channels.lock().await.remove(channel);
        if let Some(handles) = self.conn.lock().await.as_ref() {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            Self::enqueue(
                &handles.outbound,
                encode_frame(&MethodRequest::unsubscribe(channel, id))?,
            )
            .await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        let mut conn = self.conn.lock().await;
        let Some(handles) = conn.take() else { return };
        drop(conn);
        self.state_tx.send_replace(ConnState::Closing);
        handles.ping.abort();
        handles.read.abort();
        drop(handles.outbound);
        self.state_tx.send_replace(ConnState::Disconnected);
        info!("public session closed");
    }

    async fn finish(&self, class: DisconnectClass) {
        let mut conn = self.conn.lock().await;
        let Some(handles) = conn.take() else { return };
        drop(conn);
        handles.ping.abort();
        handles.read.abort();
        drop(handles.outbound);
        self.state_tx.send_replace(ConnState::Disconnected);
        info!(?class, "public session disconnected");
        if self.disconnects_tx.send(class).is_err() {
            debug!("no supervisor listening; disconnect class dropped");
        }
    }

    async fn enqueue(outbound: &mpsc::Sender<Message>, frame: String) -> Result<(), SessionError> {
        outbound
            .send(Message::Text(frame))
            .await
            .map_err(|_| SessionError::Transport("outbound queue closed".to_string()))
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
        let _ = sink.send(Message::Close(None)).await;
    }

    async fn read_loop(session: Arc<Self>, mut stream: SplitStream<WsStream>) {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => session.handle_text(&text),
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code)).unwrap_or(1005);
                    debug!(code, "server closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "read failed");
                    break;
                }
                None => break,
            }
        }
        // the public feed carries no credentials; every disconnect retries
        session.finish(DisconnectClass::Retryable).await;
    }

    fn handle_text(&self, text: &str) {
        match frames::decode(text) {
            Ok(Inbound::Push { channel, data }) => {
                // best-effort fan-out; no receivers is fine
                let _ = self.events_tx.send(MarketEvent { channel, data });
            }
            Ok(Inbound::Reply { id, error, .. }) => {
                if let Some(err) = error {
                    debug!(id, code = err.code, message = %err.message, "request rejected");
                }
            }
            Ok(Inbound::Unknown) => debug!("unrecognized frame dropped"),
            Err(e) => debug!(error = %e, "undecodable frame dropped"),
        }
    }

    async fn ping_loop(session: Arc<Self>, outbound: mpsc::Sender<Message>) {
        let mut ticker = tokio::time::interval(session.config.ping_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let id = session.next_id.fetch_add(1, Ordering::Relaxed);
            let frame = match encode_frame(&MethodRequest::ping(id)) {
                Ok(frame) => frame,
                Err(_) => return,
            };
            if outbound.send(Message::Text(frame)).await.is_err() {
                return;
            }
        }
    }
}

fn encode_frame<T: serde::Serialize>(frame: &T) -> Result<String, SessionError> {
    serde_json::to_string(frame).map_err(|e| SessionError::Protocol(e.to_string()))
}

#[async_trait]
impl Reconnectable for Arc<PublicSession> {
    async fn reconnect(&self) -> Result<(), SessionError> {
        PublicSession::connect(self).await
    }

    fn is_connected(&self) -> bool {
        PublicSession::is_connected(self)
    }
}
