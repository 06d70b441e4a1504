//! Connection manager for the persistent channel.
//!
//! The channel lifecycle is a single tagged state value with guarded
//! transitions:
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//! Connected -> Reconnecting -> Connected | Disconnected
//! ```
//!
//! A transport drop while `Connected` starts the one reconnection loop
//! (exponential backoff, capped delay, capped attempts); exhausting the cap
//! is terminal and reported once via the `connection_closed` event.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

use crate::protocol::{ClientCommand, ServerEvent};

#[derive(Debug, Error)]
pub enum ClientError {
    /// Invoke attempted while not connected and the bounded wait ran out.
    #[error("connection unavailable")]
    ConnectionUnavailable,

    #[error("transport error: {0}")]
    TransportError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// First retry delay; doubles per attempt.
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    /// Hard ceiling on how long `invoke` waits for the `Connected` state.
    pub invoke_wait: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 8,
            invoke_wait: Duration::from_secs(5),
        }
    }
}

/// Events observable through [`ChatClient::on`].
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Connected,
    Reconnecting,
    /// A `connect()` call failed at the transport; no automatic retry.
    ConnectionFailed { reason: String },
    /// The reconnection attempt cap was exhausted; terminal until the caller
    /// invokes `connect()` again.
    ConnectionClosed,
    Server(ServerEvent),
}

impl ChatEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ChatEvent::Connected => "connected",
            ChatEvent::Reconnecting => "reconnecting",
            ChatEvent::ConnectionFailed { .. } => "connection_failed",
            ChatEvent::ConnectionClosed => "connection_closed",
            ChatEvent::Server(event) => event.name(),
        }
    }
}

/// Duplex of text frames produced by a [`Transport`] connect. The connection
/// manager learns of a transport drop when `inbound` closes; dropping
/// `outbound` tears the transport down.
pub struct TransportLink {
    pub outbound: UnboundedSender<String>,
    pub inbound: UnboundedReceiver<String>,
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, url: &str, token: &str) -> Result<TransportLink, ClientError>;
}

/// Production transport over tokio-tungstenite. The bearer credential is
/// supplied as a query parameter on every connect.
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str, token: &str) -> Result<TransportLink, ClientError> {
        let request_url = format!("{url}?token={token}");
        let (ws, _) = connect_async(&request_url)
            .await
            .map_err(|e| ClientError::TransportError(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let (out_tx, mut out_rx) = unbounded_channel::<String>();
        let (in_tx, in_rx) = unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if sink.send(WsMessage::Text(frame.into())).await.is_err() {
                    break;
                }
            }
        });
        tokio::spawn(async move {
            while let Some(Ok(msg)) = stream.next().await {
                if let WsMessage::Text(txt) = msg {
                    if in_tx.send(txt.to_string()).is_err() {
                        break;
                    }
                }
            }
            // in_tx drops here; the pump observes the closed channel.
        });

        Ok(TransportLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

pub type HandlerId = u64;
type Handler = Arc<dyn Fn(&ChatEvent) + Send + Sync>;

struct ClientInner<T: Transport> {
    transport: T,
    url: String,
    token: String,
    policy: ReconnectPolicy,
    state_tx: watch::Sender<ConnectionState>,
    session: Mutex<Option<UnboundedSender<String>>>,
    handlers: Mutex<HashMap<String, Vec<(HandlerId, Handler)>>>,
    next_handler: AtomicU64,
    /// Session generation; stale pumps from displaced links must not trigger
    /// reconnection.
    epoch: AtomicU64,
}

/// Explicitly constructed, explicitly owned connection manager. Cheap to
/// clone; clones share the underlying channel.
pub struct ChatClient<T: Transport = WsTransport> {
    inner: Arc<ClientInner<T>>,
}

impl<T: Transport> Clone for ChatClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ChatClient<WsTransport> {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_transport(WsTransport, url, token, ReconnectPolicy::default())
    }
}

impl<T: Transport> ChatClient<T> {
    pub fn with_transport(
        transport: T,
        url: impl Into<String>,
        token: impl Into<String>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(ClientInner {
                transport,
                url: url.into(),
                token: token.into(),
                policy,
                state_tx,
                session: Mutex::new(None),
                handlers: Mutex::new(HashMap::new()),
                next_handler: AtomicU64::new(1),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Register a listener for a named event. Listener failures are isolated:
    /// a panicking listener never prevents the others from running.
    pub fn on(
        &self,
        event: &str,
        handler: impl Fn(&ChatEvent) + Send + Sync + 'static,
    ) -> HandlerId {
        let id = self.inner.next_handler.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .lock()
            .expect("handler registry poisoned")
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a listener by identity.
    pub fn off(&self, event: &str, id: HandlerId) {
        if let Some(list) = self
            .inner
            .handlers
            .lock()
            .expect("handler registry poisoned")
            .get_mut(event)
        {
            list.retain(|(handler_id, _)| *handler_id != id);
        }
    }

    /// Establish the channel. No-op unless currently `Disconnected`; a
    /// transport failure lands back in `Disconnected`, emits
    /// `connection_failed` and is not retried automatically.
    pub async fn connect(&self) -> Result<(), ClientError> {
        if !self
            .inner
            .try_transition(&[ConnectionState::Disconnected], ConnectionState::Connecting)
        {
            return Ok(());
        }
        match self.inner.transport.connect(&self.inner.url, &self.inner.token).await {
            Ok(link) => {
                ClientInner::install(&self.inner, link, ConnectionState::Connecting);
                Ok(())
            }
            Err(err) => {
                self.inner
                    .try_transition(&[ConnectionState::Connecting], ConnectionState::Disconnected);
                self.inner.emit(&ChatEvent::ConnectionFailed {
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Tear the channel down and stop any reconnection loop. Terminal until
    /// the next explicit `connect()`.
    pub fn disconnect(&self) {
        self.inner.state_tx.send_replace(ConnectionState::Disconnected);
        self.inner
            .session
            .lock()
            .expect("session lock poisoned")
            .take();
    }

    /// Send one operation over the channel. Waits (bounded, condition-based,
    /// no polling) for `Connected`, then fails fast: frames are never
    /// buffered for later delivery while disconnected.
    pub async fn invoke(&self, command: ClientCommand) -> Result<(), ClientError> {
        self.wait_connected().await?;
        let frame =
            serde_json::to_string(&command).map_err(|e| ClientError::TransportError(e.to_string()))?;
        let tx = self
            .inner
            .session
            .lock()
            .expect("session lock poisoned")
            .clone()
            .ok_or(ClientError::ConnectionUnavailable)?;
        tx.send(frame)
            .map_err(|_| ClientError::TransportError("channel send failed".into()))
    }

    async fn wait_connected(&self) -> Result<(), ClientError> {
        let mut rx = self.inner.state_tx.subscribe();
        let deadline = tokio::time::Instant::now() + self.inner.policy.invoke_wait;
        loop {
            match *rx.borrow_and_update() {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Disconnected => return Err(ClientError::ConnectionUnavailable),
                ConnectionState::Connecting | ConnectionState::Reconnecting => {}
            }
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .ok_or(ClientError::ConnectionUnavailable)?;
            match tokio::time::timeout(remaining, rx.changed()).await {
                Ok(Ok(())) => {}
                // Timed out, or the state channel is gone.
                _ => return Err(ClientError::ConnectionUnavailable),
            }
        }
    }
}

impl<T: Transport> ClientInner<T> {
    fn try_transition(&self, from: &[ConnectionState], to: ConnectionState) -> bool {
        let mut moved = false;
        self.state_tx.send_if_modified(|state| {
            if from.contains(state) {
                *state = to;
                moved = true;
                true
            } else {
                false
            }
        });
        moved
    }

    fn emit(&self, event: &ChatEvent) {
        let handlers: Vec<Handler> = {
            let guard = self.handlers.lock().expect("handler registry poisoned");
            guard
                .get(event.name())
                .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(event = event.name(), "event listener panicked");
            }
        }
    }

    /// Adopt a fresh transport link. Returns false when the guarded state
    /// transition lost (e.g. an explicit disconnect raced the connect).
    fn install(inner: &Arc<Self>, link: TransportLink, from: ConnectionState) -> bool {
        if !inner.try_transition(&[from], ConnectionState::Connected) {
            return false;
        }
        let epoch = inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        *inner.session.lock().expect("session lock poisoned") = Some(link.outbound);
        inner.emit(&ChatEvent::Connected);
        let pump_inner = Arc::clone(inner);
        tokio::spawn(async move { Self::pump(pump_inner, link.inbound, epoch).await });
        true
    }

    /// Reads server frames until the transport drops, then decides whether
    /// this drop starts reconnection. The guarded `Connected -> Reconnecting`
    /// transition is what makes a second concurrent loop impossible.
    async fn pump(inner: Arc<Self>, mut inbound: UnboundedReceiver<String>, my_epoch: u64) {
        while let Some(frame) = inbound.recv().await {
            match serde_json::from_str::<ServerEvent>(&frame) {
                Ok(event) => inner.emit(&ChatEvent::Server(event)),
                Err(_) => debug!("ignoring unrecognized frame"),
            }
        }

        if inner.epoch.load(Ordering::SeqCst) != my_epoch {
            // A newer session displaced this one.
            return;
        }
        inner.session.lock().expect("session lock poisoned").take();
        if inner.try_transition(&[ConnectionState::Connected], ConnectionState::Reconnecting) {
            inner.emit(&ChatEvent::Reconnecting);
            let loop_inner = Arc::clone(&inner);
            tokio::spawn(async move { Self::reconnect_loop(loop_inner).await });
        }
    }

    async fn reconnect_loop(inner: Arc<Self>) {
        let policy = inner.policy;
        let mut delay = policy.base_delay;
        for attempt in 1..=policy.max_attempts {
            tokio::time::sleep(delay).await;
            if *inner.state_tx.borrow() != ConnectionState::Reconnecting {
                // Explicit disconnect while waiting.
                return;
            }
            match inner.transport.connect(&inner.url, &inner.token).await {
                Ok(link) => {
                    Self::install(&inner, link, ConnectionState::Reconnecting);
                    return;
                }
                Err(err) => {
                    // Silent until the cap; the caller sees only the terminal event.
                    debug!(attempt, error = %err, "reconnect attempt failed");
                    delay = (delay * 2).min(policy.max_delay);
                }
            }
        }
        if inner.try_transition(&[ConnectionState::Reconnecting], ConnectionState::Disconnected) {
            inner.emit(&ChatEvent::ConnectionClosed);
        }
    }
}
