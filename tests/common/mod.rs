//! Shared harness: a real server on an ephemeral port over in-memory
//! backends, plus token and channel helpers.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use playnet_messaging::config::Config;
use playnet_messaging::middleware::auth::issue_token;
use playnet_messaging::protocol::{ClientCommand, ServerEvent};
use playnet_messaging::routes::build_router;
use playnet_messaging::services::{MemoryRelationships, RelationshipStore};
use playnet_messaging::state::AppState;
use playnet_messaging::store::{MemoryMessageStore, MessageStore};

pub type WsConn = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestApp {
    pub addr: SocketAddr,
    /// Concrete handle kept alongside the trait object so tests can inspect
    /// raw (soft-deleted included) rows.
    pub store: Arc<MemoryMessageStore>,
    pub relationships: Arc<MemoryRelationships>,
    pub config: Arc<Config>,
}

pub async fn spawn_app() -> TestApp {
    let config = Arc::new(Config::test_defaults());
    let store = Arc::new(MemoryMessageStore::new());
    let relationships = Arc::new(MemoryRelationships::new());
    let state = AppState::new(
        Arc::clone(&store) as Arc<dyn MessageStore>,
        Arc::clone(&relationships) as Arc<dyn RelationshipStore>,
        Arc::clone(&config),
    );
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let router = build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server crashed");
    });
    TestApp {
        addr,
        store,
        relationships,
        config,
    }
}

impl TestApp {
    pub fn token_for(&self, user: Uuid, nickname: &str) -> String {
        issue_token(user, nickname, &self.config.jwt_secret, 3600).expect("issue token")
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub async fn connect_ws(&self, token: &str) -> WsConn {
        let (ws, _) = connect_async(format!("{}?token={token}", self.ws_url()))
            .await
            .expect("channel connect");
        ws
    }
}

pub async fn send_command(ws: &mut WsConn, cmd: &ClientCommand) {
    let frame = serde_json::to_string(cmd).expect("serialize command");
    ws.send(WsMessage::Text(frame.into()))
        .await
        .expect("send command frame");
}

/// Next server event, bounded. Panics on timeout so a hung test fails loudly.
pub async fn recv_event(ws: &mut WsConn) -> ServerEvent {
    loop {
        let msg = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a server event")
            .expect("channel closed")
            .expect("transport error");
        if let WsMessage::Text(txt) = msg {
            return serde_json::from_str(&txt).expect("unparseable server event");
        }
    }
}

/// Skip unrelated events (typically presence churn) until `name` arrives.
pub async fn recv_named(ws: &mut WsConn, name: &str) -> ServerEvent {
    for _ in 0..10 {
        let event = recv_event(ws).await;
        if event.name() == name {
            return event;
        }
    }
    panic!("event {name:?} never arrived");
}

/// Round-trip a command so the server-side session loop is known to be
/// registered before the test relies on broadcasts reaching it.
pub async fn sync_session(ws: &mut WsConn) {
    send_command(ws, &ClientCommand::GetOnlineFriends).await;
    recv_named(ws, "online_friends").await;
}

/// Assert that nothing arrives on the channel within `wait`.
pub async fn assert_silent(ws: &mut WsConn, wait: Duration) {
    if let Ok(Some(Ok(WsMessage::Text(txt)))) = timeout(wait, ws.next()).await {
        panic!("expected silence, got frame: {txt}");
    }
}
