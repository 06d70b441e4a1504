use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::middleware::auth::{verify_token, AuthUser};
use crate::protocol::{ClientCommand, ServerEvent};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// The bearer credential is resupplied on every (re)connect, either as a
/// query parameter or an Authorization header.
fn authenticate(state: &AppState, params: &WsParams, headers: &HeaderMap) -> Option<AuthUser> {
    let token = params.token.clone().or_else(|| {
        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(|s| s.to_string())
    })?;
    verify_token(&token, &state.config.jwt_secret).ok()
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let Some(user) = authenticate(&state, &params, &headers) else {
        warn!("channel upgrade rejected: missing or invalid credential");
        return StatusCode::UNAUTHORIZED.into_response();
    };
    ws.on_upgrade(move |socket| handle_socket(state, user, socket))
}

async fn handle_socket(state: AppState, user: AuthUser, socket: WebSocket) {
    let user_id = user.id;
    let (session_id, mut rx) = state.registry.register(user_id).await;
    if state.presence.mark_online(user_id).await {
        state.gateway.broadcast_presence(user_id, true).await;
    }
    info!(%user_id, %session_id, "channel session opened");

    let (mut sink, mut stream) = socket.split();
    // Which conversation the session currently has open; maintained for the
    // client's join/leave bookkeeping.
    let mut active_peer: Option<Uuid> = None;

    loop {
        tokio::select! {
            pushed = rx.recv() => {
                match pushed {
                    Some(event) => {
                        let frame = match serde_json::to_string(&event) {
                            Ok(frame) => frame,
                            Err(err) => {
                                warn!(%user_id, error = %err, "dropping unserializable event");
                                continue;
                            }
                        };
                        if sink.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    // Channel closed: this session was displaced by a newer one.
                    None => break,
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(frame))) => {
                        match serde_json::from_str::<ClientCommand>(&frame) {
                            Ok(cmd) => {
                                handle_command(&state, &user, &mut active_peer, cmd).await;
                            }
                            Err(_) => {
                                state
                                    .registry
                                    .push(user_id, ServerEvent::Error {
                                        message: "malformed command".into(),
                                    })
                                    .await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Ping/pong are answered by the framework.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    // A displaced session must not tear down its successor's presence.
    if state.registry.deregister(user_id, session_id).await {
        if state.presence.mark_offline(user_id).await {
            state.gateway.broadcast_presence(user_id, false).await;
        }
    }
    info!(%user_id, %session_id, "channel session closed");
}

/// Dispatch one inbound command. Gateway failures surface as `Error` events
/// on the caller's own session and are never retried server-side.
async fn handle_command(
    state: &AppState,
    user: &AuthUser,
    active_peer: &mut Option<Uuid>,
    cmd: ClientCommand,
) {
    let user_id = user.id;
    match cmd {
        ClientCommand::SendTextMessage {
            receiver_id,
            content,
            client_ref,
        } => match state.gateway.send_text(user_id, receiver_id, content).await {
            Ok(message) => {
                state
                    .registry
                    .push(user_id, ServerEvent::MessageSent { message, client_ref })
                    .await;
            }
            Err(err) => {
                warn!(%user_id, %receiver_id, error = %err, "send_text rejected");
                state
                    .registry
                    .push(user_id, ServerEvent::Error {
                        message: err.public_message(),
                    })
                    .await;
            }
        },
        ClientCommand::SendMediaMessage {
            receiver_id,
            descriptor,
            client_ref,
        } => match state
            .gateway
            .send_media(user_id, receiver_id, descriptor)
            .await
        {
            Ok(message) => {
                state
                    .registry
                    .push(user_id, ServerEvent::MessageSent { message, client_ref })
                    .await;
            }
            Err(err) => {
                warn!(%user_id, %receiver_id, error = %err, "send_media rejected");
                state
                    .registry
                    .push(user_id, ServerEvent::Error {
                        message: err.public_message(),
                    })
                    .await;
            }
        },
        ClientCommand::StartTyping { receiver_id } => {
            state
                .gateway
                .typing(user_id, &user.nickname, receiver_id, true)
                .await;
        }
        ClientCommand::StopTyping { receiver_id } => {
            state
                .gateway
                .typing(user_id, &user.nickname, receiver_id, false)
                .await;
        }
        ClientCommand::JoinConversation { friend_id } => {
            *active_peer = Some(friend_id);
            // Joining answers with a presence snapshot; the client listens
            // for user_status_changed to stay current afterwards. The
            // snapshot is friend-scoped: joins by non-friends get silence,
            // like typing, so the command cannot probe presence state.
            if let Ok(presence) = state.gateway.friend_presence(user_id, friend_id).await {
                state
                    .registry
                    .push(user_id, ServerEvent::UserStatusChanged {
                        user_id: friend_id,
                        is_online: presence.is_online,
                    })
                    .await;
            }
        }
        ClientCommand::LeaveConversation { friend_id } => {
            if *active_peer == Some(friend_id) {
                *active_peer = None;
            }
        }
        ClientCommand::GetOnlineFriends => match state.gateway.online_friends(user_id).await {
            Ok(user_ids) => {
                state
                    .registry
                    .push(user_id, ServerEvent::OnlineFriends { user_ids })
                    .await;
            }
            Err(err) => {
                state
                    .registry
                    .push(user_id, ServerEvent::Error {
                        message: err.public_message(),
                    })
                    .await;
            }
        },
    }
}
