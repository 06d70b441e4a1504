//! Wire protocol of the persistent channel. Both the server-side socket loop
//! and the client-side connection manager speak these frames as JSON text
//! messages tagged by `type`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{MediaDescriptor, Message};

/// Client-to-server operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    SendTextMessage {
        receiver_id: Uuid,
        content: String,
        /// Client-assigned correlation id, echoed back in `message_sent` so
        /// the cache synchronizer can replace its optimistic entry.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_ref: Option<Uuid>,
    },
    SendMediaMessage {
        receiver_id: Uuid,
        descriptor: MediaDescriptor,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_ref: Option<Uuid>,
    },
    StartTyping {
        receiver_id: Uuid,
    },
    StopTyping {
        receiver_id: Uuid,
    },
    JoinConversation {
        friend_id: Uuid,
    },
    LeaveConversation {
        friend_id: Uuid,
    },
    GetOnlineFriends,
}

/// Server-to-client events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A message pushed to its receiver while connected.
    ReceiveMessage { message: Message },
    /// Echo of a successful send to the sender's own session.
    MessageSent {
        message: Message,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_ref: Option<Uuid>,
    },
    TypingIndicator {
        user_id: Uuid,
        user_nickname: String,
        is_typing: bool,
    },
    OnlineFriends { user_ids: Vec<Uuid> },
    UserStatusChanged { user_id: Uuid, is_online: bool },
    Error { message: String },
}

impl ServerEvent {
    /// Event name as used by the client-side observer registry; matches the
    /// serialized `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::ReceiveMessage { .. } => "receive_message",
            ServerEvent::MessageSent { .. } => "message_sent",
            ServerEvent::TypingIndicator { .. } => "typing_indicator",
            ServerEvent::OnlineFriends { .. } => "online_friends",
            ServerEvent::UserStatusChanged { .. } => "user_status_changed",
            ServerEvent::Error { .. } => "error",
        }
    }
}
