use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::Message;

/// One row of a user's conversation list. Derived from the message store on
/// demand, never persisted. Read receipts have no backing store in this
/// system, so no unread count is exposed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub counterpart_id: Uuid,
    pub last_message: Message,
    pub last_activity: DateTime<Utc>,
}

/// Ephemeral online state for one user. Lives only in the presence tracker of
/// the running process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Presence {
    pub user_id: Uuid,
    pub is_online: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
}
