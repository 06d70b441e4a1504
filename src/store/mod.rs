//! Message Store: durable persistence of messages and attachments, plus the
//! conversation aggregation query derived from them.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{ConversationEntry, Message, NewMessage};

pub mod memory;
pub mod postgres;

pub use memory::MemoryMessageStore;
pub use postgres::PgMessageStore;

/// Storage seam between the gateway/REST surface and the backing database.
///
/// Pagination is offset-based throughout (`page` is 1-based). Concurrent
/// inserts between page fetches can skip or duplicate rows across pages;
/// that is accepted behavior, not corrected with cursors.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message with a server-assigned id and `created_at`. Media
    /// messages persist their attachment row atomically with the message.
    async fn create(&self, new: NewMessage) -> AppResult<Message>;

    /// Fetch a single message, excluding soft-deleted rows.
    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Message>>;

    /// Non-deleted messages between the pair, newest first (`created_at`
    /// descending, id descending on ties).
    async fn get_conversation(
        &self,
        user_a: Uuid,
        user_b: Uuid,
        page: u32,
        page_size: u32,
    ) -> AppResult<Vec<Message>>;

    /// Sender-only content edit; sets `is_edited`/`edited_at`.
    async fn edit(&self, id: Uuid, editor: Uuid, content: String) -> AppResult<Message>;

    /// Participant-only soft delete. The row is retained and excluded from
    /// all subsequent reads.
    async fn soft_delete(&self, id: Uuid, requested_by: Uuid) -> AppResult<()>;

    /// Bulk soft delete of every message between the pair. Returns the number
    /// of rows affected.
    async fn clear_conversation(&self, user_a: Uuid, user_b: Uuid) -> AppResult<u64>;

    /// Conversation aggregation: one entry per distinct counterpart, carrying
    /// the latest non-deleted message, ordered by that message's `created_at`
    /// descending. Pagination runs over groups, not raw messages.
    async fn list_conversations(
        &self,
        user: Uuid,
        page: u32,
        page_size: u32,
    ) -> AppResult<Vec<ConversationEntry>>;
}

/// Offset for 1-based page numbers; page 0 is treated as page 1.
pub(crate) fn page_offset(page: u32, page_size: u32) -> i64 {
    i64::from(page.max(1) - 1) * i64::from(page_size)
}
