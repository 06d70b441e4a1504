//! In-memory message store. Backs the test suite and local development runs
//! where a Postgres instance is not available; shares the trait surface and
//! the ordering semantics with [`super::PgMessageStore`].

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Attachment, ConversationEntry, Message, NewMessage};

use super::{page_offset, MessageStore};

#[derive(Debug, Clone)]
struct StoredMessage {
    message: Message,
    attachment: Option<Attachment>,
}

#[derive(Default, Clone)]
pub struct MemoryMessageStore {
    inner: Arc<RwLock<Vec<StoredMessage>>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unfiltered view of every row, soft-deleted included. Store-level only;
    /// nothing in the request path exposes this.
    pub async fn raw_messages(&self) -> Vec<Message> {
        self.inner
            .read()
            .await
            .iter()
            .map(|row| row.message.clone())
            .collect()
    }

    pub async fn raw_attachments(&self) -> Vec<Attachment> {
        self.inner
            .read()
            .await
            .iter()
            .filter_map(|row| row.attachment.clone())
            .collect()
    }
}

/// Groups `messages` by counterpart relative to `user`, keeps the latest
/// non-deleted message per group (ties broken by id descending) and orders
/// groups by that message's `created_at` descending.
pub(crate) fn aggregate_conversations(messages: &[Message], user: Uuid) -> Vec<ConversationEntry> {
    let mut latest: HashMap<Uuid, &Message> = HashMap::new();
    for msg in messages {
        if msg.is_deleted || (msg.sender_id != user && msg.receiver_id != user) {
            continue;
        }
        let counterpart = msg.counterpart_of(user);
        match latest.get(&counterpart) {
            Some(current)
                if (current.created_at, current.id) >= (msg.created_at, msg.id) => {}
            _ => {
                latest.insert(counterpart, msg);
            }
        }
    }

    let mut entries: Vec<ConversationEntry> = latest
        .into_iter()
        .map(|(counterpart_id, msg)| ConversationEntry {
            counterpart_id,
            last_message: msg.clone(),
            last_activity: msg.created_at,
        })
        .collect();
    entries.sort_by_key(|e| Reverse((e.last_activity, e.last_message.id)));
    entries
}

fn between(msg: &Message, a: Uuid, b: Uuid) -> bool {
    (msg.sender_id == a && msg.receiver_id == b) || (msg.sender_id == b && msg.receiver_id == a)
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn create(&self, new: NewMessage) -> AppResult<Message> {
        new.validate()?;
        let now = Utc::now();
        let id = Uuid::new_v4();
        let message = Message {
            id,
            sender_id: new.sender_id,
            receiver_id: new.receiver_id,
            content: new.content,
            kind: new.kind,
            media_url: new.media.as_ref().map(|m| m.url.clone()),
            file_name: new.media.as_ref().map(|m| m.file_name.clone()),
            file_size: new.media.as_ref().map(|m| m.file_size),
            content_type: new.media.as_ref().map(|m| m.content_type.clone()),
            created_at: now,
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
        };
        let attachment = new.media.map(|m| Attachment {
            id: Uuid::new_v4(),
            message_id: id,
            kind: m.kind,
            url: m.url,
            file_name: m.file_name,
            file_size: m.file_size,
            content_type: m.content_type,
            created_at: now,
        });
        self.inner.write().await.push(StoredMessage {
            message: message.clone(),
            attachment,
        });
        Ok(message)
    }

    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Message>> {
        Ok(self
            .inner
            .read()
            .await
            .iter()
            .find(|row| row.message.id == id && !row.message.is_deleted)
            .map(|row| row.message.clone()))
    }

    async fn get_conversation(
        &self,
        user_a: Uuid,
        user_b: Uuid,
        page: u32,
        page_size: u32,
    ) -> AppResult<Vec<Message>> {
        let guard = self.inner.read().await;
        let mut messages: Vec<Message> = guard
            .iter()
            .filter(|row| !row.message.is_deleted && between(&row.message, user_a, user_b))
            .map(|row| row.message.clone())
            .collect();
        messages.sort_by_key(|m| Reverse((m.created_at, m.id)));
        let offset = page_offset(page, page_size) as usize;
        Ok(messages
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .collect())
    }

    async fn edit(&self, id: Uuid, editor: Uuid, content: String) -> AppResult<Message> {
        let mut guard = self.inner.write().await;
        let row = guard
            .iter_mut()
            .find(|row| row.message.id == id && !row.message.is_deleted)
            .ok_or(AppError::NotFound)?;
        if row.message.sender_id != editor {
            return Err(AppError::Forbidden(
                "only the sender may edit a message".into(),
            ));
        }
        row.message.content = Some(content);
        row.message.is_edited = true;
        row.message.edited_at = Some(Utc::now());
        Ok(row.message.clone())
    }

    async fn soft_delete(&self, id: Uuid, requested_by: Uuid) -> AppResult<()> {
        let mut guard = self.inner.write().await;
        let row = guard
            .iter_mut()
            .find(|row| row.message.id == id && !row.message.is_deleted)
            .ok_or(AppError::NotFound)?;
        if row.message.sender_id != requested_by && row.message.receiver_id != requested_by {
            return Err(AppError::Forbidden(
                "only a participant may delete a message".into(),
            ));
        }
        row.message.is_deleted = true;
        row.message.deleted_at = Some(Utc::now());
        Ok(())
    }

    async fn clear_conversation(&self, user_a: Uuid, user_b: Uuid) -> AppResult<u64> {
        let mut guard = self.inner.write().await;
        let now = Utc::now();
        let mut cleared = 0;
        for row in guard.iter_mut() {
            if !row.message.is_deleted && between(&row.message, user_a, user_b) {
                row.message.is_deleted = true;
                row.message.deleted_at = Some(now);
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn list_conversations(
        &self,
        user: Uuid,
        page: u32,
        page_size: u32,
    ) -> AppResult<Vec<ConversationEntry>> {
        let guard = self.inner.read().await;
        let messages: Vec<Message> = guard.iter().map(|row| row.message.clone()).collect();
        let entries = aggregate_conversations(&messages, user);
        let offset = page_offset(page, page_size) as usize;
        Ok(entries
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageKind;
    use chrono::{Duration, Utc};

    fn msg(sender: Uuid, receiver: Uuid, at_offset_secs: i64, id: Uuid) -> Message {
        Message {
            id,
            sender_id: sender,
            receiver_id: receiver,
            content: Some("hi".into()),
            kind: MessageKind::Text,
            media_url: None,
            file_name: None,
            file_size: None,
            content_type: None,
            created_at: Utc::now() + Duration::seconds(at_offset_secs),
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
        }
    }

    #[test]
    fn aggregation_orders_by_last_activity_desc() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        // C's latest activity (t1) predates B's (t2).
        let messages = vec![
            msg(a, c, 10, Uuid::new_v4()),
            msg(c, a, 20, Uuid::new_v4()),
            msg(b, a, 30, Uuid::new_v4()),
        ];
        let entries = aggregate_conversations(&messages, a);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].counterpart_id, b);
        assert_eq!(entries[1].counterpart_id, c);
    }

    #[test]
    fn aggregation_breaks_created_at_ties_by_id_desc() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let t = Utc::now();
        let mut first = msg(a, b, 0, Uuid::new_v4());
        let mut second = msg(b, a, 0, Uuid::new_v4());
        first.created_at = t;
        second.created_at = t;
        let winner = first.id.max(second.id);
        let entries = aggregate_conversations(&[first, second], a);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].last_message.id, winner);
    }

    #[test]
    fn aggregation_skips_deleted_messages() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut latest = msg(a, b, 10, Uuid::new_v4());
        latest.is_deleted = true;
        let older = msg(b, a, 0, Uuid::new_v4());
        let entries = aggregate_conversations(&[older.clone(), latest], a);
        assert_eq!(entries[0].last_message.id, older.id);
    }

    #[tokio::test]
    async fn soft_delete_hides_but_retains_the_row() {
        let store = MemoryMessageStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let message = store
            .create(NewMessage {
                sender_id: a,
                receiver_id: b,
                content: Some("hi".into()),
                kind: MessageKind::Text,
                media: None,
            })
            .await
            .unwrap();

        store.soft_delete(message.id, b).await.unwrap();

        assert!(store.get_by_id(message.id).await.unwrap().is_none());
        assert!(store
            .get_conversation(a, b, 1, 50)
            .await
            .unwrap()
            .is_empty());
        let raw = store.raw_messages().await;
        assert_eq!(raw.len(), 1);
        assert!(raw[0].is_deleted);
        assert!(raw[0].deleted_at.is_some());
    }

    #[tokio::test]
    async fn edit_is_sender_only() {
        let store = MemoryMessageStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let message = store
            .create(NewMessage {
                sender_id: a,
                receiver_id: b,
                content: Some("hi".into()),
                kind: MessageKind::Text,
                media: None,
            })
            .await
            .unwrap();

        let err = store.edit(message.id, b, "changed".into()).await;
        assert!(matches!(err, Err(AppError::Forbidden(_))));

        let edited = store.edit(message.id, a, "changed".into()).await.unwrap();
        assert!(edited.is_edited);
        assert_eq!(edited.content.as_deref(), Some("changed"));
        assert!(edited.edited_at.is_some());
    }

    #[tokio::test]
    async fn clear_conversation_soft_deletes_every_pair_message() {
        let store = MemoryMessageStore::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        for (s, r) in [(a, b), (b, a), (a, c)] {
            store
                .create(NewMessage {
                    sender_id: s,
                    receiver_id: r,
                    content: Some("hi".into()),
                    kind: MessageKind::Text,
                    media: None,
                })
                .await
                .unwrap();
        }

        let cleared = store.clear_conversation(a, b).await.unwrap();
        assert_eq!(cleared, 2);
        assert!(store.get_conversation(a, b, 1, 50).await.unwrap().is_empty());
        // The unrelated conversation with C is untouched.
        assert_eq!(store.get_conversation(a, c, 1, 50).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn conversation_pages_run_over_groups() {
        let store = MemoryMessageStore::new();
        let user = Uuid::new_v4();
        for _ in 0..3 {
            let other = Uuid::new_v4();
            store
                .create(NewMessage {
                    sender_id: user,
                    receiver_id: other,
                    content: Some("hi".into()),
                    kind: MessageKind::Text,
                    media: None,
                })
                .await
                .unwrap();
        }
        let page1 = store.list_conversations(user, 1, 2).await.unwrap();
        let page2 = store.list_conversations(user, 2, 2).await.unwrap();
        assert_eq!(page1.len(), 2);
        assert_eq!(page2.len(), 1);
    }

    #[tokio::test]
    async fn media_message_creates_attachment_atomically() {
        let store = MemoryMessageStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let message = store
            .create(NewMessage {
                sender_id: a,
                receiver_id: b,
                content: None,
                kind: MessageKind::Image,
                media: Some(crate::models::MediaDescriptor {
                    url: "https://cdn.playnet.example/u/abc.png".into(),
                    file_name: "abc.png".into(),
                    file_size: 1024,
                    content_type: "image/png".into(),
                    kind: MessageKind::Image,
                }),
            })
            .await
            .unwrap();

        let attachments = store.raw_attachments().await;
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].message_id, message.id);
        assert_eq!(message.media_url.as_deref(), Some("https://cdn.playnet.example/u/abc.png"));
    }
}
