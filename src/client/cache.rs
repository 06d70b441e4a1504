//! Optimistic conversation cache. A send is appended locally before the
//! server confirms it; the confirmation (own echo or pushed copy) replaces
//! the pending entry exactly once, matched by the client-assigned ref. After
//! reconciliation a logical message appears exactly once in the visible list.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{MediaDescriptor, Message, MessageKind};

#[derive(Debug, Clone)]
pub struct CachedMessage {
    pub message: Message,
    /// True until the server confirms the send.
    pub pending: bool,
    pub client_ref: Option<Uuid>,
}

pub struct ConversationCache {
    user_id: Uuid,
    conversations: HashMap<Uuid, Vec<CachedMessage>>,
    last_activity: HashMap<Uuid, DateTime<Utc>>,
}

impl ConversationCache {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            conversations: HashMap::new(),
            last_activity: HashMap::new(),
        }
    }

    /// Append an optimistic pending entry before any server round trip.
    /// Returns the client ref to correlate with the eventual confirmation.
    /// The provisional message id is the client ref; the server id replaces
    /// it on confirmation.
    pub fn stage_send(
        &mut self,
        counterpart: Uuid,
        content: Option<String>,
        kind: MessageKind,
        media: Option<MediaDescriptor>,
    ) -> Uuid {
        let client_ref = Uuid::new_v4();
        let now = Utc::now();
        let message = Message {
            id: client_ref,
            sender_id: self.user_id,
            receiver_id: counterpart,
            content,
            kind,
            media_url: media.as_ref().map(|m| m.url.clone()),
            file_name: media.as_ref().map(|m| m.file_name.clone()),
            file_size: media.as_ref().map(|m| m.file_size),
            content_type: media.as_ref().map(|m| m.content_type.clone()),
            created_at: now,
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
        };
        self.conversations
            .entry(counterpart)
            .or_default()
            .push(CachedMessage {
                message,
                pending: true,
                client_ref: Some(client_ref),
            });
        self.bump_activity(counterpart, now);
        client_ref
    }

    /// Apply a server-confirmed message: the sender's own echo, or a pushed
    /// copy from the counterpart. Replaces the matching pending entry exactly
    /// once; appends when nothing matches (e.g. the send originated on
    /// another session); ignores duplicates by server id.
    pub fn confirm(&mut self, message: Message, client_ref: Option<Uuid>) {
        let counterpart = message.counterpart_of(self.user_id);
        let created_at = message.created_at;
        let list = self.conversations.entry(counterpart).or_default();

        if list
            .iter()
            .any(|cached| !cached.pending && cached.message.id == message.id)
        {
            return;
        }

        let confirmed = CachedMessage {
            message,
            pending: false,
            client_ref,
        };
        let matched = client_ref.and_then(|cr| {
            list.iter()
                .position(|cached| cached.pending && cached.client_ref == Some(cr))
        });
        match matched {
            Some(pos) => list[pos] = confirmed,
            None => list.push(confirmed),
        }
        self.bump_activity(counterpart, created_at);
    }

    /// Roll back a failed send so the caller can surface the error. No
    /// automatic retry. Returns whether a pending entry was removed.
    pub fn fail_send(&mut self, counterpart: Uuid, client_ref: Uuid) -> bool {
        let Some(list) = self.conversations.get_mut(&counterpart) else {
            return false;
        };
        let before = list.len();
        list.retain(|cached| !(cached.pending && cached.client_ref == Some(client_ref)));
        before != list.len()
    }

    pub fn messages(&self, counterpart: Uuid) -> &[CachedMessage] {
        self.conversations
            .get(&counterpart)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Counterpart ids ordered by last activity, most recent first.
    pub fn conversation_order(&self) -> Vec<Uuid> {
        let mut order: Vec<(Uuid, DateTime<Utc>)> = self
            .last_activity
            .iter()
            .map(|(&id, &at)| (id, at))
            .collect();
        order.sort_by(|a, b| b.1.cmp(&a.1));
        order.into_iter().map(|(id, _)| id).collect()
    }

    fn bump_activity(&mut self, counterpart: Uuid, at: DateTime<Utc>) {
        let entry = self.last_activity.entry(counterpart).or_insert(at);
        if at > *entry {
            *entry = at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn confirmed(sender: Uuid, receiver: Uuid, content: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender_id: sender,
            receiver_id: receiver,
            content: Some(content.into()),
            kind: MessageKind::Text,
            media_url: None,
            file_name: None,
            file_size: None,
            content_type: None,
            created_at: Utc::now(),
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
        }
    }

    #[test]
    fn pending_entry_is_replaced_exactly_once() {
        let me = Uuid::new_v4();
        let friend = Uuid::new_v4();
        let mut cache = ConversationCache::new(me);

        let client_ref = cache.stage_send(friend, Some("hi".into()), MessageKind::Text, None);
        assert_eq!(cache.messages(friend).len(), 1);
        assert!(cache.messages(friend)[0].pending);

        let server_copy = confirmed(me, friend, "hi");
        cache.confirm(server_copy.clone(), Some(client_ref));

        let visible = cache.messages(friend);
        assert_eq!(visible.len(), 1);
        assert!(!visible[0].pending);
        assert_eq!(visible[0].message.id, server_copy.id);

        // A duplicate confirmation (echo + pushed copy) changes nothing.
        cache.confirm(server_copy, Some(client_ref));
        assert_eq!(cache.messages(friend).len(), 1);
    }

    #[test]
    fn unmatched_confirmation_appends() {
        let me = Uuid::new_v4();
        let friend = Uuid::new_v4();
        let mut cache = ConversationCache::new(me);

        // Sent from another session: no pending entry to replace.
        cache.confirm(confirmed(me, friend, "elsewhere"), Some(Uuid::new_v4()));
        assert_eq!(cache.messages(friend).len(), 1);
        assert!(!cache.messages(friend)[0].pending);
    }

    #[test]
    fn failed_send_rolls_back_the_pending_entry() {
        let me = Uuid::new_v4();
        let friend = Uuid::new_v4();
        let mut cache = ConversationCache::new(me);

        let client_ref = cache.stage_send(friend, Some("hi".into()), MessageKind::Text, None);
        assert!(cache.fail_send(friend, client_ref));
        assert!(cache.messages(friend).is_empty());
        assert!(!cache.fail_send(friend, client_ref));
    }

    #[test]
    fn incoming_pushes_land_without_a_client_ref() {
        let me = Uuid::new_v4();
        let friend = Uuid::new_v4();
        let mut cache = ConversationCache::new(me);

        cache.confirm(confirmed(friend, me, "hello"), None);
        assert_eq!(cache.messages(friend).len(), 1);
    }

    #[test]
    fn last_activity_orders_conversations() {
        let me = Uuid::new_v4();
        let (b, c) = (Uuid::new_v4(), Uuid::new_v4());
        let mut cache = ConversationCache::new(me);

        let mut older = confirmed(c, me, "first");
        older.created_at = Utc::now() - Duration::minutes(5);
        cache.confirm(older, None);
        cache.confirm(confirmed(b, me, "second"), None);

        assert_eq!(cache.conversation_order(), vec![b, c]);
    }
}
