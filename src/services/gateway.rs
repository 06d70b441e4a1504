//! Message Gateway: the channel-side operation surface. Authorizes against
//! the relationship collaborator, persists through the message store, then
//! pushes to the receiver's live session. Persistence always completes before
//! any push attempt, and a failed push never rolls persistence back.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{MediaDescriptor, Message, MessageKind, NewMessage, Presence};
use crate::protocol::ServerEvent;
use crate::services::presence::PresenceTracker;
use crate::services::relationships::{CanMessage, RelationshipStore};
use crate::store::MessageStore;
use crate::websocket::SessionRegistry;

pub struct MessageGateway {
    store: Arc<dyn MessageStore>,
    relationships: Arc<dyn RelationshipStore>,
    registry: SessionRegistry,
    presence: PresenceTracker,
    max_message_length: usize,
}

impl MessageGateway {
    pub fn new(
        store: Arc<dyn MessageStore>,
        relationships: Arc<dyn RelationshipStore>,
        registry: SessionRegistry,
        presence: PresenceTracker,
        max_message_length: usize,
    ) -> Self {
        Self {
            store,
            relationships,
            registry,
            presence,
            max_message_length,
        }
    }

    async fn authorize(&self, sender: Uuid, receiver: Uuid) -> AppResult<()> {
        match self.relationships.can_message(sender, receiver).await? {
            CanMessage::Allowed => Ok(()),
            CanMessage::NotFriends => {
                Err(AppError::Forbidden("users are not friends".into()))
            }
            CanMessage::Blocked => Err(AppError::Forbidden(
                "messaging is blocked between these users".into(),
            )),
        }
    }

    /// Persist a text message and push it to the receiver if connected.
    /// Returns the persisted message for the sender's echo.
    pub async fn send_text(
        &self,
        sender: Uuid,
        receiver: Uuid,
        content: String,
    ) -> AppResult<Message> {
        self.authorize(sender, receiver).await?;
        if content.trim().is_empty() {
            return Err(AppError::Validation("message content is empty".into()));
        }
        if content.chars().count() > self.max_message_length {
            return Err(AppError::Validation(format!(
                "message exceeds {} characters",
                self.max_message_length
            )));
        }

        let message = self
            .store
            .create(NewMessage {
                sender_id: sender,
                receiver_id: receiver,
                content: Some(content),
                kind: MessageKind::Text,
                media: None,
            })
            .await?;
        self.push_to_receiver(&message).await;
        Ok(message)
    }

    /// Persist a media message (message + attachment atomically) and push it.
    /// The descriptor must reference an already uploaded file; the gateway
    /// performs no uploads itself.
    pub async fn send_media(
        &self,
        sender: Uuid,
        receiver: Uuid,
        descriptor: MediaDescriptor,
    ) -> AppResult<Message> {
        self.authorize(sender, receiver).await?;
        if !descriptor.kind.is_media() {
            return Err(AppError::Validation(
                "media messages require a media kind".into(),
            ));
        }

        let message = self
            .store
            .create(NewMessage {
                sender_id: sender,
                receiver_id: receiver,
                content: None,
                kind: descriptor.kind,
                media: Some(descriptor),
            })
            .await?;
        self.push_to_receiver(&message).await;
        Ok(message)
    }

    async fn push_to_receiver(&self, message: &Message) {
        let delivered = self
            .registry
            .push(
                message.receiver_id,
                ServerEvent::ReceiveMessage {
                    message: message.clone(),
                },
            )
            .await;
        debug!(
            message_id = %message.id,
            receiver_id = %message.receiver_id,
            delivered,
            "message push"
        );
    }

    /// Ephemeral typing broadcast: forwarded to the receiver's live session,
    /// silently dropped otherwise. Never persisted, never queued. Pairs that
    /// may not message each other are dropped without error.
    pub async fn typing(&self, sender: Uuid, nickname: &str, receiver: Uuid, is_typing: bool) {
        match self.relationships.can_message(sender, receiver).await {
            Ok(CanMessage::Allowed) => {
                self.registry
                    .push(
                        receiver,
                        ServerEvent::TypingIndicator {
                            user_id: sender,
                            user_nickname: nickname.to_string(),
                            is_typing,
                        },
                    )
                    .await;
            }
            _ => {}
        }
    }

    /// Snapshot of the caller's currently online friends.
    pub async fn online_friends(&self, user: Uuid) -> AppResult<Vec<Uuid>> {
        let friends = self.relationships.friends_of(user).await?;
        Ok(self.presence.filter_online(&friends).await)
    }

    /// Presence snapshot for the join handshake. Friend-scoped like every
    /// other presence read, so joining cannot probe an arbitrary user's
    /// online state.
    pub async fn friend_presence(&self, requester: Uuid, friend: Uuid) -> AppResult<Presence> {
        self.authorize(requester, friend).await?;
        Ok(self.presence.presence_of(friend).await)
    }

    /// Fire-and-forget `UserStatusChanged` fan-out to the user's currently
    /// connected friends. Duplicates and reordering are tolerated by clients,
    /// which keep the most recently received value.
    pub async fn broadcast_presence(&self, user: Uuid, is_online: bool) {
        let friends = match self.relationships.friends_of(user).await {
            Ok(friends) => friends,
            Err(err) => {
                debug!(%user, error = %err, "presence broadcast skipped");
                return;
            }
        };
        for friend in self.presence.filter_online(&friends).await {
            self.registry
                .push(
                    friend,
                    ServerEvent::UserStatusChanged {
                        user_id: user,
                        is_online,
                    },
                )
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::relationships::MemoryRelationships;
    use crate::store::MemoryMessageStore;

    struct Fixture {
        gateway: MessageGateway,
        store: MemoryMessageStore,
        relationships: MemoryRelationships,
        registry: SessionRegistry,
    }

    fn fixture() -> Fixture {
        let store = MemoryMessageStore::new();
        let relationships = MemoryRelationships::new();
        let registry = SessionRegistry::new();
        let presence = PresenceTracker::new();
        let gateway = MessageGateway::new(
            Arc::new(store.clone()),
            Arc::new(relationships.clone()),
            registry.clone(),
            presence,
            2000,
        );
        Fixture {
            gateway,
            store,
            relationships,
            registry,
        }
    }

    #[tokio::test]
    async fn send_text_persists_and_pushes_to_connected_receiver() {
        let fx = fixture();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        fx.relationships.add_friendship(a, b).await;
        let (_, mut rx) = fx.registry.register(b).await;

        let before = chrono::Utc::now();
        let message = fx.gateway.send_text(a, b, "hi".into()).await.unwrap();
        assert_eq!(message.sender_id, a);
        assert_eq!(message.receiver_id, b);
        assert_eq!(message.content.as_deref(), Some("hi"));
        assert_eq!(message.kind, MessageKind::Text);
        assert!(!message.is_deleted);
        assert!(message.created_at >= before);

        match rx.recv().await.unwrap() {
            ServerEvent::ReceiveMessage { message: pushed } => assert_eq!(pushed.id, message.id),
            other => panic!("unexpected event: {other:?}"),
        }

        let history = fx.store.get_conversation(a, b, 1, 50).await.unwrap();
        assert_eq!(history[0].id, message.id);
    }

    #[tokio::test]
    async fn send_text_to_offline_receiver_still_persists() {
        let fx = fixture();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        fx.relationships.add_friendship(a, b).await;

        let message = fx.gateway.send_text(a, b, "hi".into()).await.unwrap();
        assert_eq!(
            fx.store.get_by_id(message.id).await.unwrap().unwrap().id,
            message.id
        );
    }

    #[tokio::test]
    async fn non_friends_are_rejected_without_persisting() {
        let fx = fixture();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let err = fx.gateway.send_text(a, b, "hi".into()).await;
        assert!(matches!(err, Err(AppError::Forbidden(_))));
        assert!(fx.store.raw_messages().await.is_empty());
    }

    #[tokio::test]
    async fn blocked_pairs_are_rejected() {
        let fx = fixture();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        fx.relationships.add_friendship(a, b).await;
        fx.relationships.add_block(b, a).await;

        let err = fx.gateway.send_text(a, b, "hi".into()).await;
        assert!(matches!(err, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn oversized_content_fails_validation() {
        let fx = fixture();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        fx.relationships.add_friendship(a, b).await;

        let err = fx.gateway.send_text(a, b, "x".repeat(2001)).await;
        assert!(matches!(err, Err(AppError::Validation(_))));
        assert!(fx.store.raw_messages().await.is_empty());
    }

    #[tokio::test]
    async fn typing_is_never_persisted() {
        let fx = fixture();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        fx.relationships.add_friendship(a, b).await;
        let (_, mut rx) = fx.registry.register(b).await;

        fx.gateway.typing(a, "Ada", b, true).await;
        match rx.recv().await.unwrap() {
            ServerEvent::TypingIndicator {
                user_id,
                user_nickname,
                is_typing,
            } => {
                assert_eq!(user_id, a);
                assert_eq!(user_nickname, "Ada");
                assert!(is_typing);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(fx.store.raw_messages().await.is_empty());
        assert!(fx.store.raw_attachments().await.is_empty());
    }

    #[tokio::test]
    async fn presence_snapshots_are_friend_scoped() {
        let fx = fixture();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        fx.gateway.presence.mark_online(b).await;

        // A stranger gets no snapshot of B's live state.
        let err = fx.gateway.friend_presence(a, b).await;
        assert!(matches!(err, Err(AppError::Forbidden(_))));

        fx.relationships.add_friendship(a, b).await;
        let presence = fx.gateway.friend_presence(a, b).await.unwrap();
        assert!(presence.is_online);
    }

    #[tokio::test]
    async fn send_media_persists_attachment_with_message() {
        let fx = fixture();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        fx.relationships.add_friendship(a, b).await;

        let message = fx
            .gateway
            .send_media(
                a,
                b,
                MediaDescriptor {
                    url: "https://cdn.playnet.example/u/clip.mp4".into(),
                    file_name: "clip.mp4".into(),
                    file_size: 2048,
                    content_type: "video/mp4".into(),
                    kind: MessageKind::Video,
                },
            )
            .await
            .unwrap();
        assert_eq!(message.kind, MessageKind::Video);
        let attachments = fx.store.raw_attachments().await;
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].message_id, message.id);
    }
}
