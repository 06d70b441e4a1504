use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
}

impl MessageKind {
    pub fn is_media(self) -> bool {
        !matches!(self, MessageKind::Text)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
            MessageKind::Audio => "audio",
        }
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            "video" => Ok(MessageKind::Video),
            "audio" => Ok(MessageKind::Audio),
            other => Err(AppError::Validation(format!(
                "unknown message kind: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: Option<String>,
    pub kind: MessageKind,
    pub media_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub content_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Message {
    /// The other participant of the one-to-one conversation, relative to `user`.
    pub fn counterpart_of(&self, user: Uuid) -> Uuid {
        if self.sender_id == user {
            self.receiver_id
        } else {
            self.sender_id
        }
    }
}

/// Attachment rows mirror the media fields of their owning message. They are
/// created atomically with the message and never mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub message_id: Uuid,
    pub kind: MessageKind,
    pub url: String,
    pub file_name: String,
    pub file_size: i64,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

/// Reference to a previously uploaded file. Uploads happen in the media
/// collaborator service; the gateway only consumes the resulting descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub url: String,
    pub file_name: String,
    pub file_size: i64,
    pub content_type: String,
    pub kind: MessageKind,
}

/// Input to [`crate::store::MessageStore::create`]. `created_at` and the id
/// are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: Option<String>,
    pub kind: MessageKind,
    pub media: Option<MediaDescriptor>,
}

impl NewMessage {
    /// Data-model invariants every backend enforces before persisting.
    pub fn validate(&self) -> AppResult<()> {
        if self.sender_id == self.receiver_id {
            return Err(AppError::Validation(
                "sender and receiver must differ".into(),
            ));
        }
        let has_content = self
            .content
            .as_deref()
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false);
        if !has_content && self.media.is_none() {
            return Err(AppError::Validation(
                "message must carry content or media".into(),
            ));
        }
        if self.kind.is_media() != self.media.is_some() {
            return Err(AppError::Validation(
                "media descriptor required exactly for media kinds".into(),
            ));
        }
        if let Some(media) = &self.media {
            if media.url.trim().is_empty() {
                return Err(AppError::Validation("media url must not be empty".into()));
            }
            if media.file_size <= 0 {
                return Err(AppError::Validation("media size must be positive".into()));
            }
            if media.kind != self.kind {
                return Err(AppError::Validation(
                    "descriptor kind must match message kind".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(sender: Uuid, receiver: Uuid) -> NewMessage {
        NewMessage {
            sender_id: sender,
            receiver_id: receiver,
            content: Some("hi".into()),
            kind: MessageKind::Text,
            media: None,
        }
    }

    #[test]
    fn rejects_self_messaging() {
        let user = Uuid::new_v4();
        assert!(text(user, user).validate().is_err());
    }

    #[test]
    fn rejects_empty_text_without_media() {
        let mut msg = text(Uuid::new_v4(), Uuid::new_v4());
        msg.content = Some("   ".into());
        assert!(msg.validate().is_err());
    }

    #[test]
    fn media_kind_requires_descriptor() {
        let mut msg = text(Uuid::new_v4(), Uuid::new_v4());
        msg.kind = MessageKind::Image;
        assert!(msg.validate().is_err());
    }
}
