pub mod conversation;
pub mod message;

pub use conversation::{ConversationEntry, Presence};
pub use message::{Attachment, MediaDescriptor, Message, MessageKind, NewMessage};
