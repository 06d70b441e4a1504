//! Client SDK for the messaging channel: the connection manager owning the
//! persistent channel lifecycle, and the cache synchronizer reconciling
//! optimistic local state against server confirmations.
//!
//! History fetches are plain REST calls owned by the caller; dropping their
//! futures when a conversation view closes is the cancellation story. Sends
//! go through [`connection::ChatClient::invoke`] and are never cancelled by
//! view changes.

pub mod cache;
pub mod connection;

pub use cache::{CachedMessage, ConversationCache};
pub use connection::{
    ChatClient, ChatEvent, ClientError, ConnectionState, HandlerId, ReconnectPolicy, Transport,
    TransportLink, WsTransport,
};
