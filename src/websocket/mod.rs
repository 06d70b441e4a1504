use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::protocol::ServerEvent;

pub mod handlers;

struct Session {
    id: Uuid,
    tx: UnboundedSender<ServerEvent>,
}

/// Live channel sessions, one per user. A reconnecting client replaces its
/// previous session ("last connected session wins"); dropping the replaced
/// sender terminates the old socket loop.
#[derive(Default, Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<Uuid, Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session for `user`, displacing any existing one.
    /// Returns the session id plus the event receiver for the socket loop.
    pub async fn register(&self, user: Uuid) -> (Uuid, UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = unbounded_channel();
        let id = Uuid::new_v4();
        self.inner.write().await.insert(user, Session { id, tx });
        (id, rx)
    }

    /// Removes the session only if it is still the registered one, so a
    /// displaced session's cleanup never tears down its successor.
    pub async fn deregister(&self, user: Uuid, session_id: Uuid) -> bool {
        let mut guard = self.inner.write().await;
        match guard.get(&user) {
            Some(session) if session.id == session_id => {
                guard.remove(&user);
                true
            }
            _ => false,
        }
    }

    /// Fire-and-forget push. Returns false when the user has no live session;
    /// the caller never treats that as an error.
    pub async fn push(&self, user: Uuid, event: ServerEvent) -> bool {
        let guard = self.inner.read().await;
        match guard.get(&user) {
            Some(session) => session.tx.send(event).is_ok(),
            None => false,
        }
    }

    pub async fn is_connected(&self, user: Uuid) -> bool {
        self.inner.read().await.contains_key(&user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn last_connected_session_wins() {
        let registry = SessionRegistry::new();
        let user = Uuid::new_v4();
        let (first_id, mut first_rx) = registry.register(user).await;
        let (second_id, mut second_rx) = registry.register(user).await;

        // The displaced session's channel is closed.
        assert!(first_rx.recv().await.is_none());

        // Pushes land on the newest session.
        assert!(registry.push(user, ServerEvent::OnlineFriends { user_ids: vec![] }).await);
        assert!(second_rx.recv().await.is_some());

        // Stale cleanup is a no-op; current cleanup removes the session.
        assert!(!registry.deregister(user, first_id).await);
        assert!(registry.is_connected(user).await);
        assert!(registry.deregister(user, second_id).await);
        assert!(!registry.is_connected(user).await);
    }

    #[tokio::test]
    async fn push_to_offline_user_reports_not_delivered() {
        let registry = SessionRegistry::new();
        let delivered = registry
            .push(Uuid::new_v4(), ServerEvent::OnlineFriends { user_ids: vec![] })
            .await;
        assert!(!delivered);
    }
}
