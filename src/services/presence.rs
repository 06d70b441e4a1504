//! Ephemeral presence tracking. State lives only in this process and is
//! rebuilt from channel connects after a restart; nothing here touches
//! durable storage.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::Presence;

#[derive(Debug, Clone, Default)]
struct PresenceState {
    is_online: bool,
    last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Default, Clone)]
pub struct PresenceTracker {
    inner: Arc<RwLock<HashMap<Uuid, PresenceState>>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the user online. Returns true only on an offline-to-online
    /// transition so the caller broadcasts once per transition, not once per
    /// session replacement.
    pub async fn mark_online(&self, user: Uuid) -> bool {
        let mut guard = self.inner.write().await;
        let state = guard.entry(user).or_default();
        let changed = !state.is_online;
        state.is_online = true;
        changed
    }

    /// Marks the user offline with `last_seen_at = now`. Returns true only on
    /// an online-to-offline transition.
    pub async fn mark_offline(&self, user: Uuid) -> bool {
        let mut guard = self.inner.write().await;
        let state = guard.entry(user).or_default();
        let changed = state.is_online;
        state.is_online = false;
        state.last_seen_at = Some(Utc::now());
        changed
    }

    /// Point-in-time snapshot of which of `ids` are currently online.
    pub async fn filter_online(&self, ids: &[Uuid]) -> Vec<Uuid> {
        let guard = self.inner.read().await;
        ids.iter()
            .copied()
            .filter(|id| guard.get(id).map(|s| s.is_online).unwrap_or(false))
            .collect()
    }

    pub async fn presence_of(&self, user: Uuid) -> Presence {
        let guard = self.inner.read().await;
        let state = guard.get(&user).cloned().unwrap_or_default();
        Presence {
            user_id: user,
            is_online: state.is_online,
            last_seen_at: state.last_seen_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transitions_report_changes_exactly_once() {
        let tracker = PresenceTracker::new();
        let user = Uuid::new_v4();
        assert!(tracker.mark_online(user).await);
        assert!(!tracker.mark_online(user).await);
        assert!(tracker.mark_offline(user).await);
        assert!(!tracker.mark_offline(user).await);
    }

    #[tokio::test]
    async fn offline_users_carry_a_last_seen_timestamp() {
        let tracker = PresenceTracker::new();
        let user = Uuid::new_v4();
        tracker.mark_online(user).await;
        tracker.mark_offline(user).await;
        let presence = tracker.presence_of(user).await;
        assert!(!presence.is_online);
        assert!(presence.last_seen_at.is_some());
    }

    #[tokio::test]
    async fn filter_online_is_a_snapshot() {
        let tracker = PresenceTracker::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        tracker.mark_online(a).await;
        assert_eq!(tracker.filter_online(&[a, b]).await, vec![a]);
    }
}
