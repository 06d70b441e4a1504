//! Friendship/block collaborator. Friendships and blocks are owned by the
//! social side of the platform; the messaging core only asks two questions:
//! may this pair exchange messages, and who are a user's friends.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AppResult;

/// Outcome of the gateway's authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanMessage {
    Allowed,
    /// No accepted friendship between the pair.
    NotFriends,
    /// Either side blocks the other.
    Blocked,
}

#[async_trait]
pub trait RelationshipStore: Send + Sync {
    async fn can_message(&self, sender: Uuid, receiver: Uuid) -> AppResult<CanMessage>;

    async fn friends_of(&self, user: Uuid) -> AppResult<Vec<Uuid>>;
}

/// Reads the collaborator-owned `friendships` and `blocks` tables.
#[derive(Clone)]
pub struct PgRelationships {
    pool: Pool<Postgres>,
}

impl PgRelationships {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RelationshipStore for PgRelationships {
    async fn can_message(&self, sender: Uuid, receiver: Uuid) -> AppResult<CanMessage> {
        let blocked: bool = sqlx::query_scalar(
            "SELECT EXISTS ( \
               SELECT 1 FROM blocks \
               WHERE (blocker_id = $1 AND blocked_id = $2) \
                  OR (blocker_id = $2 AND blocked_id = $1))",
        )
        .bind(sender)
        .bind(receiver)
        .fetch_one(&self.pool)
        .await?;
        if blocked {
            return Ok(CanMessage::Blocked);
        }

        let friends: bool = sqlx::query_scalar(
            "SELECT EXISTS ( \
               SELECT 1 FROM friendships \
               WHERE status = 'accepted' \
                 AND ((user_a = $1 AND user_b = $2) OR (user_a = $2 AND user_b = $1)))",
        )
        .bind(sender)
        .bind(receiver)
        .fetch_one(&self.pool)
        .await?;
        Ok(if friends {
            CanMessage::Allowed
        } else {
            CanMessage::NotFriends
        })
    }

    async fn friends_of(&self, user: Uuid) -> AppResult<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT CASE WHEN user_a = $1 THEN user_b ELSE user_a END AS friend_id \
             FROM friendships WHERE status = 'accepted' AND (user_a = $1 OR user_b = $1)",
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| Ok(row.try_get("friend_id")?))
            .collect()
    }
}

/// In-memory relationship fixture for tests and database-less runs.
#[derive(Default, Clone)]
pub struct MemoryRelationships {
    friendships: Arc<RwLock<HashSet<(Uuid, Uuid)>>>,
    blocks: Arc<RwLock<HashSet<(Uuid, Uuid)>>>,
}

fn ordered(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl MemoryRelationships {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_friendship(&self, a: Uuid, b: Uuid) {
        self.friendships.write().await.insert(ordered(a, b));
    }

    pub async fn add_block(&self, blocker: Uuid, blocked: Uuid) {
        self.blocks.write().await.insert((blocker, blocked));
    }
}

#[async_trait]
impl RelationshipStore for MemoryRelationships {
    async fn can_message(&self, sender: Uuid, receiver: Uuid) -> AppResult<CanMessage> {
        let blocks = self.blocks.read().await;
        if blocks.contains(&(sender, receiver)) || blocks.contains(&(receiver, sender)) {
            return Ok(CanMessage::Blocked);
        }
        if self
            .friendships
            .read()
            .await
            .contains(&ordered(sender, receiver))
        {
            Ok(CanMessage::Allowed)
        } else {
            Ok(CanMessage::NotFriends)
        }
    }

    async fn friends_of(&self, user: Uuid) -> AppResult<Vec<Uuid>> {
        Ok(self
            .friendships
            .read()
            .await
            .iter()
            .filter_map(|&(a, b)| {
                if a == user {
                    Some(b)
                } else if b == user {
                    Some(a)
                } else {
                    None
                }
            })
            .collect())
    }
}
