use std::sync::Arc;

use crate::config::Config;
use crate::services::{MessageGateway, PresenceTracker, RelationshipStore};
use crate::store::MessageStore;
use crate::websocket::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MessageStore>,
    pub relationships: Arc<dyn RelationshipStore>,
    pub registry: SessionRegistry,
    pub presence: PresenceTracker,
    pub gateway: Arc<MessageGateway>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wires the gateway over explicitly supplied store and relationship
    /// backends; tests pass in-memory ones, `main` passes Postgres.
    pub fn new(
        store: Arc<dyn MessageStore>,
        relationships: Arc<dyn RelationshipStore>,
        config: Arc<Config>,
    ) -> Self {
        let registry = SessionRegistry::new();
        let presence = PresenceTracker::new();
        let gateway = Arc::new(MessageGateway::new(
            Arc::clone(&store),
            Arc::clone(&relationships),
            registry.clone(),
            presence.clone(),
            config.max_message_length,
        ));
        Self {
            store,
            relationships,
            registry,
            presence,
            gateway,
            config,
        }
    }
}
