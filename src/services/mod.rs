pub mod gateway;
pub mod presence;
pub mod relationships;

pub use gateway::MessageGateway;
pub use presence::PresenceTracker;
pub use relationships::{CanMessage, MemoryRelationships, PgRelationships, RelationshipStore};
