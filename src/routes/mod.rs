use axum::routing::get;
use axum::{middleware as axum_middleware, Router};

use crate::state::AppState;
use crate::websocket::handlers::ws_handler;

pub mod conversations;
pub mod messages;

use conversations::{clear_conversation, get_history, list_conversations};
use messages::{delete_message, edit_message};

/// Collaborator REST surface plus the channel endpoint. There is no REST send
/// path: the channel is the only way to create messages.
pub fn build_router(state: AppState) -> Router {
    let api_v1 = Router::new()
        .route("/conversations", get(list_conversations))
        .route(
            "/conversations/:peer_id/messages",
            get(get_history),
        )
        .route(
            "/conversations/:peer_id",
            axum::routing::delete(clear_conversation),
        )
        .route(
            "/messages/:id",
            axum::routing::put(edit_message).delete(delete_message),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::auth::auth_middleware,
        ));

    let router = Router::new()
        .route("/health", get(|| async { "OK" }))
        // The channel endpoint authenticates inside the upgrade handler so
        // browser clients can pass the credential as a query parameter.
        .route("/ws", get(ws_handler))
        .nest("/api/v1", api_v1)
        .with_state(state);

    crate::middleware::with_defaults(router)
}
