use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// Display name carried into typing indicators.
    pub nickname: String,
    pub exp: i64,
}

/// Authenticated caller, inserted into request extensions by the middleware
/// and into the socket loop by the WS upgrade handler.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub nickname: String,
}

/// Validate an HS256 bearer token and extract the caller identity.
pub fn verify_token(token: &str, secret: &str) -> Result<AuthUser, AppError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|_| AppError::Unauthorized)?;
    let id = Uuid::parse_str(&data.claims.sub).map_err(|_| AppError::Unauthorized)?;
    Ok(AuthUser {
        id,
        nickname: data.claims.nickname,
    })
}

/// Issue a token for `user`. Used by local tooling and the test suite; token
/// issuance for real users lives in the identity collaborator.
pub fn issue_token(
    user: Uuid,
    nickname: &str,
    secret: &str,
    ttl_seconds: i64,
) -> Result<String, AppError> {
    let claims = Claims {
        sub: user.to_string(),
        nickname: nickname.to_string(),
        exp: Utc::now().timestamp() + ttl_seconds,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| AppError::Internal)
}

/// Extract the bearer token and stash the caller in request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: axum::extract::Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::Unauthorized)?;
    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AppError::Unauthorized)?;

    let user = verify_token(token, &state.config.jwt_secret)?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
