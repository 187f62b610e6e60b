//! Auth HTTP Routes
//!
//! `/register` and `/login`, plus the bearer-token extractor used by every
//! file route.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    routing::post,
    Json, Router,
};

use super::errors::ApiError;
use super::gateway_routes::GatewayState;
use crate::auth::{AuthError, Credentials, RegisteredUser, TokenResponse};

/// Owner id of the authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerId(pub String);

#[axum::async_trait]
impl FromRequestParts<Arc<GatewayState>> for OwnerId {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<GatewayState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::AuthenticationRequired)?;

        let claims = state.auth.authenticate(token)?;
        Ok(OwnerId(claims.sub))
    }
}

/// Create auth routes
pub fn auth_routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/register", post(register_handler))
        .route("/login", post(login_handler))
}

async fn register_handler(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<Credentials>,
) -> Result<(StatusCode, Json<RegisteredUser>), ApiError> {
    let auth = state.clone();
    let user = tokio::task::spawn_blocking(move || auth.auth.register(request))
        .await
        .map_err(|e| AuthError::StorageError(e.to_string()))??;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn login_handler(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<Credentials>,
) -> Result<Json<TokenResponse>, ApiError> {
    // Argon2 verification blocks for tens of milliseconds.
    let auth = state.clone();
    let token = tokio::task::spawn_blocking(move || auth.auth.login(request))
        .await
        .map_err(|e| AuthError::StorageError(e.to_string()))??;
    Ok(Json(token))
}
