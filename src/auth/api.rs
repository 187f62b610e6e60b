//! # Auth Service
//!
//! Registration and login on top of a [`UserRepository`] and [`JwtManager`].

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use super::errors::{AuthError, AuthResult};
use super::jwt::{JwtClaims, JwtManager, TokenResponse};
use super::user::{Credentials, User, UserRepository};

/// Public view of a newly registered user
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredUser {
    pub id: String,
    pub username: String,
}

/// Authentication service
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    jwt: JwtManager,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService").field("jwt", &self.jwt).finish_non_exhaustive()
    }
}

impl AuthService {
    pub fn new(users: Arc<dyn UserRepository>, jwt: JwtManager) -> Self {
        Self { users, jwt }
    }

    /// Register a new user
    pub fn register(&self, request: Credentials) -> AuthResult<RegisteredUser> {
        if self.users.find_by_username(request.username.trim())?.is_some() {
            return Err(AuthError::UsernameTaken);
        }
        let user = User::new(&request.username, &request.password)?;
        self.users.create(&user)?;

        info!(owner_id = %user.id, username = %user.username, "user registered");
        Ok(RegisteredUser {
            id: user.id,
            username: user.username,
        })
    }

    /// Check credentials and issue an access token
    pub fn login(&self, request: Credentials) -> AuthResult<TokenResponse> {
        let user = self
            .users
            .find_by_username(request.username.trim())?
            .ok_or(AuthError::InvalidCredentials)?;

        if !user.verify_password(&request.password)? {
            debug!(username = %user.username, "login rejected");
            return Err(AuthError::InvalidCredentials);
        }

        let token = self.jwt.generate_access_token(&user)?;
        Ok(TokenResponse::new(token, self.jwt.access_token_ttl()))
    }

    /// Validate a bearer token
    pub fn authenticate(&self, token: &str) -> AuthResult<JwtClaims> {
        self.jwt.validate_token(token)
    }
}
