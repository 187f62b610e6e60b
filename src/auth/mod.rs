//! # Auth Module
//!
//! The thin credential collaborator in front of the gateway: user
//! registration, password login and JWT bearer tokens. The gateway core only
//! ever sees the owner id extracted from a valid token.

pub mod api;
pub mod crypto;
pub mod errors;
pub mod jwt;
pub mod user;

pub use api::{AuthService, RegisteredUser};
pub use errors::{AuthError, AuthResult};
pub use jwt::{JwtClaims, JwtConfig, JwtManager, TokenResponse};
pub use user::{Credentials, FileUserStore, User, UserRepository};
