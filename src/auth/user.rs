//! # User Management
//!
//! User model and the file-backed repository behind `/register` and `/login`.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::crypto::{hash_password, verify_password};
use super::errors::{AuthError, AuthResult};

pub const USERS_FILE_NAME: &str = "users.json";

/// User model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Owner id carried in tokens and directory records
    pub id: String,

    pub username: String,

    /// Argon2id password hash (never plaintext)
    pub password_hash: String,

    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a new user with a fresh owner id
    pub fn new(username: &str, password: &str) -> AuthResult<Self> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::InvalidInput(
                "username and password are required".to_string(),
            ));
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            password_hash: hash_password(password)?,
            created_at: Utc::now(),
        })
    }

    /// Verify a password against this user's stored hash
    pub fn verify_password(&self, password: &str) -> AuthResult<bool> {
        verify_password(password, &self.password_hash)
    }
}

/// User registration and login request
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// User repository trait
///
/// Abstracts storage operations for users.
pub trait UserRepository: Send + Sync {
    fn find_by_username(&self, username: &str) -> AuthResult<Option<User>>;

    /// Create a new user, rejecting a taken username
    fn create(&self, user: &User) -> AuthResult<()>;
}

/// Users persisted as one JSON document, rewritten atomically on change
#[derive(Debug)]
pub struct FileUserStore {
    path: PathBuf,
    users: RwLock<HashMap<String, User>>,
}

impl FileUserStore {
    /// Load `users.json` from `data_dir`. A missing file starts empty.
    pub fn open(data_dir: &Path) -> AuthResult<Self> {
        fs::create_dir_all(data_dir).map_err(storage_err)?;
        let path = data_dir.join(USERS_FILE_NAME);

        let users = match fs::read(&path) {
            Ok(bytes) => {
                let list: Vec<User> = serde_json::from_slice(&bytes).map_err(|e| {
                    AuthError::StorageError(format!("invalid {}: {}", path.display(), e))
                })?;
                list.into_iter().map(|u| (u.username.clone(), u)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(storage_err(e)),
        };

        Ok(Self {
            path,
            users: RwLock::new(users),
        })
    }

    pub fn len(&self) -> usize {
        self.users.read().map(|u| u.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, users: &HashMap<String, User>) -> AuthResult<()> {
        let mut list: Vec<&User> = users.values().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.username.cmp(&b.username)));
        let bytes = serde_json::to_vec_pretty(&list)
            .map_err(|e| AuthError::StorageError(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp).map_err(storage_err)?;
        file.write_all(&bytes).map_err(storage_err)?;
        file.sync_all().map_err(storage_err)?;
        fs::rename(&tmp, &self.path).map_err(storage_err)
    }
}

fn storage_err(e: std::io::Error) -> AuthError {
    AuthError::StorageError(e.to_string())
}

impl UserRepository for FileUserStore {
    fn find_by_username(&self, username: &str) -> AuthResult<Option<User>> {
        let users = self
            .users
            .read()
            .map_err(|_| AuthError::StorageError("Lock poisoned".to_string()))?;
        Ok(users.get(username).cloned())
    }

    fn create(&self, user: &User) -> AuthResult<()> {
        let mut users = self
            .users
            .write()
            .map_err(|_| AuthError::StorageError("Lock poisoned".to_string()))?;

        if users.contains_key(&user.username) {
            return Err(AuthError::UsernameTaken);
        }

        users.insert(user.username.clone(), user.clone());
        if let Err(e) = self.persist(&users) {
            users.remove(&user.username);
            return Err(e);
        }
        Ok(())
    }
}
