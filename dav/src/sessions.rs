use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use data_encoding::HEXLOWER;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Credentials issued to a DAV client, granting access to one space.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub username: String,
    pub user_id: Uuid,
    pub space_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("session lookup failed: {0}")]
    Internal(String),
}

#[async_trait]
pub trait SessionService: Send + Sync {
    /// Returns the session matching the given basic auth credentials.
    async fn authenticate(&self, username: &str, secret: &str) -> Result<Session, AuthError>;
}

#[async_trait]
impl<A> SessionService for A
where
    A: AsRef<dyn SessionService> + Send + Sync,
{
    async fn authenticate(&self, username: &str, secret: &str) -> Result<Session, AuthError> {
        self.as_ref().authenticate(username, secret).await
    }
}

/// Keeps sessions in memory, indexed by username and a hash of the secret.
#[derive(Default)]
pub struct MemorySessionService {
    sessions: RwLock<HashMap<(String, String), Session>>,
}

impl MemorySessionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session, the secret itself is not kept.
    pub fn create(&self, username: &str, secret: &str, user_id: Uuid, space_id: Uuid) -> Session {
        let session = Session {
            id: Uuid::new_v4(),
            username: username.to_string(),
            user_id,
            space_id,
            created_at: Utc::now(),
        };

        self.sessions
            .write()
            .insert((username.to_string(), hash_secret(secret)), session.clone());

        session
    }
}

#[async_trait]
impl SessionService for MemorySessionService {
    async fn authenticate(&self, username: &str, secret: &str) -> Result<Session, AuthError> {
        self.sessions
            .read()
            .get(&(username.to_string(), hash_secret(secret)))
            .cloned()
            .ok_or(AuthError::InvalidCredentials)
    }
}

fn hash_secret(secret: &str) -> String {
    HEXLOWER.encode(&Sha256::digest(secret.as_bytes()))
}
