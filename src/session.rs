//! Session gate and the stores behind it.
//!
//! The gate only knows about the [`AuthStore`] trait. [`MemoryAuthStore`]
//! keeps sessions in process memory; [`FileAuthStore`] additionally writes
//! them to a JSON file so they survive a restart.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::config::{AuthConfig, Credential};

/// Name of the cookie carrying the session id
pub const SESSION_COOKIE: &str = "auth-session";

/// An authenticated session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    fn new(username: &str, ttl: Duration) -> Self {
        let created_at = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            created_at,
            expires_at: created_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("session file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("malformed login request")]
    MalformedRequest,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Credential check plus session storage
#[async_trait]
pub trait AuthStore: Send + Sync {
    /// Exact match against the known credentials
    async fn verify(&self, username: &str, password: &str) -> bool;

    async fn create_session(&self, username: &str) -> Result<Session, StoreError>;

    /// Return the live session for `id`. Expired sessions are removed and
    /// reported as absent.
    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError>;

    async fn remove_session(&self, id: &str) -> Result<(), StoreError>;
}

/// Sessions held in process memory
pub struct MemoryAuthStore {
    credentials: Vec<Credential>,
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl MemoryAuthStore {
    pub fn new(credentials: Vec<Credential>, ttl: Duration) -> Self {
        Self::with_sessions(credentials, ttl, HashMap::new())
    }

    fn with_sessions(credentials: Vec<Credential>, ttl: Duration, sessions: HashMap<String, Session>) -> Self {
        Self {
            credentials,
            sessions: RwLock::new(sessions),
            ttl,
        }
    }

    async fn snapshot(&self) -> Vec<Session> {
        self.sessions.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl AuthStore for MemoryAuthStore {
    async fn verify(&self, username: &str, password: &str) -> bool {
        self.credentials
            .iter()
            .any(|c| c.username == username && c.password == password)
    }

    async fn create_session(&self, username: &str) -> Result<Session, StoreError> {
        let session = Session::new(username, self.ttl);
        let mut sessions = self.sessions.write().await;
        // sessions that are never read again would otherwise stay forever
        let now = Utc::now();
        sessions.retain(|_, s| !s.is_expired_at(now));
        sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let session = self.sessions.read().await.get(id).cloned();
        match session {
            Some(session) if session.is_expired_at(Utc::now()) => {
                tracing::debug!(username = %session.username, "session expired");
                self.sessions.write().await.remove(id);
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn remove_session(&self, id: &str) -> Result<(), StoreError> {
        self.sessions.write().await.remove(id);
        Ok(())
    }
}

/// Sessions mirrored to a JSON file after every change
pub struct FileAuthStore {
    path: PathBuf,
    inner: MemoryAuthStore,
    /// Serializes snapshot-and-write so an older snapshot never lands last
    write_lock: Mutex<()>,
}

impl FileAuthStore {
    /// Open the store, loading any unexpired sessions already on disk
    pub async fn open(path: PathBuf, credentials: Vec<Credential>, ttl: Duration) -> Result<Self, StoreError> {
        let sessions = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let stored: Vec<Session> = serde_json::from_slice(&bytes)?;
                let now = Utc::now();
                stored
                    .into_iter()
                    .filter(|s| !s.is_expired_at(now))
                    .map(|s| (s.id.clone(), s))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(path = %path.display(), sessions = sessions.len(), "session store opened");

        Ok(Self {
            path,
            inner: MemoryAuthStore::with_sessions(credentials, ttl, sessions),
            write_lock: Mutex::new(()),
        })
    }

    /// Write the current sessions to a sibling temp file, then rename it
    /// over the store file
    async fn persist(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let sessions = self.inner.snapshot().await;
        let bytes = serde_json::to_vec_pretty(&sessions)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut tmp_name = self.path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = self.path.with_file_name(tmp_name);
        tokio::fs::write(&tmp_path, bytes).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl AuthStore for FileAuthStore {
    async fn verify(&self, username: &str, password: &str) -> bool {
        self.inner.verify(username, password).await
    }

    async fn create_session(&self, username: &str) -> Result<Session, StoreError> {
        let session = self.inner.create_session(username).await?;
        self.persist().await?;
        Ok(session)
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let known = self.inner.sessions.read().await.contains_key(id);
        let session = self.inner.get_session(id).await?;
        if known && session.is_none() {
            // expired and evicted on read
            self.persist().await?;
        }
        Ok(session)
    }

    async fn remove_session(&self, id: &str) -> Result<(), StoreError> {
        self.inner.remove_session(id).await?;
        self.persist().await
    }
}

/// Build the store selected by the auth configuration
pub async fn store_from_config(config: &AuthConfig) -> Result<Arc<dyn AuthStore>, StoreError> {
    let secs = i64::try_from(config.session_ttl_secs)
        .unwrap_or(i64::MAX)
        .min(i64::MAX / 1000);
    let ttl = Duration::seconds(secs);
    match &config.session_file {
        Some(path) => Ok(Arc::new(
            FileAuthStore::open(path.clone(), config.users.clone(), ttl).await?,
        )),
        None => Ok(Arc::new(MemoryAuthStore::new(config.users.clone(), ttl))),
    }
}

/// Login/logout state machine over an [`AuthStore`]
#[derive(Clone)]
pub struct SessionGate {
    store: Arc<dyn AuthStore>,
}

impl SessionGate {
    pub fn new(store: Arc<dyn AuthStore>) -> Self {
        Self { store }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Session, AuthError> {
        if !self.store.verify(username, password).await {
            tracing::info!(%username, "login rejected");
            return Err(AuthError::InvalidCredentials);
        }
        let session = self.store.create_session(username).await?;
        tracing::info!(%username, "login accepted");
        Ok(session)
    }

    /// Drop the session if one is present; absent ids are not an error
    pub async fn logout(&self, id: Option<&str>) -> Result<(), StoreError> {
        if let Some(id) = id {
            self.store.remove_session(id).await?;
        }
        Ok(())
    }

    pub async fn current(&self, id: Option<&str>) -> Result<Option<Session>, StoreError> {
        match id {
            Some(id) => self.store.get_session(id).await,
            None => Ok(None),
        }
    }
}
