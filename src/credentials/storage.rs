//! Encrypted credential storage in a single JSON document.
//!
//! The document maps user ids to [`UserRecord`]s. Every mutation reads the
//! whole document, modifies it and writes it back.

use super::encryption::{self, KEY_SIZE};
use super::{
    CredentialSet, CredentialUpdate, DecryptedCredentials, RawCredentials, UserRecord,
    UserSummary, DEFAULT_TOKEN_TYPE,
};
use crate::config::TokenStoreConfig;
use crate::error::{Result, StoreError};
use chrono::Utc;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;


/// The persisted document: user id -> record.
type Document = BTreeMap<String, UserRecord>;

/// File-backed OAuth credential store.
///
/// # File layout
/// ```json
/// {
///   "<user id>": {
///     "email": "owner@example.com",
///     "tokens": {
///       "access_token": "<nonce>:<ciphertext>",
///       "refresh_token": "<nonce>:<ciphertext>",
///       "token_type": "Bearer",
///       "scope": "openid email",
///       "expires_at": "2026-10-17T12:00:00Z",
///       "created_at": "...",
///       "updated_at": "..."
///     },
///     "created_at": "..."
///   }
/// }
/// ```
///
/// # Thread Safety
/// - Clones share one write lock, so read-modify-write cycles within the
///   process never interleave (unless `serialize_writes` is off)
/// - Writes go through a temp file and a rename, so readers never see a
///   partially written document
/// - Other processes writing the same file are not coordinated
#[derive(Clone)]
pub struct TokenStore {
    path: PathBuf,
    encryption_key: Arc<[u8; KEY_SIZE]>,
    write_lock: Option<Arc<Mutex<()>>>,
}

impl TokenStore {
    /// Opens the store described by `config`.
    ///
    /// Resolves the encryption secret and derives the key on a blocking
    /// thread. Fails fast when no secret is available. The backing file is
    /// not touched until the first operation.
    pub async fn open(config: &TokenStoreConfig) -> Result<Self> {
        let secret = config.encryption.resolve_secret()?;

        let key = tokio::task::spawn_blocking(move || encryption::derive_key(&secret))
            .await
            .map_err(|e| StoreError::Encryption(format!("Key derivation task failed: {}", e)))?
            .map_err(|e| StoreError::Encryption(e.to_string()))?;

        let path = config.store.file_path();
        info!(
            path = %path.display(),
            serialize_writes = config.store.serialize_writes,
            "Token store opened"
        );

        Ok(Self::with_key(path, key, config.store.serialize_writes))
    }

    /// Builds a store from an already derived key.
    pub fn with_key<P: AsRef<Path>>(path: P, key: [u8; KEY_SIZE], serialize_writes: bool) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            encryption_key: Arc::new(key),
            write_lock: serialize_writes.then(|| Arc::new(Mutex::new(()))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the id of the user with `email`, creating the user if needed.
    ///
    /// The file is only written when a new user is created.
    pub async fn resolve_user_id(&self, email: &str) -> Result<String> {
        let _guard = self.lock().await;
        let mut doc = self.load().await?;

        if let Some(user_id) = find_by_email(&doc, email) {
            return Ok(user_id);
        }

        let user_id = Uuid::new_v4().to_string();
        doc.insert(
            user_id.clone(),
            UserRecord {
                email: email.to_string(),
                tokens: None,
                created_at: Utc::now(),
            },
        );
        self.save(&doc).await?;

        info!(user_id = %user_id, "Created token store user");
        Ok(user_id)
    }

    /// Looks up a user id by email without creating anything.
    pub async fn find_user_id(&self, email: &str) -> Result<Option<String>> {
        let doc = self.load().await?;
        Ok(find_by_email(&doc, email))
    }

    /// Stores a fresh credential set for an existing user, replacing any
    /// previous one.
    ///
    /// # Returns
    /// * `Ok(CredentialSet)` - The stored set (tokens still encrypted)
    /// * `Err(StoreError::NotFound)` - The user id is unknown; no user is created
    pub async fn store_credentials(
        &self,
        user_id: &str,
        credentials: RawCredentials,
    ) -> Result<CredentialSet> {
        let _guard = self.lock().await;
        let mut doc = self.load().await?;

        let user = doc
            .get_mut(user_id)
            .ok_or_else(|| StoreError::not_found(user_id))?;

        let now = Utc::now();
        let refresh_token = credentials
            .refresh_token
            .as_deref()
            .map(|token| self.encrypt_token(token))
            .transpose()?;

        let set = CredentialSet {
            access_token: self.encrypt_token(&credentials.access_token)?,
            refresh_token,
            token_type: credentials
                .token_type
                .clone()
                .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string()),
            scope: credentials.scope.clone().unwrap_or_default(),
            expires_at: credentials.expires_at(now),
            created_at: now,
            updated_at: now,
        };

        user.tokens = Some(set.clone());
        self.save(&doc).await?;

        debug!(user_id = %user_id, expires_at = ?set.expires_at, "Stored credentials");
        Ok(set)
    }

    /// Retrieves and decrypts a user's credentials.
    ///
    /// # Returns
    /// * `Ok(Some(DecryptedCredentials))` - With `expired` set when past
    ///   `expires_at`; expired sets are never deleted
    /// * `Ok(None)` - Unknown user, or no credentials stored
    /// * `Err` - If the document cannot be read
    pub async fn get_credentials(&self, user_id: &str) -> Result<Option<DecryptedCredentials>> {
        let doc = self.load().await?;

        let Some(set) = doc.get(user_id).and_then(|user| user.tokens.as_ref()) else {
            return Ok(None);
        };

        let key: &[u8; KEY_SIZE] = &self.encryption_key;
        let access_token = encryption::decrypt_token(&set.access_token, key);
        let refresh_token = set
            .refresh_token
            .as_deref()
            .map(|token| encryption::decrypt_token(token, key));

        Ok(Some(DecryptedCredentials {
            access_token,
            refresh_token,
            token_type: set.token_type.clone(),
            scope: set.scope.clone(),
            expires_at: set.expires_at,
            created_at: set.created_at,
            updated_at: set.updated_at,
            expired: set.is_expired_at(Utc::now()),
        }))
    }

    /// Merges a token refresh into an existing credential set.
    ///
    /// The stored refresh token is kept unless the update carries a new one.
    ///
    /// # Returns
    /// * `Ok(CredentialSet)` - The merged set (tokens still encrypted)
    /// * `Err(StoreError::NotFound)` - Unknown user, or no credentials stored
    pub async fn update_credentials(
        &self,
        user_id: &str,
        update: CredentialUpdate,
    ) -> Result<CredentialSet> {
        let _guard = self.lock().await;
        let mut doc = self.load().await?;

        let existing = doc
            .get_mut(user_id)
            .and_then(|user| user.tokens.as_mut())
            .ok_or_else(|| StoreError::not_found(user_id))?;

        let now = Utc::now();
        existing.access_token = self.encrypt_token(&update.access_token)?;
        if let Some(refresh_token) = update.refresh_token.as_deref() {
            existing.refresh_token = Some(self.encrypt_token(refresh_token)?);
        }
        if let Some(expires_at) = update.new_expires_at(now) {
            existing.expires_at = Some(expires_at);
        }
        if let Some(scope) = update.scope {
            existing.scope = scope;
        }
        if let Some(token_type) = update.token_type {
            existing.token_type = token_type;
        }
        existing.updated_at = now;

        let merged = existing.clone();
        self.save(&doc).await?;

        debug!(user_id = %user_id, expires_at = ?merged.expires_at, "Updated credentials");
        Ok(merged)
    }

    /// Disconnects a user by clearing their credential set.
    ///
    /// Idempotent: unknown users and users without credentials succeed
    /// without a write. The user record itself is kept.
    pub async fn delete_credentials(&self, user_id: &str) -> Result<()> {
        let _guard = self.lock().await;
        let mut doc = self.load().await?;

        match doc.get_mut(user_id) {
            Some(user) if user.tokens.is_some() => {
                user.tokens = None;
                self.save(&doc).await?;
                debug!(user_id = %user_id, "Deleted credentials");
            }
            _ => debug!(user_id = %user_id, "No credentials to delete"),
        }

        Ok(())
    }

    /// Lists every user without exposing or decrypting tokens.
    pub async fn list_users(&self) -> Result<Vec<UserSummary>> {
        let doc = self.load().await?;
        let now = Utc::now();

        Ok(doc
            .into_iter()
            .map(|(user_id, user)| UserSummary {
                user_id,
                email: user.email,
                created_at: user.created_at,
                connected: user.tokens.is_some(),
                expires_at: user.tokens.as_ref().and_then(|t| t.expires_at),
                expired: user
                    .tokens
                    .as_ref()
                    .map(|t| t.is_expired_at(now))
                    .unwrap_or(false),
            })
            .collect())
    }

    async fn lock(&self) -> Option<MutexGuard<'_, ()>> {
        match &self.write_lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        }
    }

    fn encrypt_token(&self, plaintext: &str) -> Result<String> {
        encryption::encrypt(plaintext, &self.encryption_key)
            .map_err(|e| StoreError::Encryption(e.to_string()))
    }

    /// Reads the whole document. A missing file is an empty store.
    async fn load(&self) -> Result<Document> {
        match fs::read_to_string(&self.path).await {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Document::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrites the whole document via a temp file, fsync and rename.
    async fn save(&self, doc: &Document) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(doc)?;

        // Unique per write so unserialized writers never share a temp file
        let tmp_path = self
            .path
            .with_extension(format!("{}.tmp", Uuid::new_v4().simple()));

        {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(json.as_bytes()).await?;
            file.sync_all().await?;
        }

        if let Err(e) = fs::rename(&tmp_path, &self.path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        debug!(path = %self.path.display(), users = doc.len(), "Token store written");
        Ok(())
    }
}

fn find_by_email(doc: &Document, email: &str) -> Option<String> {
    doc.iter()
        .find(|(_, user)| user.email == email)
        .map(|(user_id, _)| user_id.clone())
}
