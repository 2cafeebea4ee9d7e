//! Encrypted, file-backed OAuth credential storage.
//!
//! This is the fallback credential store used when no hosted database is
//! configured. All users and their credential sets live in a single JSON
//! document; access and refresh tokens are encrypted individually with
//! AES-256-GCM before they reach disk.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       TokenStore                         │
//! │  - resolve / store / get / update / del  │
//! │  - Serialized read-modify-write          │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (encrypt)            (decrypt)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       Encryption Module                  │
//! │  - Argon2id key derivation               │
//! │  - AES-256-GCM, nonce per token          │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       JSON document on disk              │
//! │  - user id -> UserRecord                 │
//! │  - Written via tmp file + rename         │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use tokenstore::config::TokenStoreConfig;
//! use tokenstore::credentials::{RawCredentials, TokenStore};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = TokenStoreConfig::default().apply_env();
//! let store = TokenStore::open(&config).await?;
//!
//! // OAuth callback: resolve the user, then store the provider response
//! let user_id = store.resolve_user_id("owner@example.com").await?;
//! store
//!     .store_credentials(&user_id, RawCredentials::new("access").with_expires_in(3600))
//!     .await?;
//!
//! // Before calling the provider API
//! if let Some(creds) = store.get_credentials(&user_id).await? {
//!     if creds.expired {
//!         // hand off to the refresh workflow
//!     }
//! }
//!
//! // Explicit disconnect
//! store.delete_credentials(&user_id).await?;
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

mod encryption;
mod storage;

pub use storage::TokenStore;

// Re-export encryption functions for testing/utilities
pub use encryption::{decrypt, derive_key, encrypt, KEY_SIZE};

/// Default `token_type` when the provider omits it.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// A user known to the store, keyed by an opaque user id.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    /// Unique within the store; used to resolve the user id.
    pub email: String,

    /// `None` until the first store, and again after a disconnect.
    pub tokens: Option<CredentialSet>,

    pub created_at: DateTime<Utc>,
}

/// OAuth credential set as persisted. Tokens are always ciphertext here.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CredentialSet {
    /// Encrypted access token (`nonce:ciphertext`)
    pub access_token: String,

    /// Encrypted refresh token (`nonce:ciphertext`)
    pub refresh_token: Option<String>,

    pub token_type: String,

    /// Space-delimited grant list
    pub scope: String,

    /// When the access token expires, as reported by the provider
    pub expires_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CredentialSet {
    /// Whether the access token's expiry has passed. Sets with no known
    /// expiry never expire.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Token response from a provider, as handed over by an OAuth callback.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawCredentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub scope: Option<String>,

    /// Absolute expiry in epoch milliseconds (Google style)
    pub expiry_date: Option<i64>,

    /// Relative expiry in seconds (LinkedIn / Facebook style)
    pub expires_in: Option<i64>,
}

impl RawCredentials {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            ..Default::default()
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_expiry_date(mut self, epoch_millis: i64) -> Self {
        self.expiry_date = Some(epoch_millis);
        self
    }

    pub fn with_expires_in(mut self, seconds: i64) -> Self {
        self.expires_in = Some(seconds);
        self
    }

    /// Derives `expires_at` from the provider's expiry signal.
    ///
    /// `expiry_date` wins over `expires_in`. Returns `None` when the provider
    /// sent neither, or sent an out-of-range value.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match (self.expiry_date, self.expires_in) {
            (Some(millis), _) => Utc.timestamp_millis_opt(millis).single(),
            (None, Some(secs)) => Duration::try_seconds(secs).and_then(|d| now.checked_add_signed(d)),
            (None, None) => None,
        }
    }
}

/// New values from a provider token refresh.
///
/// Absent optional fields keep what is already stored. Refresh responses
/// frequently omit the refresh token; the stored one is kept in that case.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CredentialUpdate {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,

    /// Relative expiry in seconds; ignored when `expires_at` is set
    pub expires_in: Option<i64>,

    pub scope: Option<String>,
    pub token_type: Option<String>,
}

impl CredentialUpdate {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            ..Default::default()
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_expires_in(mut self, seconds: i64) -> Self {
        self.expires_in = Some(seconds);
        self
    }

    /// New expiry, if the refresh response carried one.
    pub(crate) fn new_expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires_at.or_else(|| {
            self.expires_in
                .and_then(Duration::try_seconds)
                .and_then(|d| now.checked_add_signed(d))
        })
    }
}

/// Outcome of decrypting one stored token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum DecryptedToken {
    /// Plaintext token.
    Valid(String),

    /// Decryption failed; holds the raw stored string. The user needs to
    /// re-authorize.
    Corrupted(String),
}

impl DecryptedToken {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// Plaintext, or `None` when the token is corrupted.
    pub fn plaintext(&self) -> Option<&str> {
        match self {
            Self::Valid(token) => Some(token),
            Self::Corrupted(_) => None,
        }
    }
}

/// Credential set with tokens decrypted, as returned by
/// [`TokenStore::get_credentials`].
#[derive(Clone, Debug, Serialize)]
pub struct DecryptedCredentials {
    pub access_token: DecryptedToken,
    pub refresh_token: Option<DecryptedToken>,
    pub token_type: String,
    pub scope: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Set when `expires_at` has passed. The record is kept; refreshing is
    /// up to the caller.
    pub expired: bool,
}

impl DecryptedCredentials {
    /// True when any stored token failed to decrypt.
    pub fn needs_reauth(&self) -> bool {
        !self.access_token.is_valid()
            || self
                .refresh_token
                .as_ref()
                .map(|t| !t.is_valid())
                .unwrap_or(false)
    }
}

/// Token-free view of a user, for status reporting.
#[derive(Clone, Debug, Serialize)]
pub struct UserSummary {
    pub user_id: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub connected: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub expired: bool,
}
