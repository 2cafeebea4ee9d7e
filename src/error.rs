//! Error taxonomy for the token store.

use thiserror::Error;

/// Errors returned by [`crate::credentials::TokenStore`] operations.
///
/// Decryption failures are deliberately absent: they surface as
/// [`crate::credentials::DecryptedToken::Corrupted`] instead.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The user id has no record, or no credential set where one is required.
    #[error("no credentials found for user {user_id}")]
    NotFound { user_id: String },

    /// Filesystem error other than "file absent" on the initial read.
    #[error("token store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing JSON document could not be read or written.
    #[error("token store serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Cipher or key-derivation failure while writing.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Misconfiguration (e.g. no encryption secret).
    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    pub fn not_found(user_id: &str) -> Self {
        Self::NotFound {
            user_id: user_id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = StoreError::not_found("user-42");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "no credentials found for user user-42");
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: StoreError = io.into();
        assert!(!err.is_not_found());
        assert!(matches!(err, StoreError::Io(_)));
    }
}
