// Configuration (TOML file + environment overrides)
pub mod config;

// Encrypted file-backed credential store
pub mod credentials;

// Store error taxonomy
pub mod error;

pub use error::{Result, StoreError};
