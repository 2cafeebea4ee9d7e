//! AES-256-GCM encryption for stored tokens.
//!
//! Each token is encrypted separately with its own random nonce and encoded as
//! `base64(nonce):base64(ciphertext)`, so any token can be decrypted on its own.
//! The 32-byte key is derived from the application secret with Argon2id.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use argon2::Argon2;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tracing::warn;

use super::DecryptedToken;

/// Size of the encryption key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Fixed salt for key derivation. Changing it invalidates every stored token.
const KDF_SALT: &[u8] = b"tokenstore.fallback.v1";

/// Separator between the encoded nonce and ciphertext.
const SEPARATOR: char = ':';

/// Derives the 32-byte encryption key from the application secret.
///
/// Argon2id is deliberately slow; call this once per store, off the async
/// executor.
pub fn derive_key(secret: &str) -> Result<[u8; KEY_SIZE]> {
    if secret.is_empty() {
        return Err(anyhow!("Encryption secret must not be empty"));
    }

    let mut key = [0u8; KEY_SIZE];
    Argon2::default()
        .hash_password_into(secret.as_bytes(), KDF_SALT, &mut key)
        .map_err(|e| anyhow!("Key derivation failed: {}", e))?;

    Ok(key)
}

/// Encrypts a token with a fresh random nonce.
///
/// # Returns
/// * `Ok(String)` - `nonce:ciphertext`, both base64-encoded
/// * `Err` - If the cipher cannot be built or encryption fails
pub fn encrypt(plaintext: &str, key: &[u8; KEY_SIZE]) -> Result<String> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

    // Never reuse a nonce
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    Ok(format!(
        "{}{}{}",
        BASE64.encode(nonce),
        SEPARATOR,
        BASE64.encode(ciphertext)
    ))
}

/// Decrypts a `nonce:ciphertext` string produced by [`encrypt`].
///
/// Fails on malformed encoding, wrong key, tampering, or non-UTF-8 plaintext.
pub fn decrypt(encoded: &str, key: &[u8; KEY_SIZE]) -> Result<String> {
    let (nonce_b64, ciphertext_b64) = encoded
        .split_once(SEPARATOR)
        .ok_or_else(|| anyhow!("Encrypted token is missing the nonce separator"))?;

    let nonce_bytes = BASE64.decode(nonce_b64).context("Failed to decode nonce")?;
    let ciphertext = BASE64
        .decode(ciphertext_b64)
        .context("Failed to decode ciphertext")?;

    if nonce_bytes.len() != NONCE_SIZE {
        return Err(anyhow!(
            "Invalid nonce size: expected {}, got {}",
            NONCE_SIZE,
            nonce_bytes.len()
        ));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
        .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted data): {}", e))?;

    String::from_utf8(plaintext).context("Decrypted data is not valid UTF-8")
}

/// Decrypts a stored token without failing the caller.
///
/// A token that cannot be decrypted comes back as
/// [`DecryptedToken::Corrupted`] holding the stored string.
pub fn decrypt_token(encoded: &str, key: &[u8; KEY_SIZE]) -> DecryptedToken {
    match decrypt(encoded, key) {
        Ok(plaintext) => DecryptedToken::Valid(plaintext),
        Err(e) => {
            warn!(error = %e, "Stored token could not be decrypted");
            DecryptedToken::Corrupted(encoded.to_string())
        }
    }
}
