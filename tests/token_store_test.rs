// Integration tests for the OAuth callback flow against the file-backed store

use chrono::{Duration, Utc};
use tempfile::TempDir;
use tokenstore::config::{EncryptionConfig, StoreConfig, TokenStoreConfig};
use tokenstore::credentials::{CredentialUpdate, DecryptedToken, RawCredentials, TokenStore};
use tokenstore::StoreError;

fn test_config(dir: &TempDir, secret: Option<&str>) -> TokenStoreConfig {
    TokenStoreConfig {
        store: StoreConfig {
            data_dir: dir.path().join("app-data"),
            ..StoreConfig::default()
        },
        encryption: EncryptionConfig {
            allow_default_secret: false,
            secret: secret.map(|s| s.to_string()),
        },
    }
}

/// Connect, read, refresh, reopen, disconnect.
#[tokio::test]
async fn test_callback_flow_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, Some("integration-secret"));

    let store = TokenStore::open(&config).await.expect("open failed");

    // First connect
    let user_id = store.resolve_user_id("owner@example.com").await.unwrap();
    store
        .store_credentials(
            &user_id,
            RawCredentials::new("AT1")
                .with_refresh_token("RT1")
                .with_expiry_date((Utc::now() + Duration::seconds(3600)).timestamp_millis()),
        )
        .await
        .unwrap();

    // Provider refresh without a new refresh token
    store
        .update_credentials(
            &user_id,
            CredentialUpdate::new("AT2").with_expires_at(Utc::now() + Duration::seconds(7200)),
        )
        .await
        .unwrap();

    assert!(config.store.file_path().exists());
    drop(store);

    // Same secret after a restart decrypts the same document
    let reopened = TokenStore::open(&config).await.expect("reopen failed");
    assert_eq!(
        reopened.resolve_user_id("owner@example.com").await.unwrap(),
        user_id
    );

    let creds = reopened.get_credentials(&user_id).await.unwrap().unwrap();
    assert_eq!(creds.access_token, DecryptedToken::Valid("AT2".to_string()));
    assert_eq!(
        creds.refresh_token,
        Some(DecryptedToken::Valid("RT1".to_string()))
    );
    assert!(!creds.expired);

    // Disconnect
    reopened.delete_credentials(&user_id).await.unwrap();
    assert!(reopened.get_credentials(&user_id).await.unwrap().is_none());
    assert_eq!(
        reopened.find_user_id("owner@example.com").await.unwrap(),
        Some(user_id)
    );
}

#[tokio::test]
async fn test_open_without_secret_fails_fast() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, None);

    match TokenStore::open(&config).await {
        Err(StoreError::Config(_)) => {}
        Err(other) => panic!("expected config error, got {}", other),
        Ok(_) => panic!("store opened without a secret"),
    }
}

#[tokio::test]
async fn test_store_for_unknown_user_is_not_found() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir, None);
    config.encryption.allow_default_secret = true;

    let store = TokenStore::open(&config).await.unwrap();
    let err = store
        .store_credentials("never-resolved", RawCredentials::new("AT1"))
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert!(store.list_users().await.unwrap().is_empty());
}
