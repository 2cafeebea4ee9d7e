use anyhow::{Context, Result};
use tokenstore::config::{load_config, TokenStoreConfig};
use tokenstore::credentials::TokenStore;
use tracing::info;

/// Prints a token-free status report of the fallback credential store.
///
/// Usage: `tokenstore [config.toml]`
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tokenstore=info".into()),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => load_config(&path)?,
        None => TokenStoreConfig::default(),
    }
    .apply_env();

    let store = TokenStore::open(&config)
        .await
        .context("Failed to open token store")?;

    let users = store.list_users().await.context("Failed to read token store")?;
    let connected = users.iter().filter(|u| u.connected).count();
    let expired = users.iter().filter(|u| u.expired).count();

    info!(
        path = %store.path().display(),
        users = users.len(),
        connected,
        expired,
        "Token store status"
    );

    for user in &users {
        let status = match (user.connected, user.expired) {
            (false, _) => "disconnected",
            (true, true) => "expired",
            (true, false) => "connected",
        };
        let expires = user
            .expires_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!("{}  {:<32}  {:<12}  {}", user.user_id, user.email, status, expires);
    }

    Ok(())
}
