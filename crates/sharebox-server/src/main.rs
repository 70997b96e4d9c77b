//! # sharebox-server
//!
//! Multi-user file-sharing web service.
//!
//! This binary provides:
//! - **Accounts**: signup and login with bcrypt-hashed passwords, kept in
//!   SQLite through `sharebox-store`
//! - **Sessions**: cookie-referenced, in-memory `tower-sessions` state
//! - **Uploads**: multipart uploads streamed to a flat blob directory under
//!   random UUID names
//! - **Share links**: `/file/<id>` and `/download/<id>` open to anyone who
//!   holds the id

mod api;
mod auth;
mod blob_store;
mod config;
mod error;
mod pages;

use std::sync::{Arc, Mutex};

use sharebox_store::Database;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::blob_store::BlobStore;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,sharebox_server=debug,sharebox_store=info")
        }))
        .init();

    info!("Starting ShareBox server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize storage
    // -----------------------------------------------------------------------

    // Relational store (creates the file and runs migrations)
    let db = Database::open_at(&config.database_path)?;

    // Blob store (creates the upload directory if missing)
    let blob_store = BlobStore::new(config.upload_dir.clone()).await?;

    let http_addr = config.http_addr;
    let app_state = AppState {
        db: Arc::new(Mutex::new(db)),
        blob_store: Arc::new(blob_store),
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP server (blocks until shutdown)
    // -----------------------------------------------------------------------
    info!("Server is running at http://localhost:{}", http_addr.port());

    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
