//! Personal digital library service.
//!
//! Users sign up, upload book files into a private per-user namespace, list,
//! download and delete them, within a fixed per-account storage quota.

pub mod auth;
pub mod config;
pub mod constants;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod policy;
pub mod routes;
pub mod services;

use anyhow::Result;
use auth::jwt::TokenKeys;
use config::AppConfig;
use constants::{BOOKS_BUCKET, MAX_OBJECT_BYTES, STORAGE_QUOTA_BYTES};
use services::{
    account_service::AccountService, library_service::LibraryService,
    storage_service::StorageService,
};
use sqlx::SqlitePool;
use std::{path::PathBuf, sync::Arc};

/// Shared handler state. Every field is a cheap clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub tokens: TokenKeys,
    pub accounts: AccountService,
    pub library: LibraryService,
}

impl AppState {
    /// Wire services over an already migrated pool and make sure the books
    /// bucket exists.
    pub async fn initialize(config: AppConfig, db: SqlitePool) -> Result<Self> {
        let tokens = TokenKeys::new(
            config.jwt_secret.clone(),
            config.access_token_ttl_secs,
            config.refresh_token_ttl_secs,
        );

        let storage = StorageService::new(db.clone(), PathBuf::from(&config.storage_dir));
        let bucket = storage
            .ensure_bucket(BOOKS_BUCKET, false, Some(MAX_OBJECT_BYTES))
            .await?;
        tracing::debug!("using bucket {:?}", bucket);

        let library = LibraryService::new(db.clone(), storage, STORAGE_QUOTA_BYTES);
        let accounts = AccountService::new(db, tokens.clone());

        Ok(Self {
            config: Arc::new(config),
            tokens,
            accounts,
            library,
        })
    }

    /// Staging area for upload bodies awaiting the quota check.
    pub fn staging_dir(&self) -> PathBuf {
        self.library.storage().base_path.join(".staging")
    }
}

pub use routes::routes::app;
