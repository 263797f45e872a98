//! ApplyHub server - delegated job application platform core

pub mod auth;
pub mod config;
pub mod delegation;
pub mod error;
pub mod models;
pub mod recommend;
pub mod routes;
pub mod store;

use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::delegation::DelegationManager;
use crate::recommend::RecommendClient;

/// Application state shared across handlers
pub struct AppState {
    pub store: store::Store,
    pub manager: DelegationManager,
    pub recommender: RecommendClient,
    pub jwt_secret: String,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: &Config) -> Arc<Self> {
        let store = store::Store::new(pool);
        let manager = DelegationManager::new(store.clone());
        let recommender = RecommendClient::new(
            config.recommender_url.clone(),
            Duration::from_secs(config.recommender_timeout_secs),
        );
        Arc::new(Self {
            store,
            manager,
            recommender,
            jwt_secret: config.jwt_secret.clone(),
        })
    }
}
