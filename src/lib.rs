//! Equiplend equipment lending server
//!
//! Tracks lendable equipment and the reservations held against it, keeping
//! per-item availability exact under concurrent borrow and return traffic,
//! behind a REST JSON API.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
    pub repository: repository::Repository,
}

impl AppState {
    /// Wire services over a repository and identity provider
    pub fn new(
        config: AppConfig,
        repository: repository::Repository,
        identity: Arc<dyn services::identity::IdentityProvider>,
    ) -> Self {
        let services = services::Services::new(repository.clone(), identity, &config);
        Self {
            config: Arc::new(config),
            services: Arc::new(services),
            repository,
        }
    }
}
