//! Business logic services

pub mod availability;
pub mod catalog;
pub mod equipment;
pub mod identity;
pub mod ledger;
pub mod locks;

use std::sync::Arc;

use crate::{config::AppConfig, repository::Repository};
use identity::{IdentityProvider, RolePolicy, SessionService};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub catalog: catalog::CatalogService,
    pub equipment: equipment::EquipmentService,
    pub availability: availability::AvailabilityService,
    pub ledger: ledger::LedgerService,
    pub sessions: SessionService,
}

impl Services {
    /// Create all services over one repository and identity provider
    pub fn new(repository: Repository, identity: Arc<dyn IdentityProvider>, config: &AppConfig) -> Self {
        Self {
            catalog: catalog::CatalogService::new(repository.clone()),
            equipment: equipment::EquipmentService::new(repository.clone()),
            availability: availability::AvailabilityService::new(
                repository.clone(),
                config.availability.clone(),
            ),
            ledger: ledger::LedgerService::new(repository),
            sessions: SessionService::new(
                identity,
                RolePolicy::new(config.roles.clone()),
                config.auth.clone(),
            ),
        }
    }
}
