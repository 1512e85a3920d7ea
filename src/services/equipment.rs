//! Equipment administration service

use chrono::Utc;
use validator::Validate;

use crate::{
    error::AppResult,
    models::{
        equipment::{CreateEquipment, EquipmentItem, UpdateEquipment},
        reservation::Reservation,
        session::{Actor, Capability},
    },
    repository::Repository,
};

#[derive(Clone)]
pub struct EquipmentService {
    repository: Repository,
}

impl EquipmentService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    pub async fn create(&self, actor: &Actor, data: CreateEquipment) -> AppResult<EquipmentItem> {
        actor.require(Capability::ManageEquipment)?;
        data.validate()?;
        let item = self.repository.equipment_create(data).await?;
        tracing::info!("Equipment {} '{}' created with {} units", item.id, item.name, item.quantity);
        Ok(item)
    }

    pub async fn update(&self, actor: &Actor, id: i32, data: UpdateEquipment) -> AppResult<EquipmentItem> {
        actor.require(Capability::ManageEquipment)?;
        data.validate()?;
        let item = self.repository.equipment_update(id, data).await?;
        tracing::info!("Equipment {} updated by subject {}", id, actor.subject_id);
        Ok(item)
    }

    /// Retire an item. Active reservations block this unless `force`,
    /// in which case they are cancelled and returned.
    pub async fn retire(&self, actor: &Actor, id: i32, force: bool) -> AppResult<Vec<Reservation>> {
        actor.require(Capability::ManageEquipment)?;
        let cancelled = self.repository.equipment_retire(id, force, Utc::now()).await?;
        if cancelled.is_empty() {
            tracing::info!("Equipment {} retired", id);
        } else {
            tracing::warn!(
                "Equipment {} retired with force: {} active reservations cancelled",
                id,
                cancelled.len()
            );
        }
        Ok(cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::equipment::Category;

    fn manager() -> Actor {
        Actor {
            subject_id: 1,
            username: "admin".into(),
            role: "admin".into(),
            capabilities: vec![Capability::ManageEquipment],
        }
    }

    fn create(name: &str, quantity: i32) -> CreateEquipment {
        CreateEquipment {
            name: name.into(),
            category: Category::Camera,
            condition: None,
            quantity,
        }
    }

    #[tokio::test]
    async fn test_create_requires_manage_capability() {
        let service = EquipmentService::new(Repository::memory());
        let student = Actor {
            capabilities: vec![Capability::Borrow],
            ..manager()
        };
        assert!(matches!(
            service.create(&student, create("Lens", 1)).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(service.create(&manager(), create("Lens", 1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_payload_is_rejected() {
        let service = EquipmentService::new(Repository::memory());
        assert!(matches!(
            service.create(&manager(), create("", 1)).await,
            Err(AppError::InvalidRequest(_))
        ));
        let item = service.create(&manager(), create("Flash", 2)).await.unwrap();
        let bad = UpdateEquipment {
            quantity: Some(-3),
            ..Default::default()
        };
        assert!(matches!(
            service.update(&manager(), item.id, bad).await,
            Err(AppError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_retire_unused_item() {
        let service = EquipmentService::new(Repository::memory());
        let item = service.create(&manager(), create("Reflector", 1)).await.unwrap();
        assert!(service.retire(&manager(), item.id, false).await.unwrap().is_empty());
        assert!(matches!(
            service.retire(&manager(), item.id, false).await,
            Err(AppError::NotFound(_))
        ));
    }
}
