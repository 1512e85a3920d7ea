//! Catalog query service

use crate::{
    error::AppResult,
    models::equipment::{EquipmentQuery, EquipmentView},
    repository::Repository,
};

#[derive(Clone)]
pub struct CatalogService {
    repository: Repository,
}

impl CatalogService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// List equipment with live availability.
    ///
    /// The category filter runs in the store. `search` is a convenience
    /// applied on top of the fetched rows.
    pub async fn list(&self, query: &EquipmentQuery) -> AppResult<Vec<EquipmentView>> {
        let views = self.repository.equipment_list(query.category.clone()).await?;
        Ok(match query.search.as_deref() {
            Some(term) => filter_by_name(views, term),
            None => views,
        })
    }

    /// One item with live availability
    pub async fn get(&self, id: i32) -> AppResult<EquipmentView> {
        self.repository.equipment_availability(id).await
    }
}

/// Keep entries whose name contains `term`, ignoring case. A blank term keeps everything.
pub fn filter_by_name(views: Vec<EquipmentView>, term: &str) -> Vec<EquipmentView> {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return views;
    }
    views
        .into_iter()
        .filter(|v| v.name.to_lowercase().contains(&needle))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        equipment::{Category, Condition, CreateEquipment},
        reservation::NewReservation,
    };
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    async fn catalog() -> (CatalogService, Repository) {
        let repository = Repository::memory();
        for (name, category, quantity) in [
            ("Basketball", Category::Sports, 4),
            ("Centrifuge", Category::Lab, 2),
            ("Microscope", Category::Lab, 5),
            ("Keyboard", Category::Music, 1),
            ("DSLR Camera", Category::Camera, 3),
        ] {
            repository
                .equipment_create(CreateEquipment {
                    name: name.into(),
                    category,
                    condition: Some(Condition::Good),
                    quantity,
                })
                .await
                .unwrap();
        }
        (CatalogService::new(repository.clone()), repository)
    }

    #[tokio::test]
    async fn test_category_filter_returns_only_that_category_with_live_availability() {
        let (catalog, repository) = catalog().await;
        let microscope = catalog
            .list(&EquipmentQuery::default())
            .await
            .unwrap()
            .into_iter()
            .find(|v| v.name == "Microscope")
            .unwrap();
        let now = Utc::now();
        repository
            .reserve(NewReservation {
                id: Uuid::new_v4(),
                equipment_id: microscope.id,
                holder_id: 1,
                units: 2,
                request_key: None,
                created_at: now,
                due_at: now + Duration::days(3),
            })
            .await
            .unwrap();

        let lab = catalog
            .list(&EquipmentQuery {
                category: Some(Category::Lab),
                search: None,
            })
            .await
            .unwrap();
        assert_eq!(lab.len(), 2);
        assert!(lab.iter().all(|v| v.category == Category::Lab));
        let fresh = lab.iter().find(|v| v.id == microscope.id).unwrap();
        assert_eq!((fresh.quantity, fresh.available_quantity), (5, 3));
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive_containment() {
        let (catalog, _) = catalog().await;
        let found = catalog
            .list(&EquipmentQuery {
                category: None,
                search: Some("BALL".into()),
            })
            .await
            .unwrap();
        let names: Vec<_> = found.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, ["Basketball"]);
    }

    #[test]
    fn test_blank_search_keeps_everything() {
        let views = vec![EquipmentView {
            id: 1,
            name: "Tuba".into(),
            category: Category::Music,
            condition: Condition::Fair,
            quantity: 1,
            available_quantity: 1,
        }];
        assert_eq!(filter_by_name(views.clone(), "  ").len(), 1);
        assert!(filter_by_name(views, "drum").is_empty());
    }
}
