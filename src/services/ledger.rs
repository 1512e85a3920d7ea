//! Reservation ledger queries

use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        reservation::ReservationDetails,
        session::{Actor, Capability},
    },
    repository::Repository,
};

#[derive(Clone)]
pub struct LedgerService {
    repository: Repository,
}

impl LedgerService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Active reservations on an item, oldest first
    pub async fn active_reservations_for(
        &self,
        actor: &Actor,
        item_id: i32,
    ) -> AppResult<Vec<ReservationDetails>> {
        actor.require(Capability::ViewLedger)?;
        let now = Utc::now();
        let reservations = self.repository.reservations_active_for(item_id).await?;
        Ok(reservations
            .into_iter()
            .map(|r| ReservationDetails::at(r, now))
            .collect())
    }

    /// One reservation, visible to its holder and to ledger viewers
    pub async fn get(&self, actor: &Actor, reservation_id: Uuid) -> AppResult<ReservationDetails> {
        let reservation = self.repository.reservation_get(reservation_id).await?;
        if reservation.holder_id != actor.subject_id && !actor.can(Capability::ViewLedger) {
            // Same answer as an unknown id, so ids of others are not probeable
            return Err(AppError::NotFound(format!(
                "Reservation {} not found",
                reservation_id
            )));
        }
        Ok(ReservationDetails::at(reservation, Utc::now()))
    }

    /// The caller's own reservations, oldest first
    pub async fn mine(&self, actor: &Actor, include_closed: bool) -> AppResult<Vec<ReservationDetails>> {
        let now = Utc::now();
        let reservations = self
            .repository
            .reservations_for_holder(actor.subject_id, include_closed)
            .await?;
        Ok(reservations
            .into_iter()
            .map(|r| ReservationDetails::at(r, now))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        equipment::{Category, CreateEquipment},
        reservation::NewReservation,
    };
    use chrono::Duration;

    fn actor(subject_id: i32, capabilities: Vec<Capability>) -> Actor {
        Actor {
            subject_id,
            username: format!("user{}", subject_id),
            role: "any".into(),
            capabilities,
        }
    }

    async fn seeded() -> (LedgerService, i32, Vec<Uuid>) {
        let repository = Repository::memory();
        let item = repository
            .equipment_create(CreateEquipment {
                name: "Football".into(),
                category: Category::Sports,
                condition: None,
                quantity: 10,
            })
            .await
            .unwrap();

        let mut ids = Vec::new();
        let start = Utc::now();
        for (offset, holder) in [(0, 1), (1, 2), (2, 1)] {
            let created_at = start + Duration::seconds(offset);
            let r = repository
                .reserve(NewReservation {
                    id: Uuid::new_v4(),
                    equipment_id: item.id,
                    holder_id: holder,
                    units: 1,
                    request_key: None,
                    created_at,
                    due_at: created_at + Duration::days(1),
                })
                .await
                .unwrap();
            ids.push(r.reservation.id);
        }
        (LedgerService::new(repository), item.id, ids)
    }

    #[tokio::test]
    async fn test_active_reservations_in_creation_order() {
        let (ledger, item_id, ids) = seeded().await;
        let viewer = actor(99, vec![Capability::ViewLedger]);

        let active = ledger.active_reservations_for(&viewer, item_id).await.unwrap();
        let order: Vec<_> = active.iter().map(|d| d.reservation.id).collect();
        assert_eq!(order, ids);

        let err = ledger
            .active_reservations_for(&actor(1, vec![Capability::Borrow]), item_id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_get_hides_reservations_of_others() {
        let (ledger, _, ids) = seeded().await;
        assert!(ledger.get(&actor(1, vec![]), ids[0]).await.is_ok());
        assert!(matches!(
            ledger.get(&actor(2, vec![]), ids[0]).await,
            Err(AppError::NotFound(_))
        ));
        assert!(ledger
            .get(&actor(3, vec![Capability::ViewLedger]), ids[0])
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_mine_lists_only_callers_reservations() {
        let (ledger, _, ids) = seeded().await;
        let mine = ledger.mine(&actor(1, vec![]), false).await.unwrap();
        let got: Vec<_> = mine.iter().map(|d| d.reservation.id).collect();
        assert_eq!(got, vec![ids[0], ids[2]]);
        assert!(mine.iter().all(|d| !d.is_overdue));
    }
}
