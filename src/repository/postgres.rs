//! PostgreSQL store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Pool, Postgres};
use uuid::Uuid;

use super::Store;
use crate::{
    error::{AppError, AppResult},
    models::{
        equipment::{Category, Condition, CreateEquipment, EquipmentItem, EquipmentRow, EquipmentView, UpdateEquipment},
        reservation::{NewReservation, Reservation, ReservationRow, ReservationStatus, Reserved},
    },
};

const EQUIPMENT_COLUMNS: &str = "id, name, category, condition, quantity, created_at, updated_at";

const RESERVATION_COLUMNS: &str =
    "id, equipment_id, holder_id, units_held, status, request_key, created_at, due_at, closed_at";

/// Equipment row joined with its computed availability
#[derive(Debug, FromRow)]
struct EquipmentViewRow {
    #[sqlx(flatten)]
    item: EquipmentRow,
    available_quantity: i32,
}

impl From<EquipmentViewRow> for EquipmentView {
    fn from(row: EquipmentViewRow) -> Self {
        EquipmentView::new(row.item.into(), row.available_quantity)
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn not_found(id: i32) -> AppError {
    AppError::NotFound(format!("Equipment {} not found", id))
}

/// Lock the live equipment row for the rest of the transaction and return its quantity
async fn lock_quantity(conn: &mut sqlx::PgConnection, id: i32) -> AppResult<i32> {
    sqlx::query_scalar::<_, i32>(
        "SELECT quantity FROM equipment WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| not_found(id))
}

async fn held_units(conn: &mut sqlx::PgConnection, id: i32) -> AppResult<i32> {
    let held: i32 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(units_held), 0)::int FROM reservations
        WHERE equipment_id = $1 AND status = 'active'
        "#,
    )
    .bind(id)
    .fetch_one(conn)
    .await?;
    Ok(held)
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn equipment_list(&self, category: Option<Category>) -> AppResult<Vec<EquipmentView>> {
        let rows = sqlx::query_as::<_, EquipmentViewRow>(
            r#"
            SELECT e.id, e.name, e.category, e.condition, e.quantity, e.created_at, e.updated_at,
                   (e.quantity - COALESCE(SUM(r.units_held) FILTER (WHERE r.status = 'active'), 0))::int
                       AS available_quantity
            FROM equipment e
            LEFT JOIN reservations r ON r.equipment_id = e.id
            WHERE e.deleted_at IS NULL
              AND ($1::text IS NULL OR e.category = $1)
            GROUP BY e.id
            ORDER BY e.name, e.id
            "#,
        )
        .bind(category.map(String::from))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(EquipmentView::from).collect())
    }

    async fn equipment_get_by_id(&self, id: i32) -> AppResult<EquipmentItem> {
        sqlx::query_as::<_, EquipmentRow>(&format!(
            "SELECT {} FROM equipment WHERE id = $1 AND deleted_at IS NULL",
            EQUIPMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(EquipmentItem::from)
        .ok_or_else(|| not_found(id))
    }

    async fn equipment_availability(&self, id: i32) -> AppResult<EquipmentView> {
        sqlx::query_as::<_, EquipmentViewRow>(
            r#"
            SELECT e.id, e.name, e.category, e.condition, e.quantity, e.created_at, e.updated_at,
                   (e.quantity - COALESCE((
                       SELECT SUM(r.units_held) FROM reservations r
                       WHERE r.equipment_id = e.id AND r.status = 'active'
                   ), 0))::int AS available_quantity
            FROM equipment e
            WHERE e.id = $1 AND e.deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(EquipmentView::from)
        .ok_or_else(|| not_found(id))
    }

    async fn equipment_create(&self, data: CreateEquipment) -> AppResult<EquipmentItem> {
        let row = sqlx::query_as::<_, EquipmentRow>(&format!(
            r#"
            INSERT INTO equipment (name, category, condition, quantity)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            EQUIPMENT_COLUMNS
        ))
        .bind(&data.name)
        .bind(data.category.as_str())
        .bind(data.condition.unwrap_or(Condition::Good).as_str())
        .bind(data.quantity)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn equipment_update(&self, id: i32, data: UpdateEquipment) -> AppResult<EquipmentItem> {
        let mut tx = self.pool.begin().await?;
        lock_quantity(&mut tx, id).await?;

        if let Some(quantity) = data.quantity {
            let held = held_units(&mut tx, id).await?;
            if quantity < held {
                return Err(AppError::Conflict(format!(
                    "Cannot set quantity to {}: {} units are on loan",
                    quantity, held
                )));
            }
        }

        let row = sqlx::query_as::<_, EquipmentRow>(&format!(
            r#"
            UPDATE equipment SET
                name = COALESCE($2, name),
                category = COALESCE($3, category),
                condition = COALESCE($4, condition),
                quantity = COALESCE($5, quantity),
                updated_at = $6
            WHERE id = $1
            RETURNING {}
            "#,
            EQUIPMENT_COLUMNS
        ))
        .bind(id)
        .bind(&data.name)
        .bind(data.category.as_ref().map(Category::as_str))
        .bind(data.condition.map(|c| c.as_str()))
        .bind(data.quantity)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn equipment_retire(
        &self,
        id: i32,
        force: bool,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<Reservation>> {
        let mut tx = self.pool.begin().await?;
        lock_quantity(&mut tx, id).await?;

        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reservations WHERE equipment_id = $1 AND status = 'active'",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        if active > 0 && !force {
            return Err(AppError::Conflict(format!(
                "Equipment {} has {} active reservations",
                id, active
            )));
        }

        let cancelled = sqlx::query_as::<_, ReservationRow>(&format!(
            r#"
            UPDATE reservations SET status = 'cancelled', closed_at = $2
            WHERE equipment_id = $1 AND status = 'active'
            RETURNING {}
            "#,
            RESERVATION_COLUMNS
        ))
        .bind(id)
        .bind(at)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("UPDATE equipment SET deleted_at = $2, updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(cancelled.into_iter().map(Reservation::from).collect())
    }

    async fn reserve(&self, request: NewReservation) -> AppResult<Reserved> {
        let mut tx = self.pool.begin().await?;
        // Row lock serializes every reserve on this item across processes
        let quantity = lock_quantity(&mut tx, request.equipment_id).await?;
        let available = quantity - held_units(&mut tx, request.equipment_id).await?;

        // A retried request finds its own row, or the row recorded under its key
        let replay = sqlx::query_as::<_, ReservationRow>(&format!(
            r#"
            SELECT {} FROM reservations
            WHERE id = $1
               OR (equipment_id = $2 AND holder_id = $3 AND request_key = $4)
            ORDER BY (id = $1) DESC
            LIMIT 1
            "#,
            RESERVATION_COLUMNS
        ))
        .bind(request.id)
        .bind(request.equipment_id)
        .bind(request.holder_id)
        .bind(&request.request_key)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(existing) = replay.map(Reservation::from) {
            if existing.id != request.id && !existing.is_active() {
                return Err(AppError::KeyReused(format!(
                    "Request key belongs to reservation {} which is already {}",
                    existing.id, existing.status
                )));
            }
            return Ok(Reserved {
                reservation: existing,
                available_quantity: available,
            });
        }

        if request.units > available {
            return Err(AppError::InsufficientStock {
                requested: request.units,
                available,
            });
        }

        let row = sqlx::query_as::<_, ReservationRow>(&format!(
            r#"
            INSERT INTO reservations (id, equipment_id, holder_id, units_held, status, request_key, created_at, due_at)
            VALUES ($1, $2, $3, $4, 'active', $5, $6, $7)
            RETURNING {}
            "#,
            RESERVATION_COLUMNS
        ))
        .bind(request.id)
        .bind(request.equipment_id)
        .bind(request.holder_id)
        .bind(request.units)
        .bind(&request.request_key)
        .bind(request.created_at)
        .bind(request.due_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Reserved {
            reservation: row.into(),
            available_quantity: available - request.units,
        })
    }

    async fn reservation_settled(&self, equipment_id: i32, id: Uuid) -> AppResult<Option<Reserved>> {
        let mut tx = self.pool.begin().await?;
        // Blocks until a transaction still holding the row lock commits or aborts.
        // Retired rows are included: a forced retire may have landed meanwhile.
        let quantity: i32 =
            sqlx::query_scalar("SELECT quantity FROM equipment WHERE id = $1 FOR UPDATE")
                .bind(equipment_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| not_found(equipment_id))?;

        let found = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {} FROM reservations WHERE id = $1",
            RESERVATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let held = held_units(&mut tx, equipment_id).await?;
        tx.rollback().await?;

        Ok(found.map(|row| Reserved {
            reservation: row.into(),
            available_quantity: quantity - held,
        }))
    }

    async fn close_reservation(
        &self,
        id: Uuid,
        status: ReservationStatus,
        at: DateTime<Utc>,
    ) -> AppResult<Reservation> {
        if !status.is_closed() {
            return Err(AppError::Internal(format!("Cannot close a reservation as {}", status)));
        }

        // Conditional update: only an active row can transition
        let closed = sqlx::query_as::<_, ReservationRow>(&format!(
            r#"
            UPDATE reservations SET status = $2, closed_at = $3
            WHERE id = $1 AND status = 'active'
            RETURNING {}
            "#,
            RESERVATION_COLUMNS
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        match closed {
            Some(row) => Ok(row.into()),
            None => {
                let existing = self.reservation_get(id).await?;
                Err(AppError::NotFound(format!(
                    "Reservation {} is already {}",
                    id, existing.status
                )))
            }
        }
    }

    async fn reservation_get(&self, id: Uuid) -> AppResult<Reservation> {
        sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {} FROM reservations WHERE id = $1",
            RESERVATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Reservation::from)
        .ok_or_else(|| AppError::NotFound(format!("Reservation {} not found", id)))
    }

    async fn reservations_active_for(&self, equipment_id: i32) -> AppResult<Vec<Reservation>> {
        // Distinguish an unknown item from one with nothing on loan
        self.equipment_get_by_id(equipment_id).await?;

        let rows = sqlx::query_as::<_, ReservationRow>(&format!(
            r#"
            SELECT {} FROM reservations
            WHERE equipment_id = $1 AND status = 'active'
            ORDER BY created_at, id
            "#,
            RESERVATION_COLUMNS
        ))
        .bind(equipment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Reservation::from).collect())
    }

    async fn reservations_for_holder(
        &self,
        holder_id: i32,
        include_closed: bool,
    ) -> AppResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, ReservationRow>(&format!(
            r#"
            SELECT {} FROM reservations
            WHERE holder_id = $1 AND ($2 OR status = 'active')
            ORDER BY created_at, id
            "#,
            RESERVATION_COLUMNS
        ))
        .bind(holder_id)
        .bind(include_closed)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Reservation::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sqlx::postgres::PgPoolOptions;

    /// Store over `DATABASE_URL` with migrations applied, `None` when unset
    async fn store() -> Option<PgStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(&url)
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        Some(PgStore::new(pool))
    }

    async fn item(store: &PgStore, quantity: i32) -> EquipmentItem {
        store
            .equipment_create(CreateEquipment {
                name: format!("Pg test item {}", Uuid::new_v4()),
                category: Category::Lab,
                condition: None,
                quantity,
            })
            .await
            .unwrap()
    }

    fn request(equipment_id: i32, holder_id: i32, key: Option<&str>) -> NewReservation {
        let now = Utc::now();
        NewReservation {
            id: Uuid::new_v4(),
            equipment_id,
            holder_id,
            units: 1,
            request_key: key.map(str::to_string),
            created_at: now,
            due_at: now + Duration::days(7),
        }
    }

    #[tokio::test]
    #[ignore] // Needs DATABASE_URL: cargo test -- --ignored
    async fn test_concurrent_last_unit_reserves_one_wins() {
        let Some(store) = store().await else { return };
        let item = item(&store, 1).await;

        let (a, b) = tokio::join!(
            store.reserve(request(item.id, 1, None)),
            store.reserve(request(item.id, 2, None))
        );
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(AppError::InsufficientStock { requested: 1, available: 0 }))));

        let view = store.equipment_availability(item.id).await.unwrap();
        assert_eq!(view.available_quantity, 0);
        assert_eq!(store.reservations_active_for(item.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    #[ignore]
    async fn test_resubmitted_reservation_replays_by_id() {
        let Some(store) = store().await else { return };
        let item = item(&store, 3).await;
        let submitted = request(item.id, 1, None);

        let first = store.reserve(submitted.clone()).await.unwrap();
        let again = store.reserve(submitted).await.unwrap();
        assert_eq!(first.reservation.id, again.reservation.id);
        assert_eq!((first.available_quantity, again.available_quantity), (2, 2));
        assert_eq!(store.reservations_active_for(item.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    #[ignore]
    async fn test_key_of_a_returned_reservation_is_not_reusable() {
        let Some(store) = store().await else { return };
        let item = item(&store, 2).await;
        let r = store
            .reserve(request(item.id, 1, Some("pg-k1")))
            .await
            .unwrap()
            .reservation;
        store
            .close_reservation(r.id, ReservationStatus::Returned, Utc::now())
            .await
            .unwrap();

        let err = store
            .reserve(request(item.id, 1, Some("pg-k1")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::KeyReused(_)));
        assert_eq!(store.equipment_availability(item.id).await.unwrap().available_quantity, 2);
    }

    #[tokio::test]
    #[ignore]
    async fn test_settled_lookup_sees_committed_reservation() {
        let Some(store) = store().await else { return };
        let item = item(&store, 4).await;
        let r = store.reserve(request(item.id, 1, None)).await.unwrap().reservation;

        let settled = store.reservation_settled(item.id, r.id).await.unwrap().unwrap();
        assert_eq!(settled.reservation.id, r.id);
        assert_eq!(settled.available_quantity, 3);
        assert!(store
            .reservation_settled(item.id, Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
    }
}
