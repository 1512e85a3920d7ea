//! Repository layer: equipment catalog and reservation ledger storage

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use std::ops::Deref;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        equipment::{Category, CreateEquipment, EquipmentItem, EquipmentView, UpdateEquipment},
        reservation::{NewReservation, Reservation, ReservationStatus, Reserved},
    },
};

/// Storage backend for the catalog and the ledger.
///
/// Every method is atomic on its own. In particular `reserve` performs the
/// availability check and the insert as one unit, and `equipment_update`
/// checks a quantity reduction against held units in the same unit as the
/// write, so `0 <= available_quantity <= quantity` holds for any caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync {
    /// Check the backend is reachable
    async fn ping(&self) -> AppResult<()>;

    /// List live equipment, optionally restricted to one category, joined
    /// with availability. Ordered by name, then id.
    async fn equipment_list(&self, category: Option<Category>) -> AppResult<Vec<EquipmentView>>;

    /// Get live equipment by ID
    async fn equipment_get_by_id(&self, id: i32) -> AppResult<EquipmentItem>;

    /// Get live equipment by ID with its availability at this instant
    async fn equipment_availability(&self, id: i32) -> AppResult<EquipmentView>;

    async fn equipment_create(&self, data: CreateEquipment) -> AppResult<EquipmentItem>;

    /// Edit equipment. Lowering `quantity` below held units is a `Conflict`.
    async fn equipment_update(&self, id: i32, data: UpdateEquipment) -> AppResult<EquipmentItem>;

    /// Retire equipment. With active reservations this is a `Conflict`
    /// unless `force`, which cancels them; the cancelled ones are returned.
    async fn equipment_retire(
        &self,
        id: i32,
        force: bool,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<Reservation>>;

    /// Insert an active reservation if enough units are free, answering
    /// with the availability left once it is recorded.
    ///
    /// A request whose id is already recorded, or carrying a `request_key`
    /// recorded for the same item and holder on a still active reservation,
    /// yields the recorded reservation unchanged. A key bound to a closed
    /// reservation is `KeyReused`.
    async fn reserve(&self, request: NewReservation) -> AppResult<Reserved>;

    /// Wait until no write is in flight on the item, then look the
    /// reservation up by id. `None` if it was never recorded.
    async fn reservation_settled(&self, equipment_id: i32, id: Uuid) -> AppResult<Option<Reserved>>;

    /// Move an active reservation to a terminal status. Absent or already
    /// closed reservations are `NotFound`.
    async fn close_reservation(
        &self,
        id: Uuid,
        status: ReservationStatus,
        at: DateTime<Utc>,
    ) -> AppResult<Reservation>;

    async fn reservation_get(&self, id: Uuid) -> AppResult<Reservation>;

    /// Active reservations for an item, oldest first
    async fn reservations_active_for(&self, equipment_id: i32) -> AppResult<Vec<Reservation>>;

    /// Reservations of one holder, oldest first
    async fn reservations_for_holder(
        &self,
        holder_id: i32,
        include_closed: bool,
    ) -> AppResult<Vec<Reservation>>;
}

/// Main repository handle shared by the services
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn Store>,
}

impl Repository {
    /// Repository over an in-process store
    pub fn memory() -> Self {
        Self::from_store(Arc::new(memory::MemoryStore::new()))
    }

    /// Repository over the given database pool
    pub fn postgres(pool: Pool<Postgres>) -> Self {
        Self::from_store(Arc::new(postgres::PgStore::new(pool)))
    }

    pub fn from_store(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

impl Deref for Repository {
    type Target = dyn Store;

    fn deref(&self) -> &Self::Target {
        self.store.as_ref()
    }
}
