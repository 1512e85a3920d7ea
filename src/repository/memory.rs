//! In-process store keeping each item and its reservations in one slot

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::Store;
use crate::{
    error::{AppError, AppResult},
    models::{
        equipment::{Category, CreateEquipment, Condition, EquipmentItem, EquipmentView, UpdateEquipment},
        reservation::{NewReservation, Reservation, ReservationStatus, Reserved},
    },
};

/// One item with its full reservation history, in creation order
struct ItemSlot {
    item: EquipmentItem,
    reservations: Vec<Reservation>,
    retired: bool,
}

impl ItemSlot {
    fn held_units(&self) -> i32 {
        self.reservations
            .iter()
            .filter(|r| r.is_active())
            .map(|r| r.units_held)
            .sum()
    }

    fn available(&self) -> i32 {
        self.item.quantity - self.held_units()
    }

    fn view(&self) -> EquipmentView {
        EquipmentView::new(self.item.clone(), self.available())
    }

    /// The recorded reservation a resubmitted request stands for, if any
    fn replay_of(&self, request: &NewReservation) -> AppResult<Option<&Reservation>> {
        let key = request.request_key.as_deref();
        let found = self.reservations.iter().find(|r| {
            r.id == request.id
                || (key.is_some() && r.holder_id == request.holder_id && r.request_key.as_deref() == key)
        });
        match found {
            Some(r) if r.id != request.id && !r.is_active() => Err(AppError::KeyReused(format!(
                "Request key belongs to reservation {} which is already {}",
                r.id, r.status
            ))),
            other => Ok(other),
        }
    }

    fn live(&self) -> AppResult<&Self> {
        if self.retired {
            return Err(not_found(self.item.id));
        }
        Ok(self)
    }
}

fn not_found(id: i32) -> AppError {
    AppError::NotFound(format!("Equipment {} not found", id))
}

/// Store backed by process memory.
///
/// Each item lives in its own async mutex so operations on different items
/// never contend. The slot map and reservation index are plain locks held
/// only for lookups and inserts, never across an await. Mutations happen
/// after the slot lock is taken and contain no await, so dropping a call
/// midway leaves nothing half-written.
pub struct MemoryStore {
    slots: RwLock<HashMap<i32, Arc<Mutex<ItemSlot>>>>,
    reservation_index: RwLock<HashMap<Uuid, i32>>,
    next_id: AtomicI32,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            reservation_index: RwLock::new(HashMap::new()),
            next_id: AtomicI32::new(1),
        }
    }

    fn slot(&self, id: i32) -> AppResult<Arc<Mutex<ItemSlot>>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    fn all_slots(&self) -> Vec<Arc<Mutex<ItemSlot>>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn slot_for_reservation(&self, id: Uuid) -> AppResult<Arc<Mutex<ItemSlot>>> {
        let equipment_id = self
            .reservation_index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .copied()
            .ok_or_else(|| AppError::NotFound(format!("Reservation {} not found", id)))?;
        self.slot(equipment_id)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    async fn equipment_list(&self, category: Option<Category>) -> AppResult<Vec<EquipmentView>> {
        let mut views = Vec::new();
        for slot in self.all_slots() {
            let slot = slot.lock().await;
            if slot.retired {
                continue;
            }
            if category.as_ref().map_or(true, |c| *c == slot.item.category) {
                views.push(slot.view());
            }
        }
        views.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(views)
    }

    async fn equipment_get_by_id(&self, id: i32) -> AppResult<EquipmentItem> {
        let slot = self.slot(id)?;
        let slot = slot.lock().await;
        Ok(slot.live()?.item.clone())
    }

    async fn equipment_availability(&self, id: i32) -> AppResult<EquipmentView> {
        let slot = self.slot(id)?;
        let slot = slot.lock().await;
        Ok(slot.live()?.view())
    }

    async fn equipment_create(&self, data: CreateEquipment) -> AppResult<EquipmentItem> {
        if data.quantity < 0 {
            return Err(AppError::InvalidRequest("Quantity cannot be negative".to_string()));
        }
        let now = Utc::now();
        let item = EquipmentItem {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            name: data.name,
            category: data.category,
            condition: data.condition.unwrap_or(Condition::Good),
            quantity: data.quantity,
            created_at: now,
            updated_at: now,
        };
        let slot = ItemSlot {
            item: item.clone(),
            reservations: Vec::new(),
            retired: false,
        };
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(item.id, Arc::new(Mutex::new(slot)));
        Ok(item)
    }

    async fn equipment_update(&self, id: i32, data: UpdateEquipment) -> AppResult<EquipmentItem> {
        let slot = self.slot(id)?;
        let mut slot = slot.lock().await;
        slot.live()?;

        if let Some(quantity) = data.quantity {
            let held = slot.held_units();
            if quantity < held {
                return Err(AppError::Conflict(format!(
                    "Cannot set quantity to {}: {} units are on loan",
                    quantity, held
                )));
            }
        }

        data.apply_to(&mut slot.item, Utc::now());
        Ok(slot.item.clone())
    }

    async fn equipment_retire(
        &self,
        id: i32,
        force: bool,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<Reservation>> {
        let slot = self.slot(id)?;
        let mut slot = slot.lock().await;
        slot.live()?;

        let active = slot.reservations.iter().filter(|r| r.is_active()).count();
        if active > 0 && !force {
            return Err(AppError::Conflict(format!(
                "Equipment {} has {} active reservations",
                id, active
            )));
        }

        let mut cancelled = Vec::with_capacity(active);
        for reservation in slot.reservations.iter_mut().filter(|r| r.is_active()) {
            reservation.status = ReservationStatus::Cancelled;
            reservation.closed_at = Some(at);
            cancelled.push(reservation.clone());
        }
        slot.retired = true;
        Ok(cancelled)
    }

    async fn reserve(&self, request: NewReservation) -> AppResult<Reserved> {
        let slot = self.slot(request.equipment_id)?;
        let mut slot = slot.lock().await;
        slot.live()?;

        if let Some(existing) = slot.replay_of(&request)? {
            let reservation = existing.clone();
            return Ok(Reserved {
                reservation,
                available_quantity: slot.available(),
            });
        }

        let available = slot.available();
        if request.units > available {
            return Err(AppError::InsufficientStock {
                requested: request.units,
                available,
            });
        }

        let reservation = request.into_reservation();
        self.reservation_index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(reservation.id, reservation.equipment_id);
        slot.reservations.push(reservation.clone());
        Ok(Reserved {
            reservation,
            available_quantity: slot.available(),
        })
    }

    async fn reservation_settled(&self, equipment_id: i32, id: Uuid) -> AppResult<Option<Reserved>> {
        let slot = self.slot(equipment_id)?;
        let slot = slot.lock().await;
        Ok(slot
            .reservations
            .iter()
            .find(|r| r.id == id)
            .map(|r| Reserved {
                reservation: r.clone(),
                available_quantity: slot.available(),
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

        let slot = self.slot_for_reservation(id)?;
        let mut slot = slot.lock().await;
        let reservation = slot
            .reservations
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Reservation {} not found", id)))?;

        if reservation.status.is_closed() {
            return Err(AppError::NotFound(format!(
                "Reservation {} is already {}",
                id, reservation.status
            )));
        }

        reservation.status = status;
        reservation.closed_at = Some(at);
        Ok(reservation.clone())
    }

    async fn reservation_get(&self, id: Uuid) -> AppResult<Reservation> {
        let slot = self.slot_for_reservation(id)?;
        let slot = slot.lock().await;
        slot.reservations
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Reservation {} not found", id)))
    }

    async fn reservations_active_for(&self, equipment_id: i32) -> AppResult<Vec<Reservation>> {
        let slot = self.slot(equipment_id)?;
        let slot = slot.lock().await;
        Ok(slot
            .live()?
            .reservations
            .iter()
            .filter(|r| r.is_active())
            .cloned()
            .collect())
    }

    async fn reservations_for_holder(
        &self,
        holder_id: i32,
        include_closed: bool,
    ) -> AppResult<Vec<Reservation>> {
        let mut found = Vec::new();
        for slot in self.all_slots() {
            let slot = slot.lock().await;
            found.extend(
                slot.reservations
                    .iter()
                    .filter(|r| r.holder_id == holder_id && (include_closed || r.is_active()))
                    .cloned(),
            );
        }
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }
}
