//! Availability engine: the borrow/return protocol

use chrono::{Duration as ChronoDuration, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use super::locks::ItemLocks;
use crate::{
    config::AvailabilityConfig,
    error::{AppError, AppResult},
    models::{
        reservation::{BorrowRequest, NewReservation, Reservation, ReservationStatus, Reserved},
        session::{Actor, Capability},
    },
    repository::Repository,
};

/// Serializes borrow, return and cancel per item and keeps
/// `available_quantity = quantity - held units` exact under concurrency.
///
/// Each operation runs under `operation_timeout_ms` as a whole. A timeout
/// that fires while a write is in flight is followed by a settled lookup of
/// that write, so a commit that landed at the deadline is reported as done
/// rather than as `Timeout`.
#[derive(Clone)]
pub struct AvailabilityService {
    repository: Repository,
    locks: Arc<ItemLocks>,
    config: AvailabilityConfig,
}

impl AvailabilityService {
    pub fn new(repository: Repository, config: AvailabilityConfig) -> Self {
        Self {
            repository,
            locks: Arc::new(ItemLocks::new()),
            config,
        }
    }

    /// Take `units` of an item on loan for the calling actor
    pub async fn borrow(&self, actor: &Actor, request: BorrowRequest) -> AppResult<Reserved> {
        actor.require(Capability::Borrow)?;

        if request.units <= 0 {
            return Err(AppError::InvalidRequest(format!(
                "Units must be positive, got {}",
                request.units
            )));
        }

        let days = request.days.unwrap_or(self.config.default_loan_days);
        if days < 1 || days > self.config.max_loan_days {
            return Err(AppError::InvalidRequest(format!(
                "Loan length must be between 1 and {} days",
                self.config.max_loan_days
            )));
        }

        let now = Utc::now();
        // Built once so that retries resubmit the very same reservation
        let new_reservation = NewReservation {
            id: Uuid::new_v4(),
            equipment_id: request.item_id,
            holder_id: actor.subject_id,
            units: request.units,
            request_key: request.request_key,
            created_at: now,
            due_at: now + ChronoDuration::days(days),
        };

        let item_id = request.item_id;
        let mut result = self
            .within(
                self.deadline(),
                &format!("borrow on equipment {}", item_id),
                self.serialized(item_id, || self.repository.reserve(new_reservation.clone())),
            )
            .await;

        if matches!(result, Err(AppError::Timeout(_))) {
            if let Some(reserved) = self.settle(item_id, new_reservation.id).await {
                tracing::warn!(
                    "Borrow on equipment {} committed at the deadline as reservation {}",
                    item_id, reserved.reservation.id
                );
                result = Ok(reserved);
            }
        }

        match &result {
            Ok(Reserved { reservation, .. }) if reservation.id == new_reservation.id => tracing::info!(
                "Reservation {} created: {} units of equipment {} for subject {}",
                reservation.id, reservation.units_held, item_id, actor.subject_id
            ),
            Ok(Reserved { reservation, .. }) => tracing::info!(
                "Borrow replayed for subject {}: reservation {} already recorded",
                actor.subject_id, reservation.id
            ),
            Err(AppError::InsufficientStock { requested, available }) => tracing::warn!(
                "Borrow of {} units of equipment {} rejected: {} available",
                requested, item_id, available
            ),
            Err(e) => tracing::warn!("Borrow on equipment {} failed: {}", item_id, e),
        }
        result
    }

    /// Close a reservation as returned. Allowed for its holder, or anyone
    /// holding `return_any`.
    pub async fn return_reservation(&self, actor: &Actor, reservation_id: Uuid) -> AppResult<Reservation> {
        let closed = self
            .close(actor, reservation_id, ReservationStatus::Returned)
            .await?;
        tracing::info!(
            "Reservation {} returned by subject {}: {} units back on equipment {}",
            closed.id, actor.subject_id, closed.units_held, closed.equipment_id
        );
        Ok(closed)
    }

    /// Admin override closing a reservation as cancelled
    pub async fn cancel_reservation(&self, actor: &Actor, reservation_id: Uuid) -> AppResult<Reservation> {
        actor.require(Capability::CancelAny)?;
        let closed = self
            .close(actor, reservation_id, ReservationStatus::Cancelled)
            .await?;
        tracing::info!(
            "Reservation {} cancelled by subject {}",
            closed.id, actor.subject_id
        );
        Ok(closed)
    }

    /// Units of an item free to borrow at this instant
    pub async fn availability(&self, item_id: i32) -> AppResult<i32> {
        let view = self
            .within(
                self.deadline(),
                &format!("availability of equipment {}", item_id),
                self.repository.equipment_availability(item_id),
            )
            .await?;
        Ok(view.available_quantity)
    }

    async fn close(
        &self,
        actor: &Actor,
        reservation_id: Uuid,
        status: ReservationStatus,
    ) -> AppResult<Reservation> {
        let op = if status == ReservationStatus::Cancelled { "cancel" } else { "return" };
        let what = format!("{} of reservation {}", op, reservation_id);
        let deadline = self.deadline();

        let reservation = self
            .within(deadline, &what, self.repository.reservation_get(reservation_id))
            .await?;
        if reservation.status.is_closed() {
            return Err(AppError::NotFound(format!(
                "Reservation {} is already {}",
                reservation_id, reservation.status
            )));
        }

        if status == ReservationStatus::Returned
            && reservation.holder_id != actor.subject_id
            && !actor.can(Capability::ReturnAny)
        {
            return Err(AppError::Forbidden(format!(
                "Reservation {} is held by another subject",
                reservation_id
            )));
        }

        // The store re-checks the status under its own lock
        let equipment_id = reservation.equipment_id;
        let result = self
            .within(
                deadline,
                &what,
                self.serialized(equipment_id, || {
                    self.repository
                        .close_reservation(reservation_id, status, Utc::now())
                }),
            )
            .await;

        match result {
            Err(AppError::Timeout(msg)) => match self.settle(equipment_id, reservation_id).await {
                Some(settled) if settled.reservation.status == status => {
                    tracing::warn!(
                        "{} of reservation {} committed at the deadline",
                        op, reservation_id
                    );
                    Ok(settled.reservation)
                }
                _ => Err(AppError::Timeout(msg)),
            },
            other => other,
        }
    }

    /// Resolve a write a timeout interrupted: wait for the item to be free of
    /// in-flight writes, then look the reservation up. Bounded on its own.
    async fn settle(&self, item_id: i32, reservation_id: Uuid) -> Option<Reserved> {
        let lookup = self
            .within(
                self.deadline(),
                &format!("settled lookup of reservation {}", reservation_id),
                self.repository.reservation_settled(item_id, reservation_id),
            )
            .await;
        match lookup {
            Ok(found) => found,
            Err(e) => {
                tracing::error!(
                    "Outcome of reservation {} on equipment {} is unknown: {}",
                    reservation_id, item_id, e
                );
                None
            }
        }
    }

    /// Run `attempt` while holding the item's lock, retrying store conflicts
    async fn serialized<T, F, Fut>(&self, item_id: i32, mut attempt: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let _guard = self.locks.acquire(item_id).await;
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(AppError::Conflict(msg)) if retries < self.config.max_conflict_retries => {
                    retries += 1;
                    tracing::debug!(
                        "Ledger conflict on equipment {} (retry {}/{}): {}",
                        item_id, retries, self.config.max_conflict_retries, msg
                    );
                    let backoff = self.config.retry_backoff_ms * u64::from(retries);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                other => return other,
            }
        }
    }

    fn deadline(&self) -> Instant {
        Instant::now() + Duration::from_millis(self.config.operation_timeout_ms)
    }

    /// Fail with `Timeout` if `work` does not finish by `deadline`
    async fn within<T>(
        &self,
        deadline: Instant,
        what: &str,
        work: impl Future<Output = AppResult<T>>,
    ) -> AppResult<T> {
        match tokio::time::timeout_at(deadline, work).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "{} timed out after {} ms",
                    what, self.config.operation_timeout_ms
                );
                Err(AppError::Timeout(format!(
                    "{} did not complete within {} ms",
                    what, self.config.operation_timeout_ms
                )))
            }
        }
    }
}
