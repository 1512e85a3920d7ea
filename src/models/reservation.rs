//! Reservation (borrow record) model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Reservation lifecycle. `Returned` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Active,
    Returned,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Returned => "returned",
            ReservationStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_closed(&self) -> bool {
        !matches!(self, ReservationStatus::Active)
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ReservationStatus::Active),
            "returned" => Ok(ReservationStatus::Returned),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            _ => Err(format!("Invalid reservation status: {}", s)),
        }
    }
}

/// Internal row structure for database queries
#[derive(Debug, Clone, FromRow)]
pub struct ReservationRow {
    id: Uuid,
    equipment_id: i32,
    holder_id: i32,
    units_held: i32,
    status: String,
    request_key: Option<String>,
    created_at: DateTime<Utc>,
    due_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

impl From<ReservationRow> for Reservation {
    fn from(row: ReservationRow) -> Self {
        Reservation {
            id: row.id,
            equipment_id: row.equipment_id,
            holder_id: row.holder_id,
            units_held: row.units_held,
            // The column is CHECK-constrained to the three statuses
            status: row.status.parse().unwrap_or(ReservationStatus::Cancelled),
            request_key: row.request_key,
            created_at: row.created_at,
            due_at: row.due_at,
            closed_at: row.closed_at,
        }
    }
}

/// Reservation record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Reservation {
    pub id: Uuid,
    pub equipment_id: i32,
    pub holder_id: i32,
    pub units_held: i32,
    pub status: ReservationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.due_at < now
    }
}

/// Reservation with read-time flags for display
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReservationDetails {
    #[serde(flatten)]
    pub reservation: Reservation,
    pub is_overdue: bool,
}

impl ReservationDetails {
    pub fn at(reservation: Reservation, now: DateTime<Utc>) -> Self {
        let is_overdue = reservation.is_overdue(now);
        Self {
            reservation,
            is_overdue,
        }
    }
}

/// A reservation about to be inserted by the availability engine
#[derive(Debug, Clone, PartialEq)]
pub struct NewReservation {
    pub id: Uuid,
    pub equipment_id: i32,
    pub holder_id: i32,
    pub units: i32,
    pub request_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
}

impl NewReservation {
    pub fn into_reservation(self) -> Reservation {
        Reservation {
            id: self.id,
            equipment_id: self.equipment_id,
            holder_id: self.holder_id,
            units_held: self.units,
            status: ReservationStatus::Active,
            request_key: self.request_key,
            created_at: self.created_at,
            due_at: self.due_at,
            closed_at: None,
        }
    }
}

/// A recorded reservation with the item's availability read in the same
/// atomic unit as the write
#[derive(Debug, Clone, PartialEq)]
pub struct Reserved {
    pub reservation: Reservation,
    pub available_quantity: i32,
}

/// Borrow request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct BorrowRequest {
    pub item_id: i32,
    pub units: i32,
    /// Loan length in days (server default when absent)
    pub days: Option<i64>,
    /// Client-chosen key making retries of the same borrow idempotent
    #[validate(length(min = 1, max = 128, message = "Request key must be 1-128 characters"))]
    pub request_key: Option<String>,
}

/// Return request
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ReturnRequest {
    pub reservation_id: Uuid,
}
