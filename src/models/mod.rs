//! Data models for Equiplend

pub mod equipment;
pub mod reservation;
pub mod session;

// Re-export commonly used types
pub use equipment::{Category, Condition, EquipmentItem, EquipmentView};
pub use reservation::{NewReservation, Reservation, ReservationDetails, ReservationStatus};
pub use session::{Actor, Capability, Credentials, Identity, SessionClaims};
