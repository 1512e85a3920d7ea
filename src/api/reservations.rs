//! Borrow, return and reservation endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppResult,
    models::reservation::{
        BorrowRequest, Reservation, ReservationDetails, ReservationStatus, Reserved, ReturnRequest,
    },
    AppState,
};

use super::AuthenticatedUser;

/// Borrow response
#[derive(Serialize, ToSchema)]
pub struct BorrowResponse {
    pub reservation_id: Uuid,
    pub item_id: i32,
    pub units_held: i32,
    pub status: ReservationStatus,
    pub due_at: DateTime<Utc>,
    /// Units left free on the item, read in the same atomic unit as the borrow
    pub available_quantity: i32,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MineQuery {
    /// Include returned and cancelled reservations
    #[serde(default)]
    pub include_closed: bool,
}

/// Borrow units of an item
#[utoipa::path(
    post,
    path = "/borrow",
    tag = "reservations",
    security(("bearer_auth" = [])),
    request_body = BorrowRequest,
    responses(
        (status = 201, description = "Reservation created", body = BorrowResponse),
        (status = 400, description = "Invalid units or loan length", body = crate::error::ErrorResponse),
        (status = 403, description = "Missing borrow", body = crate::error::ErrorResponse),
        (status = 404, description = "Equipment not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Insufficient stock, reused request key or persistent conflict", body = crate::error::ErrorResponse),
        (status = 503, description = "Timed out", body = crate::error::ErrorResponse)
    )
)]
pub async fn borrow(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Json(request): Json<BorrowRequest>,
) -> AppResult<(StatusCode, Json<BorrowResponse>)> {
    request.validate()?;
    let Reserved {
        reservation,
        available_quantity,
    } = state.services.availability.borrow(&actor, request).await?;

    Ok((
        StatusCode::CREATED,
        Json(BorrowResponse {
            reservation_id: reservation.id,
            item_id: reservation.equipment_id,
            units_held: reservation.units_held,
            status: reservation.status,
            due_at: reservation.due_at,
            available_quantity,
        }),
    ))
}

/// Return a reservation
#[utoipa::path(
    post,
    path = "/return",
    tag = "reservations",
    security(("bearer_auth" = [])),
    request_body = ReturnRequest,
    responses(
        (status = 200, description = "Reservation returned", body = Reservation),
        (status = 403, description = "Not the holder and missing return_any", body = crate::error::ErrorResponse),
        (status = 404, description = "Reservation absent or already closed", body = crate::error::ErrorResponse)
    )
)]
pub async fn return_reservation(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Json(request): Json<ReturnRequest>,
) -> AppResult<Json<Reservation>> {
    let reservation = state
        .services
        .availability
        .return_reservation(&actor, request.reservation_id)
        .await?;
    Ok(Json(reservation))
}

/// Cancel a reservation (admin override)
#[utoipa::path(
    post,
    path = "/reservations/{id}/cancel",
    tag = "reservations",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Reservation ID")),
    responses(
        (status = 200, description = "Reservation cancelled", body = Reservation),
        (status = 403, description = "Missing cancel_any", body = crate::error::ErrorResponse),
        (status = 404, description = "Reservation absent or already closed", body = crate::error::ErrorResponse)
    )
)]
pub async fn cancel_reservation(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Reservation>> {
    let reservation = state.services.availability.cancel_reservation(&actor, id).await?;
    Ok(Json(reservation))
}

/// Get one reservation
#[utoipa::path(
    get,
    path = "/reservations/{id}",
    tag = "reservations",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Reservation ID")),
    responses(
        (status = 200, description = "Reservation", body = ReservationDetails),
        (status = 404, description = "Reservation not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_reservation(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ReservationDetails>> {
    let details = state.services.ledger.get(&actor, id).await?;
    Ok(Json(details))
}

/// The caller's reservations
#[utoipa::path(
    get,
    path = "/reservations/mine",
    tag = "reservations",
    security(("bearer_auth" = [])),
    params(MineQuery),
    responses(
        (status = 200, description = "Caller's reservations, oldest first", body = Vec<ReservationDetails>)
    )
)]
pub async fn my_reservations(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Query(query): Query<MineQuery>,
) -> AppResult<Json<Vec<ReservationDetails>>> {
    let reservations = state.services.ledger.mine(&actor, query.include_closed).await?;
    Ok(Json(reservations))
}
