//! Equipment API endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    error::AppResult,
    models::{
        equipment::{CreateEquipment, EquipmentItem, EquipmentQuery, EquipmentView, UpdateEquipment},
        reservation::{Reservation, ReservationDetails},
    },
    AppState,
};

use super::AuthenticatedUser;

/// Retire parameters
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RetireQuery {
    /// Cancel active reservations instead of refusing
    #[serde(default)]
    pub force: bool,
}

/// Retire response
#[derive(Serialize, ToSchema)]
pub struct RetireResponse {
    pub id: i32,
    /// Reservations closed as cancelled by a forced retire
    pub cancelled: Vec<Reservation>,
}

/// List equipment with live availability
#[utoipa::path(
    get,
    path = "/equipment",
    tag = "equipment",
    security(("bearer_auth" = [])),
    params(EquipmentQuery),
    responses(
        (status = 200, description = "Equipment list", body = Vec<EquipmentView>)
    )
)]
pub async fn list_equipment(
    State(state): State<AppState>,
    AuthenticatedUser(_actor): AuthenticatedUser,
    Query(query): Query<EquipmentQuery>,
) -> AppResult<Json<Vec<EquipmentView>>> {
    let equipment = state.services.catalog.list(&query).await?;
    Ok(Json(equipment))
}

/// Get equipment by ID
#[utoipa::path(
    get,
    path = "/equipment/{id}",
    tag = "equipment",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Equipment ID")),
    responses(
        (status = 200, description = "Equipment with availability", body = EquipmentView),
        (status = 404, description = "Equipment not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_equipment(
    State(state): State<AppState>,
    AuthenticatedUser(_actor): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<EquipmentView>> {
    let view = state.services.catalog.get(id).await?;
    Ok(Json(view))
}

/// Create equipment
#[utoipa::path(
    post,
    path = "/equipment",
    tag = "equipment",
    security(("bearer_auth" = [])),
    request_body = CreateEquipment,
    responses(
        (status = 201, description = "Equipment created", body = EquipmentItem),
        (status = 400, description = "Invalid request", body = crate::error::ErrorResponse),
        (status = 403, description = "Missing manage_equipment", body = crate::error::ErrorResponse)
    )
)]
pub async fn create_equipment(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Json(data): Json<CreateEquipment>,
) -> AppResult<(StatusCode, Json<EquipmentItem>)> {
    let item = state.services.equipment.create(&actor, data).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

/// Update equipment
#[utoipa::path(
    put,
    path = "/equipment/{id}",
    tag = "equipment",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Equipment ID")),
    request_body = UpdateEquipment,
    responses(
        (status = 200, description = "Equipment updated", body = EquipmentItem),
        (status = 404, description = "Equipment not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Quantity below units on loan", body = crate::error::ErrorResponse)
    )
)]
pub async fn update_equipment(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Path(id): Path<i32>,
    Json(data): Json<UpdateEquipment>,
) -> AppResult<Json<EquipmentItem>> {
    let item = state.services.equipment.update(&actor, id, data).await?;
    Ok(Json(item))
}

/// Retire equipment
#[utoipa::path(
    delete,
    path = "/equipment/{id}",
    tag = "equipment",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Equipment ID"), RetireQuery),
    responses(
        (status = 200, description = "Equipment retired", body = RetireResponse),
        (status = 404, description = "Equipment not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Active reservations without force", body = crate::error::ErrorResponse)
    )
)]
pub async fn delete_equipment(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Path(id): Path<i32>,
    Query(query): Query<RetireQuery>,
) -> AppResult<Json<RetireResponse>> {
    let cancelled = state.services.equipment.retire(&actor, id, query.force).await?;
    Ok(Json(RetireResponse { id, cancelled }))
}

/// Active reservations on an item
#[utoipa::path(
    get,
    path = "/equipment/{id}/reservations",
    tag = "equipment",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Equipment ID")),
    responses(
        (status = 200, description = "Active reservations, oldest first", body = Vec<ReservationDetails>),
        (status = 403, description = "Missing view_ledger", body = crate::error::ErrorResponse)
    )
)]
pub async fn list_active_reservations(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<Vec<ReservationDetails>>> {
    let reservations = state.services.ledger.active_reservations_for(&actor, id).await?;
    Ok(Json(reservations))
}
