//! Authentication endpoints

use axum::{extract::State, Json};

use crate::{
    error::AppResult,
    models::session::{Actor, Credentials},
    services::identity::SessionEstablished,
    AppState,
};

use super::AuthenticatedUser;

/// Exchange credentials for a session token
#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "auth",
    request_body = Credentials,
    responses(
        (status = 200, description = "Session established", body = SessionEstablished),
        (status = 401, description = "Invalid username or password", body = crate::error::ErrorResponse)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> AppResult<Json<SessionEstablished>> {
    let session = state.services.sessions.login(&credentials).await?;
    Ok(Json(session))
}

/// The acting subject behind the bearer token
#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current actor", body = Actor),
        (status = 401, description = "Missing or invalid token", body = crate::error::ErrorResponse)
    )
)]
pub async fn me(AuthenticatedUser(actor): AuthenticatedUser) -> Json<Actor> {
    Json(actor)
}
