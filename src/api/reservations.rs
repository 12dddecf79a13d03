//! Reservation endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::{
    error::AppResult,
    models::{CreateReservation, Reservation},
    AppState,
};

use super::validate_request;

/// Cancel reservation request
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CancelReservationRequest {
    /// Staff member cancelling on the user's behalf
    pub processed_by: Option<i32>,
}

/// Get a reservation by ID
#[utoipa::path(
    get,
    path = "/reservations/{id}",
    tag = "reservations",
    params(
        ("id" = i32, Path, description = "Reservation ID")
    ),
    responses(
        (status = 200, description = "Reservation details", body = Reservation),
        (status = 404, description = "Reservation not found")
    )
)]
pub async fn get_reservation(
    State(state): State<AppState>,
    Path(reservation_id): Path<i32>,
) -> AppResult<Json<Reservation>> {
    let reservation = state
        .services
        .reservations
        .get_reservation(reservation_id)
        .await?;
    Ok(Json(reservation))
}

/// Get all reservations of a user
#[utoipa::path(
    get,
    path = "/users/{id}/reservations",
    tag = "reservations",
    params(
        ("id" = i32, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "User's reservations", body = Vec<Reservation>),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user_reservations(
    State(state): State<AppState>,
    Path(user_id): Path<i32>,
) -> AppResult<Json<Vec<Reservation>>> {
    let reservations = state
        .services
        .reservations
        .get_user_reservations(user_id)
        .await?;
    Ok(Json(reservations))
}

/// Place a hold on a variant
#[utoipa::path(
    post,
    path = "/reservations",
    tag = "reservations",
    request_body = CreateReservation,
    responses(
        (status = 201, description = "Reservation queued", body = Reservation),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "User or variant not found")
    )
)]
pub async fn create_reservation(
    State(state): State<AppState>,
    Json(request): Json<CreateReservation>,
) -> AppResult<(StatusCode, Json<Reservation>)> {
    validate_request(&request)?;

    let reservation = state
        .services
        .reservations
        .create_reservation(request)
        .await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

/// Cancel a pending or available reservation
#[utoipa::path(
    post,
    path = "/reservations/{id}/cancel",
    tag = "reservations",
    params(
        ("id" = i32, Path, description = "Reservation ID")
    ),
    request_body = CancelReservationRequest,
    responses(
        (status = 200, description = "Reservation cancelled", body = Reservation),
        (status = 404, description = "Reservation not found"),
        (status = 409, description = "Reservation already closed")
    )
)]
pub async fn cancel_reservation(
    State(state): State<AppState>,
    Path(reservation_id): Path<i32>,
    request: Option<Json<CancelReservationRequest>>,
) -> AppResult<Json<Reservation>> {
    let Json(request) = request.unwrap_or_default();

    let reservation = state
        .services
        .reservations
        .cancel_reservation(reservation_id, request.processed_by)
        .await?;
    Ok(Json(reservation))
}
