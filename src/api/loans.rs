//! Loan management endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    error::AppResult,
    models::{CreateLoan, Loan},
    services::eligibility::Ineligibility,
    AppState,
};

use super::validate_request;

/// Borrowing eligibility of a user
#[derive(Serialize, ToSchema)]
pub struct EligibilityResponse {
    pub user_id: i32,
    pub eligible: bool,
    /// First blocking reason, absent when eligible
    pub reason: Option<Ineligibility>,
}

/// Get a loan by ID
#[utoipa::path(
    get,
    path = "/loans/{id}",
    tag = "loans",
    params(
        ("id" = i32, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Loan details", body = Loan),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn get_loan(
    State(state): State<AppState>,
    Path(loan_id): Path<i32>,
) -> AppResult<Json<Loan>> {
    let loan = state.services.loans.get_loan(loan_id).await?;
    Ok(Json(loan))
}

/// Get all loans of a user
#[utoipa::path(
    get,
    path = "/users/{id}/loans",
    tag = "loans",
    params(
        ("id" = i32, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "User's loans", body = Vec<Loan>),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user_loans(
    State(state): State<AppState>,
    Path(user_id): Path<i32>,
) -> AppResult<Json<Vec<Loan>>> {
    let loans = state.services.loans.get_user_loans(user_id).await?;
    Ok(Json(loans))
}

/// Check whether a user may borrow right now
#[utoipa::path(
    get,
    path = "/users/{id}/eligibility",
    tag = "loans",
    params(
        ("id" = i32, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "Eligibility verdict", body = EligibilityResponse),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user_eligibility(
    State(state): State<AppState>,
    Path(user_id): Path<i32>,
) -> AppResult<Json<EligibilityResponse>> {
    let reason = state
        .services
        .eligibility
        .check_at(user_id, Utc::now())
        .await?;

    Ok(Json(EligibilityResponse {
        user_id,
        eligible: reason.is_none(),
        reason,
    }))
}

/// Create a new loan (borrow a copy)
#[utoipa::path(
    post,
    path = "/loans",
    tag = "loans",
    request_body = CreateLoan,
    responses(
        (status = 201, description = "Loan created", body = Loan),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "User, copy or reservation not found"),
        (status = 409, description = "Copy not available or reservation mismatch"),
        (status = 422, description = "User may not borrow")
    )
)]
pub async fn create_loan(
    State(state): State<AppState>,
    Json(request): Json<CreateLoan>,
) -> AppResult<(StatusCode, Json<Loan>)> {
    validate_request(&request)?;

    let loan = state.services.loans.create_loan(request).await?;
    Ok((StatusCode::CREATED, Json(loan)))
}

/// Return a borrowed copy
#[utoipa::path(
    post,
    path = "/loans/{id}/return",
    tag = "loans",
    params(
        ("id" = i32, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Copy returned", body = Loan),
        (status = 404, description = "Loan not found"),
        (status = 409, description = "Already returned")
    )
)]
pub async fn return_loan(
    State(state): State<AppState>,
    Path(loan_id): Path<i32>,
) -> AppResult<Json<Loan>> {
    let loan = state.services.loans.return_loan(loan_id).await?;
    Ok(Json(loan))
}

/// Extend a loan's due date (once)
#[utoipa::path(
    post,
    path = "/loans/{id}/extend",
    tag = "loans",
    params(
        ("id" = i32, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Loan extended", body = Loan),
        (status = 404, description = "Loan not found"),
        (status = 409, description = "Already extended or not borrowed")
    )
)]
pub async fn extend_loan(
    State(state): State<AppState>,
    Path(loan_id): Path<i32>,
) -> AppResult<Json<Loan>> {
    let loan = state.services.loans.extend_loan(loan_id).await?;
    Ok(Json(loan))
}

/// Record payment of a loan's outstanding fine
#[utoipa::path(
    post,
    path = "/loans/{id}/pay-fine",
    tag = "loans",
    params(
        ("id" = i32, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Fine paid", body = Loan),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn pay_fine(
    State(state): State<AppState>,
    Path(loan_id): Path<i32>,
) -> AppResult<Json<Loan>> {
    let loan = state.services.loans.pay_fine(loan_id).await?;
    Ok(Json(loan))
}
