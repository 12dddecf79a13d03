//! OpenAPI documentation

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{health, loans, reservations};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Circulation API",
        version = "1.0.0",
        description = "Loan and reservation lifecycle REST API"
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Loans
        loans::get_loan,
        loans::get_user_loans,
        loans::get_user_eligibility,
        loans::create_loan,
        loans::return_loan,
        loans::extend_loan,
        loans::pay_fine,
        // Reservations
        reservations::get_reservation,
        reservations::get_user_reservations,
        reservations::create_reservation,
        reservations::cancel_reservation,
    ),
    components(
        schemas(
            // Loans
            crate::models::Loan,
            crate::models::LoanStatus,
            crate::models::CreateLoan,
            loans::EligibilityResponse,
            crate::services::eligibility::Ineligibility,
            // Reservations
            crate::models::Reservation,
            crate::models::ReservationStatus,
            crate::models::CreateReservation,
            reservations::CancelReservationRequest,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "loans", description = "Loan management"),
        (name = "reservations", description = "Reservation management")
    )
)]
pub struct ApiDoc;

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
