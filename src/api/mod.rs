//! API handlers for the circulation REST endpoints

pub mod health;
pub mod loans;
pub mod openapi;
pub mod reservations;

use validator::Validate;

use crate::error::{AppError, AppResult};

/// Reject a request body that fails its field rules
pub(crate) fn validate_request<T: Validate>(request: &T) -> AppResult<()> {
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))
}
