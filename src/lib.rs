//! Circulation server
//!
//! Loan and reservation lifecycle engine for a library backend: borrowing,
//! returns, extensions, overdue fines, FIFO holds on scarce copies and the
//! periodic sweeps that keep them moving, exposed as a REST JSON API.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}
