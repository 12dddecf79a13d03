//! Helpers shared by the lending state machines: conflict retry and sweep bookkeeping

use std::future::Future;

use serde::Serialize;
use utoipa::ToSchema;

use crate::error::{AppError, AppResult};

/// Run a read-modify-write operation, retrying once with a fresh read when
/// the store reports a conflict. A second conflict becomes `Transient`.
pub async fn retry_on_conflict<T, F, Fut>(operation: &str, mut attempt: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    match attempt().await {
        Err(AppError::Conflict(msg)) => {
            tracing::debug!(operation, conflict = %msg, "Write conflict, retrying with fresh read");
            attempt().await.map_err(|e| match e {
                AppError::Conflict(msg) => AppError::Transient(format!("{}: {}", operation, msg)),
                other => other,
            })
        }
        other => other,
    }
}

/// Outcome of one sweep over a set of rows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SweepReport {
    /// Rows the sweep looked at
    pub examined: usize,
    /// Rows that changed state
    pub changed: usize,
    /// Rows whose processing failed; retried on the next tick
    pub failed: usize,
}

impl SweepReport {
    /// Record one item's result, logging failures without stopping the sweep
    pub fn record(&mut self, sweep: &str, item_id: i32, result: AppResult<bool>) {
        self.examined += 1;
        match result {
            Ok(true) => self.changed += 1,
            Ok(false) => {}
            Err(e) if e.is_rejection() => {
                tracing::debug!(sweep, item_id, reason = %e, "Sweep item skipped");
            }
            Err(e) => {
                self.failed += 1;
                tracing::warn!(sweep, item_id, error = %e, "Sweep item failed");
            }
        }
    }
}
