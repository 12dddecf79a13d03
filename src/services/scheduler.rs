//! Periodic driver for the time-based lending transitions
//!
//! Each tick runs, in this order:
//! 1. overdue detection and fine accrual
//! 2. due date reminders
//! 3. fine notifications
//! 4. availability matching
//! 5. reservation expiry
//!
//! Fines are current before anyone is notified about them, and a copy matched
//! in step 4 cannot be expired in the same tick. A step that fails as a whole
//! ends the tick; the next tick starts again from step 1.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{error, info};

use crate::error::AppResult;

use super::{loans::LoansService, reservations::ReservationsService, sweep::SweepReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStep {
    OverdueSweep,
    DueDateReminders,
    FineNotifications,
    AvailabilityMatching,
    ReservationExpiry,
}

impl TickStep {
    pub const ORDER: [TickStep; 5] = [
        TickStep::OverdueSweep,
        TickStep::DueDateReminders,
        TickStep::FineNotifications,
        TickStep::AvailabilityMatching,
        TickStep::ReservationExpiry,
    ];
}

impl fmt::Display for TickStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TickStep::OverdueSweep => "overdue_sweep",
            TickStep::DueDateReminders => "due_date_reminders",
            TickStep::FineNotifications => "fine_notifications",
            TickStep::AvailabilityMatching => "availability_matching",
            TickStep::ReservationExpiry => "reservation_expiry",
        };
        f.write_str(name)
    }
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub completed: Vec<(TickStep, SweepReport)>,
    /// Step that failed and cut the tick short
    pub failed_step: Option<TickStep>,
}

impl TickReport {
    pub fn report_for(&self, step: TickStep) -> Option<&SweepReport> {
        self.completed
            .iter()
            .find(|(s, _)| *s == step)
            .map(|(_, report)| report)
    }
}

/// Background task running the lending sweeps at a fixed interval
pub struct LendingScheduler {
    loans: LoansService,
    reservations: ReservationsService,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl LendingScheduler {
    pub fn new(loans: LoansService, reservations: ReservationsService, interval: Duration) -> Self {
        Self {
            loans,
            reservations,
            interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Handle used to stop the loop. The signal is observed between ticks;
    /// a running sweep always finishes.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run one tick now, then one per interval, until shutdown
    pub async fn run(&self) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Lending scheduler started"
        );

        loop {
            self.run_tick_at(Utc::now()).await;

            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Lending scheduler received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Lending scheduler stopped");
    }

    pub async fn run_tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let mut tick = TickReport::default();

        for step in TickStep::ORDER {
            match self.run_step(step, now).await {
                Ok(report) => tick.completed.push((step, report)),
                Err(e) => {
                    error!(step = %step, error = %e, "Lending sweep failed, remaining steps wait for the next tick");
                    tick.failed_step = Some(step);
                    break;
                }
            }
        }

        tick
    }

    async fn run_step(&self, step: TickStep, now: DateTime<Utc>) -> AppResult<SweepReport> {
        match step {
            TickStep::OverdueSweep => self.loans.update_overdue_loans_and_fines_at(now).await,
            TickStep::DueDateReminders => self.loans.send_due_date_reminders_at(now).await,
            TickStep::FineNotifications => self.loans.send_fine_notifications_at(now).await,
            TickStep::AvailabilityMatching => {
                self.reservations.check_available_reservations_at(now).await
            }
            TickStep::ReservationExpiry => self.reservations.expire_old_reservations_at(now).await,
        }
    }
}
