//! Business logic services

pub mod eligibility;
pub mod email;
pub mod loans;
pub mod notifications;
pub mod reservations;
pub mod scheduler;
pub mod sweep;

use std::sync::Arc;

use crate::{config::LendingConfig, repository::CatalogStore};

use notifications::NotificationSink;

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn CatalogStore>,
    pub eligibility: eligibility::EligibilityChecker,
    pub loans: loans::LoansService,
    pub reservations: reservations::ReservationsService,
    policy: LendingConfig,
}

impl Services {
    /// Create all services over the given store
    pub fn new(
        store: Arc<dyn CatalogStore>,
        notifier: Arc<dyn NotificationSink>,
        policy: LendingConfig,
    ) -> Self {
        let eligibility = eligibility::EligibilityChecker::new(store.clone());
        Self {
            loans: loans::LoansService::new(
                store.clone(),
                notifier.clone(),
                eligibility.clone(),
                policy.clone(),
            ),
            reservations: reservations::ReservationsService::new(
                store.clone(),
                notifier,
                policy.clone(),
            ),
            eligibility,
            store,
            policy,
        }
    }

    /// Periodic driver sharing these services
    pub fn scheduler(&self) -> scheduler::LendingScheduler {
        scheduler::LendingScheduler::new(
            self.loans.clone(),
            self.reservations.clone(),
            self.policy.sweep_interval(),
        )
    }
}
