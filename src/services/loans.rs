//! Loan lifecycle: borrow, return, extend, fines and reminders

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::{
    config::LendingConfig,
    error::{AppError, AppResult},
    models::{
        CopyStatus, CreateLoan, Loan, LoanStatus, NewLoan, NewNotification, NotificationType,
        ReservationStatus,
    },
    repository::{CatalogStore, UnitOfWork},
};

use super::{
    eligibility::EligibilityChecker,
    notifications::NotificationSink,
    sweep::{retry_on_conflict, SweepReport},
};

/// Whole or started days between the due date and `now`
pub fn days_late(due_date: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    if now <= due_date {
        return 0;
    }
    let seconds = (now - due_date).num_seconds();
    (seconds + 86_399) / 86_400
}

/// Fine still owed at `now`: the accrued total minus what was already paid.
/// Recomputed from the due date on every call, and never below the amount
/// already on the loan.
pub fn outstanding_fine(loan: &Loan, now: DateTime<Utc>, fine_per_day: Decimal) -> Decimal {
    let accrued = fine_per_day * Decimal::from(days_late(loan.due_date, now));
    let owed = (accrued - loan.fine_paid).max(Decimal::ZERO);
    owed.max(loan.fine_amount)
}

#[derive(Clone)]
pub struct LoansService {
    store: Arc<dyn CatalogStore>,
    notifier: Arc<dyn NotificationSink>,
    eligibility: EligibilityChecker,
    policy: LendingConfig,
}

impl LoansService {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        notifier: Arc<dyn NotificationSink>,
        eligibility: EligibilityChecker,
        policy: LendingConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            eligibility,
            policy,
        }
    }

    pub async fn get_loan(&self, loan_id: i32) -> AppResult<Loan> {
        self.store.get_loan(loan_id).await
    }

    /// Get loans for a user
    pub async fn get_user_loans(&self, user_id: i32) -> AppResult<Vec<Loan>> {
        self.store.get_user(user_id).await?;
        self.store.list_user_loans(user_id).await
    }

    /// Create a new loan (borrow a copy)
    pub async fn create_loan(&self, data: CreateLoan) -> AppResult<Loan> {
        let now = Utc::now();
        let due_date = match data.due_date {
            Some(due) if due <= now => {
                return Err(AppError::Validation(format!(
                    "Due date {} is not in the future",
                    due
                )))
            }
            Some(due) => due,
            None => now + Duration::days(self.policy.loan_period_days),
        };

        if let Some(reason) = self.eligibility.check_at(data.user_id, now).await? {
            tracing::info!(user_id = data.user_id, %reason, "Loan refused");
            return Err(AppError::IneligibleBorrower(format!(
                "User {} cannot borrow: {}",
                data.user_id, reason
            )));
        }

        let loan = retry_on_conflict("create_loan", || self.try_create_loan(&data, due_date, now))
            .await?;

        tracing::info!(
            loan_id = loan.id,
            user_id = loan.user_id,
            copy_id = loan.copy_id,
            reservation_id = ?loan.reservation_id,
            due_date = %loan.due_date,
            "Loan created"
        );
        self.notifier.notify(NewNotification::for_loan(
            loan.user_id,
            NotificationType::LoanCreated,
            loan.id,
            format!(
                "You borrowed copy #{}. Please return it by {}.",
                loan.copy_id,
                loan.due_date.format("%Y-%m-%d")
            ),
        ));
        Ok(loan)
    }

    async fn try_create_loan(
        &self,
        data: &CreateLoan,
        due_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<Loan> {
        let mut copy = self.store.get_copy(data.copy_id).await?;
        let mut work = UnitOfWork::new();

        match (copy.status, data.reservation_id) {
            (CopyStatus::Available, None) => {}
            (CopyStatus::Reserved, Some(reservation_id)) => {
                let mut reservation = self.store.get_reservation(reservation_id).await?;
                let holds_copy = reservation.status == ReservationStatus::Available
                    && reservation.user_id == data.user_id
                    && reservation.variant_id == copy.variant_id
                    && reservation.fulfilled_copy_id == Some(copy.id);
                if !holds_copy {
                    return Err(AppError::InvalidState(format!(
                        "Reservation {} does not hold copy {} for user {}",
                        reservation_id, copy.id, data.user_id
                    )));
                }
                reservation.status = ReservationStatus::Fulfilled;
                reservation.processed_by = data.processed_by.or(reservation.processed_by);
                work = work.update_reservation(reservation);
            }
            (CopyStatus::Available, Some(reservation_id)) => {
                return Err(AppError::InvalidState(format!(
                    "Reservation {} does not hold copy {}",
                    reservation_id, copy.id
                )));
            }
            (status, _) => {
                return Err(AppError::CopyUnavailable(format!(
                    "Copy {} is {}",
                    copy.id,
                    status.as_str()
                )));
            }
        }

        copy.status = CopyStatus::Borrowed;
        let work = work.update_copy(copy).insert_loan(NewLoan {
            user_id: data.user_id,
            copy_id: data.copy_id,
            borrow_date: now,
            due_date,
            reservation_id: data.reservation_id,
        });

        self.store.commit(work).await?.first_loan()
    }

    /// Return a borrowed copy. The copy becomes Available and is offered to
    /// waiting reservations by the next matching sweep.
    pub async fn return_loan(&self, loan_id: i32) -> AppResult<Loan> {
        retry_on_conflict("return_loan", || self.try_return_loan(loan_id)).await?;
        let loan = self.store.get_loan(loan_id).await?;

        tracing::info!(
            loan_id,
            copy_id = loan.copy_id,
            fine_amount = %loan.fine_amount,
            "Loan returned"
        );
        self.notifier.notify(NewNotification::for_loan(
            loan.user_id,
            NotificationType::LoanReturned,
            loan.id,
            format!("Copy #{} has been returned. Thank you!", loan.copy_id),
        ));
        Ok(loan)
    }

    async fn try_return_loan(&self, loan_id: i32) -> AppResult<()> {
        let now = Utc::now();
        let mut loan = self.store.get_loan(loan_id).await?;
        if !loan.status.is_active() {
            return Err(AppError::InvalidState(format!("Loan {} already returned", loan_id)));
        }
        let mut copy = self.store.get_copy(loan.copy_id).await?;

        // Freeze the fine at its value on the return date
        if loan.due_date < now {
            loan.fine_amount = outstanding_fine(&loan, now, self.policy.fine_per_day);
        }
        loan.status = LoanStatus::Returned;
        loan.return_date = Some(now);
        copy.status = CopyStatus::Available;

        self.store
            .commit(UnitOfWork::new().update_loan(loan).update_copy(copy))
            .await?;
        Ok(())
    }

    /// Push the due date back once
    pub async fn extend_loan(&self, loan_id: i32) -> AppResult<Loan> {
        self.extend_loan_at(loan_id, Utc::now()).await
    }

    /// Extension as of `now`; a loan already past its due date is refused
    /// even before the overdue sweep has flagged it
    pub async fn extend_loan_at(&self, loan_id: i32, now: DateTime<Utc>) -> AppResult<Loan> {
        retry_on_conflict("extend_loan", || async move {
            let mut loan = self.store.get_loan(loan_id).await?;
            if loan.status != LoanStatus::Borrowed {
                return Err(AppError::InvalidState(format!(
                    "Loan {} is not in borrowed state",
                    loan_id
                )));
            }
            if loan.due_date < now {
                return Err(AppError::InvalidState(format!(
                    "Loan {} is past its due date",
                    loan_id
                )));
            }
            if loan.extended {
                return Err(AppError::InvalidState(format!(
                    "Loan {} has already been extended",
                    loan_id
                )));
            }
            loan.due_date += Duration::days(self.policy.extension_days);
            loan.extended = true;
            self.store.commit(UnitOfWork::new().update_loan(loan)).await?;
            Ok(())
        })
        .await?;

        let loan = self.store.get_loan(loan_id).await?;
        tracing::info!(loan_id, due_date = %loan.due_date, "Loan extended");
        Ok(loan)
    }

    /// Clear the outstanding fine. The loan status is unchanged.
    pub async fn pay_fine(&self, loan_id: i32) -> AppResult<Loan> {
        let paid = retry_on_conflict("pay_fine", || async move {
            let mut loan = self.store.get_loan(loan_id).await?;
            let amount = loan.fine_amount;
            if amount > Decimal::ZERO {
                loan.fine_paid += amount;
                loan.fine_amount = Decimal::ZERO;
                // fines accrued after payment are notified from zero again
                loan.fine_notified_amount = Decimal::ZERO;
                self.store.commit(UnitOfWork::new().update_loan(loan)).await?;
            }
            Ok(amount)
        })
        .await?;

        tracing::info!(loan_id, amount = %paid, "Fine paid");
        self.store.get_loan(loan_id).await
    }

    pub async fn update_overdue_loans_and_fines(&self) -> AppResult<SweepReport> {
        self.update_overdue_loans_and_fines_at(Utc::now()).await
    }

    /// Flag past-due loans Overdue and recompute the fine of every overdue loan
    pub async fn update_overdue_loans_and_fines_at(
        &self,
        now: DateTime<Utc>,
    ) -> AppResult<SweepReport> {
        let mut candidates: Vec<Loan> = self
            .store
            .list_loans_by_status(LoanStatus::Borrowed)
            .await?
            .into_iter()
            .filter(|l| l.due_date < now)
            .collect();
        candidates.extend(self.store.list_loans_by_status(LoanStatus::Overdue).await?);

        let mut report = SweepReport::default();
        for loan in candidates {
            let result =
                retry_on_conflict("overdue_sweep", || self.accrue_overdue(loan.id, now)).await;
            report.record("overdue", loan.id, result);
        }

        tracing::info!(
            examined = report.examined,
            changed = report.changed,
            failed = report.failed,
            "Overdue sweep finished"
        );
        Ok(report)
    }

    async fn accrue_overdue(&self, loan_id: i32, now: DateTime<Utc>) -> AppResult<bool> {
        let mut loan = self.store.get_loan(loan_id).await?;
        if !loan.is_past_due(now) {
            return Ok(false);
        }

        let fine = outstanding_fine(&loan, now, self.policy.fine_per_day);
        if loan.status == LoanStatus::Overdue && loan.fine_amount == fine {
            return Ok(false);
        }

        let newly_overdue = loan.status == LoanStatus::Borrowed;
        loan.status = LoanStatus::Overdue;
        loan.fine_amount = fine;
        self.store.commit(UnitOfWork::new().update_loan(loan)).await?;

        if newly_overdue {
            tracing::info!(loan_id, fine_amount = %fine, "Loan is now overdue");
        }
        Ok(true)
    }

    pub async fn send_due_date_reminders(&self) -> AppResult<SweepReport> {
        self.send_due_date_reminders_at(Utc::now()).await
    }

    /// Remind borrowers of loans falling due inside the reminder window, at
    /// most once per reminder interval per loan
    pub async fn send_due_date_reminders_at(&self, now: DateTime<Utc>) -> AppResult<SweepReport> {
        let window_end = now + Duration::days(self.policy.reminder_window_days);
        let loans = self.store.list_loans_due_between(now, window_end).await?;

        let mut report = SweepReport::default();
        for loan in loans {
            let result = retry_on_conflict("due_date_reminders", || {
                self.remind(loan.id, now, window_end)
            })
            .await;
            report.record("reminders", loan.id, result);
        }

        tracing::info!(
            examined = report.examined,
            sent = report.changed,
            failed = report.failed,
            "Due date reminders finished"
        );
        Ok(report)
    }

    async fn remind(
        &self,
        loan_id: i32,
        now: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut loan = self.store.get_loan(loan_id).await?;
        if loan.status != LoanStatus::Borrowed || loan.due_date < now || loan.due_date > window_end
        {
            return Ok(false);
        }
        let interval = Duration::hours(self.policy.reminder_interval_hours);
        if loan.last_reminded_at.is_some_and(|at| now - at < interval) {
            return Ok(false);
        }

        loan.last_reminded_at = Some(now);
        let (user_id, copy_id, due_date) = (loan.user_id, loan.copy_id, loan.due_date);
        self.store.commit(UnitOfWork::new().update_loan(loan)).await?;

        self.notifier.notify(NewNotification::for_loan(
            user_id,
            NotificationType::DueDateReminder,
            loan_id,
            format!(
                "Copy #{} is due on {}. You can extend the loan once if you need more time.",
                copy_id,
                due_date.format("%Y-%m-%d")
            ),
        ));
        Ok(true)
    }

    pub async fn send_fine_notifications(&self) -> AppResult<SweepReport> {
        self.send_fine_notifications_at(Utc::now()).await
    }

    /// Tell borrowers of overdue loans about their fine whenever it has grown
    /// since the last notice
    pub async fn send_fine_notifications_at(&self, now: DateTime<Utc>) -> AppResult<SweepReport> {
        let loans = self.store.list_loans_by_status(LoanStatus::Overdue).await?;

        let mut report = SweepReport::default();
        for loan in loans {
            let result =
                retry_on_conflict("fine_notifications", || self.notify_fine(loan.id, now)).await;
            report.record("fine_notices", loan.id, result);
        }

        tracing::info!(
            examined = report.examined,
            sent = report.changed,
            failed = report.failed,
            "Fine notifications finished"
        );
        Ok(report)
    }

    async fn notify_fine(&self, loan_id: i32, now: DateTime<Utc>) -> AppResult<bool> {
        let mut loan = self.store.get_loan(loan_id).await?;
        if loan.status != LoanStatus::Overdue || loan.fine_amount <= loan.fine_notified_amount {
            return Ok(false);
        }

        loan.fine_notified_amount = loan.fine_amount;
        let (user_id, copy_id, fine) = (loan.user_id, loan.copy_id, loan.fine_amount);
        let late = days_late(loan.due_date, now);
        self.store.commit(UnitOfWork::new().update_loan(loan)).await?;

        self.notifier.notify(NewNotification::for_loan(
            user_id,
            NotificationType::FineNotice,
            loan_id,
            format!(
                "Copy #{} is {} day(s) overdue. Outstanding fine: {}.",
                copy_id, late, fine
            ),
        ));
        Ok(true)
    }
}
