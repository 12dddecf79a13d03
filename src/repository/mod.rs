//! Catalog store: the persistence seam of the lending services
//!
//! Two backends implement [`CatalogStore`]: [`Repository`] on PostgreSQL and
//! [`memory::MemoryCatalogStore`] in process. Both apply a [`UnitOfWork`]
//! atomically and reject it with [`AppError::Conflict`] when a row changed
//! since it was read.

pub mod copies;
pub mod loans;
pub mod memory;
pub mod notifications;
pub mod reservations;
pub mod users;
pub mod variants;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::{
        BookCopy, CopyStatus, Loan, LoanStatus, NewLoan, NewNotification, NewReservation,
        Notification, Reservation, ReservationStatus, User, Variant,
    },
};

pub use memory::MemoryCatalogStore;

/// One row write inside a unit of work.
///
/// Updates carry the row as it was read; its `version` is the expected
/// current version and the store bumps it on success.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    UpdateCopy(BookCopy),
    InsertLoan(NewLoan),
    UpdateLoan(Loan),
    InsertReservation(NewReservation),
    UpdateReservation(Reservation),
}

/// Batch of row writes applied all-or-nothing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitOfWork {
    writes: Vec<Write>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_copy(mut self, copy: BookCopy) -> Self {
        self.writes.push(Write::UpdateCopy(copy));
        self
    }

    pub fn insert_loan(mut self, loan: NewLoan) -> Self {
        self.writes.push(Write::InsertLoan(loan));
        self
    }

    pub fn update_loan(mut self, loan: Loan) -> Self {
        self.writes.push(Write::UpdateLoan(loan));
        self
    }

    pub fn insert_reservation(mut self, reservation: NewReservation) -> Self {
        self.writes.push(Write::InsertReservation(reservation));
        self
    }

    pub fn update_reservation(mut self, reservation: Reservation) -> Self {
        self.writes.push(Write::UpdateReservation(reservation));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }
}

/// Rows produced by a committed unit of work, in write order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Committed {
    pub loans: Vec<Loan>,
    pub reservations: Vec<Reservation>,
}

impl Committed {
    pub fn first_loan(self) -> AppResult<Loan> {
        self.loans
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Internal("Unit of work inserted no loan".to_string()))
    }

    pub fn first_reservation(self) -> AppResult<Reservation> {
        self.reservations
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Internal("Unit of work inserted no reservation".to_string()))
    }
}

/// Durable storage of copies, variants, users, loans, reservations and notifications
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get_copy(&self, id: i32) -> AppResult<BookCopy>;
    async fn get_variant(&self, id: i32) -> AppResult<Variant>;
    async fn get_user(&self, id: i32) -> AppResult<User>;
    async fn get_loan(&self, id: i32) -> AppResult<Loan>;
    async fn get_reservation(&self, id: i32) -> AppResult<Reservation>;

    async fn list_copies_by_status(&self, status: CopyStatus) -> AppResult<Vec<BookCopy>>;

    /// All loans of a user, oldest first
    async fn list_user_loans(&self, user_id: i32) -> AppResult<Vec<Loan>>;
    async fn list_loans_by_status(&self, status: LoanStatus) -> AppResult<Vec<Loan>>;
    /// Borrowed loans with `from <= due_date <= to`
    async fn list_loans_due_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<Loan>>;

    /// Pending reservations on a variant, oldest reservation date first
    async fn list_pending_reservations(&self, variant_id: i32) -> AppResult<Vec<Reservation>>;
    async fn list_reservations_by_status(
        &self,
        status: ReservationStatus,
    ) -> AppResult<Vec<Reservation>>;
    async fn list_user_reservations(&self, user_id: i32) -> AppResult<Vec<Reservation>>;

    /// Apply every write or none of them
    async fn commit(&self, work: UnitOfWork) -> AppResult<Committed>;

    async fn insert_notification(&self, notification: NewNotification) -> AppResult<Notification>;

    /// Connectivity probe used by the readiness endpoint
    async fn ping(&self) -> AppResult<()>;
}

/// PostgreSQL catalog store
#[derive(Clone)]
pub struct Repository {
    pub pool: Pool<Postgres>,
    pub copies: copies::CopiesRepository,
    pub variants: variants::VariantsRepository,
    pub users: users::UsersRepository,
    pub loans: loans::LoansRepository,
    pub reservations: reservations::ReservationsRepository,
    pub notifications: notifications::NotificationsRepository,
}

impl Repository {
    /// Create a new repository with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            copies: copies::CopiesRepository::new(pool.clone()),
            variants: variants::VariantsRepository::new(pool.clone()),
            users: users::UsersRepository::new(pool.clone()),
            loans: loans::LoansRepository::new(pool.clone()),
            reservations: reservations::ReservationsRepository::new(pool.clone()),
            notifications: notifications::NotificationsRepository::new(pool.clone()),
            pool,
        }
    }
}

/// Unique violation on an active-loan or held-copy index means a concurrent
/// writer won the row.
fn conflict_on_unique_violation(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            AppError::Conflict(db.message().to_string())
        }
        _ => AppError::Database(err),
    }
}

#[async_trait]
impl CatalogStore for Repository {
    async fn get_copy(&self, id: i32) -> AppResult<BookCopy> {
        self.copies.get_by_id(id).await
    }

    async fn get_variant(&self, id: i32) -> AppResult<Variant> {
        self.variants.get_by_id(id).await
    }

    async fn get_user(&self, id: i32) -> AppResult<User> {
        self.users.get_by_id(id).await
    }

    async fn get_loan(&self, id: i32) -> AppResult<Loan> {
        self.loans.get_by_id(id).await
    }

    async fn get_reservation(&self, id: i32) -> AppResult<Reservation> {
        self.reservations.get_by_id(id).await
    }

    async fn list_copies_by_status(&self, status: CopyStatus) -> AppResult<Vec<BookCopy>> {
        self.copies.list_by_status(status).await
    }

    async fn list_user_loans(&self, user_id: i32) -> AppResult<Vec<Loan>> {
        self.loans.list_by_user(user_id).await
    }

    async fn list_loans_by_status(&self, status: LoanStatus) -> AppResult<Vec<Loan>> {
        self.loans.list_by_status(status).await
    }

    async fn list_loans_due_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<Loan>> {
        self.loans.list_due_between(from, to).await
    }

    async fn list_pending_reservations(&self, variant_id: i32) -> AppResult<Vec<Reservation>> {
        self.reservations.list_pending_for_variant(variant_id).await
    }

    async fn list_reservations_by_status(
        &self,
        status: ReservationStatus,
    ) -> AppResult<Vec<Reservation>> {
        self.reservations.list_by_status(status).await
    }

    async fn list_user_reservations(&self, user_id: i32) -> AppResult<Vec<Reservation>> {
        self.reservations.list_by_user(user_id).await
    }

    async fn commit(&self, work: UnitOfWork) -> AppResult<Committed> {
        let mut tx = self.pool.begin().await?;
        let mut committed = Committed::default();

        // Dropping `tx` on an early return rolls everything back
        for write in work.into_writes() {
            match write {
                Write::UpdateCopy(copy) => {
                    copies::CopiesRepository::update_versioned(&mut tx, &copy).await?;
                }
                Write::InsertLoan(loan) => {
                    let row = loans::LoansRepository::insert(&mut tx, &loan)
                        .await
                        .map_err(|e| match e {
                            AppError::Database(e) => conflict_on_unique_violation(e),
                            other => other,
                        })?;
                    committed.loans.push(row);
                }
                Write::UpdateLoan(loan) => {
                    loans::LoansRepository::update_versioned(&mut tx, &loan).await?;
                }
                Write::InsertReservation(reservation) => {
                    let row = reservations::ReservationsRepository::insert(&mut tx, &reservation)
                        .await?;
                    committed.reservations.push(row);
                }
                Write::UpdateReservation(reservation) => {
                    reservations::ReservationsRepository::update_versioned(&mut tx, &reservation)
                        .await
                        .map_err(|e| match e {
                            AppError::Database(e) => conflict_on_unique_violation(e),
                            other => other,
                        })?;
                }
            }
        }

        tx.commit().await?;
        Ok(committed)
    }

    async fn insert_notification(&self, notification: NewNotification) -> AppResult<Notification> {
        self.notifications.create(&notification).await
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
