//! In-process catalog store
//!
//! Rows live in ordered maps behind one async mutex. Commits get the same
//! version checks and uniqueness rules as the PostgreSQL schema, so the
//! lending services behave identically on either backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{
    error::{AppError, AppResult},
    models::{
        BookCopy, CopyStatus, Loan, LoanStatus, NewNotification, Notification, Reservation,
        ReservationStatus, User, Variant,
    },
};

use super::{CatalogStore, Committed, UnitOfWork, Write};

#[derive(Default)]
struct MemoryState {
    users: BTreeMap<i32, User>,
    variants: BTreeMap<i32, Variant>,
    copies: BTreeMap<i32, BookCopy>,
    loans: BTreeMap<i32, Loan>,
    reservations: BTreeMap<i32, Reservation>,
    notifications: Vec<Notification>,
    next_id: i32,
}

impl MemoryState {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn has_active_loan(&self, copy_id: i32) -> bool {
        self.loans
            .values()
            .any(|l| l.copy_id == copy_id && l.status.is_active())
    }

    fn copy_held_by_other(&self, copy_id: i32, reservation_id: i32) -> bool {
        self.reservations
            .values()
            .any(|r| r.id != reservation_id && r.held_copy() == Some(copy_id))
    }

    /// Check every write against the current rows without changing anything
    fn validate(&self, writes: &[Write]) -> AppResult<()> {
        for write in writes {
            match write {
                Write::UpdateCopy(copy) => {
                    let current = self.copies.get(&copy.id).ok_or_else(|| {
                        AppError::NotFound(format!("Copy with id {} not found", copy.id))
                    })?;
                    if current.version != copy.version {
                        return Err(AppError::Conflict(format!(
                            "Copy {} changed since version {}",
                            copy.id, copy.version
                        )));
                    }
                }
                Write::InsertLoan(loan) => {
                    if self.has_active_loan(loan.copy_id) {
                        return Err(AppError::Conflict(format!(
                            "Copy {} already has an active loan",
                            loan.copy_id
                        )));
                    }
                }
                Write::UpdateLoan(loan) => {
                    let current = self.loans.get(&loan.id).ok_or_else(|| {
                        AppError::NotFound(format!("Loan with id {} not found", loan.id))
                    })?;
                    if current.version != loan.version {
                        return Err(AppError::Conflict(format!(
                            "Loan {} changed since version {}",
                            loan.id, loan.version
                        )));
                    }
                }
                Write::InsertReservation(_) => {}
                Write::UpdateReservation(reservation) => {
                    let current = self.reservations.get(&reservation.id).ok_or_else(|| {
                        AppError::NotFound(format!(
                            "Reservation with id {} not found",
                            reservation.id
                        ))
                    })?;
                    if current.version != reservation.version {
                        return Err(AppError::Conflict(format!(
                            "Reservation {} changed since version {}",
                            reservation.id, reservation.version
                        )));
                    }
                    if let Some(copy_id) = reservation.held_copy() {
                        if self.copy_held_by_other(copy_id, reservation.id) {
                            return Err(AppError::Conflict(format!(
                                "Copy {} is already held by another reservation",
                                copy_id
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Catalog store kept in memory
#[derive(Default)]
pub struct MemoryCatalogStore {
    state: Mutex<MemoryState>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, firstname: &str, email: Option<&str>) -> User {
        let mut state = self.state.lock().await;
        let user = User {
            id: state.next_id(),
            firstname: Some(firstname.to_string()),
            lastname: None,
            email: email.map(str::to_string),
            phone: None,
            is_active: true,
        };
        state.users.insert(user.id, user.clone());
        user
    }

    pub async fn add_variant(&self, isbn: &str) -> Variant {
        let mut state = self.state.lock().await;
        let variant = Variant {
            id: state.next_id(),
            volume_id: 1,
            publisher: None,
            edition: None,
            cover: None,
            paper_quality: None,
            isbn: Some(isbn.to_string()),
            price: None,
        };
        state.variants.insert(variant.id, variant.clone());
        variant
    }

    pub async fn add_copy(&self, variant_id: i32, barcode: &str, status: CopyStatus) -> BookCopy {
        let mut state = self.state.lock().await;
        let copy = BookCopy {
            id: state.next_id(),
            variant_id,
            barcode: barcode.to_string(),
            status,
            location: None,
            version: 1,
        };
        state.copies.insert(copy.id, copy.clone());
        copy
    }

    /// Notifications persisted so far, oldest first
    pub async fn notifications(&self) -> Vec<Notification> {
        self.state.lock().await.notifications.clone()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn get_copy(&self, id: i32) -> AppResult<BookCopy> {
        self.state
            .lock()
            .await
            .copies
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Copy with id {} not found", id)))
    }

    async fn get_variant(&self, id: i32) -> AppResult<Variant> {
        self.state
            .lock()
            .await
            .variants
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Variant with id {} not found", id)))
    }

    async fn get_user(&self, id: i32) -> AppResult<User> {
        self.state
            .lock()
            .await
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", id)))
    }

    async fn get_loan(&self, id: i32) -> AppResult<Loan> {
        self.state
            .lock()
            .await
            .loans
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Loan with id {} not found", id)))
    }

    async fn get_reservation(&self, id: i32) -> AppResult<Reservation> {
        self.state
            .lock()
            .await
            .reservations
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Reservation with id {} not found", id)))
    }

    async fn list_copies_by_status(&self, status: CopyStatus) -> AppResult<Vec<BookCopy>> {
        let state = self.state.lock().await;
        Ok(state
            .copies
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect())
    }

    async fn list_user_loans(&self, user_id: i32) -> AppResult<Vec<Loan>> {
        let state = self.state.lock().await;
        let mut loans: Vec<Loan> = state
            .loans
            .values()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect();
        loans.sort_by_key(|l| (l.borrow_date, l.id));
        Ok(loans)
    }

    async fn list_loans_by_status(&self, status: LoanStatus) -> AppResult<Vec<Loan>> {
        let state = self.state.lock().await;
        let mut loans: Vec<Loan> = state
            .loans
            .values()
            .filter(|l| l.status == status)
            .cloned()
            .collect();
        loans.sort_by_key(|l| (l.due_date, l.id));
        Ok(loans)
    }

    async fn list_loans_due_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<Loan>> {
        let state = self.state.lock().await;
        let mut loans: Vec<Loan> = state
            .loans
            .values()
            .filter(|l| l.status == LoanStatus::Borrowed && l.due_date >= from && l.due_date <= to)
            .cloned()
            .collect();
        loans.sort_by_key(|l| (l.due_date, l.id));
        Ok(loans)
    }

    async fn list_pending_reservations(&self, variant_id: i32) -> AppResult<Vec<Reservation>> {
        let state = self.state.lock().await;
        let mut rows: Vec<Reservation> = state
            .reservations
            .values()
            .filter(|r| r.variant_id == variant_id && r.status == ReservationStatus::Pending)
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.reservation_date, r.id));
        Ok(rows)
    }

    async fn list_reservations_by_status(
        &self,
        status: ReservationStatus,
    ) -> AppResult<Vec<Reservation>> {
        let state = self.state.lock().await;
        let mut rows: Vec<Reservation> = state
            .reservations
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.reservation_date, r.id));
        Ok(rows)
    }

    async fn list_user_reservations(&self, user_id: i32) -> AppResult<Vec<Reservation>> {
        let state = self.state.lock().await;
        let mut rows: Vec<Reservation> = state
            .reservations
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.reservation_date, r.id));
        Ok(rows)
    }

    async fn commit(&self, work: UnitOfWork) -> AppResult<Committed> {
        let mut state = self.state.lock().await;
        state.validate(work.writes())?;

        let mut committed = Committed::default();
        for write in work.into_writes() {
            match write {
                Write::UpdateCopy(mut copy) => {
                    copy.version += 1;
                    state.copies.insert(copy.id, copy);
                }
                Write::InsertLoan(new_loan) => {
                    let loan = new_loan.into_loan(state.next_id());
                    state.loans.insert(loan.id, loan.clone());
                    committed.loans.push(loan);
                }
                Write::UpdateLoan(mut loan) => {
                    loan.version += 1;
                    state.loans.insert(loan.id, loan);
                }
                Write::InsertReservation(new_reservation) => {
                    let reservation = new_reservation.into_reservation(state.next_id());
                    state.reservations.insert(reservation.id, reservation.clone());
                    committed.reservations.push(reservation);
                }
                Write::UpdateReservation(mut reservation) => {
                    reservation.version += 1;
                    state.reservations.insert(reservation.id, reservation);
                }
            }
        }
        Ok(committed)
    }

    async fn insert_notification(&self, notification: NewNotification) -> AppResult<Notification> {
        let mut state = self.state.lock().await;
        let row = notification.into_notification(state.next_id(), Utc::now());
        state.notifications.push(row.clone());
        Ok(row)
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}
