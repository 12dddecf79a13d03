//! Loan (borrow) model and related types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

/// Loan status: Borrowed -> {Returned, Overdue}, Overdue -> Returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum LoanStatus {
    Borrowed = 0,
    Returned = 1,
    Overdue = 2,
}

impl LoanStatus {
    /// Borrowed or Overdue: the copy is still out
    pub fn is_active(&self) -> bool {
        matches!(self, LoanStatus::Borrowed | LoanStatus::Overdue)
    }
}

/// Loan row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Loan {
    pub id: i32,
    pub user_id: i32,
    pub copy_id: i32,
    pub borrow_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    /// Set exactly when the loan becomes Returned
    pub return_date: Option<DateTime<Utc>>,
    pub status: LoanStatus,
    /// Outstanding fine
    pub fine_amount: Decimal,
    /// Total already paid
    pub fine_paid: Decimal,
    pub extended: bool,
    pub reservation_id: Option<i32>,
    #[serde(skip)]
    pub last_reminded_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub fine_notified_amount: Decimal,
    #[serde(skip)]
    pub version: i32,
}

impl Loan {
    pub fn is_past_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_active() && self.due_date < now
    }
}

/// Create loan request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateLoan {
    #[validate(range(min = 1, message = "user_id must be positive"))]
    pub user_id: i32,
    #[validate(range(min = 1, message = "copy_id must be positive"))]
    pub copy_id: i32,
    /// Defaults to the configured loan period
    pub due_date: Option<DateTime<Utc>>,
    /// Reservation being fulfilled, when the copy is on hold for this user
    pub reservation_id: Option<i32>,
    /// Staff member handling the desk transaction
    pub processed_by: Option<i32>,
}

/// Loan row to insert
#[derive(Debug, Clone, PartialEq)]
pub struct NewLoan {
    pub user_id: i32,
    pub copy_id: i32,
    pub borrow_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub reservation_id: Option<i32>,
}

impl NewLoan {
    pub fn into_loan(self, id: i32) -> Loan {
        Loan {
            id,
            user_id: self.user_id,
            copy_id: self.copy_id,
            borrow_date: self.borrow_date,
            due_date: self.due_date,
            return_date: None,
            status: LoanStatus::Borrowed,
            fine_amount: Decimal::ZERO,
            fine_paid: Decimal::ZERO,
            extended: false,
            reservation_id: self.reservation_id,
            last_reminded_at: None,
            fine_notified_amount: Decimal::ZERO,
            version: 1,
        }
    }
}
