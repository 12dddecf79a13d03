//! Borrowing eligibility

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    error::AppResult,
    models::{Loan, LoanStatus},
    repository::CatalogStore,
};

/// Why a user may not borrow
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Ineligibility {
    OverdueLoan { loan_id: i32 },
    UnpaidFine { loan_id: i32, amount: Decimal },
    /// Still Borrowed but past its due date; the overdue sweep has not run yet
    PastDueLoan { loan_id: i32 },
}

impl fmt::Display for Ineligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ineligibility::OverdueLoan { loan_id } => write!(f, "loan {} is overdue", loan_id),
            Ineligibility::UnpaidFine { loan_id, amount } => {
                write!(f, "loan {} has an unpaid fine of {}", loan_id, amount)
            }
            Ineligibility::PastDueLoan { loan_id } => {
                write!(f, "loan {} is past its due date", loan_id)
            }
        }
    }
}

/// First blocking reason among a user's loans, if any
pub fn evaluate(loans: &[Loan], now: DateTime<Utc>) -> Option<Ineligibility> {
    if let Some(loan) = loans.iter().find(|l| l.status == LoanStatus::Overdue) {
        return Some(Ineligibility::OverdueLoan { loan_id: loan.id });
    }
    if let Some(loan) = loans.iter().find(|l| l.fine_amount > Decimal::ZERO) {
        return Some(Ineligibility::UnpaidFine {
            loan_id: loan.id,
            amount: loan.fine_amount,
        });
    }
    loans
        .iter()
        .find(|l| l.status == LoanStatus::Borrowed && l.due_date < now)
        .map(|l| Ineligibility::PastDueLoan { loan_id: l.id })
}

#[derive(Clone)]
pub struct EligibilityChecker {
    store: Arc<dyn CatalogStore>,
}

impl EligibilityChecker {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    pub async fn can_borrow(&self, user_id: i32) -> AppResult<bool> {
        Ok(self.check_at(user_id, Utc::now()).await?.is_none())
    }

    /// Reason the user cannot borrow at `now`, or `None` when eligible
    pub async fn check_at(
        &self,
        user_id: i32,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Ineligibility>> {
        self.store.get_user(user_id).await?;
        let loans = self.store.list_user_loans(user_id).await?;
        Ok(evaluate(&loans, now))
    }
}
