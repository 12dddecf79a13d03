//! Loans repository for database operations

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::{Loan, LoanStatus, NewLoan},
};

#[derive(Clone)]
pub struct LoansRepository {
    pool: Pool<Postgres>,
}

impl LoansRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get loan by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<Loan> {
        sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Loan with id {} not found", id)))
    }

    /// Get all loans of a user, including returned ones
    pub async fn list_by_user(&self, user_id: i32) -> AppResult<Vec<Loan>> {
        let loans = sqlx::query_as::<_, Loan>(
            "SELECT * FROM loans WHERE user_id = $1 ORDER BY borrow_date, id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(loans)
    }

    pub async fn list_by_status(&self, status: LoanStatus) -> AppResult<Vec<Loan>> {
        let loans = sqlx::query_as::<_, Loan>(
            "SELECT * FROM loans WHERE status = $1 ORDER BY due_date, id",
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(loans)
    }

    /// Borrowed loans falling due inside the window
    pub async fn list_due_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<Loan>> {
        let loans = sqlx::query_as::<_, Loan>(
            r#"
            SELECT * FROM loans
            WHERE status = $1 AND due_date >= $2 AND due_date <= $3
            ORDER BY due_date, id
            "#,
        )
        .bind(LoanStatus::Borrowed)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(loans)
    }

    /// Insert a Borrowed loan. The partial unique index on active loans per
    /// copy rejects a second active loan.
    pub async fn insert(conn: &mut PgConnection, loan: &NewLoan) -> AppResult<Loan> {
        let row = sqlx::query_as::<_, Loan>(
            r#"
            INSERT INTO loans (user_id, copy_id, borrow_date, due_date, status, reservation_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(loan.user_id)
        .bind(loan.copy_id)
        .bind(loan.borrow_date)
        .bind(loan.due_date)
        .bind(LoanStatus::Borrowed)
        .bind(loan.reservation_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(row)
    }

    /// Write the mutable columns if the row is still at `loan.version`
    pub async fn update_versioned(conn: &mut PgConnection, loan: &Loan) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE loans
            SET due_date = $1, return_date = $2, status = $3, fine_amount = $4,
                fine_paid = $5, extended = $6, last_reminded_at = $7,
                fine_notified_amount = $8, version = version + 1
            WHERE id = $9 AND version = $10
            "#,
        )
        .bind(loan.due_date)
        .bind(loan.return_date)
        .bind(loan.status)
        .bind(loan.fine_amount)
        .bind(loan.fine_paid)
        .bind(loan.extended)
        .bind(loan.last_reminded_at)
        .bind(loan.fine_notified_amount)
        .bind(loan.id)
        .bind(loan.version)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "Loan {} changed since version {}",
                loan.id, loan.version
            )));
        }
        Ok(())
    }
}
