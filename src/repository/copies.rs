//! Copies repository

use sqlx::{PgConnection, Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::{BookCopy, CopyStatus},
};

#[derive(Clone)]
pub struct CopiesRepository {
    pool: Pool<Postgres>,
}

impl CopiesRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get copy by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<BookCopy> {
        sqlx::query_as::<_, BookCopy>("SELECT * FROM copies WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Copy with id {} not found", id)))
    }

    pub async fn list_by_status(&self, status: CopyStatus) -> AppResult<Vec<BookCopy>> {
        let copies = sqlx::query_as::<_, BookCopy>(
            "SELECT * FROM copies WHERE status = $1 ORDER BY id",
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(copies)
    }

    /// Write status and location if the row is still at `copy.version`
    pub async fn update_versioned(conn: &mut PgConnection, copy: &BookCopy) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE copies
            SET status = $1, location = $2, version = version + 1
            WHERE id = $3 AND version = $4
            "#,
        )
        .bind(copy.status)
        .bind(&copy.location)
        .bind(copy.id)
        .bind(copy.version)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "Copy {} changed since version {}",
                copy.id, copy.version
            )));
        }
        Ok(())
    }
}
