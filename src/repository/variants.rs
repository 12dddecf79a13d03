//! Variants repository

use sqlx::{Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::Variant,
};

#[derive(Clone)]
pub struct VariantsRepository {
    pool: Pool<Postgres>,
}

impl VariantsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: i32) -> AppResult<Variant> {
        sqlx::query_as::<_, Variant>("SELECT * FROM variants WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Variant with id {} not found", id)))
    }
}
