//! Notifications repository

use sqlx::{Pool, Postgres};

use crate::{
    error::AppResult,
    models::{NewNotification, Notification},
};

#[derive(Clone)]
pub struct NotificationsRepository {
    pool: Pool<Postgres>,
}

impl NotificationsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn create(&self, data: &NewNotification) -> AppResult<Notification> {
        let row = sqlx::query_as::<_, Notification>(
            r#"
            INSERT INTO notifications (receiver_id, notification_type, message, related_table, related_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(data.receiver_id)
        .bind(data.notification_type)
        .bind(&data.message)
        .bind(data.related_table.as_str())
        .bind(data.related_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }
}
