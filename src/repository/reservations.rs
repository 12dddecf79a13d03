//! Reservations repository

use sqlx::{PgConnection, Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::{NewReservation, Reservation, ReservationStatus},
};

#[derive(Clone)]
pub struct ReservationsRepository {
    pool: Pool<Postgres>,
}

impl ReservationsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: i32) -> AppResult<Reservation> {
        sqlx::query_as::<_, Reservation>("SELECT * FROM reservations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Reservation with id {} not found", id)))
    }

    /// Pending reservations on a variant in queue order
    pub async fn list_pending_for_variant(&self, variant_id: i32) -> AppResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, Reservation>(
            r#"
            SELECT * FROM reservations
            WHERE variant_id = $1 AND status = $2
            ORDER BY reservation_date, id
            "#,
        )
        .bind(variant_id)
        .bind(ReservationStatus::Pending)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_by_status(&self, status: ReservationStatus) -> AppResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, Reservation>(
            "SELECT * FROM reservations WHERE status = $1 ORDER BY reservation_date, id",
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_by_user(&self, user_id: i32) -> AppResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, Reservation>(
            "SELECT * FROM reservations WHERE user_id = $1 ORDER BY reservation_date, id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn insert(conn: &mut PgConnection, data: &NewReservation) -> AppResult<Reservation> {
        let row = sqlx::query_as::<_, Reservation>(
            r#"
            INSERT INTO reservations (user_id, variant_id, reservation_date, status)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(data.user_id)
        .bind(data.variant_id)
        .bind(data.reservation_date)
        .bind(ReservationStatus::Pending)
        .fetch_one(&mut *conn)
        .await?;
        Ok(row)
    }

    pub async fn update_versioned(
        conn: &mut PgConnection,
        reservation: &Reservation,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE reservations
            SET status = $1, expiration_date = $2, fulfilled_copy_id = $3,
                processed_by = $4, version = version + 1
            WHERE id = $5 AND version = $6
            "#,
        )
        .bind(reservation.status)
        .bind(reservation.expiration_date)
        .bind(reservation.fulfilled_copy_id)
        .bind(reservation.processed_by)
        .bind(reservation.id)
        .bind(reservation.version)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "Reservation {} changed since version {}",
                reservation.id, reservation.version
            )));
        }
        Ok(())
    }
}
