//! Reservation (hold request on a variant) model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

/// Reservation status: Pending -> {Available, Cancelled}, Available -> {Fulfilled, Expired, Cancelled}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum ReservationStatus {
    Pending = 0,
    Available = 1,
    Fulfilled = 2,
    Expired = 3,
    Cancelled = 4,
}

/// Reservation row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Reservation {
    pub id: i32,
    pub user_id: i32,
    pub variant_id: i32,
    pub reservation_date: DateTime<Utc>,
    pub status: ReservationStatus,
    /// Set when the reservation becomes Available
    pub expiration_date: Option<DateTime<Utc>>,
    /// Copy held for (or handed to) the user
    pub fulfilled_copy_id: Option<i32>,
    pub processed_by: Option<i32>,
    #[serde(skip)]
    pub version: i32,
}

impl Reservation {
    /// Copy currently on hold for this reservation
    pub fn held_copy(&self) -> Option<i32> {
        match self.status {
            ReservationStatus::Available => self.fulfilled_copy_id,
            _ => None,
        }
    }
}

/// Create reservation request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateReservation {
    #[validate(range(min = 1, message = "user_id must be positive"))]
    pub user_id: i32,
    #[validate(range(min = 1, message = "variant_id must be positive"))]
    pub variant_id: i32,
}

/// Reservation row to insert (always Pending)
#[derive(Debug, Clone, PartialEq)]
pub struct NewReservation {
    pub user_id: i32,
    pub variant_id: i32,
    pub reservation_date: DateTime<Utc>,
}

impl NewReservation {
    pub fn into_reservation(self, id: i32) -> Reservation {
        Reservation {
            id,
            user_id: self.user_id,
            variant_id: self.variant_id,
            reservation_date: self.reservation_date,
            status: ReservationStatus::Pending,
            expiration_date: None,
            fulfilled_copy_id: None,
            processed_by: None,
            version: 1,
        }
    }
}
