//! In-app notification model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum NotificationType {
    LoanCreated = 0,
    LoanReturned = 1,
    DueDateReminder = 2,
    FineNotice = 3,
    ReservationConfirmed = 4,
    ReservationAvailable = 5,
    ReservationExpired = 6,
    ReservationCancelled = 7,
}

impl NotificationType {
    /// Email subject line
    pub fn subject(&self) -> &'static str {
        match self {
            NotificationType::LoanCreated => "Loan confirmation",
            NotificationType::LoanReturned => "Return confirmation",
            NotificationType::DueDateReminder => "Your loan is due soon",
            NotificationType::FineNotice => "Overdue fine",
            NotificationType::ReservationConfirmed => "Reservation confirmed",
            NotificationType::ReservationAvailable => "Your reservation is ready for pickup",
            NotificationType::ReservationExpired => "Your reservation has expired",
            NotificationType::ReservationCancelled => "Reservation cancelled",
        }
    }
}

/// Table a notification points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RelatedTable {
    Loans,
    Reservations,
}

impl RelatedTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelatedTable::Loans => "loans",
            RelatedTable::Reservations => "reservations",
        }
    }
}

/// Stored notification row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Notification {
    pub id: i32,
    pub receiver_id: i32,
    pub notification_type: NotificationType,
    pub message: String,
    pub related_table: String,
    pub related_id: i32,
    pub is_read: bool,
    pub is_handled: bool,
    pub created_at: DateTime<Utc>,
}

/// Event emitted by the lending services
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub receiver_id: i32,
    pub notification_type: NotificationType,
    pub message: String,
    pub related_table: RelatedTable,
    pub related_id: i32,
}

impl NewNotification {
    pub fn for_loan(
        receiver_id: i32,
        notification_type: NotificationType,
        loan_id: i32,
        message: String,
    ) -> Self {
        Self {
            receiver_id,
            notification_type,
            message,
            related_table: RelatedTable::Loans,
            related_id: loan_id,
        }
    }

    pub fn for_reservation(
        receiver_id: i32,
        notification_type: NotificationType,
        reservation_id: i32,
        message: String,
    ) -> Self {
        Self {
            receiver_id,
            notification_type,
            message,
            related_table: RelatedTable::Reservations,
            related_id: reservation_id,
        }
    }

    pub fn into_notification(self, id: i32, created_at: DateTime<Utc>) -> Notification {
        Notification {
            id,
            receiver_id: self.receiver_id,
            notification_type: self.notification_type,
            message: self.message,
            related_table: self.related_table.as_str().to_string(),
            related_id: self.related_id,
            is_read: false,
            is_handled: false,
            created_at,
        }
    }
}
