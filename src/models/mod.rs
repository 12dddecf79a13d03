//! Data models for the circulation server

pub mod copy;
pub mod loan;
pub mod notification;
pub mod reservation;
pub mod user;
pub mod variant;

// Re-export commonly used types
pub use copy::{BookCopy, CopyStatus};
pub use loan::{CreateLoan, Loan, LoanStatus, NewLoan};
pub use notification::{NewNotification, Notification, NotificationType, RelatedTable};
pub use reservation::{CreateReservation, NewReservation, Reservation, ReservationStatus};
pub use user::User;
pub use variant::Variant;
