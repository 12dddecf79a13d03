//! Loan and reservation lifecycles over the in-memory store

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use circulation_server::{
    config::LendingConfig,
    error::AppError,
    models::{
        CopyStatus, CreateLoan, CreateReservation, LoanStatus, NotificationType,
        ReservationStatus,
    },
    repository::{CatalogStore, MemoryCatalogStore},
    services::{
        eligibility::Ineligibility,
        notifications::{ChannelNotifier, NotificationDispatcher, NotificationSink},
        scheduler::TickStep,
        Services,
    },
};

use crate::common::{days_from_now, loan_request, Library};

fn due_in_one_hour(user_id: i32, copy_id: i32) -> CreateLoan {
    CreateLoan {
        due_date: Some(Utc::now() + Duration::hours(1)),
        ..loan_request(user_id, copy_id)
    }
}

fn reserve(user_id: i32, variant_id: i32) -> CreateReservation {
    CreateReservation {
        user_id,
        variant_id,
    }
}

#[tokio::test]
async fn test_borrow_and_return() {
    let lib = Library::new();
    let user = lib.user("Ada").await;
    let (_, copies) = lib.title("9782070360024", 1).await;
    let copy_id = copies[0].id;

    let loan = lib.borrow(user.id, copy_id).await;
    assert_eq!(loan.status, LoanStatus::Borrowed);
    assert_eq!(loan.due_date, loan.borrow_date + Duration::days(21));
    assert_eq!(lib.store.get_copy(copy_id).await.unwrap().status, CopyStatus::Borrowed);

    let returned = lib.services.loans.return_loan(loan.id).await.unwrap();
    assert_eq!(returned.status, LoanStatus::Returned);
    assert!(returned.return_date.is_some());
    assert_eq!(returned.fine_amount, Decimal::ZERO);
    assert_eq!(lib.store.get_copy(copy_id).await.unwrap().status, CopyStatus::Available);

    let again = lib.services.loans.return_loan(loan.id).await;
    assert!(matches!(again, Err(AppError::InvalidState(_))));

    assert_eq!(
        lib.sink.kinds(),
        vec![NotificationType::LoanCreated, NotificationType::LoanReturned]
    );
}

#[tokio::test]
async fn test_borrow_rejections() {
    let lib = Library::new();
    let user = lib.user("Ada").await;
    let (_, copies) = lib.title("9782070360025", 2).await;

    let past_due = CreateLoan {
        due_date: Some(Utc::now() - Duration::days(1)),
        ..loan_request(user.id, copies[0].id)
    };
    assert!(matches!(
        lib.services.loans.create_loan(past_due).await,
        Err(AppError::Validation(_))
    ));

    assert!(matches!(
        lib.services.loans.create_loan(loan_request(999, copies[0].id)).await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        lib.services.loans.create_loan(loan_request(user.id, 999)).await,
        Err(AppError::NotFound(_))
    ));

    let lost = lib
        .store
        .add_copy(copies[0].variant_id, "LOST-1", CopyStatus::Lost)
        .await;
    assert!(matches!(
        lib.services.loans.create_loan(loan_request(user.id, lost.id)).await,
        Err(AppError::CopyUnavailable(_))
    ));

    lib.borrow(user.id, copies[0].id).await;
    let other = lib.user("Grace").await;
    assert!(matches!(
        lib.services.loans.create_loan(loan_request(other.id, copies[0].id)).await,
        Err(AppError::CopyUnavailable(_))
    ));
    assert!(lib.sink.kinds().iter().all(|k| *k == NotificationType::LoanCreated));
    assert_eq!(lib.sink.count(NotificationType::LoanCreated), 1);
}

#[tokio::test]
async fn test_overdue_sweep_accrues_fine_idempotently() {
    let lib = Library::new();
    let user = lib.user("Ada").await;
    let (_, copies) = lib.title("9782070360026", 2).await;
    let loans = &lib.services.loans;

    let loan = loans.create_loan(due_in_one_hour(user.id, copies[0].id)).await.unwrap();
    let three_days_late = loan.due_date + Duration::days(3);

    let report = loans.update_overdue_loans_and_fines_at(three_days_late).await.unwrap();
    assert_eq!(report.changed, 1);
    let overdue = loans.get_loan(loan.id).await.unwrap();
    assert_eq!(overdue.status, LoanStatus::Overdue);
    assert_eq!(overdue.fine_amount, Decimal::new(150, 2));

    // same instant, same fine
    let report = loans.update_overdue_loans_and_fines_at(three_days_late).await.unwrap();
    assert_eq!(report.changed, 0);
    assert_eq!(loans.get_loan(loan.id).await.unwrap().fine_amount, Decimal::new(150, 2));

    // one started day later
    loans
        .update_overdue_loans_and_fines_at(three_days_late + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(loans.get_loan(loan.id).await.unwrap().fine_amount, Decimal::new(200, 2));

    assert_eq!(
        lib.services.eligibility.check_at(user.id, Utc::now()).await.unwrap(),
        Some(Ineligibility::OverdueLoan { loan_id: loan.id })
    );
    let refused = loans.create_loan(loan_request(user.id, copies[1].id)).await;
    assert!(matches!(refused, Err(AppError::IneligibleBorrower(_))));
    assert_eq!(
        lib.store.get_copy(copies[1].id).await.unwrap().status,
        CopyStatus::Available
    );
}

#[tokio::test]
async fn test_unpaid_fine_blocks_until_paid() {
    let lib = Library::new();
    let user = lib.user("Ada").await;
    let (_, copies) = lib.title("9782070360027", 2).await;
    let loans = &lib.services.loans;

    let loan = loans.create_loan(due_in_one_hour(user.id, copies[0].id)).await.unwrap();
    loans
        .update_overdue_loans_and_fines_at(loan.due_date + Duration::days(4))
        .await
        .unwrap();
    let returned = loans.return_loan(loan.id).await.unwrap();
    assert_eq!(returned.status, LoanStatus::Returned);
    assert_eq!(returned.fine_amount, Decimal::new(200, 2));

    assert!(!lib.services.eligibility.can_borrow(user.id).await.unwrap());
    let refused = loans.create_loan(loan_request(user.id, copies[1].id)).await;
    assert!(matches!(refused, Err(AppError::IneligibleBorrower(_))));

    let paid = loans.pay_fine(loan.id).await.unwrap();
    assert_eq!(paid.fine_amount, Decimal::ZERO);
    assert_eq!(paid.fine_paid, Decimal::new(200, 2));
    assert_eq!(paid.status, LoanStatus::Returned);

    assert!(lib.services.eligibility.can_borrow(user.id).await.unwrap());
    let loan = loans.create_loan(loan_request(user.id, copies[1].id)).await.unwrap();
    assert_eq!(loan.status, LoanStatus::Borrowed);
}

#[tokio::test]
async fn test_paid_fine_is_not_charged_twice() {
    let lib = Library::new();
    let user = lib.user("Ada").await;
    let (_, copies) = lib.title("9782070360028", 1).await;
    let loans = &lib.services.loans;

    let loan = loans.create_loan(due_in_one_hour(user.id, copies[0].id)).await.unwrap();
    let two_days_late = loan.due_date + Duration::days(2);
    loans.update_overdue_loans_and_fines_at(two_days_late).await.unwrap();
    loans.pay_fine(loan.id).await.unwrap();

    loans.update_overdue_loans_and_fines_at(two_days_late).await.unwrap();
    let still_out = loans.get_loan(loan.id).await.unwrap();
    assert_eq!(still_out.status, LoanStatus::Overdue);
    assert_eq!(still_out.fine_amount, Decimal::ZERO);

    loans
        .update_overdue_loans_and_fines_at(two_days_late + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(
        loans.get_loan(loan.id).await.unwrap().fine_amount,
        Decimal::new(50, 2)
    );
}

#[tokio::test]
async fn test_extension_granted_once() {
    let lib = Library::new();
    let user = lib.user("Ada").await;
    let (_, copies) = lib.title("9782070360029", 2).await;
    let loans = &lib.services.loans;

    let loan = lib.borrow(user.id, copies[0].id).await;
    let extended = loans.extend_loan(loan.id).await.unwrap();
    assert!(extended.extended);
    assert_eq!(extended.due_date, loan.due_date + Duration::days(14));

    let second = loans.extend_loan(loan.id).await;
    assert!(matches!(second, Err(AppError::InvalidState(_))));
    assert_eq!(loans.get_loan(loan.id).await.unwrap().due_date, extended.due_date);

    let late = loans.create_loan(due_in_one_hour(user.id, copies[1].id)).await.unwrap();
    loans
        .update_overdue_loans_and_fines_at(late.due_date + Duration::days(1))
        .await
        .unwrap();
    assert!(matches!(
        loans.extend_loan(late.id).await,
        Err(AppError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_past_due_loan_cannot_be_extended_before_the_sweep() {
    let lib = Library::new();
    let user = lib.user("Ada").await;
    let (_, copies) = lib.title("9782070360040", 1).await;
    let loans = &lib.services.loans;

    let loan = loans.create_loan(due_in_one_hour(user.id, copies[0].id)).await.unwrap();
    let after_due = loan.due_date + Duration::hours(2);

    // no sweep has run: the loan is still Borrowed
    assert_eq!(loans.get_loan(loan.id).await.unwrap().status, LoanStatus::Borrowed);
    assert!(matches!(
        loans.extend_loan_at(loan.id, after_due).await,
        Err(AppError::InvalidState(_))
    ));

    let unchanged = loans.get_loan(loan.id).await.unwrap();
    assert_eq!(unchanged.due_date, loan.due_date);
    assert!(!unchanged.extended);

    // days already late are still charged
    loans
        .update_overdue_loans_and_fines_at(loan.due_date + Duration::days(2))
        .await
        .unwrap();
    assert_eq!(
        loans.get_loan(loan.id).await.unwrap().fine_amount,
        Decimal::new(100, 2)
    );
}

#[tokio::test]
async fn test_reservations_served_in_request_order() {
    let lib = Library::new();
    let holder = lib.user("Holder").await;
    let first = lib.user("First").await;
    let second = lib.user("Second").await;
    let (variant, copies) = lib.title("9782070360030", 1).await;
    let copy_id = copies[0].id;
    let reservations = &lib.services.reservations;

    let loan = lib.borrow(holder.id, copy_id).await;
    let r1 = reservations.create_reservation(reserve(first.id, variant.id)).await.unwrap();
    let r2 = reservations.create_reservation(reserve(second.id, variant.id)).await.unwrap();
    assert_eq!(r1.status, ReservationStatus::Pending);

    // nothing on the shelf yet
    let report = reservations.check_available_reservations_at(Utc::now()).await.unwrap();
    assert_eq!(report.changed, 0);

    lib.services.loans.return_loan(loan.id).await.unwrap();
    // returning does not hand the copy over by itself
    assert_eq!(lib.store.get_copy(copy_id).await.unwrap().status, CopyStatus::Available);

    let report = reservations.check_available_reservations_at(Utc::now()).await.unwrap();
    assert_eq!(report.changed, 1);

    let held = reservations.get_reservation(r1.id).await.unwrap();
    assert_eq!(held.status, ReservationStatus::Available);
    assert_eq!(held.fulfilled_copy_id, Some(copy_id));
    assert!(held.expiration_date.is_some());
    assert_eq!(
        reservations.get_reservation(r2.id).await.unwrap().status,
        ReservationStatus::Pending
    );
    assert_eq!(lib.store.get_copy(copy_id).await.unwrap().status, CopyStatus::Reserved);
    assert!(lib.sink.for_user(first.id).contains(&NotificationType::ReservationAvailable));

    // pick up, read, bring back: the copy moves on to the next in line
    let pickup = lib
        .services
        .loans
        .create_loan(CreateLoan {
            reservation_id: Some(r1.id),
            processed_by: Some(holder.id),
            ..loan_request(first.id, copy_id)
        })
        .await
        .unwrap();
    let fulfilled = reservations.get_reservation(r1.id).await.unwrap();
    assert_eq!(fulfilled.status, ReservationStatus::Fulfilled);
    assert_eq!(fulfilled.processed_by, Some(holder.id));
    assert_eq!(pickup.reservation_id, Some(r1.id));

    lib.services.loans.return_loan(pickup.id).await.unwrap();
    reservations.check_available_reservations_at(Utc::now()).await.unwrap();
    let next = reservations.get_reservation(r2.id).await.unwrap();
    assert_eq!(next.status, ReservationStatus::Available);
    assert_eq!(next.fulfilled_copy_id, Some(copy_id));
}

#[tokio::test]
async fn test_held_copy_only_goes_to_its_holder() {
    let lib = Library::new();
    let alice = lib.user("Alice").await;
    let bob = lib.user("Bob").await;
    let (variant, copies) = lib.title("9782070360031", 1).await;
    let copy_id = copies[0].id;
    let reservations = &lib.services.reservations;
    let loans = &lib.services.loans;

    let held = reservations.create_reservation(reserve(alice.id, variant.id)).await.unwrap();
    let waiting = reservations.create_reservation(reserve(bob.id, variant.id)).await.unwrap();
    reservations.check_available_reservations_at(Utc::now()).await.unwrap();

    assert!(matches!(
        loans.create_loan(loan_request(bob.id, copy_id)).await,
        Err(AppError::CopyUnavailable(_))
    ));
    assert!(matches!(
        loans
            .create_loan(CreateLoan {
                reservation_id: Some(held.id),
                ..loan_request(bob.id, copy_id)
            })
            .await,
        Err(AppError::InvalidState(_))
    ));
    assert!(matches!(
        loans
            .create_loan(CreateLoan {
                reservation_id: Some(waiting.id),
                ..loan_request(bob.id, copy_id)
            })
            .await,
        Err(AppError::InvalidState(_))
    ));
    assert_eq!(lib.store.get_copy(copy_id).await.unwrap().status, CopyStatus::Reserved);
    assert_eq!(
        reservations.get_reservation(held.id).await.unwrap().status,
        ReservationStatus::Available
    );
}

#[tokio::test]
async fn test_unclaimed_hold_expires_and_copy_moves_on() {
    let lib = Library::new();
    let alice = lib.user("Alice").await;
    let bob = lib.user("Bob").await;
    let (variant, copies) = lib.title("9782070360032", 1).await;
    let copy_id = copies[0].id;
    let reservations = &lib.services.reservations;
    let scheduler = lib.services.scheduler();

    let held = reservations.create_reservation(reserve(alice.id, variant.id)).await.unwrap();
    let waiting = reservations.create_reservation(reserve(bob.id, variant.id)).await.unwrap();
    scheduler.run_tick_at(Utc::now()).await;
    assert_eq!(
        reservations.get_reservation(held.id).await.unwrap().status,
        ReservationStatus::Available
    );

    // still inside the hold period
    let report = reservations.expire_old_reservations_at(days_from_now(1)).await.unwrap();
    assert_eq!(report.changed, 0);

    // matching runs before expiry, so the released copy waits for the next tick
    let tick = scheduler.run_tick_at(days_from_now(3)).await;
    assert_eq!(tick.failed_step, None);
    assert_eq!(tick.report_for(TickStep::ReservationExpiry).unwrap().changed, 1);
    assert_eq!(tick.report_for(TickStep::AvailabilityMatching).unwrap().changed, 0);

    let expired = reservations.get_reservation(held.id).await.unwrap();
    assert_eq!(expired.status, ReservationStatus::Expired);
    assert_eq!(expired.fulfilled_copy_id, None);
    assert_eq!(lib.store.get_copy(copy_id).await.unwrap().status, CopyStatus::Available);
    assert!(lib.sink.for_user(alice.id).contains(&NotificationType::ReservationExpired));

    scheduler.run_tick_at(days_from_now(3)).await;
    let next = reservations.get_reservation(waiting.id).await.unwrap();
    assert_eq!(next.status, ReservationStatus::Available);
    assert_eq!(next.fulfilled_copy_id, Some(copy_id));
}

#[tokio::test]
async fn test_pending_reservation_never_expires() {
    let lib = Library::new();
    let user = lib.user("Ada").await;
    let (variant, _) = lib.title("9782070360033", 0).await;
    let reservations = &lib.services.reservations;

    let pending = reservations.create_reservation(reserve(user.id, variant.id)).await.unwrap();
    let report = reservations.expire_old_reservations_at(days_from_now(365)).await.unwrap();

    assert_eq!(report.examined, 0);
    assert_eq!(
        reservations.get_reservation(pending.id).await.unwrap().status,
        ReservationStatus::Pending
    );
}

#[tokio::test]
async fn test_cancel_releases_held_copy() {
    let lib = Library::new();
    let user = lib.user("Ada").await;
    let (variant, copies) = lib.title("9782070360034", 1).await;
    let reservations = &lib.services.reservations;

    let held = reservations.create_reservation(reserve(user.id, variant.id)).await.unwrap();
    reservations.check_available_reservations_at(Utc::now()).await.unwrap();
    assert_eq!(
        lib.store.get_copy(copies[0].id).await.unwrap().status,
        CopyStatus::Reserved
    );

    let cancelled = reservations.cancel_reservation(held.id, None).await.unwrap();
    assert_eq!(cancelled.status, ReservationStatus::Cancelled);
    assert_eq!(cancelled.fulfilled_copy_id, None);
    assert_eq!(
        lib.store.get_copy(copies[0].id).await.unwrap().status,
        CopyStatus::Available
    );

    assert!(matches!(
        reservations.cancel_reservation(held.id, None).await,
        Err(AppError::InvalidState(_))
    ));
    assert_eq!(
        lib.sink.for_user(user.id),
        vec![
            NotificationType::ReservationConfirmed,
            NotificationType::ReservationAvailable,
            NotificationType::ReservationCancelled,
        ]
    );
}

#[tokio::test]
async fn test_reminders_sent_once_per_interval() {
    let lib = Library::new();
    let user = lib.user("Ada").await;
    let (_, copies) = lib.title("9782070360035", 2).await;
    let loans = &lib.services.loans;

    let now = Utc::now();
    let loan = loans
        .create_loan(CreateLoan {
            due_date: Some(now + Duration::hours(36)),
            ..loan_request(user.id, copies[0].id)
        })
        .await
        .unwrap();
    // due well outside the window
    lib.borrow(user.id, copies[1].id).await;

    let report = loans.send_due_date_reminders_at(now).await.unwrap();
    assert_eq!((report.examined, report.changed), (1, 1));

    let report = loans.send_due_date_reminders_at(now + Duration::hours(1)).await.unwrap();
    assert_eq!(report.changed, 0);

    let report = loans.send_due_date_reminders_at(now + Duration::hours(25)).await.unwrap();
    assert_eq!(report.changed, 1);

    assert_eq!(lib.sink.count(NotificationType::DueDateReminder), 2);
    assert!(loans.get_loan(loan.id).await.unwrap().last_reminded_at.is_some());
}

#[tokio::test]
async fn test_fine_notices_follow_fine_growth() {
    let lib = Library::new();
    let user = lib.user("Ada").await;
    let (_, copies) = lib.title("9782070360036", 1).await;
    let scheduler = lib.services.scheduler();

    let loan = lib
        .services
        .loans
        .create_loan(due_in_one_hour(user.id, copies[0].id))
        .await
        .unwrap();
    let late = loan.due_date + Duration::days(2);

    // fines are updated before the notices go out in the same tick
    let tick = scheduler.run_tick_at(late).await;
    assert_eq!(tick.report_for(TickStep::OverdueSweep).unwrap().changed, 1);
    assert_eq!(tick.report_for(TickStep::FineNotifications).unwrap().changed, 1);

    let tick = scheduler.run_tick_at(late).await;
    assert_eq!(tick.report_for(TickStep::FineNotifications).unwrap().changed, 0);

    scheduler.run_tick_at(late + Duration::days(1)).await;
    assert_eq!(lib.sink.count(NotificationType::FineNotice), 2);
}

#[tokio::test]
async fn test_new_fine_after_payment_is_notified() {
    let lib = Library::new();
    let user = lib.user("Ada").await;
    let (_, copies) = lib.title("9782070360041", 1).await;
    let loans = &lib.services.loans;
    let scheduler = lib.services.scheduler();

    let loan = loans.create_loan(due_in_one_hour(user.id, copies[0].id)).await.unwrap();
    let late = loan.due_date + Duration::days(2);

    scheduler.run_tick_at(late).await;
    assert_eq!(lib.sink.count(NotificationType::FineNotice), 1);

    let paid = loans.pay_fine(loan.id).await.unwrap();
    assert_eq!(paid.status, LoanStatus::Overdue);
    assert_eq!(paid.fine_amount, Decimal::ZERO);
    assert_eq!(paid.fine_notified_amount, Decimal::ZERO);

    // still out one day later: a fresh, smaller fine gets its own notice
    let tick = scheduler.run_tick_at(late + Duration::days(1)).await;
    assert_eq!(tick.report_for(TickStep::FineNotifications).unwrap().changed, 1);
    assert_eq!(
        loans.get_loan(loan.id).await.unwrap().fine_amount,
        Decimal::new(50, 2)
    );
    assert_eq!(lib.sink.count(NotificationType::FineNotice), 2);
}

#[tokio::test]
async fn test_concurrent_returns_succeed_once() {
    let lib = Library::new();
    let user = lib.user("Ada").await;
    let (_, copies) = lib.title("9782070360037", 1).await;
    let loan = lib.borrow(user.id, copies[0].id).await;

    let a = lib.services.loans.clone();
    let b = lib.services.loans.clone();
    let (first, second) = tokio::join!(a.return_loan(loan.id), b.return_loan(loan.id));

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(AppError::InvalidState(_)))));
    assert_eq!(lib.sink.count(NotificationType::LoanReturned), 1);
    assert_eq!(
        lib.store.get_copy(copies[0].id).await.unwrap().status,
        CopyStatus::Available
    );
}

#[tokio::test]
async fn test_concurrent_loans_on_one_copy_succeed_once() {
    let lib = Library::new();
    let alice = lib.user("Alice").await;
    let bob = lib.user("Bob").await;
    let (_, copies) = lib.title("9782070360038", 1).await;
    let copy_id = copies[0].id;

    let a = lib.services.loans.clone();
    let b = lib.services.loans.clone();
    let (first, second) = tokio::join!(
        a.create_loan(loan_request(alice.id, copy_id)),
        b.create_loan(loan_request(bob.id, copy_id))
    );

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(AppError::CopyUnavailable(_)))));

    let active = lib
        .store
        .list_loans_by_status(LoanStatus::Borrowed)
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn test_notifications_reach_the_store_through_the_dispatcher() {
    let store = Arc::new(MemoryCatalogStore::new());
    let user = store.add_user("Ada", Some("ada@example.org")).await;
    let variant = store.add_variant("9782070360039").await;

    let (notifier, rx) = ChannelNotifier::channel();
    let notifier: Arc<dyn NotificationSink> = Arc::new(notifier);
    let services = Services::new(store.clone(), notifier, LendingConfig::default());

    let reservation = services
        .reservations
        .create_reservation(reserve(user.id, variant.id))
        .await
        .unwrap();
    drop(services);

    let store_dyn: Arc<dyn CatalogStore> = store.clone();
    NotificationDispatcher::new(store_dyn, None).run(rx).await;

    let stored = store.notifications().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].notification_type, NotificationType::ReservationConfirmed);
    assert_eq!(stored[0].receiver_id, user.id);
    assert_eq!(stored[0].related_table, "reservations");
    assert_eq!(stored[0].related_id, reservation.id);
}
