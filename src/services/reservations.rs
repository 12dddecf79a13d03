//! Reservation lifecycle: queueing, copy matching, expiry and cancellation

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::{
    config::LendingConfig,
    error::{AppError, AppResult},
    models::{
        CopyStatus, CreateReservation, NewNotification, NewReservation, NotificationType,
        Reservation, ReservationStatus,
    },
    repository::{CatalogStore, UnitOfWork},
};

use super::{
    notifications::NotificationSink,
    sweep::{retry_on_conflict, SweepReport},
};

#[derive(Clone)]
pub struct ReservationsService {
    store: Arc<dyn CatalogStore>,
    notifier: Arc<dyn NotificationSink>,
    policy: LendingConfig,
}

impl ReservationsService {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        notifier: Arc<dyn NotificationSink>,
        policy: LendingConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            policy,
        }
    }

    pub async fn get_reservation(&self, reservation_id: i32) -> AppResult<Reservation> {
        self.store.get_reservation(reservation_id).await
    }

    pub async fn get_user_reservations(&self, user_id: i32) -> AppResult<Vec<Reservation>> {
        self.store.get_user(user_id).await?;
        self.store.list_user_reservations(user_id).await
    }

    /// Queue a Pending reservation on a variant
    pub async fn create_reservation(&self, data: CreateReservation) -> AppResult<Reservation> {
        self.store.get_user(data.user_id).await?;
        self.store.get_variant(data.variant_id).await?;

        let reservation = self
            .store
            .commit(UnitOfWork::new().insert_reservation(NewReservation {
                user_id: data.user_id,
                variant_id: data.variant_id,
                reservation_date: Utc::now(),
            }))
            .await?
            .first_reservation()?;

        tracing::info!(
            reservation_id = reservation.id,
            user_id = reservation.user_id,
            variant_id = reservation.variant_id,
            "Reservation created"
        );
        self.notifier.notify(NewNotification::for_reservation(
            reservation.user_id,
            NotificationType::ReservationConfirmed,
            reservation.id,
            format!(
                "Your reservation #{} is confirmed. We will let you know when a copy is ready.",
                reservation.id
            ),
        ));
        Ok(reservation)
    }

    /// Cancel a Pending or Available reservation, releasing any held copy
    pub async fn cancel_reservation(
        &self,
        reservation_id: i32,
        processed_by: Option<i32>,
    ) -> AppResult<Reservation> {
        retry_on_conflict("cancel_reservation", || async move {
            let mut reservation = self.store.get_reservation(reservation_id).await?;
            if !matches!(
                reservation.status,
                ReservationStatus::Pending | ReservationStatus::Available
            ) {
                return Err(AppError::InvalidState(format!(
                    "Reservation {} can no longer be cancelled",
                    reservation_id
                )));
            }

            let work = self.release_held_copy(&mut reservation).await?;
            reservation.status = ReservationStatus::Cancelled;
            reservation.processed_by = processed_by.or(reservation.processed_by);
            self.store.commit(work.update_reservation(reservation)).await?;
            Ok(())
        })
        .await?;

        let reservation = self.store.get_reservation(reservation_id).await?;
        tracing::info!(reservation_id, ?processed_by, "Reservation cancelled");
        self.notifier.notify(NewNotification::for_reservation(
            reservation.user_id,
            NotificationType::ReservationCancelled,
            reservation.id,
            format!("Your reservation #{} has been cancelled.", reservation.id),
        ));
        Ok(reservation)
    }

    /// Put the copy held by an Available reservation back on the shelf and
    /// detach it from the reservation
    async fn release_held_copy(&self, reservation: &mut Reservation) -> AppResult<UnitOfWork> {
        let work = UnitOfWork::new();
        let Some(copy_id) = reservation.held_copy() else {
            return Ok(work);
        };
        reservation.fulfilled_copy_id = None;

        let mut copy = self.store.get_copy(copy_id).await?;
        if copy.status != CopyStatus::Reserved {
            return Ok(work);
        }
        copy.status = CopyStatus::Available;
        tracing::debug!(copy_id, reservation_id = reservation.id, "Held copy released");
        Ok(work.update_copy(copy))
    }

    pub async fn check_available_reservations(&self) -> AppResult<SweepReport> {
        self.check_available_reservations_at(Utc::now()).await
    }

    /// Offer every Available copy to the oldest Pending reservation on its variant
    pub async fn check_available_reservations_at(
        &self,
        now: DateTime<Utc>,
    ) -> AppResult<SweepReport> {
        let copies = self.store.list_copies_by_status(CopyStatus::Available).await?;

        let mut report = SweepReport::default();
        for copy in copies {
            let result =
                retry_on_conflict("availability_matching", || self.match_copy(copy.id, now)).await;
            report.record("matching", copy.id, result);
        }

        tracing::info!(
            examined = report.examined,
            matched = report.changed,
            failed = report.failed,
            "Availability matching finished"
        );
        Ok(report)
    }

    async fn match_copy(&self, copy_id: i32, now: DateTime<Utc>) -> AppResult<bool> {
        // A copy taken by a loan since the listing is simply skipped
        let mut copy = self.store.get_copy(copy_id).await?;
        if copy.status != CopyStatus::Available {
            return Ok(false);
        }

        let Some(mut reservation) = self
            .store
            .list_pending_reservations(copy.variant_id)
            .await?
            .into_iter()
            .next()
        else {
            return Ok(false);
        };

        let expiration = now + Duration::days(self.policy.hold_period_days);
        reservation.status = ReservationStatus::Available;
        reservation.expiration_date = Some(expiration);
        reservation.fulfilled_copy_id = Some(copy.id);
        copy.status = CopyStatus::Reserved;

        let (reservation_id, user_id, barcode) =
            (reservation.id, reservation.user_id, copy.barcode.clone());
        self.store
            .commit(UnitOfWork::new().update_copy(copy).update_reservation(reservation))
            .await?;

        tracing::info!(reservation_id, copy_id, user_id, "Copy held for reservation");
        self.notifier.notify(NewNotification::for_reservation(
            user_id,
            NotificationType::ReservationAvailable,
            reservation_id,
            format!(
                "A copy (barcode {}) is waiting for you. Please pick it up before {}.",
                barcode,
                expiration.format("%Y-%m-%d %H:%M")
            ),
        ));
        Ok(true)
    }

    pub async fn expire_old_reservations(&self) -> AppResult<SweepReport> {
        self.expire_old_reservations_at(Utc::now()).await
    }

    /// Expire Available reservations whose hold ran out and free their copies
    pub async fn expire_old_reservations_at(&self, now: DateTime<Utc>) -> AppResult<SweepReport> {
        let stale: Vec<Reservation> = self
            .store
            .list_reservations_by_status(ReservationStatus::Available)
            .await?
            .into_iter()
            .filter(|r| r.expiration_date.is_some_and(|exp| exp < now))
            .collect();

        let mut report = SweepReport::default();
        for reservation in stale {
            let result =
                retry_on_conflict("reservation_expiry", || self.expire(reservation.id, now)).await;
            report.record("expiry", reservation.id, result);
        }

        tracing::info!(
            examined = report.examined,
            expired = report.changed,
            failed = report.failed,
            "Reservation expiry finished"
        );
        Ok(report)
    }

    async fn expire(&self, reservation_id: i32, now: DateTime<Utc>) -> AppResult<bool> {
        let mut reservation = self.store.get_reservation(reservation_id).await?;
        let is_stale = reservation.status == ReservationStatus::Available
            && reservation.expiration_date.is_some_and(|exp| exp < now);
        if !is_stale {
            return Ok(false);
        }

        let work = self.release_held_copy(&mut reservation).await?;
        reservation.status = ReservationStatus::Expired;
        let user_id = reservation.user_id;
        self.store.commit(work.update_reservation(reservation)).await?;

        tracing::info!(reservation_id, user_id, "Reservation expired");
        self.notifier.notify(NewNotification::for_reservation(
            user_id,
            NotificationType::ReservationExpired,
            reservation_id,
            format!(
                "Your reservation #{} expired because the copy was not picked up in time.",
                reservation_id
            ),
        ));
        Ok(true)
    }
}
