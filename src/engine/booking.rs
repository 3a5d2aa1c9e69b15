use tracing::{debug, info};

use super::{appointment_keys, BookingEngine, BookingRequest};
use crate::error::{BookingError, ErrorCode};
use crate::invalidation::CacheInvalidator;
use crate::lease::Lease;
use crate::model::{Appointment, SlotStatus, TimeSlot};
use crate::policy::ensure_upcoming;
use crate::store::{BookingStore, StoreTx};

impl<S: BookingStore, C: CacheInvalidator> BookingEngine<S, C> {
    /// Take or renew the lease on a slot.
    pub fn lock_slot(
        &self,
        user_id: &str,
        doctor_id: &str,
        slot_id: &str,
    ) -> Result<Lease, BookingError> {
        let lease = self
            .store
            .transaction(|tx| self.leases.acquire(tx, slot_id, doctor_id, user_id))?;
        info!(slot_id, user_id, expires_at = %lease.expires_at, "slot locked");
        Ok(lease)
    }

    /// Give up a held lease before it expires.
    pub fn release_lock(&self, user_id: &str, slot_id: &str) -> Result<bool, BookingError> {
        let released = self
            .store
            .transaction(|tx| self.leases.release(tx, slot_id, user_id))?;
        if released {
            info!(slot_id, user_id, "slot lock released");
        }
        Ok(released)
    }

    /// Turn the caller's lease into a booked appointment.
    ///
    /// Cheap preconditions run first in their own read. The slot transition,
    /// the double-booking check, the appointment insert and the OTP consumption
    /// then commit or roll back together.
    pub fn confirm_booking(
        &self,
        user_id: &str,
        request: &BookingRequest,
    ) -> Result<Appointment, BookingError> {
        self.store.transaction(|tx| -> Result<(), BookingError> {
            let now = tx.now();
            let slot = doctor_slot(tx, &request.slot_id, &request.doctor_id)?;
            if slot.status() == SlotStatus::Booked {
                return Err(already_booked(&slot.id));
            }

            let otp_valid = tx
                .otp_verified_until(user_id)?
                .map(|until| now < until)
                .unwrap_or(false);
            if !otp_valid {
                return Err(otp_required());
            }

            if !slot.is_locked_by(user_id, now) {
                return Err(BookingError::new(
                    ErrorCode::LockInvalid,
                    format!("no active lock on slot {} for this user", slot.id),
                ));
            }
            Ok(())
        })?;

        let appointment = self.store.transaction(|tx| -> Result<Appointment, BookingError> {
            let now = tx.now();
            let slot = doctor_slot(tx, &request.slot_id, &request.doctor_id)?;
            ensure_upcoming(&slot, now)?;

            if tx.book_leased_slot(&slot.id, user_id)? == 0 {
                debug!(slot_id = %slot.id, user_id, "lease lost before booking");
                return Err(BookingError::new(
                    ErrorCode::ConflictSlotState,
                    format!("slot {} changed state; lock it again and retry", slot.id),
                ));
            }
            if tx.count_booked_appointments_for_slot(&slot.id)? > 0 {
                return Err(already_booked(&slot.id));
            }

            let appointment = Appointment::booked(
                user_id,
                slot.doctor_id.as_str(),
                slot.id.as_str(),
                request.notes.clone(),
                now,
            );
            tx.insert_appointment(&appointment)?;
            if tx.consume_otp(user_id)? == 0 {
                debug!(user_id, "otp gate spent or lapsed before booking");
                return Err(otp_required());
            }
            Ok(appointment)
        })?;

        info!(
            appointment_id = %appointment.id,
            slot_id = %request.slot_id,
            user_id,
            "appointment booked"
        );
        self.notify(&appointment_keys(&appointment));
        Ok(appointment)
    }
}

/// The slot, provided it belongs to the doctor.
pub(super) fn doctor_slot(
    tx: &mut dyn StoreTx,
    slot_id: &str,
    doctor_id: &str,
) -> Result<TimeSlot, BookingError> {
    tx.slot(slot_id)?
        .filter(|slot| slot.doctor_id == doctor_id)
        .ok_or_else(|| {
            BookingError::new(
                ErrorCode::SlotNotFound,
                format!("slot {} not found for doctor {}", slot_id, doctor_id),
            )
        })
}

fn otp_required() -> BookingError {
    BookingError::new(
        ErrorCode::OtpRequired,
        "verify a one-time passcode before booking",
    )
}

fn already_booked(slot_id: &str) -> BookingError {
    BookingError::new(
        ErrorCode::SlotAlreadyBooked,
        format!("slot {} is already booked", slot_id),
    )
}
