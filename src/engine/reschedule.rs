use tracing::{debug, info};

use super::booking::doctor_slot;
use super::{
    owned_appointment, require_booked, BookingEngine, RescheduleConfirmation, RescheduleHold,
    RescheduleOutcome,
};
use crate::error::{BookingError, ErrorCode};
use crate::invalidation::{CacheInvalidator, CacheKey};
use crate::model::{Appointment, AppointmentStatus, SlotTiming};
use crate::policy::outside_change_window;
use crate::store::BookingStore;

impl<S: BookingStore, C: CacheInvalidator> BookingEngine<S, C> {
    /// Phase one: hold the replacement slot.
    ///
    /// Only the new slot's lease changes. The appointment and its current slot
    /// are untouched until `confirm_reschedule`.
    pub fn reschedule_appointment(
        &self,
        user_id: &str,
        appointment_id: &str,
        new_slot_id: &str,
    ) -> Result<RescheduleHold, BookingError> {
        let window = self.config.change_window();

        let hold = self.store.transaction(|tx| -> Result<RescheduleHold, BookingError> {
            let now = tx.now();
            let appointment = owned_appointment(tx, user_id, appointment_id)?;
            require_booked(&appointment)?;

            let old_slot_id = appointment.time_slot_id.clone().ok_or_else(no_active_slot)?;
            if old_slot_id == new_slot_id {
                return Err(same_slot());
            }

            let old_slot = tx.slot(&old_slot_id)?.ok_or_else(no_active_slot)?;
            if !outside_change_window(&old_slot, now, window) {
                return Err(BookingError::new(
                    ErrorCode::RescheduleWindowClosed,
                    format!(
                        "appointments can only be rescheduled more than {} hours before start",
                        window.num_hours()
                    ),
                ));
            }

            let lease = self
                .leases
                .acquire(tx, new_slot_id, &appointment.doctor_id, user_id)?;
            Ok(RescheduleHold {
                appointment_id: appointment.id,
                old_slot_id,
                lease,
            })
        })?;

        info!(
            appointment_id,
            new_slot_id,
            old_slot_id = %hold.old_slot_id,
            "reschedule slot held"
        );
        Ok(hold)
    }

    /// Phase two: swap the appointment onto the held slot.
    ///
    /// Books the new slot, retires the old appointment, frees the old slot,
    /// clears stray references to the new slot and creates the replacement
    /// appointment, all in one transaction.
    pub fn confirm_reschedule(
        &self,
        user_id: &str,
        confirmation: &RescheduleConfirmation,
    ) -> Result<RescheduleOutcome, BookingError> {
        self.store.transaction(|tx| -> Result<(), BookingError> {
            let appointment = owned_appointment(tx, user_id, &confirmation.appointment_id)?;
            check_identifiers(&appointment, confirmation)?;
            require_booked(&appointment)
        })?;

        let outcome = self.store.transaction(|tx| -> Result<RescheduleOutcome, BookingError> {
            let now = tx.now();
            let mut previous = owned_appointment(tx, user_id, &confirmation.appointment_id)?;
            check_identifiers(&previous, confirmation)?;
            require_booked(&previous)?;

            let new_slot = doctor_slot(tx, &confirmation.new_slot_id, &confirmation.doctor_id)?;
            if !new_slot.is_locked_by(user_id, now) {
                return Err(BookingError::new(
                    ErrorCode::NewSlotNotLockedByUser,
                    format!("slot {} is not locked by this user", new_slot.id),
                ));
            }
            if new_slot.timing(now) != SlotTiming::Upcoming {
                return Err(BookingError::new(
                    ErrorCode::SlotAlreadyStartedOrPast,
                    format!("slot {} has already started or passed", new_slot.id),
                ));
            }

            if tx.book_leased_slot(&new_slot.id, user_id)? == 0 {
                debug!(slot_id = %new_slot.id, user_id, "new slot lease lost");
                return Err(BookingError::new(
                    ErrorCode::ConflictNewSlot,
                    format!("slot {} changed state; hold it again and retry", new_slot.id),
                ));
            }
            if tx.transition_appointment(
                &previous.id,
                AppointmentStatus::Booked,
                AppointmentStatus::Rescheduled,
            )? == 0
            {
                return Err(BookingError::new(
                    ErrorCode::ConflictAppointmentState,
                    format!("appointment {} changed concurrently", previous.id),
                ));
            }
            if tx.release_booked_slot(&confirmation.old_slot_id)? == 0 {
                debug!(slot_id = %confirmation.old_slot_id, "old slot was not booked");
            }

            let detached = tx.detach_slot_references(&new_slot.id)?;
            let appointment = Appointment::booked(
                user_id,
                previous.doctor_id.as_str(),
                new_slot.id.as_str(),
                previous.notes.clone(),
                now,
            );
            tx.insert_appointment(&appointment)?;

            previous.status = AppointmentStatus::Rescheduled;
            previous.updated_at = now;
            Ok(RescheduleOutcome {
                previous,
                appointment,
                detached,
            })
        })?;

        info!(
            previous_id = %outcome.previous.id,
            appointment_id = %outcome.appointment.id,
            detached = outcome.detached,
            "appointment rescheduled"
        );
        self.notify(&[
            CacheKey::user_appointments(user_id),
            CacheKey::appointment(user_id, outcome.previous.id.as_str()),
            CacheKey::appointment(user_id, outcome.appointment.id.as_str()),
        ]);
        Ok(outcome)
    }
}

fn check_identifiers(
    appointment: &Appointment,
    confirmation: &RescheduleConfirmation,
) -> Result<(), BookingError> {
    if appointment.doctor_id != confirmation.doctor_id {
        return Err(BookingError::new(
            ErrorCode::DoctorMismatch,
            "doctor does not match the appointment",
        ));
    }
    if appointment.time_slot_id.as_deref() != Some(confirmation.old_slot_id.as_str()) {
        return Err(BookingError::new(
            ErrorCode::OldSlotMismatch,
            "old slot does not match the appointment",
        ));
    }
    if confirmation.new_slot_id == confirmation.old_slot_id {
        return Err(same_slot());
    }
    Ok(())
}

fn no_active_slot() -> BookingError {
    BookingError::new(
        ErrorCode::NoActiveSlot,
        "appointment has no active time slot",
    )
}

fn same_slot() -> BookingError {
    BookingError::new(
        ErrorCode::SameSlot,
        "new slot must differ from the current slot",
    )
}
