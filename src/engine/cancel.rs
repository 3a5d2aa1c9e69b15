use tracing::info;

use super::{appointment_keys, owned_appointment, require_booked, BookingEngine, CancelOutcome};
use crate::error::{BookingError, ErrorCode};
use crate::invalidation::CacheInvalidator;
use crate::model::AppointmentStatus;
use crate::policy::outside_change_window;
use crate::store::BookingStore;

impl<S: BookingStore, C: CacheInvalidator> BookingEngine<S, C> {
    /// Cancel a booked appointment.
    ///
    /// The slot is handed back only when it starts more than the change window
    /// from now; closer than that it stays `BOOKED`.
    pub fn cancel_appointment(
        &self,
        user_id: &str,
        appointment_id: &str,
    ) -> Result<CancelOutcome, BookingError> {
        let window = self.config.change_window();

        let outcome = self.store.transaction(|tx| -> Result<CancelOutcome, BookingError> {
            let now = tx.now();
            let mut appointment = owned_appointment(tx, user_id, appointment_id)?;
            require_booked(&appointment)?;

            let mut slot_released = false;
            if let Some(slot_id) = appointment.time_slot_id.as_deref() {
                let releasable = tx
                    .slot(slot_id)?
                    .map(|slot| outside_change_window(&slot, now, window))
                    .unwrap_or(false);
                if releasable {
                    slot_released = tx.release_booked_slot(slot_id)? > 0;
                }
            }

            if tx.transition_appointment(
                appointment_id,
                AppointmentStatus::Booked,
                AppointmentStatus::Cancelled,
            )? == 0
            {
                return Err(BookingError::new(
                    ErrorCode::ConflictAppointmentState,
                    format!("appointment {} changed concurrently", appointment_id),
                ));
            }
            appointment.status = AppointmentStatus::Cancelled;
            appointment.updated_at = now;

            Ok(CancelOutcome {
                appointment,
                slot_released,
            })
        })?;

        info!(
            appointment_id,
            user_id,
            slot_released = outcome.slot_released,
            "appointment cancelled"
        );
        self.notify(&appointment_keys(&outcome.appointment));
        Ok(outcome)
    }
}
