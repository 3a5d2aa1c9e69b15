use tracing::info;

use super::{appointment_keys, BookingEngine};
use crate::error::{BookingError, ErrorCode};
use crate::invalidation::CacheInvalidator;
use crate::model::{Appointment, AppointmentStatus};
use crate::store::BookingStore;

impl<S: BookingStore, C: CacheInvalidator> BookingEngine<S, C> {
    /// Administrative status change of a booked appointment.
    ///
    /// Allowed targets are `COMPLETED` and `CANCELLED`. The slot is left as it
    /// is; releasing seats is the patient-facing cancel's job.
    pub fn update_appointment_status(
        &self,
        appointment_id: &str,
        status: AppointmentStatus,
    ) -> Result<Appointment, BookingError> {
        if !matches!(
            status,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled
        ) {
            return Err(invalid_transition(status));
        }

        let appointment = self.store.transaction(|tx| -> Result<Appointment, BookingError> {
            let mut appointment = tx.appointment(appointment_id)?.ok_or_else(|| {
                BookingError::new(
                    ErrorCode::AppointmentNotFound,
                    format!("appointment {} not found", appointment_id),
                )
            })?;
            if appointment.status != AppointmentStatus::Booked {
                return Err(invalid_transition(status));
            }

            if tx.transition_appointment(appointment_id, AppointmentStatus::Booked, status)? == 0 {
                return Err(BookingError::new(
                    ErrorCode::ConflictAppointmentState,
                    format!("appointment {} changed concurrently", appointment_id),
                ));
            }
            appointment.status = status;
            appointment.updated_at = tx.now();
            Ok(appointment)
        })?;

        info!(appointment_id, status = status.as_str(), "appointment status updated");
        self.notify(&appointment_keys(&appointment));
        Ok(appointment)
    }
}

fn invalid_transition(status: AppointmentStatus) -> BookingError {
    BookingError::new(
        ErrorCode::InvalidStatusTransition,
        format!("cannot move appointment to {}", status.as_str()),
    )
}
