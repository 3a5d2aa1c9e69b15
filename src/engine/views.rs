use chrono::NaiveDate;

use super::{owned_appointment, BookingEngine};
use crate::error::BookingError;
use crate::invalidation::CacheInvalidator;
use crate::model::{Appointment, SlotView};
use crate::store::BookingStore;

impl<S: BookingStore, C: CacheInvalidator> BookingEngine<S, C> {
    pub fn appointment(
        &self,
        user_id: &str,
        appointment_id: &str,
    ) -> Result<Appointment, BookingError> {
        self.store
            .transaction(|tx| owned_appointment(tx, user_id, appointment_id))
    }

    /// The user's appointments, newest first.
    pub fn user_appointments(&self, user_id: &str) -> Result<Vec<Appointment>, BookingError> {
        Ok(self
            .store
            .transaction(|tx| tx.appointments_for_user(user_id))?)
    }

    /// A doctor's slots for one day with lease expiry already applied.
    pub fn doctor_slots(
        &self,
        doctor_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<SlotView>, BookingError> {
        let views = self.store.transaction(|tx| -> Result<Vec<SlotView>, BookingError> {
            let now = tx.now();
            Ok(tx
                .slots_for_doctor(doctor_id, date)?
                .into_iter()
                .map(|slot| SlotView::at(slot, now))
                .collect())
        })?;
        Ok(views)
    }
}
