//! The authoritative slot and appointment tables.
//!
//! Every state change is a conditional write that reports how many rows it
//! touched. Callers treat "fewer rows than expected" as a lost race; the store
//! never decides that on its own.
//!
//! ## Example
//!
//! ```ignore
//! use slot_booking::{BookingStore, InMemoryBookingStore, BookingError};
//!
//! let store = InMemoryBookingStore::new();
//! store.insert_slot(&slot)?;
//!
//! let booked = store.transaction(|tx| -> Result<usize, BookingError> {
//!     Ok(tx.book_leased_slot(&slot.id, "user-1")?)
//! })?;
//! ```

mod in_memory;
#[cfg(feature = "sqlite")]
mod sqlite;

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::StoreError;
use crate::model::{Appointment, AppointmentStatus, TimeSlot};

pub use in_memory::InMemoryBookingStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBookingStore;

/// Operations available inside one atomic transaction.
///
/// `now()` is read once from the store's clock when the transaction begins;
/// every time comparison made by the conditional writes uses that instant.
pub trait StoreTx {
    fn now(&self) -> DateTime<Utc>;

    fn slot(&mut self, slot_id: &str) -> Result<Option<TimeSlot>, StoreError>;

    /// A doctor's slots on one day, ordered by start time.
    fn slots_for_doctor(
        &mut self,
        doctor_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<TimeSlot>, StoreError>;

    /// Fails with `StoreError::Duplicate` on a repeated id or a repeated
    /// (doctor, date, start time).
    fn insert_slot(&mut self, slot: &TimeSlot) -> Result<(), StoreError>;

    /// Live leases held by `user_id` on slots other than `except_slot_id`.
    fn count_live_leases(&mut self, user_id: &str, except_slot_id: &str)
        -> Result<usize, StoreError>;

    /// `LOCKED` by `user_id` until `expires_at`, provided the slot belongs to
    /// `doctor_id` and is available, holds an expired lease, or is already
    /// leased to the same user.
    fn acquire_lease(
        &mut self,
        slot_id: &str,
        doctor_id: &str,
        user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    /// `LOCKED` by `user_id` to `AVAILABLE`.
    fn release_lease(&mut self, slot_id: &str, user_id: &str) -> Result<usize, StoreError>;

    /// `LOCKED` by `user_id` with a live lease to `BOOKED`.
    fn book_leased_slot(&mut self, slot_id: &str, user_id: &str) -> Result<usize, StoreError>;

    /// `BOOKED` to `AVAILABLE`.
    fn release_booked_slot(&mut self, slot_id: &str) -> Result<usize, StoreError>;

    /// Every `LOCKED` slot whose lease has expired to `AVAILABLE`.
    fn release_expired_leases(&mut self) -> Result<usize, StoreError>;

    fn appointment(&mut self, appointment_id: &str) -> Result<Option<Appointment>, StoreError>;

    /// A user's appointments, newest first.
    fn appointments_for_user(&mut self, user_id: &str) -> Result<Vec<Appointment>, StoreError>;

    fn count_booked_appointments_for_slot(&mut self, slot_id: &str)
        -> Result<usize, StoreError>;

    /// Fails with `StoreError::Duplicate` on a repeated id, or on a second
    /// `BOOKED` appointment for the same slot.
    fn insert_appointment(&mut self, appointment: &Appointment) -> Result<(), StoreError>;

    /// Moves an appointment from `from` to `to`, touching `updated_at`.
    fn transition_appointment(
        &mut self,
        appointment_id: &str,
        from: AppointmentStatus,
        to: AppointmentStatus,
    ) -> Result<usize, StoreError>;

    /// Clears `time_slot_id` on every appointment still pointing at `slot_id`.
    fn detach_slot_references(&mut self, slot_id: &str) -> Result<usize, StoreError>;

    fn otp_verified_until(&mut self, user_id: &str) -> Result<Option<DateTime<Utc>>, StoreError>;

    fn set_otp_verified_until(
        &mut self,
        user_id: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Consumes the OTP gate, provided it is still valid at `now()`.
    /// Returns 0 when there was no live gate to spend.
    fn consume_otp(&mut self, user_id: &str) -> Result<usize, StoreError>;
}

/// A transactional store holding slots, appointments and OTP gates.
pub trait BookingStore: Send + Sync {
    /// The authoritative current instant.
    fn now(&self) -> Result<DateTime<Utc>, StoreError>;

    /// Run `f` atomically. An `Err` from `f` rolls every write back.
    fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTx) -> Result<T, E>,
        E: From<StoreError>;

    fn insert_slot(&self, slot: &TimeSlot) -> Result<(), StoreError> {
        self.transaction(|tx| tx.insert_slot(slot))
    }

    fn slot(&self, slot_id: &str) -> Result<Option<TimeSlot>, StoreError> {
        self.transaction(|tx| tx.slot(slot_id))
    }

    fn appointment(&self, appointment_id: &str) -> Result<Option<Appointment>, StoreError> {
        self.transaction(|tx| tx.appointment(appointment_id))
    }

    /// Entry point for the OTP collaborator once a passcode is verified.
    fn set_otp_verified_until(
        &self,
        user_id: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.transaction(|tx| tx.set_otp_verified_until(user_id, until))
    }
}
