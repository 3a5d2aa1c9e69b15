//! Booking workflows.
//!
//! Each workflow reads the state it depends on inside the same store
//! transaction that changes it, expresses every change as a conditional write,
//! and maps "zero rows affected" to a conflict. Cache invalidation runs only
//! after a commit and is best-effort.
//!
//! ## Example
//!
//! ```ignore
//! use slot_booking::{BookingEngine, BookingRequest, InMemoryBookingStore};
//!
//! let engine = BookingEngine::new(InMemoryBookingStore::new());
//! let lease = engine.lock_slot("user-1", "doctor-1", "slot-1")?;
//! let appointment = engine.confirm_booking(
//!     "user-1",
//!     &BookingRequest::new("doctor-1", "slot-1"),
//! )?;
//! ```

mod booking;
mod cancel;
mod reschedule;
mod response;
mod status;
mod views;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::BookingConfig;
use crate::error::{BookingError, ErrorCode};
use crate::invalidation::{CacheInvalidator, CacheKey, NoopInvalidator};
use crate::lease::{Lease, LeaseManager};
use crate::model::Appointment;
use crate::store::{BookingStore, StoreTx};

pub use response::BookingResponse;

/// Payload of a booking confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub doctor_id: String,
    pub slot_id: String,
    pub notes: Option<String>,
}

impl BookingRequest {
    pub fn new(doctor_id: impl Into<String>, slot_id: impl Into<String>) -> Self {
        Self {
            doctor_id: doctor_id.into(),
            slot_id: slot_id.into(),
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Identifiers echoed back by the client when committing a reschedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescheduleConfirmation {
    pub appointment_id: String,
    pub new_slot_id: String,
    pub old_slot_id: String,
    pub doctor_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub appointment: Appointment,
    /// Whether the slot went back to `AVAILABLE`.
    pub slot_released: bool,
}

/// First phase of a reschedule: the replacement slot is held, nothing else changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescheduleHold {
    pub appointment_id: String,
    pub old_slot_id: String,
    pub lease: Lease,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescheduleOutcome {
    /// The retired appointment, now `RESCHEDULED`.
    pub previous: Appointment,
    /// The replacement appointment on the new slot.
    pub appointment: Appointment,
    /// Stray appointments whose reference to the new slot was cleared.
    pub detached: usize,
}

/// Orchestrates the booking workflows over a `BookingStore`.
pub struct BookingEngine<S, C = NoopInvalidator> {
    store: S,
    leases: LeaseManager,
    config: BookingConfig,
    invalidator: C,
}

impl<S: BookingStore> BookingEngine<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, BookingConfig::default())
    }

    pub fn with_config(store: S, config: BookingConfig) -> Self {
        Self {
            store,
            leases: LeaseManager::from_config(&config),
            config,
            invalidator: NoopInvalidator,
        }
    }
}

impl<S: BookingStore, C: CacheInvalidator> BookingEngine<S, C> {
    /// Swap the invalidation target.
    pub fn with_invalidator<D: CacheInvalidator>(self, invalidator: D) -> BookingEngine<S, D> {
        BookingEngine {
            store: self.store,
            leases: self.leases,
            config: self.config,
            invalidator,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &BookingConfig {
        &self.config
    }

    pub fn leases(&self) -> &LeaseManager {
        &self.leases
    }

    pub fn invalidator(&self) -> &C {
        &self.invalidator
    }

    fn notify(&self, keys: &[CacheKey]) {
        if let Err(err) = self.invalidator.invalidate(keys) {
            warn!(error = %err, keys = keys.len(), "cache invalidation failed");
        }
    }
}

/// The caller's appointment, or `APPOINTMENT_NOT_FOUND` when it is missing or
/// belongs to someone else.
fn owned_appointment(
    tx: &mut dyn StoreTx,
    user_id: &str,
    appointment_id: &str,
) -> Result<Appointment, BookingError> {
    tx.appointment(appointment_id)?
        .filter(|appointment| appointment.user_id == user_id)
        .ok_or_else(|| {
            BookingError::new(
                ErrorCode::AppointmentNotFound,
                format!("appointment {} not found", appointment_id),
            )
        })
}

fn require_booked(appointment: &Appointment) -> Result<(), BookingError> {
    if appointment.is_booked() {
        Ok(())
    } else {
        Err(BookingError::new(
            ErrorCode::AppointmentNotBooked,
            format!(
                "appointment {} is {}",
                appointment.id,
                appointment.status.as_str()
            ),
        ))
    }
}

fn appointment_keys(appointment: &Appointment) -> Vec<CacheKey> {
    vec![
        CacheKey::user_appointments(appointment.user_id.as_str()),
        CacheKey::appointment(appointment.user_id.as_str(), appointment.id.as_str()),
    ]
}
