//! Booking domain records: time slots with their lease state, and appointments.

mod appointment;
mod slot;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use appointment::{Appointment, AppointmentStatus};
pub use slot::{
    hhmm, LeaseHold, SlotState, SlotStatus, SlotTiming, TimeSlot, SLOT_LENGTH_MINUTES,
};

/// A slot as presented to readers, with its status resolved against now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotView {
    pub slot: TimeSlot,
    pub effective_status: SlotStatus,
}

impl SlotView {
    pub fn at(slot: TimeSlot, now: DateTime<Utc>) -> Self {
        let effective_status = slot.effective_status(now);
        Self {
            slot,
            effective_status,
        }
    }
}
