//! Timing rules shared by the lease manager and the booking workflows.

use chrono::{DateTime, Duration, Utc};

use crate::error::{BookingError, ErrorCode};
use crate::model::{SlotTiming, TimeSlot};

/// Rejects slots that have already started, telling a past day apart from
/// earlier today.
pub fn ensure_upcoming(slot: &TimeSlot, now: DateTime<Utc>) -> Result<(), BookingError> {
    match slot.timing(now) {
        SlotTiming::Upcoming => Ok(()),
        SlotTiming::Past => Err(BookingError::new(
            ErrorCode::SlotInPast,
            format!("slot {} is on a past date", slot.id),
        )),
        SlotTiming::Started => Err(BookingError::new(
            ErrorCode::SlotAlreadyStarted,
            format!("slot {} has already started", slot.id),
        )),
    }
}

/// True when the slot starts strictly more than `window` after `now`.
/// Exactly `window` away counts as inside the window.
pub fn outside_change_window(slot: &TimeSlot, now: DateTime<Utc>, window: Duration) -> bool {
    slot.starts_at() - now > window
}
