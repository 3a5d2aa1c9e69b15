mod clock;
mod config;
mod engine;
mod error;
mod invalidation;
mod lease;
mod model;
mod policy;
mod reaper;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BookingConfig, MAX_CHANGE_WINDOW_HOURS, MAX_LEASE_TTL_SECS};
pub use engine::{
    BookingEngine, BookingRequest, BookingResponse, CancelOutcome, RescheduleConfirmation,
    RescheduleHold, RescheduleOutcome,
};
pub use error::{BookingError, ConfigError, ErrorCode, ErrorKind, StoreError};
#[cfg(feature = "emitter")]
pub use invalidation::{EmitterInvalidator, INVALIDATE_EVENT};
pub use invalidation::{
    CacheInvalidator, CacheKey, LogInvalidator, LogInvalidatorError, NoopInvalidator,
};
pub use lease::{Lease, LeaseManager};
pub use model::{
    hhmm, Appointment, AppointmentStatus, LeaseHold, SlotState, SlotStatus, SlotTiming,
    SlotView, TimeSlot, SLOT_LENGTH_MINUTES,
};
pub use policy::{ensure_upcoming, outside_change_window};
pub use reaper::{reap_expired_leases, ReaperStats, ReaperThread};
#[cfg(feature = "sqlite")]
pub use store::SqliteBookingStore;
pub use store::{BookingStore, InMemoryBookingStore, StoreTx};

// Re-export the emitter so listeners can be written against the same version
#[cfg(feature = "emitter")]
pub use event_emitter_rs::EventEmitter;
