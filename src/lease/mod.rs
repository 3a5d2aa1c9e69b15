//! Slot leases: time-bounded, user-scoped holds taken before booking.
//!
//! A lease lives on the slot row itself. Acquiring it is one conditional write;
//! losing the race shows up as zero affected rows and is reported as a
//! conflict. Expiry needs no write at all: readers compare `expires_at` with
//! the store's now.

mod manager;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use manager::LeaseManager;

/// A granted lease as returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub slot_id: String,
    pub doctor_id: String,
    pub holder: String,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}
