use chrono::Duration;
use tracing::debug;

use super::Lease;
use crate::config::BookingConfig;
use crate::error::{BookingError, ErrorCode, StoreError};
use crate::model::SlotStatus;
use crate::policy::ensure_upcoming;
use crate::store::StoreTx;

/// Acquire, renew and release slot leases inside a store transaction.
#[derive(Debug, Clone)]
pub struct LeaseManager {
    ttl: Duration,
    max_active: usize,
}

impl Default for LeaseManager {
    fn default() -> Self {
        Self::from_config(&BookingConfig::default())
    }
}

impl LeaseManager {
    pub fn new(ttl: Duration, max_active: usize) -> Self {
        Self { ttl, max_active }
    }

    pub fn from_config(config: &BookingConfig) -> Self {
        Self::new(config.lease_ttl(), config.max_active_leases)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Take (or renew) the lease on `slot_id` for `user_id`.
    ///
    /// The slot is free when it is available, when its lease has expired, or
    /// when the same user already holds it. Anything else loses with a
    /// conflict. The per-user cap is checked first and is advisory only.
    pub fn acquire(
        &self,
        tx: &mut dyn StoreTx,
        slot_id: &str,
        doctor_id: &str,
        user_id: &str,
    ) -> Result<Lease, BookingError> {
        let now = tx.now();
        let slot = tx
            .slot(slot_id)?
            .filter(|slot| slot.doctor_id == doctor_id)
            .ok_or_else(|| {
                BookingError::new(
                    ErrorCode::SlotNotFound,
                    format!("slot {} not found for doctor {}", slot_id, doctor_id),
                )
            })?;
        ensure_upcoming(&slot, now)?;

        let held = tx.count_live_leases(user_id, slot_id)?;
        if held >= self.max_active {
            debug!(user_id, held, max = self.max_active, "lease cap reached");
            return Err(BookingError::new(
                ErrorCode::LockLimitExceeded,
                format!(
                    "user already holds {} active slot locks (max {})",
                    held, self.max_active
                ),
            ));
        }

        let expires_at = now + self.ttl;
        if tx.acquire_lease(slot_id, doctor_id, user_id, expires_at)? == 0 {
            debug!(slot_id, user_id, status = slot.status().as_str(), "lease conflict");
            return Err(match slot.status() {
                SlotStatus::Booked => BookingError::new(
                    ErrorCode::SlotAlreadyBooked,
                    format!("slot {} is already booked", slot_id),
                ),
                _ => BookingError::new(
                    ErrorCode::SlotLocked,
                    format!("slot {} is locked by another user", slot_id),
                ),
            });
        }

        Ok(Lease {
            slot_id: slot_id.to_string(),
            doctor_id: doctor_id.to_string(),
            holder: user_id.to_string(),
            locked_at: now,
            expires_at,
        })
    }

    /// Give a held lease back. Returns whether the slot changed.
    pub fn release(
        &self,
        tx: &mut dyn StoreTx,
        slot_id: &str,
        user_id: &str,
    ) -> Result<bool, StoreError> {
        Ok(tx.release_lease(slot_id, user_id)? > 0)
    }

    /// Physically reset every expired lease. Returns how many were cleared.
    pub fn release_expired(&self, tx: &mut dyn StoreTx) -> Result<usize, StoreError> {
        tx.release_expired_leases()
    }
}
