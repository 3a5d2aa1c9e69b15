use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Longest accepted lease, one day.
pub const MAX_LEASE_TTL_SECS: i64 = 24 * 60 * 60;
/// Widest accepted change window, one year.
pub const MAX_CHANGE_WINDOW_HOURS: i64 = 365 * 24;

/// Tunables for the lease manager, the booking engine and the reaper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookingConfig {
    /// How long a slot lease lives after it is acquired or renewed.
    pub lease_ttl_secs: i64,
    /// Maximum number of live leases a single user may hold.
    pub max_active_leases: usize,
    /// Cancel and reschedule release the slot only when its start is more than
    /// this many hours away.
    pub change_window_hours: i64,
    /// Interval between expired-lease sweeps.
    pub reaper_interval_secs: u64,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            lease_ttl_secs: 5 * 60,
            max_active_leases: 3,
            change_window_hours: 24,
            reaper_interval_secs: 60,
        }
    }
}

impl BookingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the booking policy cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_LEASE_TTL_SECS).contains(&self.lease_ttl_secs) {
            return Err(ConfigError::Invalid(format!(
                "lease_ttl_secs must be within 1..={}, got {}",
                MAX_LEASE_TTL_SECS, self.lease_ttl_secs
            )));
        }
        if !(0..=MAX_CHANGE_WINDOW_HOURS).contains(&self.change_window_hours) {
            return Err(ConfigError::Invalid(format!(
                "change_window_hours must be within 0..={}, got {}",
                MAX_CHANGE_WINDOW_HOURS, self.change_window_hours
            )));
        }
        if self.max_active_leases == 0 {
            return Err(ConfigError::Invalid(
                "max_active_leases must be at least 1".into(),
            ));
        }
        if self.reaper_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "reaper_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn with_lease_ttl_secs(mut self, secs: i64) -> Self {
        self.lease_ttl_secs = secs;
        self
    }

    pub fn with_max_active_leases(mut self, max: usize) -> Self {
        self.max_active_leases = max;
        self
    }

    pub fn with_change_window_hours(mut self, hours: i64) -> Self {
        self.change_window_hours = hours;
        self
    }

    pub fn with_reaper_interval_secs(mut self, secs: u64) -> Self {
        self.reaper_interval_secs = secs;
        self
    }

    /// Out-of-range values from the builders are clamped into range.
    pub fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_ttl_secs.clamp(1, MAX_LEASE_TTL_SECS))
    }

    pub fn change_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.change_window_hours.clamp(0, MAX_CHANGE_WINDOW_HOURS))
    }

    pub fn reaper_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.reaper_interval_secs)
    }
}
