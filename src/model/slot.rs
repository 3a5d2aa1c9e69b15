use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Every slot spans exactly this many minutes.
pub const SLOT_LENGTH_MINUTES: i64 = 30;

/// Stored status column of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotStatus {
    Available,
    Locked,
    Booked,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Available => "AVAILABLE",
            SlotStatus::Locked => "LOCKED",
            SlotStatus::Booked => "BOOKED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "AVAILABLE" => Some(SlotStatus::Available),
            "LOCKED" => Some(SlotStatus::Locked),
            "BOOKED" => Some(SlotStatus::Booked),
            _ => None,
        }
    }
}

/// The lease fields of a locked slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseHold {
    pub holder: String,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LeaseHold {
    /// A lease is live strictly before its expiry instant.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Slot state with the lease carried only by the `Locked` variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotState {
    Available,
    Locked(LeaseHold),
    Booked,
}

impl SlotState {
    pub fn status(&self) -> SlotStatus {
        match self {
            SlotState::Available => SlotStatus::Available,
            SlotState::Locked(_) => SlotStatus::Locked,
            SlotState::Booked => SlotStatus::Booked,
        }
    }

    /// Rebuild the state from the flat persisted columns.
    ///
    /// Lease columns must be all set for `LOCKED` and all empty otherwise.
    pub fn from_columns(
        status: SlotStatus,
        locked_by: Option<String>,
        locked_at: Option<DateTime<Utc>>,
        lock_expires: Option<DateTime<Utc>>,
    ) -> Result<Self, String> {
        match (status, locked_by, locked_at, lock_expires) {
            (SlotStatus::Locked, Some(holder), Some(locked_at), Some(expires_at)) => {
                Ok(SlotState::Locked(LeaseHold {
                    holder,
                    locked_at,
                    expires_at,
                }))
            }
            (SlotStatus::Available, None, None, None) => Ok(SlotState::Available),
            (SlotStatus::Booked, None, None, None) => Ok(SlotState::Booked),
            (status, ..) => Err(format!(
                "lease columns inconsistent with status {}",
                status.as_str()
            )),
        }
    }

    /// Lease columns in persisted order: `locked_by, locked_at, lock_expires`.
    pub fn lease_columns(&self) -> (Option<&str>, Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        match self {
            SlotState::Locked(hold) => (
                Some(hold.holder.as_str()),
                Some(hold.locked_at),
                Some(hold.expires_at),
            ),
            _ => (None, None, None),
        }
    }
}

/// Where a slot's start sits relative to now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotTiming {
    Upcoming,
    /// Today, but the start time is not after now.
    Started,
    /// On a day before today.
    Past,
}

/// A doctor's bookable time slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: String,
    pub doctor_id: String,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    #[serde(flatten)]
    pub state: SlotState,
}

impl TimeSlot {
    /// A new available slot of the fixed slot length.
    pub fn new(
        id: impl Into<String>,
        doctor_id: impl Into<String>,
        date: NaiveDate,
        start_time: NaiveTime,
    ) -> Self {
        let (end_time, _) =
            start_time.overflowing_add_signed(Duration::minutes(SLOT_LENGTH_MINUTES));
        Self {
            id: id.into(),
            doctor_id: doctor_id.into(),
            date,
            start_time,
            end_time,
            state: SlotState::Available,
        }
    }

    pub fn starts_at(&self) -> DateTime<Utc> {
        self.date.and_time(self.start_time).and_utc()
    }

    pub fn status(&self) -> SlotStatus {
        self.state.status()
    }

    /// Status as every reader must see it: an expired lease counts as available.
    pub fn effective_status(&self, now: DateTime<Utc>) -> SlotStatus {
        match &self.state {
            SlotState::Locked(hold) if !hold.is_live(now) => SlotStatus::Available,
            state => state.status(),
        }
    }

    pub fn live_lease(&self, now: DateTime<Utc>) -> Option<&LeaseHold> {
        match &self.state {
            SlotState::Locked(hold) if hold.is_live(now) => Some(hold),
            _ => None,
        }
    }

    pub fn is_locked_by(&self, user_id: &str, now: DateTime<Utc>) -> bool {
        self.live_lease(now)
            .map(|hold| hold.holder == user_id)
            .unwrap_or(false)
    }

    pub fn timing(&self, now: DateTime<Utc>) -> SlotTiming {
        if self.date < now.date_naive() {
            SlotTiming::Past
        } else if self.starts_at() <= now {
            SlotTiming::Started
        } else {
            SlotTiming::Upcoming
        }
    }
}

/// Serde adapter for zero-padded 24-hour `HH:MM` times.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn format(time: &NaiveTime) -> String {
        time.format(FORMAT).to_string()
    }

    pub fn parse(value: &str) -> Result<NaiveTime, chrono::ParseError> {
        NaiveTime::parse_from_str(value, FORMAT)
    }

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(time))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let value = String::deserialize(deserializer)?;
        parse(&value).map_err(serde::de::Error::custom)
    }
}
