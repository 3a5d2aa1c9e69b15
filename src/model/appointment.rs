use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Booked,
    Completed,
    Cancelled,
    /// Replaced by a new appointment. Terminal.
    Rescheduled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Booked => "BOOKED",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::Cancelled => "CANCELLED",
            AppointmentStatus::Rescheduled => "RESCHEDULED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "BOOKED" => Some(AppointmentStatus::Booked),
            "COMPLETED" => Some(AppointmentStatus::Completed),
            "CANCELLED" => Some(AppointmentStatus::Cancelled),
            "RESCHEDULED" => Some(AppointmentStatus::Rescheduled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AppointmentStatus::Booked)
    }
}

/// A booking record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub user_id: String,
    pub doctor_id: String,
    /// Active slot while booked; kept on terminal rows for history, and
    /// cleared when a stray reference is detached.
    pub time_slot_id: Option<String>,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// A fresh `BOOKED` appointment with a random id.
    pub fn booked(
        user_id: impl Into<String>,
        doctor_id: impl Into<String>,
        time_slot_id: impl Into<String>,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            doctor_id: doctor_id.into(),
            time_slot_id: Some(time_slot_id.into()),
            status: AppointmentStatus::Booked,
            notes,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_booked(&self) -> bool {
        self.status == AppointmentStatus::Booked
    }
}
