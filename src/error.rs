use std::error::Error;
use std::fmt;

/// Error raised by a `BookingStore` backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A lock guarding in-process state was poisoned.
    Poisoned(&'static str),
    /// The SQL backend reported a failure.
    Sqlite(String),
    /// A persisted row could not be mapped back to the domain model.
    Corrupt(String),
    /// An insert collided with an existing row.
    Duplicate(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Poisoned(operation) => {
                write!(f, "store lock poisoned during {}", operation)
            }
            StoreError::Sqlite(msg) => write!(f, "sqlite error: {}", msg),
            StoreError::Corrupt(msg) => write!(f, "corrupt row: {}", msg),
            StoreError::Duplicate(what) => write!(f, "duplicate row: {}", what),
        }
    }
}

impl Error for StoreError {}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Sqlite(err.to_string())
    }
}

/// Coarse classification of a booking failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Referenced slot or appointment does not exist for the expected owner.
    NotFound,
    /// A conditional write lost a race. Safe to retry after re-reading state.
    Conflict,
    /// A business rule rejected the request; retrying unchanged cannot help.
    PreconditionFailed,
    /// The per-user lease cap is reached.
    RateLimited,
    /// Storage or transaction failure.
    Internal,
}

impl ErrorKind {
    /// HTTP-style status code for the request layer.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::PreconditionFailed => 400,
            ErrorKind::RateLimited => 429,
            ErrorKind::Internal => 500,
        }
    }
}

/// Machine-readable failure codes surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    SlotNotFound,
    AppointmentNotFound,
    SlotLocked,
    SlotAlreadyBooked,
    ConflictSlotState,
    ConflictNewSlot,
    ConflictAppointmentState,
    AppointmentNotBooked,
    NewSlotNotLockedByUser,
    OtpRequired,
    LockInvalid,
    SlotInPast,
    SlotAlreadyStarted,
    SlotAlreadyStartedOrPast,
    RescheduleWindowClosed,
    SameSlot,
    NoActiveSlot,
    DoctorMismatch,
    OldSlotMismatch,
    InvalidStatusTransition,
    LockLimitExceeded,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::SlotNotFound => "SLOT_NOT_FOUND",
            ErrorCode::AppointmentNotFound => "APPOINTMENT_NOT_FOUND",
            ErrorCode::SlotLocked => "SLOT_LOCKED",
            ErrorCode::SlotAlreadyBooked => "SLOT_ALREADY_BOOKED",
            ErrorCode::ConflictSlotState => "CONFLICT_SLOT_STATE",
            ErrorCode::ConflictNewSlot => "CONFLICT_NEW_SLOT",
            ErrorCode::ConflictAppointmentState => "CONFLICT_APPOINTMENT_STATE",
            ErrorCode::AppointmentNotBooked => "APPOINTMENT_NOT_BOOKED",
            ErrorCode::NewSlotNotLockedByUser => "NEW_SLOT_NOT_LOCKED_BY_USER",
            ErrorCode::OtpRequired => "OTP_REQUIRED",
            ErrorCode::LockInvalid => "LOCK_INVALID",
            ErrorCode::SlotInPast => "SLOT_IN_PAST",
            ErrorCode::SlotAlreadyStarted => "SLOT_ALREADY_STARTED",
            ErrorCode::SlotAlreadyStartedOrPast => "SLOT_ALREADY_STARTED_OR_PAST",
            ErrorCode::RescheduleWindowClosed => "RESCHEDULE_WINDOW_CLOSED",
            ErrorCode::SameSlot => "SAME_SLOT",
            ErrorCode::NoActiveSlot => "NO_ACTIVE_SLOT",
            ErrorCode::DoctorMismatch => "DOCTOR_MISMATCH",
            ErrorCode::OldSlotMismatch => "OLD_SLOT_MISMATCH",
            ErrorCode::InvalidStatusTransition => "INVALID_STATUS_TRANSITION",
            ErrorCode::LockLimitExceeded => "LOCK_LIMIT_EXCEEDED",
            ErrorCode::Internal => "INTERNAL_ERROR",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ErrorCode::SlotNotFound | ErrorCode::AppointmentNotFound => ErrorKind::NotFound,
            ErrorCode::SlotLocked
            | ErrorCode::SlotAlreadyBooked
            | ErrorCode::ConflictSlotState
            | ErrorCode::ConflictNewSlot
            | ErrorCode::ConflictAppointmentState
            | ErrorCode::AppointmentNotBooked
            | ErrorCode::NewSlotNotLockedByUser => ErrorKind::Conflict,
            ErrorCode::OtpRequired
            | ErrorCode::LockInvalid
            | ErrorCode::SlotInPast
            | ErrorCode::SlotAlreadyStarted
            | ErrorCode::SlotAlreadyStartedOrPast
            | ErrorCode::RescheduleWindowClosed
            | ErrorCode::SameSlot
            | ErrorCode::NoActiveSlot
            | ErrorCode::DoctorMismatch
            | ErrorCode::OldSlotMismatch
            | ErrorCode::InvalidStatusTransition => ErrorKind::PreconditionFailed,
            ErrorCode::LockLimitExceeded => ErrorKind::RateLimited,
            ErrorCode::Internal => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed failure of a booking workflow.
///
/// Raised inside a transaction it rolls the whole unit back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingError {
    code: ErrorCode,
    message: String,
    source: Option<StoreError>,
}

impl BookingError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

impl fmt::Display for BookingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl Error for BookingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn Error + 'static))
    }
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        Self {
            code: ErrorCode::Internal,
            message: "internal storage failure".into(),
            source: Some(err),
        }
    }
}

/// A configuration document that cannot be used.
#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(err) => write!(f, "config parse error: {}", err),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Parse(err) => Some(err),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}
