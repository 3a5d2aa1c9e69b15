//! Cache invalidation signals emitted after committed state changes.
//!
//! The read-through cache lives outside this crate. Workflows only announce
//! which keys went stale; a failed announcement is logged by the caller and
//! never fails the request.

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::info;

/// A cache entry (or pattern of entries) made stale by a commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Every cached appointment list of a user: `user:{id}:appointments:*`.
    UserAppointments { user_id: String },
    /// One cached appointment: `appointment:{userId}:{id}`.
    Appointment {
        user_id: String,
        appointment_id: String,
    },
}

impl CacheKey {
    pub fn user_appointments(user_id: impl Into<String>) -> Self {
        CacheKey::UserAppointments {
            user_id: user_id.into(),
        }
    }

    pub fn appointment(user_id: impl Into<String>, appointment_id: impl Into<String>) -> Self {
        CacheKey::Appointment {
            user_id: user_id.into(),
            appointment_id: appointment_id.into(),
        }
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, CacheKey::UserAppointments { .. })
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::UserAppointments { user_id } => write!(f, "user:{}:appointments:*", user_id),
            CacheKey::Appointment {
                user_id,
                appointment_id,
            } => write!(f, "appointment:{}:{}", user_id, appointment_id),
        }
    }
}

/// Receiver of invalidation signals.
pub trait CacheInvalidator: Send + Sync {
    type Error: fmt::Display;

    fn invalidate(&self, keys: &[CacheKey]) -> Result<(), Self::Error>;
}

/// Drops every signal. For deployments without a cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInvalidator;

impl CacheInvalidator for NoopInvalidator {
    type Error = std::convert::Infallible;

    fn invalidate(&self, _keys: &[CacheKey]) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogInvalidatorError {
    BufferPoisoned,
}

impl fmt::Display for LogInvalidatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogInvalidatorError::BufferPoisoned => write!(f, "log invalidator buffer poisoned"),
        }
    }
}

impl std::error::Error for LogInvalidatorError {}

/// Logs each key, or appends the rendered keys to a shared buffer.
#[derive(Debug, Clone, Default)]
pub struct LogInvalidator {
    buffer: Option<Arc<Mutex<Vec<String>>>>,
}

impl LogInvalidator {
    pub fn new() -> Self {
        LogInvalidator { buffer: None }
    }

    pub fn with_buffer(buffer: Arc<Mutex<Vec<String>>>) -> Self {
        LogInvalidator {
            buffer: Some(buffer),
        }
    }
}

impl CacheInvalidator for LogInvalidator {
    type Error = LogInvalidatorError;

    fn invalidate(&self, keys: &[CacheKey]) -> Result<(), Self::Error> {
        match &self.buffer {
            Some(buffer) => {
                let mut buffer = buffer
                    .lock()
                    .map_err(|_| LogInvalidatorError::BufferPoisoned)?;
                buffer.extend(keys.iter().map(CacheKey::to_string));
            }
            None => {
                for key in keys {
                    info!(key = %key, "cache invalidate");
                }
            }
        }
        Ok(())
    }
}

#[cfg(feature = "emitter")]
pub use emitter::{EmitterInvalidator, INVALIDATE_EVENT};

#[cfg(feature = "emitter")]
mod emitter {
    use std::sync::Mutex;

    use event_emitter_rs::EventEmitter;

    use super::{CacheInvalidator, CacheKey, LogInvalidatorError};

    /// Event name under which rendered keys are emitted.
    pub const INVALIDATE_EVENT: &str = "cache:invalidate";

    /// Fans keys out to in-process listeners, one event per key.
    ///
    /// Listeners run on the emitter's own threads, after the commit.
    pub struct EmitterInvalidator {
        emitter: Mutex<EventEmitter>,
    }

    impl Default for EmitterInvalidator {
        fn default() -> Self {
            Self::new()
        }
    }

    impl EmitterInvalidator {
        pub fn new() -> Self {
            Self {
                emitter: Mutex::new(EventEmitter::new()),
            }
        }

        /// Register a listener receiving each rendered key.
        pub fn on_invalidate<F>(&self, listener: F) -> Result<(), LogInvalidatorError>
        where
            F: Fn(String) + Send + Sync + 'static,
        {
            let mut emitter = self
                .emitter
                .lock()
                .map_err(|_| LogInvalidatorError::BufferPoisoned)?;
            emitter.on(INVALIDATE_EVENT, listener);
            Ok(())
        }
    }

    impl CacheInvalidator for EmitterInvalidator {
        type Error = LogInvalidatorError;

        fn invalidate(&self, keys: &[CacheKey]) -> Result<(), Self::Error> {
            let mut emitter = self
                .emitter
                .lock()
                .map_err(|_| LogInvalidatorError::BufferPoisoned)?;
            for key in keys {
                emitter.emit(INVALIDATE_EVENT, key.to_string());
            }
            Ok(())
        }
    }
}
