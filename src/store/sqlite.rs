//! SqliteBookingStore - SQLite-backed booking store.
//!
//! Conditional transitions are single `UPDATE ... WHERE <predicate>` statements
//! and the affected-row count is returned as-is. Transactions begin with
//! `BEGIN IMMEDIATE` so two writers never interleave inside one unit.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use super::{BookingStore, StoreTx};
use crate::clock::Clock;
use crate::error::StoreError;
use crate::model::{hhmm, Appointment, AppointmentStatus, SlotState, SlotStatus, TimeSlot};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS time_slots (
    id           TEXT PRIMARY KEY,
    doctor_id    TEXT NOT NULL,
    date         TEXT NOT NULL,
    start_time   TEXT NOT NULL,
    end_time     TEXT NOT NULL,
    status       TEXT NOT NULL CHECK (status IN ('AVAILABLE', 'LOCKED', 'BOOKED')),
    locked_by    TEXT,
    locked_at    INTEGER,
    lock_expires INTEGER,
    UNIQUE (doctor_id, date, start_time),
    CHECK (
        (status = 'LOCKED' AND locked_by IS NOT NULL
            AND locked_at IS NOT NULL AND lock_expires IS NOT NULL)
        OR (status <> 'LOCKED' AND locked_by IS NULL
            AND locked_at IS NULL AND lock_expires IS NULL)
    )
);
CREATE INDEX IF NOT EXISTS idx_time_slots_lease ON time_slots (status, lock_expires);

CREATE TABLE IF NOT EXISTS appointments (
    id           TEXT PRIMARY KEY,
    user_id      TEXT NOT NULL,
    doctor_id    TEXT NOT NULL,
    time_slot_id TEXT,
    status       TEXT NOT NULL
                 CHECK (status IN ('BOOKED', 'COMPLETED', 'CANCELLED', 'RESCHEDULED')),
    notes        TEXT,
    created_at   INTEGER NOT NULL,
    updated_at   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_appointments_user ON appointments (user_id, created_at);
CREATE UNIQUE INDEX IF NOT EXISTS idx_appointments_one_booked_per_slot
    ON appointments (time_slot_id) WHERE status = 'BOOKED' AND time_slot_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS users (
    id                 TEXT PRIMARY KEY,
    otp_verified_until INTEGER
);
";

const SLOT_COLUMNS: &str =
    "id, doctor_id, date, start_time, end_time, status, locked_by, locked_at, lock_expires";

const APPOINTMENT_COLUMNS: &str =
    "id, user_id, doctor_id, time_slot_id, status, notes, created_at, updated_at";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Booking store over a single SQLite connection.
///
/// `now` comes from the database (`julianday('now')`) unless a clock override
/// is installed with [`SqliteBookingStore::with_clock`].
#[derive(Clone)]
pub struct SqliteBookingStore {
    conn: Arc<Mutex<Connection>>,
    clock: Option<Arc<dyn Clock>>,
}

impl SqliteBookingStore {
    /// Open (and migrate) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open (and migrate) a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            clock: None,
        })
    }

    /// Replace the database clock, e.g. with a `ManualClock` in tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    fn current_time(&self, conn: &Connection) -> Result<DateTime<Utc>, StoreError> {
        match &self.clock {
            Some(clock) => Ok(clock.now()),
            None => {
                let millis: i64 = conn.query_row(
                    "SELECT CAST((julianday('now') - 2440587.5) * 86400000.0 AS INTEGER)",
                    [],
                    |row| row.get(0),
                )?;
                from_millis(millis)
            }
        }
    }
}

impl BookingStore for SqliteBookingStore {
    fn now(&self) -> Result<DateTime<Utc>, StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Poisoned("connection"))?;
        self.current_time(&conn)
    }

    fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Poisoned("connection"))?;
        let now = self.current_time(&conn)?;

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let mut handle = SqliteTx { conn: &tx, now };
        let result = f(&mut handle)?;
        tx.commit().map_err(StoreError::from)?;

        Ok(result)
    }
}

struct SqliteTx<'a> {
    conn: &'a Connection,
    now: DateTime<Utc>,
}

impl StoreTx for SqliteTx<'_> {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn slot(&mut self, slot_id: &str) -> Result<Option<TimeSlot>, StoreError> {
        let sql = format!("SELECT {} FROM time_slots WHERE id = ?1", SLOT_COLUMNS);
        self.conn
            .query_row(&sql, params![slot_id], SlotRow::from_row)
            .optional()?
            .map(SlotRow::into_slot)
            .transpose()
    }

    fn slots_for_doctor(
        &mut self,
        doctor_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<TimeSlot>, StoreError> {
        let sql = format!(
            "SELECT {} FROM time_slots WHERE doctor_id = ?1 AND date = ?2 ORDER BY start_time",
            SLOT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![doctor_id, date.format(DATE_FORMAT).to_string()],
            SlotRow::from_row,
        )?;
        let mut slots = Vec::new();
        for row in rows {
            slots.push(row?.into_slot()?);
        }
        Ok(slots)
    }

    fn insert_slot(&mut self, slot: &TimeSlot) -> Result<(), StoreError> {
        let (locked_by, locked_at, lock_expires) = slot.state.lease_columns();
        self.conn
            .execute(
                "INSERT INTO time_slots (id, doctor_id, date, start_time, end_time, status, \
                 locked_by, locked_at, lock_expires) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    slot.id,
                    slot.doctor_id,
                    slot.date.format(DATE_FORMAT).to_string(),
                    hhmm::format(&slot.start_time),
                    hhmm::format(&slot.end_time),
                    slot.status().as_str(),
                    locked_by,
                    locked_at.map(to_millis),
                    lock_expires.map(to_millis),
                ],
            )
            .map_err(|e| duplicate_or(e, || format!("time_slots:{}", slot.id)))?;
        Ok(())
    }

    fn count_live_leases(
        &mut self,
        user_id: &str,
        except_slot_id: &str,
    ) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM time_slots \
             WHERE status = 'LOCKED' AND locked_by = ?1 AND lock_expires > ?2 AND id <> ?3",
            params![user_id, to_millis(self.now), except_slot_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn acquire_lease(
        &mut self,
        slot_id: &str,
        doctor_id: &str,
        user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        Ok(self.conn.execute(
            "UPDATE time_slots \
             SET status = 'LOCKED', locked_by = ?1, locked_at = ?2, lock_expires = ?3 \
             WHERE id = ?4 AND doctor_id = ?5 AND ( \
                 status = 'AVAILABLE' \
                 OR (status = 'LOCKED' AND lock_expires <= ?2) \
                 OR (status = 'LOCKED' AND locked_by = ?1) \
             )",
            params![
                user_id,
                to_millis(self.now),
                to_millis(expires_at),
                slot_id,
                doctor_id
            ],
        )?)
    }

    fn release_lease(&mut self, slot_id: &str, user_id: &str) -> Result<usize, StoreError> {
        Ok(self.conn.execute(
            "UPDATE time_slots \
             SET status = 'AVAILABLE', locked_by = NULL, locked_at = NULL, lock_expires = NULL \
             WHERE id = ?1 AND status = 'LOCKED' AND locked_by = ?2",
            params![slot_id, user_id],
        )?)
    }

    fn book_leased_slot(&mut self, slot_id: &str, user_id: &str) -> Result<usize, StoreError> {
        Ok(self.conn.execute(
            "UPDATE time_slots \
             SET status = 'BOOKED', locked_by = NULL, locked_at = NULL, lock_expires = NULL \
             WHERE id = ?1 AND status = 'LOCKED' AND locked_by = ?2 AND lock_expires > ?3",
            params![slot_id, user_id, to_millis(self.now)],
        )?)
    }

    fn release_booked_slot(&mut self, slot_id: &str) -> Result<usize, StoreError> {
        Ok(self.conn.execute(
            "UPDATE time_slots SET status = 'AVAILABLE' WHERE id = ?1 AND status = 'BOOKED'",
            params![slot_id],
        )?)
    }

    fn release_expired_leases(&mut self) -> Result<usize, StoreError> {
        Ok(self.conn.execute(
            "UPDATE time_slots \
             SET status = 'AVAILABLE', locked_by = NULL, locked_at = NULL, lock_expires = NULL \
             WHERE status = 'LOCKED' AND lock_expires <= ?1",
            params![to_millis(self.now)],
        )?)
    }

    fn appointment(&mut self, appointment_id: &str) -> Result<Option<Appointment>, StoreError> {
        let sql = format!(
            "SELECT {} FROM appointments WHERE id = ?1",
            APPOINTMENT_COLUMNS
        );
        self.conn
            .query_row(&sql, params![appointment_id], AppointmentRow::from_row)
            .optional()?
            .map(AppointmentRow::into_appointment)
            .transpose()
    }

    fn appointments_for_user(&mut self, user_id: &str) -> Result<Vec<Appointment>, StoreError> {
        let sql = format!(
            "SELECT {} FROM appointments WHERE user_id = ?1 ORDER BY created_at DESC, id",
            APPOINTMENT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id], AppointmentRow::from_row)?;
        let mut appointments = Vec::new();
        for row in rows {
            appointments.push(row?.into_appointment()?);
        }
        Ok(appointments)
    }

    fn count_booked_appointments_for_slot(
        &mut self,
        slot_id: &str,
    ) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM appointments WHERE time_slot_id = ?1 AND status = 'BOOKED'",
            params![slot_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn insert_appointment(&mut self, appointment: &Appointment) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO appointments (id, user_id, doctor_id, time_slot_id, status, notes, \
                 created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    appointment.id,
                    appointment.user_id,
                    appointment.doctor_id,
                    appointment.time_slot_id,
                    appointment.status.as_str(),
                    appointment.notes,
                    to_millis(appointment.created_at),
                    to_millis(appointment.updated_at),
                ],
            )
            .map_err(|e| duplicate_or(e, || format!("appointments:{}", appointment.id)))?;
        Ok(())
    }

    fn transition_appointment(
        &mut self,
        appointment_id: &str,
        from: AppointmentStatus,
        to: AppointmentStatus,
    ) -> Result<usize, StoreError> {
        Ok(self.conn.execute(
            "UPDATE appointments SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
            params![
                to.as_str(),
                to_millis(self.now),
                appointment_id,
                from.as_str()
            ],
        )?)
    }

    fn detach_slot_references(&mut self, slot_id: &str) -> Result<usize, StoreError> {
        Ok(self.conn.execute(
            "UPDATE appointments SET time_slot_id = NULL, updated_at = ?2 WHERE time_slot_id = ?1",
            params![slot_id, to_millis(self.now)],
        )?)
    }

    fn otp_verified_until(&mut self, user_id: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let millis: Option<Option<i64>> = self
            .conn
            .query_row(
                "SELECT otp_verified_until FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        millis.flatten().map(from_millis).transpose()
    }

    fn set_otp_verified_until(
        &mut self,
        user_id: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO users (id, otp_verified_until) VALUES (?1, ?2) \
             ON CONFLICT(id) DO UPDATE SET otp_verified_until = excluded.otp_verified_until",
            params![user_id, until.map(to_millis)],
        )?;
        Ok(())
    }

    fn consume_otp(&mut self, user_id: &str) -> Result<usize, StoreError> {
        Ok(self.conn.execute(
            "UPDATE users SET otp_verified_until = NULL \
             WHERE id = ?1 AND otp_verified_until > ?2",
            params![user_id, to_millis(self.now)],
        )?)
    }
}

struct SlotRow {
    id: String,
    doctor_id: String,
    date: String,
    start_time: String,
    end_time: String,
    status: String,
    locked_by: Option<String>,
    locked_at: Option<i64>,
    lock_expires: Option<i64>,
}

impl SlotRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            doctor_id: row.get(1)?,
            date: row.get(2)?,
            start_time: row.get(3)?,
            end_time: row.get(4)?,
            status: row.get(5)?,
            locked_by: row.get(6)?,
            locked_at: row.get(7)?,
            lock_expires: row.get(8)?,
        })
    }

    fn into_slot(self) -> Result<TimeSlot, StoreError> {
        let corrupt = |what: &str| StoreError::Corrupt(format!("time_slots:{} {}", self.id, what));

        let status = SlotStatus::parse(&self.status).ok_or_else(|| corrupt("status"))?;
        let date =
            NaiveDate::parse_from_str(&self.date, DATE_FORMAT).map_err(|_| corrupt("date"))?;
        let start_time = hhmm::parse(&self.start_time).map_err(|_| corrupt("start_time"))?;
        let end_time = hhmm::parse(&self.end_time).map_err(|_| corrupt("end_time"))?;
        let locked_at = self.locked_at.map(from_millis).transpose()?;
        let lock_expires = self.lock_expires.map(from_millis).transpose()?;
        let state = SlotState::from_columns(status, self.locked_by.clone(), locked_at, lock_expires)
            .map_err(|msg| corrupt(&msg))?;

        Ok(TimeSlot {
            id: self.id.clone(),
            doctor_id: self.doctor_id.clone(),
            date,
            start_time,
            end_time,
            state,
        })
    }
}

struct AppointmentRow {
    id: String,
    user_id: String,
    doctor_id: String,
    time_slot_id: Option<String>,
    status: String,
    notes: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl AppointmentRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            doctor_id: row.get(2)?,
            time_slot_id: row.get(3)?,
            status: row.get(4)?,
            notes: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_appointment(self) -> Result<Appointment, StoreError> {
        let status = AppointmentStatus::parse(&self.status).ok_or_else(|| {
            StoreError::Corrupt(format!("appointments:{} status {}", self.id, self.status))
        })?;
        Ok(Appointment {
            created_at: from_millis(self.created_at)?,
            updated_at: from_millis(self.updated_at)?,
            id: self.id,
            user_id: self.user_id,
            doctor_id: self.doctor_id,
            time_slot_id: self.time_slot_id,
            status,
            notes: self.notes,
        })
    }
}

fn to_millis(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {}", millis)))
}

fn duplicate_or(err: rusqlite::Error, what: impl FnOnce() -> String) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Duplicate(what())
        }
        _ => StoreError::from(err),
    }
}
