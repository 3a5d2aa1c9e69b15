//! InMemoryBookingStore - HashMap-backed booking store for testing and development.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};

use super::{BookingStore, StoreTx};
use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::model::{Appointment, AppointmentStatus, LeaseHold, SlotState, TimeSlot};

#[derive(Clone, Default)]
struct Tables {
    slots: HashMap<String, TimeSlot>,
    appointments: HashMap<String, Appointment>,
    otp_verified_until: HashMap<String, DateTime<Utc>>,
}

/// In-memory booking store.
///
/// Transactions are serialized behind one mutex and run against a copy of the
/// tables, which replaces the original only when the closure returns `Ok`.
/// Clone-friendly via Arc; clones share the same tables.
#[derive(Clone)]
pub struct InMemoryBookingStore {
    tables: Arc<Mutex<Tables>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryBookingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBookingStore {
    /// Create an empty store driven by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store driven by the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            clock,
        }
    }
}

impl BookingStore for InMemoryBookingStore {
    fn now(&self) -> Result<DateTime<Utc>, StoreError> {
        Ok(self.clock.now())
    }

    fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut committed = self
            .tables
            .lock()
            .map_err(|_| StoreError::Poisoned("transaction"))?;

        let mut tx = InMemoryTx {
            tables: committed.clone(),
            now: self.clock.now(),
        };
        let result = f(&mut tx)?;
        *committed = tx.tables;

        Ok(result)
    }
}

struct InMemoryTx {
    tables: Tables,
    now: DateTime<Utc>,
}

impl InMemoryTx {
    fn slot_mut(&mut self, slot_id: &str) -> Option<&mut TimeSlot> {
        self.tables.slots.get_mut(slot_id)
    }
}

impl StoreTx for InMemoryTx {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn slot(&mut self, slot_id: &str) -> Result<Option<TimeSlot>, StoreError> {
        Ok(self.tables.slots.get(slot_id).cloned())
    }

    fn slots_for_doctor(
        &mut self,
        doctor_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<TimeSlot>, StoreError> {
        let mut slots: Vec<TimeSlot> = self
            .tables
            .slots
            .values()
            .filter(|slot| slot.doctor_id == doctor_id && slot.date == date)
            .cloned()
            .collect();
        slots.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        Ok(slots)
    }

    fn insert_slot(&mut self, slot: &TimeSlot) -> Result<(), StoreError> {
        if self.tables.slots.contains_key(&slot.id) {
            return Err(StoreError::Duplicate(format!("time_slots:{}", slot.id)));
        }
        let clash = self.tables.slots.values().any(|existing| {
            existing.doctor_id == slot.doctor_id
                && existing.date == slot.date
                && existing.start_time == slot.start_time
        });
        if clash {
            return Err(StoreError::Duplicate(format!(
                "time_slots:{}@{} {}",
                slot.doctor_id, slot.date, slot.start_time
            )));
        }

        self.tables.slots.insert(slot.id.clone(), slot.clone());
        Ok(())
    }

    fn count_live_leases(
        &mut self,
        user_id: &str,
        except_slot_id: &str,
    ) -> Result<usize, StoreError> {
        let now = self.now;
        Ok(self
            .tables
            .slots
            .values()
            .filter(|slot| slot.id != except_slot_id && slot.is_locked_by(user_id, now))
            .count())
    }

    fn acquire_lease(
        &mut self,
        slot_id: &str,
        doctor_id: &str,
        user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let now = self.now;
        let Some(slot) = self.slot_mut(slot_id) else {
            return Ok(0);
        };
        if slot.doctor_id != doctor_id {
            return Ok(0);
        }

        let acquirable = match &slot.state {
            SlotState::Available => true,
            SlotState::Locked(hold) => !hold.is_live(now) || hold.holder == user_id,
            SlotState::Booked => false,
        };
        if !acquirable {
            return Ok(0);
        }

        slot.state = SlotState::Locked(LeaseHold {
            holder: user_id.to_string(),
            locked_at: now,
            expires_at,
        });
        Ok(1)
    }

    fn release_lease(&mut self, slot_id: &str, user_id: &str) -> Result<usize, StoreError> {
        let Some(slot) = self.slot_mut(slot_id) else {
            return Ok(0);
        };
        let held = matches!(&slot.state, SlotState::Locked(hold) if hold.holder == user_id);
        if !held {
            return Ok(0);
        }
        slot.state = SlotState::Available;
        Ok(1)
    }

    fn book_leased_slot(&mut self, slot_id: &str, user_id: &str) -> Result<usize, StoreError> {
        let now = self.now;
        match self.slot_mut(slot_id) {
            Some(slot) if slot.is_locked_by(user_id, now) => {
                slot.state = SlotState::Booked;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    fn release_booked_slot(&mut self, slot_id: &str) -> Result<usize, StoreError> {
        match self.slot_mut(slot_id) {
            Some(slot) if slot.state == SlotState::Booked => {
                slot.state = SlotState::Available;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    fn release_expired_leases(&mut self) -> Result<usize, StoreError> {
        let now = self.now;
        let mut released = 0;
        for slot in self.tables.slots.values_mut() {
            if matches!(&slot.state, SlotState::Locked(hold) if !hold.is_live(now)) {
                slot.state = SlotState::Available;
                released += 1;
            }
        }
        Ok(released)
    }

    fn appointment(&mut self, appointment_id: &str) -> Result<Option<Appointment>, StoreError> {
        Ok(self.tables.appointments.get(appointment_id).cloned())
    }

    fn appointments_for_user(&mut self, user_id: &str) -> Result<Vec<Appointment>, StoreError> {
        let mut appointments: Vec<Appointment> = self
            .tables
            .appointments
            .values()
            .filter(|appointment| appointment.user_id == user_id)
            .cloned()
            .collect();
        appointments.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(appointments)
    }

    fn count_booked_appointments_for_slot(
        &mut self,
        slot_id: &str,
    ) -> Result<usize, StoreError> {
        Ok(self
            .tables
            .appointments
            .values()
            .filter(|a| a.is_booked() && a.time_slot_id.as_deref() == Some(slot_id))
            .count())
    }

    fn insert_appointment(&mut self, appointment: &Appointment) -> Result<(), StoreError> {
        if self.tables.appointments.contains_key(&appointment.id) {
            return Err(StoreError::Duplicate(format!(
                "appointments:{}",
                appointment.id
            )));
        }
        let booked_slot = appointment
            .time_slot_id
            .as_deref()
            .filter(|_| appointment.is_booked());
        if let Some(slot_id) = booked_slot {
            let taken = self.tables.appointments.values().any(|other| {
                other.is_booked() && other.time_slot_id.as_deref() == Some(slot_id)
            });
            if taken {
                return Err(StoreError::Duplicate(format!(
                    "appointments:booked:{}",
                    slot_id
                )));
            }
        }
        self.tables
            .appointments
            .insert(appointment.id.clone(), appointment.clone());
        Ok(())
    }

    fn transition_appointment(
        &mut self,
        appointment_id: &str,
        from: AppointmentStatus,
        to: AppointmentStatus,
    ) -> Result<usize, StoreError> {
        let now = self.now;
        match self.tables.appointments.get_mut(appointment_id) {
            Some(appointment) if appointment.status == from => {
                appointment.status = to;
                appointment.updated_at = now;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    fn detach_slot_references(&mut self, slot_id: &str) -> Result<usize, StoreError> {
        let now = self.now;
        let mut detached = 0;
        for appointment in self.tables.appointments.values_mut() {
            if appointment.time_slot_id.as_deref() == Some(slot_id) {
                appointment.time_slot_id = None;
                appointment.updated_at = now;
                detached += 1;
            }
        }
        Ok(detached)
    }

    fn otp_verified_until(&mut self, user_id: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.tables.otp_verified_until.get(user_id).copied())
    }

    fn set_otp_verified_until(
        &mut self,
        user_id: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        match until {
            Some(until) => {
                self.tables
                    .otp_verified_until
                    .insert(user_id.to_string(), until);
            }
            None => {
                self.tables.otp_verified_until.remove(user_id);
            }
        }
        Ok(())
    }

    fn consume_otp(&mut self, user_id: &str) -> Result<usize, StoreError> {
        let now = self.now;
        let live = self
            .tables
            .otp_verified_until
            .get(user_id)
            .is_some_and(|until| *until > now);
        if !live {
            return Ok(0);
        }
        self.tables.otp_verified_until.remove(user_id);
        Ok(1)
    }
}
