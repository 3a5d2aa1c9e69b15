use slot_booking::{AppointmentStatus, ErrorCode, SlotStatus};

use crate::support::{at, day, Fixture, DOCTOR};

#[test]
fn cancel_exactly_24h_before_keeps_the_slot_booked() {
    let fixture = Fixture::new();
    fixture.slot("s1", day(1), 10, 30);
    let appointment = fixture.book("u", "s1");

    fixture.clock.set(at(10, 30, 0));
    let outcome = fixture.engine.cancel_appointment("u", &appointment.id).unwrap();

    assert!(!outcome.slot_released);
    assert_eq!(outcome.appointment.status, AppointmentStatus::Cancelled);
    assert_eq!(fixture.stored_slot("s1").status(), SlotStatus::Booked);
    assert_eq!(
        fixture.stored_appointment(&appointment.id).status,
        AppointmentStatus::Cancelled
    );
}

#[test]
fn cancel_more_than_24h_before_releases_the_slot() {
    let fixture = Fixture::new();
    fixture.slot("s1", day(1), 10, 30);
    let appointment = fixture.book("u", "s1");

    fixture.clock.set(at(10, 29, 59));
    let outcome = fixture.engine.cancel_appointment("u", &appointment.id).unwrap();

    assert!(outcome.slot_released);
    assert_eq!(outcome.appointment.updated_at, at(10, 29, 59));
    assert_eq!(fixture.stored_slot("s1").status(), SlotStatus::Available);

    // someone else can have it now
    fixture.engine.lock_slot("v", DOCTOR, "s1").unwrap();
}

#[test]
fn cancel_requires_owned_booked_appointment() {
    let fixture = Fixture::new();
    fixture.slot("s1", day(2), 9, 0);
    let appointment = fixture.book("u", "s1");

    let err = fixture.engine.cancel_appointment("v", &appointment.id).unwrap_err();
    assert_eq!(err.code(), ErrorCode::AppointmentNotFound);
    let err = fixture.engine.cancel_appointment("u", "missing").unwrap_err();
    assert_eq!(err.code(), ErrorCode::AppointmentNotFound);

    fixture.engine.cancel_appointment("u", &appointment.id).unwrap();
    let err = fixture.engine.cancel_appointment("u", &appointment.id).unwrap_err();
    assert_eq!(err.code(), ErrorCode::AppointmentNotBooked);
}

#[test]
fn cancel_invalidates_list_and_entry() {
    let fixture = Fixture::new();
    fixture.slot("s1", day(2), 9, 0);
    let appointment = fixture.book("u", "s1");
    fixture.take_invalidated();

    fixture.engine.cancel_appointment("u", &appointment.id).unwrap();
    assert_eq!(
        fixture.take_invalidated(),
        vec![
            "user:u:appointments:*".to_string(),
            format!("appointment:u:{}", appointment.id),
        ]
    );
}
