use chrono::Duration;
use slot_booking::{
    reap_expired_leases, Appointment, AppointmentStatus, BookingRequest, BookingStore, ErrorCode,
    RescheduleConfirmation, SlotStatus,
};

use crate::support::{at, day, Fixture, DOCTOR};

#[test]
fn lock_book_and_turn_away_on_sqlite() {
    let fixture = Fixture::sqlite();
    fixture.slot("s1", day(1), 9, 0);

    fixture.engine.lock_slot("u", DOCTOR, "s1").unwrap();
    fixture.clock.set(at(10, 2, 0));
    let err = fixture.engine.lock_slot("v", DOCTOR, "s1").unwrap_err();
    assert_eq!(err.code(), ErrorCode::SlotLocked);

    fixture.clock.set(at(10, 4, 0));
    fixture.verify_otp("u");
    let appointment = fixture
        .engine
        .confirm_booking("u", &BookingRequest::new(DOCTOR, "s1").with_notes("n"))
        .unwrap();
    assert_eq!(fixture.stored_appointment(&appointment.id), appointment);

    fixture.clock.set(at(10, 5, 0));
    let err = fixture.engine.lock_slot("w", DOCTOR, "s1").unwrap_err();
    assert_eq!(err.code(), ErrorCode::SlotAlreadyBooked);
}

#[test]
fn expired_lease_is_taken_over_on_sqlite() {
    let fixture = Fixture::sqlite();
    fixture.slot("s1", day(1), 9, 0);
    fixture.engine.lock_slot("u", DOCTOR, "s1").unwrap();
    fixture.verify_otp("u");

    fixture.clock.set(at(10, 5, 0));
    let err = fixture
        .engine
        .confirm_booking("u", &BookingRequest::new(DOCTOR, "s1"))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::LockInvalid);

    fixture.clock.set(at(10, 6, 0));
    fixture.engine.lock_slot("v", DOCTOR, "s1").unwrap();
    assert!(fixture.stored_slot("s1").is_locked_by("v", at(10, 6, 0)));
}

#[test]
fn stray_booked_row_rolls_back_on_sqlite() {
    let fixture = Fixture::sqlite();
    fixture.slot("s1", day(1), 9, 0);
    let stray = Appointment::booked("x", DOCTOR, "s1", None, at(9, 0, 0));
    fixture
        .store
        .transaction(|tx| tx.insert_appointment(&stray))
        .unwrap();

    fixture.engine.lock_slot("u", DOCTOR, "s1").unwrap();
    fixture.verify_otp("u");
    let err = fixture
        .engine
        .confirm_booking("u", &BookingRequest::new(DOCTOR, "s1"))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::SlotAlreadyBooked);
    assert_eq!(fixture.stored_slot("s1").status(), SlotStatus::Locked);
}

#[test]
fn cancel_and_reschedule_on_sqlite() {
    let fixture = Fixture::sqlite();
    fixture.slot("a", day(2), 9, 0);
    fixture.slot("b", day(2), 10, 0);
    fixture.slot("c", day(2), 11, 0);

    let first = fixture.book("u", "a");
    fixture.clock.advance(Duration::minutes(1));
    fixture.engine.reschedule_appointment("u", &first.id, "b").unwrap();
    let outcome = fixture
        .engine
        .confirm_reschedule(
            "u",
            &RescheduleConfirmation {
                appointment_id: first.id.clone(),
                new_slot_id: "b".to_string(),
                old_slot_id: "a".to_string(),
                doctor_id: DOCTOR.to_string(),
            },
        )
        .unwrap();
    assert_eq!(fixture.stored_slot("a").status(), SlotStatus::Available);
    assert_eq!(fixture.stored_slot("b").status(), SlotStatus::Booked);
    assert_eq!(
        fixture.stored_appointment(&first.id).status,
        AppointmentStatus::Rescheduled
    );

    fixture.clock.advance(Duration::minutes(1));
    let outcome = fixture
        .engine
        .cancel_appointment("u", &outcome.appointment.id)
        .unwrap();
    assert!(outcome.slot_released);
    assert_eq!(fixture.stored_slot("b").status(), SlotStatus::Available);

    let listed = fixture.engine.user_appointments("u").unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].status, AppointmentStatus::Cancelled);

    fixture.engine.lock_slot("v", DOCTOR, "c").unwrap();
    fixture.clock.advance(Duration::minutes(5));
    let released = reap_expired_leases(&fixture.store, fixture.engine.leases()).unwrap();
    assert_eq!(released, 1);
}

#[test]
fn interleaved_confirms_cannot_share_one_otp_on_sqlite() {
    crate::confirm::one_otp_books_one_slot(Fixture::sqlite());
}
