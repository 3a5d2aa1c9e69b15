use chrono::Duration;
use slot_booking::{
    Appointment, AppointmentStatus, BookingEngine, BookingRequest, BookingResponse, BookingStore,
    Clock, ErrorCode, SlotState, SlotStatus,
};

use crate::support::{at, day, Fixture, InterleavedStore, DOCTOR};

/// One verified OTP, two leases, and a second confirm that commits between
/// the first confirm's precheck and its write. Only one booking may land.
pub fn one_otp_books_one_slot<S>(fixture: Fixture<S>)
where
    S: BookingStore + Clone + 'static,
{
    fixture.slot("s1", day(1), 9, 0);
    fixture.slot("s2", day(1), 9, 30);
    fixture.engine.lock_slot("u", DOCTOR, "s1").unwrap();
    fixture.engine.lock_slot("u", DOCTOR, "s2").unwrap();
    fixture.verify_otp("u");

    let store = InterleavedStore::new(fixture.store.clone());
    let rival = BookingEngine::new(fixture.store.clone());
    store.before_transaction(2, move || {
        rival
            .confirm_booking("u", &BookingRequest::new(DOCTOR, "s2"))
            .unwrap();
    });
    let engine = BookingEngine::new(store);

    let err = engine
        .confirm_booking("u", &BookingRequest::new(DOCTOR, "s1"))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::OtpRequired);

    let appointments = fixture.engine.user_appointments("u").unwrap();
    assert_eq!(appointments.len(), 1);
    assert_eq!(appointments[0].time_slot_id.as_deref(), Some("s2"));
    assert_eq!(fixture.stored_slot("s2").status(), SlotStatus::Booked);
    // the rolled-back unit left the first lease in place
    assert!(fixture.stored_slot("s1").is_locked_by("u", fixture.clock.now()));
}

#[test]
fn booking_requires_a_fresh_otp() {
    let fixture = Fixture::new();
    fixture.slot("s1", day(1), 9, 0);
    fixture.engine.lock_slot("u", DOCTOR, "s1").unwrap();

    let err = fixture
        .engine
        .confirm_booking("u", &BookingRequest::new(DOCTOR, "s1"))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::OtpRequired);
    assert_eq!(err.status_code(), 400);

    // a verification that has already lapsed does not count
    fixture
        .store
        .set_otp_verified_until("u", Some(at(9, 59, 0)))
        .unwrap();
    let err = fixture
        .engine
        .confirm_booking("u", &BookingRequest::new(DOCTOR, "s1"))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::OtpRequired);
}

#[test]
fn otp_is_consumed_by_each_booking() {
    let fixture = Fixture::new();
    fixture.slot("s1", day(1), 9, 0);
    fixture.slot("s2", day(1), 9, 30);
    fixture.book("u", "s1");

    let otp = fixture
        .store
        .transaction(|tx| tx.otp_verified_until("u"))
        .unwrap();
    assert_eq!(otp, None);

    fixture.engine.lock_slot("u", DOCTOR, "s2").unwrap();
    let err = fixture
        .engine
        .confirm_booking("u", &BookingRequest::new(DOCTOR, "s2"))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::OtpRequired);
}

#[test]
fn lease_is_unusable_once_it_expires() {
    let fixture = Fixture::new();
    fixture.slot("s1", day(1), 9, 0);
    fixture.engine.lock_slot("u", DOCTOR, "s1").unwrap();
    fixture.verify_otp("u");

    fixture.clock.set(at(10, 5, 0));
    let err = fixture
        .engine
        .confirm_booking("u", &BookingRequest::new(DOCTOR, "s1"))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::LockInvalid);
    assert_eq!(fixture.stored_slot("s1").status(), SlotStatus::Locked);
    assert!(fixture.engine.user_appointments("u").unwrap().is_empty());
}

#[test]
fn retry_after_fresh_lease_books_exactly_once() {
    let fixture = Fixture::new();
    fixture.slot("s1", day(1), 9, 0);
    fixture.engine.lock_slot("u", DOCTOR, "s1").unwrap();
    fixture.verify_otp("u");
    fixture.clock.advance(Duration::minutes(6));

    let request = BookingRequest::new(DOCTOR, "s1");
    assert!(fixture.engine.confirm_booking("u", &request).is_err());

    fixture.engine.lock_slot("u", DOCTOR, "s1").unwrap();
    fixture.engine.confirm_booking("u", &request).unwrap();

    fixture.verify_otp("u");
    let err = fixture.engine.confirm_booking("u", &request).unwrap_err();
    assert_eq!(err.code(), ErrorCode::SlotAlreadyBooked);
    assert_eq!(fixture.engine.user_appointments("u").unwrap().len(), 1);
}

#[test]
fn lock_must_belong_to_the_caller() {
    let fixture = Fixture::new();
    fixture.slot("s1", day(1), 9, 0);
    fixture.slot("s2", day(1), 9, 30);
    fixture.engine.lock_slot("v", DOCTOR, "s1").unwrap();
    fixture.verify_otp("u");

    for slot_id in ["s1", "s2"] {
        let err = fixture
            .engine
            .confirm_booking("u", &BookingRequest::new(DOCTOR, slot_id))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::LockInvalid);
    }
}

#[test]
fn booked_appointment_carries_notes_and_invalidates_cache() {
    let fixture = Fixture::new();
    fixture.slot("s1", day(1), 9, 0);
    fixture.engine.lock_slot("u", DOCTOR, "s1").unwrap();
    fixture.verify_otp("u");

    let appointment = fixture
        .engine
        .confirm_booking(
            "u",
            &BookingRequest::new(DOCTOR, "s1").with_notes("first visit"),
        )
        .unwrap();

    assert_eq!(appointment.status, AppointmentStatus::Booked);
    assert_eq!(appointment.time_slot_id.as_deref(), Some("s1"));
    assert_eq!(appointment.notes.as_deref(), Some("first visit"));
    assert_eq!(appointment.created_at, at(10, 0, 0));
    assert_eq!(fixture.stored_slot("s1").status(), SlotStatus::Booked);
    assert_eq!(
        fixture.take_invalidated(),
        vec![
            "user:u:appointments:*".to_string(),
            format!("appointment:u:{}", appointment.id),
        ]
    );
}

#[test]
fn stray_booked_row_rolls_the_booking_back() {
    let fixture = Fixture::new();
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

    // slot transition and OTP consumption were undone
    assert!(fixture.stored_slot("s1").is_locked_by("u", at(10, 0, 0)));
    let otp = fixture
        .store
        .transaction(|tx| tx.otp_verified_until("u"))
        .unwrap();
    assert!(otp.is_some());
    assert!(fixture.take_invalidated().is_empty());
}

#[test]
fn failures_render_as_response_envelopes() {
    let fixture = Fixture::new();
    fixture.slot("s1", day(1), 9, 0);
    fixture.engine.lock_slot("u", DOCTOR, "s1").unwrap();

    let response = BookingResponse::from_result(
        fixture
            .engine
            .confirm_booking("u", &BookingRequest::new(DOCTOR, "s1")),
        "booked",
    );
    assert!(!response.success);
    assert_eq!(response.code.as_deref(), Some("OTP_REQUIRED"));
    assert_eq!(response.status_code(), 400);

    fixture.verify_otp("u");
    let response = BookingResponse::from_result(
        fixture
            .engine
            .confirm_booking("u", &BookingRequest::new(DOCTOR, "s1")),
        "booked",
    );
    assert!(response.success);
    assert_eq!(response.message, "booked");
    assert_eq!(response.data.as_ref().unwrap()["status"], "BOOKED");
}

#[test]
fn interleaved_confirms_cannot_share_one_otp() {
    one_otp_books_one_slot(Fixture::new());
}

#[test]
fn lease_lost_between_check_and_write_is_a_state_conflict() {
    let fixture = Fixture::new();
    fixture.slot("s1", day(1), 9, 0);
    fixture.engine.lock_slot("u", DOCTOR, "s1").unwrap();
    fixture.verify_otp("u");

    // the lease runs out after the precheck has passed
    let store = InterleavedStore::new(fixture.store.clone());
    let clock = fixture.clock.clone();
    store.before_transaction(2, move || clock.advance(Duration::minutes(5)));
    let engine = BookingEngine::new(store);

    let err = engine
        .confirm_booking("u", &BookingRequest::new(DOCTOR, "s1"))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConflictSlotState);
    assert_eq!(err.status_code(), 409);

    match fixture.stored_slot("s1").state {
        SlotState::Locked(hold) => {
            assert_eq!(hold.holder, "u");
            assert_eq!(hold.expires_at, at(10, 5, 0));
        }
        other => panic!("expected the stale lease to remain, got {:?}", other),
    }
    assert!(fixture.engine.user_appointments("u").unwrap().is_empty());
    let otp = fixture
        .store
        .transaction(|tx| tx.otp_verified_until("u"))
        .unwrap();
    assert_eq!(otp, Some(at(10, 10, 0)));
}
