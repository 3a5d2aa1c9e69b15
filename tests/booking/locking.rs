use std::thread;

use chrono::Duration;
use slot_booking::{BookingConfig, BookingRequest, ErrorCode, ErrorKind, SlotStatus};

use crate::support::{at, day, Fixture, DOCTOR};

#[test]
fn concurrent_lock_attempts_have_one_winner() {
    let fixture = Fixture::new();
    fixture.slot("s1", day(1), 9, 0);

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let engine = &fixture.engine;
                scope.spawn(move || engine.lock_slot(&format!("user-{}", i), DOCTOR, "s1"))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(err.code(), ErrorCode::SlotLocked);
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }
}

#[test]
fn lock_then_book_then_late_lockers_are_turned_away() {
    let fixture = Fixture::new();
    fixture.slot("s1", day(1), 9, 0);

    // 10:00 user U takes the lease
    let lease = fixture.engine.lock_slot("u", DOCTOR, "s1").unwrap();
    assert_eq!(lease.expires_at, at(10, 5, 0));

    // 10:02 another user is rejected
    fixture.clock.set(at(10, 2, 0));
    let err = fixture.engine.lock_slot("v", DOCTOR, "s1").unwrap_err();
    assert_eq!(err.code(), ErrorCode::SlotLocked);
    assert_eq!(err.status_code(), 409);

    // 10:04 U confirms
    fixture.clock.set(at(10, 4, 0));
    fixture.verify_otp("u");
    fixture
        .engine
        .confirm_booking("u", &BookingRequest::new(DOCTOR, "s1"))
        .unwrap();
    assert_eq!(fixture.stored_slot("s1").status(), SlotStatus::Booked);

    // 10:05 a third user finds it booked
    fixture.clock.set(at(10, 5, 0));
    let err = fixture.engine.lock_slot("w", DOCTOR, "s1").unwrap_err();
    assert_eq!(err.code(), ErrorCode::SlotAlreadyBooked);
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[test]
fn expired_lease_is_taken_over_without_reaper() {
    let fixture = Fixture::new();
    fixture.slot("s1", day(1), 9, 0);
    fixture.engine.lock_slot("u", DOCTOR, "s1").unwrap();

    fixture.clock.set(at(10, 6, 0));
    let views = fixture.engine.doctor_slots(DOCTOR, day(1)).unwrap();
    assert_eq!(views[0].slot.status(), SlotStatus::Locked);
    assert_eq!(views[0].effective_status, SlotStatus::Available);

    let lease = fixture.engine.lock_slot("v", DOCTOR, "s1").unwrap();
    assert_eq!(lease.holder, "v");
    assert_eq!(lease.expires_at, at(10, 11, 0));
    assert!(fixture.stored_slot("s1").is_locked_by("v", at(10, 6, 0)));
}

#[test]
fn holder_renews_own_lease() {
    let fixture = Fixture::new();
    fixture.slot("s1", day(1), 9, 0);
    fixture.engine.lock_slot("u", DOCTOR, "s1").unwrap();

    fixture.clock.advance(Duration::minutes(3));
    let renewed = fixture.engine.lock_slot("u", DOCTOR, "s1").unwrap();
    assert_eq!(renewed.expires_at, at(10, 8, 0));
}

#[test]
fn released_lock_frees_the_slot() {
    let fixture = Fixture::new();
    fixture.slot("s1", day(1), 9, 0);
    fixture.engine.lock_slot("u", DOCTOR, "s1").unwrap();

    assert!(!fixture.engine.release_lock("v", "s1").unwrap());
    assert!(fixture.engine.release_lock("u", "s1").unwrap());
    assert_eq!(fixture.stored_slot("s1").status(), SlotStatus::Available);
    fixture.engine.lock_slot("v", DOCTOR, "s1").unwrap();
}

#[test]
fn lease_cap_is_rate_limited() {
    let fixture = Fixture::with_config(BookingConfig::new().with_max_active_leases(1));
    fixture.slot("s1", day(1), 9, 0);
    fixture.slot("s2", day(1), 9, 30);

    fixture.engine.lock_slot("u", DOCTOR, "s1").unwrap();
    let err = fixture.engine.lock_slot("u", DOCTOR, "s2").unwrap_err();
    assert_eq!(err.code(), ErrorCode::LockLimitExceeded);
    assert_eq!(err.status_code(), 429);
}

#[test]
fn started_and_past_slots_are_rejected() {
    let fixture = Fixture::new();
    fixture.slot("yesterday", day(-1), 15, 0);
    fixture.slot("this-morning", day(0), 9, 0);
    fixture.slot("now", day(0), 10, 0);

    let err = fixture.engine.lock_slot("u", DOCTOR, "yesterday").unwrap_err();
    assert_eq!(err.code(), ErrorCode::SlotInPast);
    assert_eq!(err.status_code(), 400);

    let err = fixture.engine.lock_slot("u", DOCTOR, "this-morning").unwrap_err();
    assert_eq!(err.code(), ErrorCode::SlotAlreadyStarted);

    let err = fixture.engine.lock_slot("u", DOCTOR, "now").unwrap_err();
    assert_eq!(err.code(), ErrorCode::SlotAlreadyStarted);
}

#[test]
fn slot_of_another_doctor_is_not_found() {
    let fixture = Fixture::new();
    fixture.slot("s1", day(1), 9, 0);

    let err = fixture.engine.lock_slot("u", "doc-2", "s1").unwrap_err();
    assert_eq!(err.code(), ErrorCode::SlotNotFound);
    assert_eq!(err.status_code(), 404);
}
