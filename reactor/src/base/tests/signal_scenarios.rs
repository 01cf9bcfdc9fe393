// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words ncalls SIGUSR signum

//! Signal scenarios. Serialized: signal dispositions are process-wide.

use super::test_base;
use crate::{Event, EventError, EventMask, EventWhat, LoopFlags};
use pretty_assertions::assert_eq;
use serial_test::serial;
use signal_hook::consts::{SIGUSR1, SIGUSR2};
use signal_hook::low_level::raise;
use std::sync::{Arc, Mutex};

#[test]
#[serial]
fn coalesced_deliveries_surface_as_one_callback_with_ncalls() {
    let base = test_base();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_cb = Arc::clone(&seen);
    let event = Event::new(
        &base,
        EventWhat::signal(SIGUSR1, EventMask::PERSIST),
        move |activation| {
            seen_in_cb
                .lock()
                .unwrap()
                .push((activation.res, activation.ncalls));
        },
    )
    .unwrap();
    event.add().unwrap();

    // Three deliveries before the loop gets to run: one callback, ncalls 3.
    raise(SIGUSR1).unwrap();
    raise(SIGUSR1).unwrap();
    raise(SIGUSR1).unwrap();
    base.run_loop(LoopFlags::ONCE).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![(EventMask::SIGNAL, 3)]);
    assert_eq!(
        event.pending(EventMask::SIGNAL).unwrap(),
        EventMask::SIGNAL,
        "persistent signal event stays registered"
    );
    event.del().unwrap();
    base.assert_ok();
}

#[test]
#[serial]
fn one_shot_signal_event_detaches_after_delivery() {
    let base = test_base();
    let fired = Arc::new(Mutex::new(0));
    let fired_in_cb = Arc::clone(&fired);
    let event = Event::new(
        &base,
        EventWhat::signal(SIGUSR2, EventMask::NONE),
        move |_| *fired_in_cb.lock().unwrap() += 1,
    )
    .unwrap();
    event.add().unwrap();

    raise(SIGUSR2).unwrap();
    base.run_loop(LoopFlags::ONCE).unwrap();

    assert_eq!(*fired.lock().unwrap(), 1);
    assert_eq!(event.pending(EventMask::SIGNAL).unwrap(), EventMask::NONE);
    // The signum is released: another base can claim it immediately.
    let other = test_base();
    let other_event =
        Event::new(&other, EventWhat::signal(SIGUSR2, EventMask::NONE), |_| {})
            .unwrap();
    other_event.add().unwrap();
    other_event.del().unwrap();
}

#[test]
#[serial]
fn a_signum_is_exclusive_to_one_base() {
    let base_a = test_base();
    let base_b = test_base();

    let event_a = Event::new(
        &base_a,
        EventWhat::signal(SIGUSR1, EventMask::PERSIST),
        |_| {},
    )
    .unwrap();
    event_a.add().unwrap();

    let event_b = Event::new(
        &base_b,
        EventWhat::signal(SIGUSR1, EventMask::PERSIST),
        |_| {},
    )
    .unwrap();
    assert!(matches!(
        event_b.add(),
        Err(EventError::SignalInUse { signum }) if signum == SIGUSR1
    ));

    // Two events for the same signum on the SAME base are fine.
    let event_a2 = Event::new(
        &base_a,
        EventWhat::signal(SIGUSR1, EventMask::PERSIST),
        |_| {},
    )
    .unwrap();
    event_a2.add().unwrap();

    event_a.del().unwrap();
    event_a2.del().unwrap();
    // Fully released: base B can claim now.
    event_b.add().unwrap();
    event_b.del().unwrap();
}
