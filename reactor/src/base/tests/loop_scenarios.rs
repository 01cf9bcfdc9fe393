// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words ncalls loopbreak loopexit

//! Loop-driver scenarios: single-shot and persistent reads, termination
//! flags, re-entrancy, deferred callbacks, forced activation.

use super::{raw, test_base, test_pipe, write_all};
use crate::{
    Event, EventError, EventMask, EventWhat, LoopExit, LoopFlags,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[test]
fn single_shot_read_fires_exactly_once() {
    let base = test_base();
    let (read_end, write_end) = test_pipe();

    let hits = Arc::new(Mutex::new(Vec::new()));
    let hits_in_cb = Arc::clone(&hits);
    let event = Event::new(
        &base,
        EventWhat::io(raw(&read_end), EventMask::READ),
        move |activation| hits_in_cb.lock().unwrap().push(activation.res),
    )
    .unwrap();
    event.add().unwrap();

    write_all(&write_end, b"hi");
    base.run_loop(LoopFlags::ONCE).unwrap();

    assert_eq!(*hits.lock().unwrap(), vec![EventMask::READ]);
    // One-shot: unregistered before the callback ran.
    assert_eq!(
        event.pending(EventMask::READ).unwrap(),
        EventMask::NONE
    );
    assert_eq!(base.event_count(), 0);
    base.assert_ok();

    // Nothing left: the default loop reports an empty base.
    assert_eq!(base.dispatch().unwrap(), LoopExit::NoEvents);
}

#[test]
fn persist_event_stays_registered_across_fires() {
    let base = test_base();
    let (read_end, write_end) = test_pipe();

    let count = Arc::new(AtomicUsize::new(0));
    let count_in_cb = Arc::clone(&count);
    let read_fd = raw(&read_end);
    let drain_end = read_end;
    let event = Event::new(
        &base,
        EventWhat::io(read_fd, EventMask::READ | EventMask::PERSIST),
        move |_| {
            let mut buf = [0u8; 8];
            let _ = rustix::io::read(&drain_end, &mut buf);
            count_in_cb.fetch_add(1, Ordering::SeqCst);
        },
    )
    .unwrap();
    event.add().unwrap();

    write_all(&write_end, b"a");
    base.run_loop(LoopFlags::ONCE).unwrap();
    write_all(&write_end, b"b");
    base.run_loop(LoopFlags::ONCE).unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert_eq!(
        event.pending(EventMask::READ).unwrap(),
        EventMask::READ,
        "persistent event remains registered"
    );
    base.assert_ok();
}

#[test]
fn repeated_adds_are_idempotent() {
    let base = test_base();
    let (read_end, write_end) = test_pipe();

    let count = Arc::new(AtomicUsize::new(0));
    let count_in_cb = Arc::clone(&count);
    let event = Event::new(
        &base,
        EventWhat::io(raw(&read_end), EventMask::READ | EventMask::PERSIST),
        move |_| {
            count_in_cb.fetch_add(1, Ordering::SeqCst);
        },
    )
    .unwrap();
    for _ in 0..4 {
        event.add().unwrap();
    }
    assert_eq!(base.event_count(), 1, "N adds produce one registration");
    {
        let state = base.core.lock_state();
        let entry = state.io_map.get(raw(&read_end)).unwrap();
        assert_eq!(entry.events.len(), 1);
    }

    write_all(&write_end, b"x");
    base.run_loop(LoopFlags::ONCE).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
    base.assert_ok();
}

#[test]
fn add_then_del_restores_pre_add_state() {
    let base = test_base();
    let (read_end, _write_end) = test_pipe();

    let event = Event::new(
        &base,
        EventWhat::io(raw(&read_end), EventMask::READ),
        |_| {},
    )
    .unwrap();
    event
        .add_with_timeout(Duration::from_secs(60))
        .unwrap();
    assert_eq!(base.event_count(), 1);

    event.del().unwrap();
    assert_eq!(base.event_count(), 0);
    {
        let state = base.core.lock_state();
        assert!(state.io_map.get(raw(&read_end)).is_none());
        assert!(state.timer_heap.is_empty());
    }
    // del on a non-registered event is a no-op, not an error.
    event.del().unwrap();
    base.assert_ok();
}

#[test]
fn forced_activation_runs_once_with_the_given_result() {
    let base = test_base();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_cb = Arc::clone(&seen);
    // Never registered: active() on a non-registered event is permitted.
    let event = Event::new(&base, EventWhat::timer(), move |activation| {
        seen_in_cb
            .lock()
            .unwrap()
            .push((activation.res, activation.ncalls));
    })
    .unwrap();

    event.active(EventMask::READ, 3).unwrap();
    base.run_loop(LoopFlags::ONCE).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![(EventMask::READ, 3)]);
    assert_eq!(
        event.pending(EventMask::READ | EventMask::TIMEOUT).unwrap(),
        EventMask::NONE,
        "one-shot activation leaves the event initialized"
    );
    base.assert_ok();
}

#[test]
fn loopbreak_mid_drain_stops_remaining_callbacks() {
    let base = test_base();

    let ran = Arc::new(AtomicUsize::new(0));
    let base_in_cb = base.clone();
    let ran_a = Arc::clone(&ran);
    let first = Event::new(&base, EventWhat::timer(), move |_| {
        ran_a.fetch_add(1, Ordering::SeqCst);
        base_in_cb.loopbreak();
    })
    .unwrap();
    let ran_b = Arc::clone(&ran);
    let second = Event::new(&base, EventWhat::timer(), move |_| {
        ran_b.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    first.add_with_timeout(Duration::ZERO).unwrap();
    second.add_with_timeout(Duration::ZERO).unwrap();
    base.run_loop(LoopFlags::NONE).unwrap();

    assert_eq!(
        ran.load(Ordering::SeqCst),
        1,
        "once loopbreak is set, no further callback runs this iteration"
    );
}

#[test]
fn reentrant_loop_is_rejected() {
    let base = test_base();

    let observed = Arc::new(Mutex::new(None));
    let observed_in_cb = Arc::clone(&observed);
    let base_in_cb = base.clone();
    let event = Event::new(&base, EventWhat::timer(), move |_| {
        *observed_in_cb.lock().unwrap() =
            Some(base_in_cb.run_loop(LoopFlags::NONBLOCK));
    })
    .unwrap();
    event.add_with_timeout(Duration::ZERO).unwrap();
    base.run_loop(LoopFlags::ONCE).unwrap();

    assert!(matches!(
        observed.lock().unwrap().take(),
        Some(Err(EventError::ReentrantLoop))
    ));
}

#[test]
fn deferred_callbacks_run_after_the_drain_not_recursively() {
    let base = test_base();

    // Order log: "event" then "deferred" in one iteration; a deferred
    // callback scheduling another deferred callback must not run it in the
    // same drain.
    let order = Arc::new(Mutex::new(Vec::new()));

    let order_event = Arc::clone(&order);
    let base_for_event = base.clone();
    let event = Event::new(&base, EventWhat::timer(), move |_| {
        order_event.lock().unwrap().push("event");
        let order_deferred = Arc::clone(&order_event);
        let order_nested = Arc::clone(&order_event);
        let base_nested = base_for_event.clone();
        base_for_event.defer(Box::new(move || {
            order_deferred.lock().unwrap().push("deferred");
            base_nested.defer(Box::new(move || {
                order_nested.lock().unwrap().push("nested");
            }));
        }));
    })
    .unwrap();
    event.add_with_timeout(Duration::ZERO).unwrap();
    base.run_loop(LoopFlags::ONCE).unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["event", "deferred"]);

    // The nested deferred callback waits for the next iteration.
    base.run_loop(LoopFlags::NONBLOCK).unwrap();
    assert_eq!(
        *order.lock().unwrap(),
        vec!["event", "deferred", "nested"]
    );
}

#[test]
fn zero_timeout_fires_on_the_next_iteration() {
    let base = test_base();
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_cb = Arc::clone(&fired);
    let event = Event::new(&base, EventWhat::timer(), move |_| {
        fired_in_cb.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    event.add_with_timeout(Duration::ZERO).unwrap();

    base.run_loop(LoopFlags::NONBLOCK).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn loopexit_after_delay_stops_an_otherwise_idle_loop() {
    let base = test_base();
    base.loopexit(Some(Duration::from_millis(30))).unwrap();

    let started = std::time::Instant::now();
    let exit = base.run_loop(LoopFlags::NO_EXIT_ON_EMPTY).unwrap();
    assert_eq!(exit, LoopExit::Normal);
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[test]
fn virtual_events_keep_the_loop_alive() {
    let base = test_base();
    assert_eq!(base.dispatch().unwrap(), LoopExit::NoEvents);

    base.add_virtual();
    // With a virtual hold the base no longer reports empty; a nonblocking
    // pass returns Normal instead.
    assert_eq!(
        base.run_loop(LoopFlags::NONBLOCK).unwrap(),
        LoopExit::Normal
    );
    base.del_virtual();
    assert_eq!(base.dispatch().unwrap(), LoopExit::NoEvents);
}

#[test]
fn callback_panic_is_contained() {
    let base = test_base();
    let survivor_ran = Arc::new(AtomicUsize::new(0));

    let panicker = Event::new(&base, EventWhat::timer(), |_| {
        panic!("deliberate callback panic");
    })
    .unwrap();
    let survivor_count = Arc::clone(&survivor_ran);
    let survivor = Event::new(&base, EventWhat::timer(), move |_| {
        survivor_count.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    panicker.add_with_timeout(Duration::ZERO).unwrap();
    survivor.add_with_timeout(Duration::from_millis(5)).unwrap();
    base.dispatch().unwrap();

    assert_eq!(
        survivor_ran.load(Ordering::SeqCst),
        1,
        "a panicking callback does not take the loop down"
    );
}
