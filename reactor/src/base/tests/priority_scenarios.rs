// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Priority-queue scenarios: drain order, starvation guard, priority_init
//! legality.

use super::{raw, test_base, test_pipe, write_all};
use crate::{Event, EventError, EventMask, EventWhat, LoopFlags};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[test]
fn priority_zero_preempts_busy_lower_priorities() {
    let base = test_base();
    base.priority_init(6).unwrap();

    let (read_end, write_end) = test_pipe();
    // Continuously ready: one byte is written and never drained, so the
    // level-triggered backend re-reports the fd every iteration.
    write_all(&write_end, b"!");

    let low_runs = Arc::new(AtomicUsize::new(0));
    let urgent_ran = Arc::new(AtomicBool::new(false));

    let mut busy_events = Vec::new();
    for _ in 0..50 {
        let low_runs_in_cb = Arc::clone(&low_runs);
        let event = Event::new(
            &base,
            EventWhat::io(raw(&read_end), EventMask::READ | EventMask::PERSIST),
            move |_| {
                low_runs_in_cb.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();
        event.set_priority(5).unwrap();
        event.add().unwrap();
        busy_events.push(event);
    }

    let urgent_flag = Arc::clone(&urgent_ran);
    let low_runs_at_urgent = Arc::new(AtomicUsize::new(0));
    let low_snapshot = Arc::clone(&low_runs_at_urgent);
    let low_for_snapshot = Arc::clone(&low_runs);
    let base_in_cb = base.clone();
    let urgent = Event::new(&base, EventWhat::timer(), move |_| {
        urgent_flag.store(true, Ordering::SeqCst);
        low_snapshot.store(low_for_snapshot.load(Ordering::SeqCst), Ordering::SeqCst);
        base_in_cb.loopbreak();
    })
    .unwrap();
    urgent.set_priority(0).unwrap();
    urgent.add_with_timeout(Duration::from_millis(20)).unwrap();

    base.run_loop(LoopFlags::NONE).unwrap();

    assert!(urgent_ran.load(Ordering::SeqCst), "priority 0 was not starved");
    assert!(
        low_runs_at_urgent.load(Ordering::SeqCst) > 0,
        "busy events were running before the urgent one fired"
    );
    base.assert_ok();
}

#[test]
fn within_a_priority_order_is_fifo() {
    let base = test_base();
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut events = Vec::new();
    for n in 0..8 {
        let order_in_cb = Arc::clone(&order);
        let event = Event::new(&base, EventWhat::timer(), move |_| {
            order_in_cb.lock().unwrap().push(n);
        })
        .unwrap();
        event.active(EventMask::TIMEOUT, 1).unwrap();
        events.push(event);
    }
    base.run_loop(LoopFlags::ONCE).unwrap();
    assert_eq!(*order.lock().unwrap(), (0..8).collect::<Vec<_>>());
}

#[test]
fn lower_importance_activation_mid_drain_waits_for_next_iteration() {
    let base = test_base();
    base.priority_init(3).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let order_low = Arc::clone(&order);
    let low = Arc::new(
        Event::new(&base, EventWhat::timer(), move |_| {
            order_low.lock().unwrap().push("low");
        })
        .unwrap(),
    );
    low.set_priority(2).unwrap();

    let order_high = Arc::clone(&order);
    let low_from_high = Arc::clone(&low);
    let high = Event::new(&base, EventWhat::timer(), move |_| {
        order_high.lock().unwrap().push("high");
        // Activating a less important event mid-drain parks it for the next
        // iteration.
        low_from_high.active(EventMask::TIMEOUT, 1).unwrap();
    })
    .unwrap();
    high.set_priority(0).unwrap();

    high.active(EventMask::TIMEOUT, 1).unwrap();
    base.run_loop(LoopFlags::ONCE).unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["high"]);

    base.run_loop(LoopFlags::NONBLOCK).unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["high", "low"]);
}

#[test]
fn priority_init_is_rejected_once_events_exist() {
    let base = test_base();
    let event = Event::new(&base, EventWhat::timer(), |_| {}).unwrap();
    event.add_with_timeout(Duration::from_secs(60)).unwrap();

    assert!(matches!(
        base.priority_init(4),
        Err(EventError::PriorityInitTooLate)
    ));
    event.del().unwrap();
    base.priority_init(4).unwrap();
}

#[test]
fn out_of_range_priority_is_rejected() {
    let base = test_base();
    base.priority_init(4).unwrap();
    let event = Event::new(&base, EventWhat::timer(), |_| {}).unwrap();
    assert!(matches!(
        event.set_priority(4),
        Err(EventError::PriorityOutOfRange { priority: 4, nqueues: 4 })
    ));
    event.set_priority(3).unwrap();
}

#[test]
fn default_priority_is_the_middle_queue() {
    let base = test_base();
    base.priority_init(8).unwrap();
    let event = Event::new(&base, EventWhat::timer(), |_| {}).unwrap();
    {
        let state = base.core.lock_state();
        let (_, record) = state
            .events
            .iter()
            .find(|(_, r)| !r.is_internal())
            .unwrap();
        assert_eq!(record.priority, 4);
    }
    drop(event);
}
