// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Common-timeout scenarios: O(1) amortized timers for large populations.

use super::test_base;
use crate::{Event, EventWhat, LoopFlags};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[test]
fn a_large_population_fires_in_insertion_order_with_a_tiny_heap() {
    const POPULATION: usize = 10_000;

    let base = test_base();
    let token = base
        .init_common_timeout(Duration::from_millis(50))
        .unwrap();

    let order = Arc::new(Mutex::new(Vec::with_capacity(POPULATION)));
    let mut events = Vec::with_capacity(POPULATION);
    for n in 0..POPULATION {
        let order_in_cb = Arc::clone(&order);
        let event = Event::new(&base, EventWhat::timer(), move |_| {
            order_in_cb.lock().unwrap().push(n);
        })
        .unwrap();
        event.add_with_timeout(token).unwrap();
        events.push(event);
    }

    // The whole population shares one trigger slot in the heap.
    {
        let state = base.core.lock_state();
        assert!(
            state.timer_heap.len() <= 2,
            "heap holds triggers, not the population (len {})",
            state.timer_heap.len()
        );
    }

    let started = Instant::now();
    base.dispatch().unwrap();

    assert!(started.elapsed() >= Duration::from_millis(50));
    let order = order.lock().unwrap();
    assert_eq!(order.len(), POPULATION, "every event fired");
    assert!(
        order.windows(2).all(|pair| pair[0] < pair[1]),
        "activation follows insertion order"
    );
    base.assert_ok();
}

#[test]
fn equal_durations_share_a_bucket_and_token() {
    let base = test_base();
    let token_a = base.init_common_timeout(Duration::from_millis(75)).unwrap();
    let token_b = base.init_common_timeout(Duration::from_millis(75)).unwrap();
    assert_eq!(token_a, token_b);
    assert_eq!(token_a.duration(), Duration::from_millis(75));

    let token_c = base.init_common_timeout(Duration::from_millis(80)).unwrap();
    assert_ne!(token_a, token_c);
}

#[test]
fn a_foreign_token_is_rejected() {
    let base_a = test_base();
    let base_b = test_base();
    // base_a gets two buckets so its second token's index does not exist on
    // base_b at all; the first token collides with an index that exists but
    // may carry a different duration.
    let _first = base_a.init_common_timeout(Duration::from_millis(10)).unwrap();
    let second = base_a.init_common_timeout(Duration::from_millis(20)).unwrap();

    let event = Event::new(&base_b, EventWhat::timer(), |_| {}).unwrap();
    assert!(event.add_with_timeout(second).is_err());
    assert_eq!(base_b.event_count(), 0, "failed add leaves nothing behind");
}

#[test]
fn deleting_entries_keeps_the_queue_consistent() {
    let base = test_base();
    let token = base.init_common_timeout(Duration::from_millis(40)).unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let mut events = Vec::new();
    for _ in 0..10 {
        let fired_in_cb = Arc::clone(&fired);
        let event = Event::new(&base, EventWhat::timer(), move |_| {
            fired_in_cb.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        event.add_with_timeout(token).unwrap();
        events.push(event);
    }
    // Delete every other entry, including the head.
    for event in events.iter().step_by(2) {
        event.del().unwrap();
    }
    base.assert_ok();

    base.dispatch().unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 5);
}

#[test]
fn persistent_common_timeout_re_arms_into_the_bucket() {
    let base = test_base();
    let token = base.init_common_timeout(Duration::from_millis(10)).unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    let count_in_cb = Arc::clone(&count);
    let base_in_cb = base.clone();
    let event = Event::new(&base, EventWhat::periodic_timer(), move |_| {
        if count_in_cb.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
            base_in_cb.loopbreak();
        }
    })
    .unwrap();
    event.add_with_timeout(token).unwrap();

    base.run_loop(LoopFlags::NONE).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 3);
    {
        let state = base.core.lock_state();
        assert_eq!(
            state.common_queues[0].entries.len(),
            1,
            "re-armed event sits back in its bucket"
        );
    }
}
