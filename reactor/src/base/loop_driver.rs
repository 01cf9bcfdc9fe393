// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words ncalls loopbreak loopexit

//! The loop: wait → activate → drain → defer → check, repeated. See
//! [`run_loop`].

use super::{BaseCore, BaseState, InternalCb};
use crate::backend::{DispatchError, ReadySink};
use crate::error::{EventError, EventResult};
use crate::event::{Activation, EventMask, EventState};
use bitflags::bitflags;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::MutexGuard;
use std::time::Duration;

bitflags! {
    /// How a loop run behaves.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LoopFlags: u8 {
        /// Block until at least one event fires, run the resulting
        /// callbacks, then return.
        const ONCE = 0x01;
        /// Never block: poll readiness, run whatever is due, return.
        const NONBLOCK = 0x02;
        /// Keep looping even when no events are registered.
        const NO_EXIT_ON_EMPTY = 0x04;
    }
}

impl LoopFlags {
    /// Run until no events remain (or termination is requested).
    pub const NONE: Self = Self::empty();
}

/// Why the loop returned without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// A termination request (`loopexit`/`loopbreak`) or a satisfied
    /// `ONCE`/`NONBLOCK` run.
    Normal,
    /// Nothing registered, active, or virtual remained to wait for.
    NoEvents,
}

/// Drives the base until termination.
///
/// Re-entrancy is rejected up front: one guard flag, one owner thread. The
/// owner holds the state lock throughout except across the backend wait and
/// across each callback invocation.
pub(crate) fn run_loop(core: &BaseCore, flags: LoopFlags) -> EventResult<LoopExit> {
    {
        let mut state = core.lock_state();
        if state.running_loop {
            return Err(EventError::ReentrantLoop);
        }
        state.running_loop = true;
        state.owner = Some(std::thread::current().id());
        state.loop_break = false;
        state.loop_exit = false;
    }

    let outcome = drive(core, flags);

    let mut state = core.lock_state();
    state.running_loop = false;
    state.owner = None;
    state.running_priority = None;
    state.loop_break = false;
    state.loop_exit = false;
    state.clock.invalidate();
    outcome
}

fn drive(core: &BaseCore, flags: LoopFlags) -> EventResult<LoopExit> {
    let mut sink = ReadySink::default();

    loop {
        // ── prep: compute the wait ────────────────────────────────────────
        let timeout = {
            let mut state = core.lock_state();
            if state.loop_break || state.loop_exit {
                return Ok(LoopExit::Normal);
            }
            if let Some(skew) = state.clock.refresh() {
                state.rebase_deadlines(skew);
            }
            state.promote_later();
            if !flags.contains(LoopFlags::NO_EXIT_ON_EMPTY) && !state.has_events() {
                tracing::debug!("no events registered; loop exiting");
                return Ok(LoopExit::NoEvents);
            }
            compute_timeout(&mut state, flags)
        };

        // ── wait: the only blocking phase, state lock released ────────────
        {
            let mut backend = core
                .backend
                .lock()
                .expect("reactor backend lock poisoned");
            {
                let mut state = core.lock_state();
                core.apply_pending_changes(&mut state, backend.as_mut());
            }
            sink.clear();
            match backend.dispatch(timeout, &mut sink) {
                Ok(()) => {}
                Err(DispatchError::Transient) => {
                    tracing::trace!("backend wait interrupted; retrying");
                }
                Err(DispatchError::Fatal(source)) => {
                    tracing::error!(%source, "backend dispatch failed");
                    return Err(EventError::DispatchFailed { source });
                }
            }
        }

        // ── activate: readiness + expired timers into the queues ──────────
        let mut state = core.lock_state();
        if let Some(skew) = state.clock.refresh() {
            state.rebase_deadlines(skew);
        }
        for (fd, res) in sink.drain() {
            state.activate_fd(fd, res);
        }
        state.promote_due_timers();

        // ── drain: callbacks by ascending priority, then deferred ─────────
        let (returned, processed) = process_active(core, state);
        let (mut state, deferred_run) = drain_deferred(core, returned);

        // ── check: termination flags at the drain boundary ────────────────
        if state.loop_break || state.loop_exit {
            return Ok(LoopExit::Normal);
        }
        if flags.contains(LoopFlags::NONBLOCK) {
            return Ok(LoopExit::Normal);
        }
        if flags.contains(LoopFlags::ONCE) && processed + deferred_run > 0 {
            return Ok(LoopExit::Normal);
        }
        state.clock.invalidate();
        drop(state);
    }
}

/// The timeout handed to the backend: zero when work is already queued or
/// nonblocking was requested, the heap's next deadline otherwise, indefinite
/// when no deadline exists.
fn compute_timeout(state: &mut BaseState, flags: LoopFlags) -> Option<Duration> {
    if flags.contains(LoopFlags::NONBLOCK)
        || !state.queues.is_empty()
        || !state.deferred.is_empty()
    {
        return Some(Duration::ZERO);
    }
    let deadline = state.next_deadline()?;
    let now = state.clock.now();
    Some(deadline.duration_since(now))
}

/// Drains the activation queues in (priority, FIFO) order, invoking each
/// callback with the state lock released.
///
/// Re-scanning from queue 0 on every pop is what gives higher-priority
/// activations produced by callbacks their preemption. `loopbreak` is honored
/// between callbacks: once set, nothing further runs this iteration.
fn process_active<'a>(
    core: &'a BaseCore,
    mut state: MutexGuard<'a, BaseState>,
) -> (MutexGuard<'a, BaseState>, usize) {
    let mut processed = 0;

    loop {
        if state.loop_break {
            break;
        }
        let Some((priority, id)) = state.queues.pop_lowest() else {
            break;
        };
        let Some(record) = state.events.get_mut(id) else {
            continue;
        };
        record.state.remove(EventState::ACTIVE);
        let internal = record.internal;
        let persistent = record.what.is_persistent();
        let requested_timeout = record.requested_timeout;
        let res = record.active_res;
        let ncalls = record.ncalls.max(1);
        record.active_res = EventMask::NONE;
        record.ncalls = 0;
        if internal.is_none() {
            state.active_count -= 1;
        }
        state.running_priority = Some(priority);

        match internal {
            Some(callback) => run_internal(core, &mut state, callback),
            None => {
                if !persistent {
                    // One-shot: fully unregistered before its callback runs.
                    core.unregister_event(&mut state, id);
                } else if let Some(timeout) = requested_timeout {
                    // Sliding re-arm: the next deadline counts from now, not
                    // from the previous deadline.
                    if let Err(error) = state.schedule_timeout(id, timeout) {
                        tracing::warn!(?error, "persistent re-arm failed");
                    }
                }

                let Some(mut callback) =
                    state.events.get_mut(id).and_then(|r| r.callback.take())
                else {
                    continue;
                };
                state.current_event = Some(id);
                drop(state);

                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    callback(Activation { res, ncalls });
                }));
                if outcome.is_err() {
                    tracing::error!(
                        ?res,
                        "event callback panicked; loop continues"
                    );
                }

                state = core.lock_state();
                state.current_event = None;
                if state.current_event_waiters > 0 {
                    state.current_event_waiters = 0;
                    core.cond.notify_all();
                }
                // Hand the callback back unless the record died (or was
                // re-assigned) while we ran it.
                if let Some(record) = state.events.get_mut(id)
                    && record.callback.is_none()
                {
                    record.callback = Some(callback);
                }
                processed += 1;
            }
        }
    }

    state.running_priority = None;
    (state, processed)
}

/// Runs one of the base's own plumbing callbacks, lock held.
fn run_internal(core: &BaseCore, state: &mut BaseState, callback: InternalCb) {
    match callback {
        InternalCb::SignalPipe => {
            let deliveries = state
                .signal_pipe
                .as_ref()
                .map(|pipe| pipe.drain())
                .unwrap_or_default();
            state.activate_signals(&deliveries);
        }
        InternalCb::Notifier => {
            if let Some(notifier) = &core.notifier {
                notifier.drain();
            }
        }
        // Trigger and loopexit timers are consumed inline by the timer
        // promotion path and never reach the activation queues.
        InternalCb::CommonTimeoutTrigger(_) | InternalCb::LoopExitTimer => {
            debug_assert!(false, "inline internal callback reached the queues");
        }
    }
}

/// Runs the deferred callbacks present at drain start; ones scheduled during
/// the drain wait for the next iteration, preserving forward progress.
fn drain_deferred<'a>(
    core: &'a BaseCore,
    mut state: MutexGuard<'a, BaseState>,
) -> (MutexGuard<'a, BaseState>, usize) {
    let present_at_start = state.deferred.len();
    let mut ran = 0;
    for _ in 0..present_at_start {
        if state.loop_break {
            break;
        }
        let Some(callback) = state.deferred.pop_front() else {
            break;
        };
        drop(state);
        if catch_unwind(AssertUnwindSafe(callback)).is_err() {
            tracing::error!("deferred callback panicked; loop continues");
        }
        state = core.lock_state();
        ran += 1;
    }
    (state, ran)
}
