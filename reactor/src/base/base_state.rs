// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words ncalls signum fdinfo

//! Everything a base mutates under its registration lock. See [`BaseState`].

use super::{ActivationQueues, EventArena, EventRecord, InternalCb};
use crate::backend::Changelist;
use crate::error::{EventError, EventResult};
use crate::event::{EventId, EventMask, EventState, EventWhat};
use crate::registry::{IoMap, SignalMap};
use crate::signals::SignalPipe;
use crate::timeouts::{
    CommonTimeoutQueue, MonotonicClock, MonotonicInstant, Timeout, TimerHeap,
};
use std::collections::VecDeque;
use std::os::fd::RawFd;
use std::thread::ThreadId;
use std::time::Duration;

/// A callback parked to run after the activation drain, before the next wait.
pub(crate) type DeferredCb = Box<dyn FnOnce() + Send + 'static>;

/// The registration tables, queues, heap, clock, and loop flags of one base.
///
/// One mutex (in `BaseCore`) serializes every mutation here. The loop holds
/// that mutex while driving, except across the backend wait and across each
/// callback invocation.
pub(crate) struct BaseState {
    pub(crate) events: EventArena,
    pub(crate) io_map: IoMap,
    pub(crate) signal_map: SignalMap,
    pub(crate) timer_heap: TimerHeap,
    pub(crate) common_queues: Vec<CommonTimeoutQueue>,
    pub(crate) queues: ActivationQueues,
    pub(crate) deferred: VecDeque<DeferredCb>,
    pub(crate) clock: MonotonicClock,
    /// Backend deltas parked by non-owner threads while a wait is in flight.
    pub(crate) pending_changes: Changelist,

    /// Registered non-internal events.
    pub(crate) user_event_count: usize,
    /// Non-internal events sitting in an activation queue (or parked later).
    pub(crate) active_count: usize,
    pub(crate) virtual_count: usize,

    pub(crate) running_loop: bool,
    pub(crate) owner: Option<ThreadId>,
    pub(crate) running_priority: Option<usize>,
    pub(crate) loop_break: bool,
    pub(crate) loop_exit: bool,

    /// The event whose callback is executing right now, if any.
    pub(crate) current_event: Option<EventId>,
    /// Threads blocked in cross-thread `del` against `current_event`.
    pub(crate) current_event_waiters: usize,

    pub(crate) signal_pipe: Option<SignalPipe>,
    pub(crate) signal_pipe_event: Option<EventId>,
    pub(crate) notify_event: Option<EventId>,
}

impl BaseState {
    pub(crate) fn new(clock: MonotonicClock, fds_are_pointer_like: bool) -> Self {
        Self {
            events: EventArena::default(),
            io_map: IoMap::new(fds_are_pointer_like),
            signal_map: SignalMap::default(),
            timer_heap: TimerHeap::default(),
            common_queues: Vec::new(),
            queues: ActivationQueues::new(1),
            deferred: VecDeque::new(),
            clock,
            pending_changes: Changelist::default(),
            user_event_count: 0,
            active_count: 0,
            virtual_count: 0,
            running_loop: false,
            owner: None,
            running_priority: None,
            loop_break: false,
            loop_exit: false,
            current_event: None,
            current_event_waiters: 0,
            signal_pipe: None,
            signal_pipe_event: None,
            notify_event: None,
        }
    }

    /// The default priority for new events: the middle queue.
    pub(crate) fn default_priority(&self) -> usize { self.queues.nqueues() / 2 }

    /// Anything left that justifies another loop iteration.
    pub(crate) fn has_events(&self) -> bool {
        self.user_event_count > 0
            || self.active_count > 0
            || self.virtual_count > 0
            || !self.deferred.is_empty()
    }

    /// The union of interest masks over every event registered on `fd`,
    /// restricted to the bits backends subscribe.
    pub(crate) fn io_union_mask(&self, fd: RawFd) -> EventMask {
        let Some(entry) = self.io_map.get(fd) else {
            return EventMask::NONE;
        };
        let mut union = EventMask::NONE;
        for &id in &entry.events {
            if let Some(record) = self.events.get(id)
                && let EventWhat::Io { mask, .. } = record.what
            {
                union |= mask & EventMask::BACKEND_BITS;
            }
        }
        union
    }

    /// Marks `id` ready. Coalesces with an already-queued activation; defers
    /// to the next iteration when the drain is busy at a more important
    /// priority.
    pub(crate) fn activate(&mut self, id: EventId, res: EventMask, ncalls: u32) {
        let running_priority = self.running_priority;
        let Some(record) = self.events.get_mut(id) else {
            return;
        };
        if record.state.contains(EventState::ACTIVE)
            || record.state.contains(EventState::ACTIVE_LATER)
        {
            record.active_res |= res;
            record.ncalls = record.ncalls.saturating_add(ncalls);
            return;
        }
        record.active_res = res;
        record.ncalls = ncalls;
        let priority = record.priority;
        let internal = record.is_internal();
        match running_priority {
            // A lower-importance activation produced mid-drain waits for the
            // next iteration instead of starving the drain's tail.
            Some(running) if priority > running => {
                record.state.insert(EventState::ACTIVE_LATER);
                self.queues.push_later(id);
            }
            _ => {
                record.state.insert(EventState::ACTIVE);
                self.queues.push(priority, id);
            }
        }
        if !internal {
            self.active_count += 1;
        }
    }

    /// Moves everything parked *active-later* into the real queues. Runs at
    /// iteration start.
    pub(crate) fn promote_later(&mut self) {
        for id in self.queues.drain_later() {
            if let Some(record) = self.events.get_mut(id) {
                record.state.remove(EventState::ACTIVE_LATER);
                record.state.insert(EventState::ACTIVE);
                let priority = record.priority;
                self.queues.push(priority, id);
            }
        }
    }

    /// Fans one fd's readiness out to its interested events.
    pub(crate) fn activate_fd(&mut self, fd: RawFd, res: EventMask) {
        let Some(entry) = self.io_map.get(fd) else {
            return;
        };
        let interested: Vec<EventId> = entry.events.iter().copied().collect();
        for id in interested {
            let Some(record) = self.events.get(id) else {
                continue;
            };
            let EventWhat::Io { mask, .. } = record.what else {
                continue;
            };
            let overlap = res & (mask & EventMask::IO_BITS);
            if !overlap.is_empty() {
                self.activate(id, overlap, 1);
            }
        }
    }

    /// Fans drained signal deliveries out to the signal map.
    pub(crate) fn activate_signals(&mut self, deliveries: &[(i32, u32)]) {
        for &(signum, count) in deliveries {
            let interested: Vec<EventId> =
                self.signal_map.events_for(signum).to_vec();
            for id in interested {
                self.activate(id, EventMask::SIGNAL, count);
            }
        }
    }

    // ── Timeout scheduling ────────────────────────────────────────────────

    /// Installs `timeout` for `id`, replacing any existing deadline.
    pub(crate) fn schedule_timeout(
        &mut self,
        id: EventId,
        timeout: Timeout,
    ) -> EventResult<()> {
        self.unschedule_timeout(id);
        let now = self.clock.now();
        match timeout {
            Timeout::Duration(duration) => {
                let deadline = saturating_deadline(now, duration);
                let Some(record) = self.events.get_mut(id) else {
                    return Err(EventError::NotRegistered);
                };
                record.deadline = Some(deadline);
                record.state.insert(EventState::TIMEOUT);
                self.timer_heap.push(id, deadline, &mut self.events);
            }
            Timeout::Common(token) => {
                let queue_index = token.queue_index();
                let valid = self
                    .common_queues
                    .get(queue_index)
                    .is_some_and(|q| q.duration == token.duration());
                if !valid {
                    return Err(EventError::InvalidArg {
                        reason: "common timeout token does not belong to this base",
                    });
                }
                let deadline = saturating_deadline(now, token.duration());
                let Some(record) = self.events.get_mut(id) else {
                    return Err(EventError::NotRegistered);
                };
                record.deadline = Some(deadline);
                record.common_queue = Some(queue_index);
                record.state.insert(EventState::TIMEOUT);
                let queue = &mut self.common_queues[queue_index];
                queue.entries.push_back(id);
                // A previously empty queue has no armed trigger.
                if queue.entries.len() == 1 {
                    self.arm_common_trigger(queue_index);
                }
            }
        }
        Ok(())
    }

    /// Pulls `id` out of the heap or its common queue, if scheduled.
    pub(crate) fn unschedule_timeout(&mut self, id: EventId) {
        let Some(record) = self.events.get(id) else {
            return;
        };
        let heap_index = record.heap_index;
        let common_queue = record.common_queue;
        if let Some(position) = heap_index {
            self.timer_heap.remove(position, &mut self.events);
        }
        if let Some(queue_index) = common_queue {
            self.common_queues[queue_index].remove(id);
        }
        if let Some(record) = self.events.get_mut(id) {
            record.state.remove(EventState::TIMEOUT);
            record.deadline = None;
            record.common_queue = None;
        }
    }

    /// (Re-)points a common queue's trigger at its head's deadline.
    pub(crate) fn arm_common_trigger(&mut self, queue_index: usize) {
        let queue = &self.common_queues[queue_index];
        let trigger = queue.trigger;
        let head_deadline = queue
            .entries
            .front()
            .and_then(|&head| self.events.get(head))
            .and_then(|record| record.deadline);

        if let Some(record) = self.events.get(trigger)
            && let Some(position) = record.heap_index
        {
            self.timer_heap.remove(position, &mut self.events);
        }
        if let Some(record) = self.events.get_mut(trigger) {
            record.deadline = head_deadline;
            if head_deadline.is_some() {
                record.state.insert(EventState::TIMEOUT);
            } else {
                record.state.remove(EventState::TIMEOUT);
            }
        }
        if let Some(deadline) = head_deadline {
            self.timer_heap.push(trigger, deadline, &mut self.events);
        }
    }

    /// Activates every entry of a common queue that is due, then re-arms the
    /// trigger at the new head.
    fn fire_common_queue(&mut self, queue_index: usize, now: MonotonicInstant) {
        let mut due = Vec::new();
        {
            let queue = &mut self.common_queues[queue_index];
            while let Some(&head) = queue.entries.front() {
                let head_due = self
                    .events
                    .get(head)
                    .and_then(|record| record.deadline)
                    .is_some_and(|deadline| deadline <= now);
                if !head_due {
                    break;
                }
                queue.entries.pop_front();
                due.push(head);
            }
        }
        for id in due {
            if let Some(record) = self.events.get_mut(id) {
                record.state.remove(EventState::TIMEOUT);
                record.deadline = None;
                record.common_queue = None;
            }
            self.expire_event(id);
        }
        self.arm_common_trigger(queue_index);
    }

    /// Promotes every expired deadline (heap entries and common-queue heads)
    /// into the activation queues.
    pub(crate) fn promote_due_timers(&mut self) {
        let now = self.clock.now();
        loop {
            let Some(entry) = self.timer_heap.pop_due(now, &mut self.events) else {
                break;
            };
            let id = entry.id;
            let internal = match self.events.get_mut(id) {
                Some(record) => {
                    record.state.remove(EventState::TIMEOUT);
                    record.deadline = None;
                    record.internal
                }
                None => continue,
            };
            match internal {
                Some(InternalCb::CommonTimeoutTrigger(queue_index)) => {
                    self.fire_common_queue(queue_index, now);
                }
                Some(InternalCb::LoopExitTimer) => {
                    self.loop_exit = true;
                    self.events.remove(id);
                }
                _ => self.expire_event(id),
            }
        }
    }

    /// A user event's deadline fired: activate with `TIMEOUT`.
    fn expire_event(&mut self, id: EventId) {
        self.activate(id, EventMask::TIMEOUT, 1);
    }

    /// The deadline the next backend wait must respect.
    pub(crate) fn next_deadline(&self) -> Option<MonotonicInstant> {
        self.timer_heap.peek_deadline()
    }

    /// The clock ran backwards by `delta`: shift every pending deadline so
    /// remaining durations are preserved.
    pub(crate) fn rebase_deadlines(&mut self, delta: Duration) {
        self.timer_heap.rebase_back(delta);
        for (_, record) in self.events.iter_mut() {
            if let Some(deadline) = record.deadline {
                record.deadline = Some(deadline.rebase_back(delta));
            }
        }
    }

    // ── Integrity ─────────────────────────────────────────────────────────

    /// Walks the structures and panics on any referential-integrity breach.
    /// Debug tool; expensive.
    pub(crate) fn assert_ok(&self) {
        // Heap entries point at records that point back.
        for (position, entry) in self.timer_heap.iter().enumerate() {
            let record = self
                .events
                .get(entry.id)
                .expect("heap entry references a live record");
            assert_eq!(
                record.heap_index,
                Some(position),
                "record heap index mismatch"
            );
            assert!(
                record.state.contains(EventState::TIMEOUT),
                "heap entry without TIMEOUT state"
            );
            assert_eq!(record.deadline, Some(entry.deadline), "deadline mismatch");
        }

        // Common queues: membership links and non-decreasing deadlines.
        for (queue_index, queue) in self.common_queues.iter().enumerate() {
            let mut previous: Option<MonotonicInstant> = None;
            for &id in &queue.entries {
                let record = self
                    .events
                    .get(id)
                    .expect("common queue references a live record");
                assert_eq!(record.common_queue, Some(queue_index));
                let deadline =
                    record.deadline.expect("queued event carries a deadline");
                assert!(
                    previous.is_none_or(|p| p <= deadline),
                    "common queue deadlines must be non-decreasing"
                );
                previous = Some(deadline);
            }
        }

        // fd map: every listed event is an fd event on that fd; an event is
        // timed through exactly one structure.
        let mut registered = 0;
        let mut active = 0;
        for (id, record) in self.events.iter() {
            if record.state.contains(EventState::TIMEOUT) {
                assert!(
                    record.heap_index.is_some() ^ record.common_queue.is_some(),
                    "timed event must be in exactly one of heap/common queue"
                );
            }
            if record.state.contains(EventState::ACTIVE) {
                assert!(
                    self.queues.contains(record.priority, id),
                    "ACTIVE record missing from its queue"
                );
            }
            assert!(
                record.priority < self.queues.nqueues(),
                "priority within configured range"
            );
            if record.is_internal() {
                continue;
            }
            if record.state.contains(EventState::INSERTED) {
                registered += 1;
            }
            if record.state.contains(EventState::ACTIVE)
                || record.state.contains(EventState::ACTIVE_LATER)
            {
                active += 1;
            }
        }
        assert_eq!(registered, self.user_event_count, "registered count drift");
        assert_eq!(active, self.active_count, "active count drift");

        for (fd, entry) in self.io_map.iter() {
            for &id in &entry.events {
                let record = self
                    .events
                    .get(id)
                    .expect("fd map references a live record");
                match record.what {
                    EventWhat::Io { fd: event_fd, .. } => {
                        assert_eq!(event_fd, fd, "fd map bucket mismatch");
                    }
                    _ => panic!("non-fd event in fd map"),
                }
                assert!(record.state.contains(EventState::INSERTED));
            }
        }
    }
}

fn saturating_deadline(now: MonotonicInstant, duration: Duration) -> MonotonicInstant {
    now.checked_add(duration)
        .unwrap_or(MonotonicInstant::FAR_FUTURE)
}
