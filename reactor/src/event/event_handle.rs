// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words ncalls signum

//! The registration handle users hold. See [`Event`].

use super::{Activation, EventId, EventMask, EventState, EventWhat};
use crate::base::{BaseCore, EventBase, EventRecord};
use crate::error::{EventError, EventResult};
use crate::timeouts::Timeout;
use std::sync::{Arc, MutexGuard, Weak};
use std::time::Duration;

/// A single registration: what to wait on, the callback to run, and the
/// handle through which the registration is added, removed, and inspected.
///
/// The handle owns its registration: dropping it deletes the event from the
/// base (blocking, like [`del`], if the callback is mid-flight on another
/// thread). The back-reference to the base is weak - an event never keeps its
/// base alive.
///
/// # Lifecycle
///
/// Created *initialized* (detached); [`add`] registers it; activation queues
/// its callback; after the callback it is registered again (`PERSIST`) or
/// back to initialized (one-shot); [`del`] detaches it at any point.
///
/// [`add`]: Self::add
/// [`del`]: Self::del
pub struct Event {
    core: Weak<BaseCore>,
    id: EventId,
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event").field("id", &self.id).finish()
    }
}

impl Event {
    /// Creates a detached event on `base`.
    ///
    /// # Errors
    ///
    /// [`EventError::InvalidArg`] for contradictory registrations (signal
    /// combined with fd bits, empty fd interest, negative fd).
    pub fn new(
        base: &EventBase,
        what: EventWhat,
        callback: impl FnMut(Activation) + Send + 'static,
    ) -> EventResult<Self> {
        what.validate()?;
        let core = &base.core;
        let mut state = core.lock_state();
        let mut record = EventRecord::new(what, Some(Box::new(callback)));
        record.priority = state.default_priority();
        let id = state.events.insert(record);
        Ok(Self {
            core: Arc::downgrade(core),
            id,
        })
    }

    /// Re-initializes this handle in place: new base, payload, callback.
    /// Legal only while detached (not registered, not active).
    ///
    /// # Errors
    ///
    /// [`EventError::InvalidArg`] when still attached or on a contradictory
    /// payload.
    pub fn assign(
        &mut self,
        base: &EventBase,
        what: EventWhat,
        callback: impl FnMut(Activation) + Send + 'static,
    ) -> EventResult<()> {
        what.validate()?;
        if let Some(core) = self.core.upgrade() {
            let mut state = core.lock_state();
            let detached = state
                .events
                .get(self.id)
                .is_none_or(|record| record.state.is_detached());
            if !detached {
                return Err(EventError::InvalidArg {
                    reason: "assign requires a detached (initialized) event",
                });
            }
            state.events.remove(self.id);
        }

        let core = &base.core;
        let mut state = core.lock_state();
        let mut record = EventRecord::new(what, Some(Box::new(callback)));
        record.priority = state.default_priority();
        self.id = state.events.insert(record);
        self.core = Arc::downgrade(core);
        Ok(())
    }

    /// Registers the event with no timeout. Re-adding an already registered
    /// event is idempotent (and clears any previous timeout).
    ///
    /// # Errors
    ///
    /// [`EventError::BackendRefused`] when the kernel rejects the fd/mask (the
    /// event is left unregistered), [`EventError::EdgeTriggeredUnsupported`],
    /// [`EventError::SignalInUse`], [`EventError::BaseGone`].
    pub fn add(&self) -> EventResult<()> { self.add_inner(None) }

    /// Registers the event with a deadline of `timeout` from now. For
    /// `PERSIST` events the timeout re-arms (sliding) on every activation.
    ///
    /// # Errors
    ///
    /// See [`add`](Self::add); additionally [`EventError::InvalidArg`] for a
    /// common-timeout token from another base.
    pub fn add_with_timeout(&self, timeout: impl Into<Timeout>) -> EventResult<()> {
        self.add_inner(Some(timeout.into()))
    }

    fn add_inner(&self, timeout: Option<Timeout>) -> EventResult<()> {
        let core = self.upgrade()?;
        let mut state = core.lock_state();
        core.register_event(&mut state, self.id, timeout)
    }

    /// Removes the event from every structure it sits in. Safe (a no-op) on a
    /// non-registered event.
    ///
    /// Calling from a thread other than the one running the loop while this
    /// event's callback executes blocks until the callback returns - the one
    /// blocking operation this API exposes.
    ///
    /// # Errors
    ///
    /// [`EventError::BaseGone`].
    pub fn del(&self) -> EventResult<()> {
        let core = self.upgrade()?;
        let mut state = self.wait_out_own_callback(&core);
        core.unregister_event(&mut state, self.id);
        Ok(())
    }

    /// Forces activation as if the registered condition fired with result
    /// `res`; `count` simulates that many coalesced deliveries. Permitted on
    /// non-registered events (a one-shot activation).
    ///
    /// # Errors
    ///
    /// [`EventError::BaseGone`].
    pub fn active(&self, res: EventMask, count: u32) -> EventResult<()> {
        let core = self.upgrade()?;
        let mut state = core.lock_state();
        state.activate(self.id, res, count.max(1));
        core.wake_loop(&state);
        Ok(())
    }

    /// Which of `mask`'s conditions this event is registered or queued for:
    /// registration bits while added, `TIMEOUT` while a deadline is armed,
    /// and the pending result while activated.
    ///
    /// # Errors
    ///
    /// [`EventError::BaseGone`].
    pub fn pending(&self, mask: EventMask) -> EventResult<EventMask> {
        let core = self.upgrade()?;
        let state = core.lock_state();
        let Some(record) = state.events.get(self.id) else {
            return Ok(EventMask::NONE);
        };
        let mut flags = EventMask::NONE;
        if record.state.contains(EventState::INSERTED) {
            flags |= record.what.registration_mask()
                & (EventMask::READ | EventMask::WRITE | EventMask::SIGNAL);
        }
        if record.state.contains(EventState::TIMEOUT) {
            flags |= EventMask::TIMEOUT;
        }
        if record.state.contains(EventState::ACTIVE)
            || record.state.contains(EventState::ACTIVE_LATER)
        {
            flags |= record.active_res;
        }
        Ok(flags & mask)
    }

    /// Time left until the armed deadline fires, if one is armed.
    ///
    /// # Errors
    ///
    /// [`EventError::BaseGone`].
    pub fn remaining_timeout(&self) -> EventResult<Option<Duration>> {
        let core = self.upgrade()?;
        let mut state = core.lock_state();
        let Some(deadline) = state.events.get(self.id).and_then(|r| r.deadline)
        else {
            return Ok(None);
        };
        let now = state.clock.now();
        Ok(Some(deadline.duration_since(now)))
    }

    /// Sets the activation priority (0 = most important). Legal only on
    /// non-registered, non-active events.
    ///
    /// # Errors
    ///
    /// [`EventError::PriorityOutOfRange`], [`EventError::InvalidArg`] while
    /// attached, [`EventError::BaseGone`].
    pub fn set_priority(&self, priority: usize) -> EventResult<()> {
        let core = self.upgrade()?;
        let mut state = core.lock_state();
        let nqueues = state.queues.nqueues();
        if priority >= nqueues {
            return Err(EventError::PriorityOutOfRange { priority, nqueues });
        }
        let Some(record) = state.events.get_mut(self.id) else {
            return Err(EventError::NotRegistered);
        };
        if !record.state.is_detached() {
            return Err(EventError::InvalidArg {
                reason: "priority can only change while the event is detached",
            });
        }
        record.priority = priority;
        Ok(())
    }

    fn upgrade(&self) -> EventResult<Arc<BaseCore>> {
        self.core.upgrade().ok_or(EventError::BaseGone)
    }

    /// Blocks (off the owner thread) until this event's in-flight callback
    /// finishes, returning with the state lock held.
    fn wait_out_own_callback<'a>(
        &self,
        core: &'a BaseCore,
    ) -> MutexGuard<'a, crate::base::BaseState> {
        let mut state = core.lock_state();
        while state.current_event == Some(self.id)
            && state.owner != Some(std::thread::current().id())
        {
            state.current_event_waiters += 1;
            state = core
                .cond
                .wait(state)
                .expect("reactor state lock poisoned");
        }
        state
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        let mut state = self.wait_out_own_callback(&core);
        core.unregister_event(&mut state, self.id);
        state.events.remove(self.id);
    }
}
