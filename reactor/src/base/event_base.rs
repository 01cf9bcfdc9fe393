// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words signum fdinfo loopexit loopbreak

//! The reactor: registration tables, backend, and loop in one owner. See
//! [`EventBase`].

use super::{
    BaseState, ConfigFlags, DeferredCb, EventArena, EventConfig, EventRecord,
    InternalCb, LoopExit, LoopFlags, MAX_PRIORITIES, Notifier, run_loop,
};
use crate::backend::{Backend, BackendFeatures, BackendKind};
use crate::error::{EventError, EventResult};
use crate::event::{EventId, EventMask, EventState, EventWhat};
use crate::registry::FdEntry;
use crate::signals::{SignalPipe, claim_signal, release_signal};
use crate::timeouts::{
    CommonTimeout, MAX_COMMON_TIMEOUTS, MonotonicClock, OsClock, Timeout,
};
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, TryLockError};
use std::time::Duration;

static NEXT_BASE_ID: AtomicU64 = AtomicU64::new(1);

/// Everything shared between [`EventBase`] handles, the loop, and event
/// handles.
///
/// Lock discipline: `state` serializes every registration mutation; `backend`
/// is held by the loop across the kernel wait (and briefly by owner-thread
/// mutations applying subscription deltas). A mutation that cannot take the
/// backend lock without blocking parks its delta on the state's changelist
/// and wakes the loop instead - blocking on `backend` from a mutator would
/// mean waiting out the entire kernel wait.
pub(crate) struct BaseCore {
    pub(crate) state: Mutex<BaseState>,
    /// Signals completion of the currently running callback to cross-thread
    /// `del` waiters.
    pub(crate) cond: Condvar,
    pub(crate) backend: Mutex<Box<dyn Backend>>,
    pub(crate) notifier: Option<Notifier>,
    pub(crate) backend_kind: BackendKind,
    pub(crate) backend_features: BackendFeatures,
    pub(crate) fdinfo_len: usize,
    pub(crate) config_flags: ConfigFlags,
    /// Distinguishes bases in the process-wide signal registry.
    pub(crate) base_id: u64,
}

impl BaseCore {
    /// The state lock can only be poisoned by a panic inside this crate
    /// itself (user callbacks run unlocked and unwind-caught), so treat
    /// poisoning as the bug it is.
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, BaseState> {
        self.state.lock().expect("reactor state lock poisoned")
    }

    pub(crate) fn is_owner_thread(&self, state: &BaseState) -> bool {
        state.owner == Some(std::thread::current().id())
    }

    /// Preempts an in-flight backend wait when a mutation from a non-owner
    /// thread needs the loop to notice it.
    pub(crate) fn wake_loop(&self, state: &BaseState) {
        if state.running_loop
            && !self.is_owner_thread(state)
            && let Some(notifier) = &self.notifier
        {
            notifier.notify();
        }
    }

    /// Moves the kernel subscription for `fd` from `old` to `new`, now if the
    /// backend is free, or parked on the changelist (plus a wakeup) when the
    /// loop is mid-wait.
    pub(crate) fn apply_backend_change(
        &self,
        state: &mut BaseState,
        fd: RawFd,
        old: EventMask,
        new: EventMask,
    ) -> EventResult<()> {
        if old == new {
            return Ok(());
        }
        match self.backend.try_lock() {
            Ok(mut backend) => {
                let mut scratch = [0u8; 8];
                let fdinfo = match state.io_map.get_mut(fd) {
                    Some(entry) => &mut entry.fdinfo[..],
                    None => &mut scratch[..self.fdinfo_len],
                };
                let result = if new.contains(old) {
                    backend.add(fd, old, new, fdinfo)
                } else {
                    backend.del(fd, old, old.difference(new), fdinfo)
                };
                result.map_err(|source| EventError::BackendRefused { fd, source })
            }
            Err(TryLockError::WouldBlock) => {
                state.pending_changes.record(fd, old, new);
                if let Some(notifier) = &self.notifier {
                    notifier.notify();
                }
                Ok(())
            }
            Err(TryLockError::Poisoned(_)) => {
                panic!("reactor backend lock poisoned")
            }
        }
    }

    /// Applies deltas parked by non-owner threads. Runs on the loop thread
    /// with both locks held, right before the wait.
    pub(crate) fn apply_pending_changes(
        &self,
        state: &mut BaseState,
        backend: &mut dyn Backend,
    ) {
        if state.pending_changes.is_empty() {
            return;
        }
        let changes: Vec<_> = state.pending_changes.drain().collect();
        for change in changes {
            let mut scratch = [0u8; 8];
            let fdinfo = match state.io_map.get_mut(change.fd) {
                Some(entry) => &mut entry.fdinfo[..],
                None => &mut scratch[..self.fdinfo_len],
            };
            let result = if change.new.contains(change.old) {
                backend.add(change.fd, change.old, change.new, fdinfo)
            } else {
                backend.del(
                    change.fd,
                    change.old,
                    change.old.difference(change.new),
                    fdinfo,
                )
            };
            if let Err(errno) = result {
                // Refusal can only be surfaced synchronously; for a parked
                // delta the registration already stands, so log and drop the
                // kernel-side interest.
                tracing::warn!(
                    fd = change.fd,
                    old = ?change.old,
                    new = ?change.new,
                    %errno,
                    "deferred backend change refused"
                );
            }
        }
    }

    /// The `add` operation: links `id` into the maps (idempotently) and
    /// installs/replaces its timeout.
    pub(crate) fn register_event(
        &self,
        state: &mut BaseState,
        id: EventId,
        timeout: Option<Timeout>,
    ) -> EventResult<()> {
        // Validate a common-timeout token before touching any structure, so
        // failure leaves the event exactly as it was.
        if let Some(Timeout::Common(token)) = timeout {
            let valid = state
                .common_queues
                .get(token.queue_index())
                .is_some_and(|q| q.duration == token.duration());
            if !valid {
                return Err(EventError::InvalidArg {
                    reason: "common timeout token does not belong to this base",
                });
            }
        }

        let record = state.events.get(id).ok_or(EventError::NotRegistered)?;
        let what = record.what;
        let internal = record.is_internal();
        let already_registered = record.is_registered();

        if !already_registered {
            match what {
                EventWhat::Io { fd, mask } => {
                    if mask.contains(EventMask::EDGE_TRIGGERED)
                        && !self
                            .backend_features
                            .contains(BackendFeatures::EDGE_TRIGGERED)
                    {
                        return Err(EventError::EdgeTriggeredUnsupported {
                            backend: self.backend_kind,
                        });
                    }
                    let old = state.io_union_mask(fd);
                    let entry = state.io_map.ensure_entry(fd, self.fdinfo_len);
                    entry.events.push(id);
                    let new = old | (mask & EventMask::BACKEND_BITS);
                    if let Err(error) = self.apply_backend_change(state, fd, old, new)
                    {
                        // Roll the append back; the event stays unregistered.
                        if let Some(entry) = state.io_map.get_mut(fd) {
                            entry.events.retain(|entry_id| *entry_id != id);
                        }
                        state.io_map.remove_if_empty(fd);
                        return Err(error);
                    }
                }
                EventWhat::Signal { signum, .. } => {
                    self.ensure_signal_plumbing(state)?;
                    if state.signal_map.events_for(signum).is_empty() {
                        let write_fd = state
                            .signal_pipe
                            .as_ref()
                            .expect("signal plumbing just ensured")
                            .write_fd();
                        claim_signal(signum, self.base_id, write_fd)?;
                    }
                    state.signal_map.add(signum, id);
                }
                EventWhat::Timer { .. } => {}
            }
            let record = state.events.get_mut(id).expect("record is live");
            record.state.insert(EventState::INSERTED);
            if !internal {
                state.user_event_count += 1;
            }
        }

        if let Some(record) = state.events.get_mut(id) {
            record.requested_timeout = timeout;
        }
        match timeout {
            Some(timeout) => state.schedule_timeout(id, timeout)?,
            None => state.unschedule_timeout(id),
        }

        self.wake_loop(state);
        Ok(())
    }

    /// The `del` operation body (the cross-thread wait happens in callers
    /// that own the guard). No-op when the event is not registered.
    pub(crate) fn unregister_event(&self, state: &mut BaseState, id: EventId) {
        let Some(record) = state.events.get(id) else {
            return;
        };
        let what = record.what;
        let internal = record.is_internal();
        let priority = record.priority;
        let was_inserted = record.state.contains(EventState::INSERTED);
        let was_active = record.state.contains(EventState::ACTIVE);
        let was_later = record.state.contains(EventState::ACTIVE_LATER);

        if was_inserted {
            match what {
                EventWhat::Io { fd, .. } => {
                    let old = state.io_union_mask(fd);
                    if let Some(entry) = state.io_map.get_mut(fd) {
                        entry.events.retain(|entry_id| *entry_id != id);
                    }
                    let new = state.io_union_mask(fd);
                    if let Err(error) = self.apply_backend_change(state, fd, old, new)
                    {
                        // The registration is coming out regardless; a kernel
                        // refusal here usually means the fd is already gone.
                        tracing::warn!(fd, %error, "backend del refused");
                    }
                    state.io_map.remove_if_empty(fd);
                }
                EventWhat::Signal { signum, .. } => {
                    if state.signal_map.remove(signum, id) {
                        release_signal(signum, self.base_id);
                    }
                }
                EventWhat::Timer { .. } => {}
            }
        }

        state.unschedule_timeout(id);

        if let Some(record) = state.events.get_mut(id) {
            if was_inserted {
                record.state.remove(EventState::INSERTED);
            }
            record.state.remove(EventState::ACTIVE);
            record.state.remove(EventState::ACTIVE_LATER);
            record.active_res = EventMask::NONE;
            record.ncalls = 0;
        }
        if was_active {
            state.queues.remove(priority, id);
        }
        if was_later {
            state.queues.remove_later(id);
        }
        if !internal {
            if was_inserted {
                state.user_event_count -= 1;
            }
            if was_active || was_later {
                state.active_count -= 1;
            }
        }

        self.wake_loop(state);
    }

    /// Lazily creates the signal self-pipe and its internal read event.
    fn ensure_signal_plumbing(&self, state: &mut BaseState) -> EventResult<()> {
        if state.signal_pipe.is_some() {
            return Ok(());
        }
        let pipe = SignalPipe::new()
            .map_err(|source| EventError::NotifySetup { source })?;
        let read_fd = pipe.read_fd();
        state.signal_pipe = Some(pipe);

        let id = insert_internal_io_event(state, read_fd, InternalCb::SignalPipe);
        if let Err(error) = self.register_event(state, id, None) {
            state.events.remove(id);
            state.signal_pipe = None;
            return Err(error);
        }
        state.signal_pipe_event = Some(id);
        Ok(())
    }
}

impl Drop for BaseCore {
    fn drop(&mut self) {
        // The process-wide registry still has handlers writing this base's
        // raw pipe fd; unregister them before the pipe closes.
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let signums: Vec<i32> = state.signal_map.registered_signums().collect();
        for signum in signums {
            release_signal(signum, self.base_id);
        }
    }
}

fn insert_internal_io_event(
    state: &mut BaseState,
    fd: RawFd,
    internal: InternalCb,
) -> EventId {
    let mut record = EventRecord::new(
        EventWhat::io(fd, EventMask::READ | EventMask::PERSIST),
        None,
    );
    record.internal = Some(internal);
    record.state.insert(EventState::INTERNAL);
    record.priority = 0;
    state.events.insert(record)
}

/// The reactor: owns the registration tables, the timer heap, the activation
/// queues, one bound backend, and the loop that ties them together.
///
/// Cloning is cheap and shares the underlying base; a base may be driven by
/// exactly one thread at a time (a second `run_loop` is rejected), while
/// registration calls are safe from any thread.
#[derive(Clone)]
pub struct EventBase {
    pub(crate) core: Arc<BaseCore>,
}

impl std::fmt::Debug for EventBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBase")
            .field("backend", &self.core.backend_kind)
            .field("base_id", &self.core.base_id)
            .finish_non_exhaustive()
    }
}

impl EventBase {
    /// A base with default configuration.
    ///
    /// # Errors
    ///
    /// Fails with [`EventError::NoBackendAvailable`] when config/env filtering
    /// eliminates every backend, or with the underlying OS error when
    /// notification plumbing cannot be created.
    pub fn new() -> EventResult<Self> {
        Self::with_config(EventConfig::default())
    }

    /// A base built from an explicit [`EventConfig`].
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn with_config(config: EventConfig) -> EventResult<Self> {
        let request = crate::backend::ProbeRequest {
            avoid: &config.avoid,
            require_features: config.require_features,
            ignore_env: config.ignore_env(),
            epoll_use_changelist: config
                .flags
                .contains(ConfigFlags::EPOLL_USE_CHANGELIST),
        };
        let backend = crate::backend::bind_backend(&request)?;
        let backend_kind = backend.kind();
        let backend_features = backend.features();
        let fdinfo_len = backend.fdinfo_len();
        tracing::debug!(%backend_kind, "event base bound backend");

        let clock = MonotonicClock::new(
            Box::new(OsClock::new(config.precise_timer())),
            !config.flags.contains(ConfigFlags::NO_CACHE_TIME),
        );
        let state = BaseState::new(
            clock,
            backend_features.contains(BackendFeatures::FDS_DISJOINT_FROM_INTS),
        );

        let notifier = if config.flags.contains(ConfigFlags::NO_LOCK) {
            None
        } else {
            Some(
                Notifier::new()
                    .map_err(|source| EventError::NotifySetup { source })?,
            )
        };

        let core = Arc::new(BaseCore {
            state: Mutex::new(state),
            cond: Condvar::new(),
            backend: Mutex::new(backend),
            notifier,
            backend_kind,
            backend_features,
            fdinfo_len,
            config_flags: config.flags,
            base_id: NEXT_BASE_ID.fetch_add(1, Ordering::Relaxed),
        });

        // Register the wakeup channel as an ordinary (internal) read event.
        if let Some(notifier) = &core.notifier {
            let read_fd = notifier.read_fd();
            let mut state = core.lock_state();
            let id = insert_internal_io_event(&mut state, read_fd, InternalCb::Notifier);
            core.register_event(&mut state, id, None)?;
            state.notify_event = Some(id);
        }

        Ok(Self { core })
    }

    /// Runs the loop until termination. See [`LoopFlags`] for the `once`,
    /// `nonblock`, and `no-exit-on-empty` variations.
    ///
    /// # Errors
    ///
    /// [`EventError::ReentrantLoop`] when the loop is already running;
    /// [`EventError::DispatchFailed`] when the backend fails permanently.
    pub fn run_loop(&self, flags: LoopFlags) -> EventResult<LoopExit> {
        run_loop(&self.core, flags)
    }

    /// Equivalent to `run_loop` with no flags: process events until none
    /// remain (or a termination request).
    ///
    /// # Errors
    ///
    /// See [`run_loop`](Self::run_loop).
    pub fn dispatch(&self) -> EventResult<LoopExit> {
        self.run_loop(LoopFlags::NONE)
    }

    /// Asks the loop to exit after it finishes the current iteration's
    /// callbacks; with `after`, the request arms itself on a timer first.
    ///
    /// # Errors
    ///
    /// Propagates timeout-scheduling failures for the `after` form.
    pub fn loopexit(&self, after: Option<Duration>) -> EventResult<()> {
        let core = &self.core;
        let mut state = core.lock_state();
        // Both forms arm an internal timer (immediate for `None`): the flag
        // is only raised when the timer fires, so a loopexit issued before
        // `run_loop` terminates the *next* run rather than evaporating.
        let delay = after.unwrap_or(Duration::ZERO);
        let mut record = EventRecord::new(EventWhat::timer(), None);
        record.internal = Some(InternalCb::LoopExitTimer);
        record.state.insert(EventState::INTERNAL);
        record.priority = 0;
        let id = state.events.insert(record);
        if let Err(error) =
            core.register_event(&mut state, id, Some(Timeout::Duration(delay)))
        {
            state.events.remove(id);
            return Err(error);
        }
        Ok(())
    }

    /// Terminates the loop at the next activation-queue drain boundary: once
    /// set, no further callback runs in the current iteration.
    pub fn loopbreak(&self) {
        let mut state = self.core.lock_state();
        state.loop_break = true;
        self.core.wake_loop(&state);
    }

    /// Sets the number of activation queues. Legal only before any event has
    /// been added (and outside the loop).
    ///
    /// # Errors
    ///
    /// [`EventError::PriorityInitTooLate`] once events exist;
    /// [`EventError::PriorityOutOfRange`] for a zero or oversized count.
    pub fn priority_init(&self, nqueues: usize) -> EventResult<()> {
        if nqueues == 0 || nqueues > MAX_PRIORITIES {
            return Err(EventError::PriorityOutOfRange {
                priority: nqueues,
                nqueues: MAX_PRIORITIES,
            });
        }
        let mut state = self.core.lock_state();
        if state.running_loop
            || state.user_event_count > 0
            || state.active_count > 0
        {
            return Err(EventError::PriorityInitTooLate);
        }
        state.queues.resize(nqueues);
        Ok(())
    }

    /// Registers `duration` as a common timeout and returns its token.
    /// Calling again with an equal duration returns the existing token.
    ///
    /// # Errors
    ///
    /// [`EventError::InvalidArg`] once the bucket table is full.
    pub fn init_common_timeout(&self, duration: Duration) -> EventResult<CommonTimeout> {
        // Tokens carry microsecond granularity; normalize before comparing.
        let duration = Duration::new(duration.as_secs(), duration.subsec_micros() * 1_000);
        let mut state = self.core.lock_state();
        if let Some(index) = state
            .common_queues
            .iter()
            .position(|queue| queue.duration == duration)
        {
            return Ok(CommonTimeout::encode(index, duration));
        }
        if state.common_queues.len() >= MAX_COMMON_TIMEOUTS {
            return Err(EventError::InvalidArg {
                reason: "common timeout table is full",
            });
        }

        let mut record = EventRecord::new(EventWhat::timer(), None);
        record.internal = Some(InternalCb::CommonTimeoutTrigger(
            state.common_queues.len(),
        ));
        record.state.insert(EventState::INTERNAL);
        record.priority = 0;
        let trigger = state.events.insert(record);

        let index = state.common_queues.len();
        state
            .common_queues
            .push(crate::timeouts::CommonTimeoutQueue::new(duration, trigger));
        Ok(CommonTimeout::encode(index, duration))
    }

    /// Schedules `callback` to run after the current activation drain,
    /// before the next backend wait. Callbacks deferred from within a
    /// deferred callback wait for the next iteration.
    pub fn defer(&self, callback: DeferredCb) {
        let mut state = self.core.lock_state();
        state.deferred.push_back(callback);
        self.core.wake_loop(&state);
    }

    /// Post-`fork` recovery: rebuilds backend state and re-registers every
    /// fd interest from the registration tables. Required when the bound
    /// backend advertises [`BackendFeatures::REINIT_AFTER_FORK`].
    ///
    /// # Errors
    ///
    /// Propagates backend construction failure.
    pub fn reinit(&self) -> EventResult<()> {
        let core = &self.core;
        let mut backend = core
            .backend
            .lock()
            .expect("reactor backend lock poisoned");
        let mut state = core.lock_state();

        let request = crate::backend::ProbeRequest {
            avoid: &[],
            require_features: BackendFeatures::NONE,
            ignore_env: true,
            epoll_use_changelist: core
                .config_flags
                .contains(ConfigFlags::EPOLL_USE_CHANGELIST),
        };
        *backend = rebind_same_kind(core.backend_kind, &request)?;

        let BaseState { io_map, events, .. } = &mut *state;
        for (fd, entry) in io_map.iter_mut() {
            let mask = union_of(entry, events);
            entry.fdinfo.fill(0);
            if mask.is_empty() {
                continue;
            }
            if let Err(errno) = backend.add(fd, EventMask::NONE, mask, &mut entry.fdinfo)
            {
                tracing::warn!(fd, %errno, "reinit failed to re-register fd");
            }
        }
        Ok(())
    }

    /// The readiness method this base is bound to.
    #[must_use]
    pub fn backend_kind(&self) -> BackendKind { self.core.backend_kind }

    /// The feature bits of the bound backend.
    #[must_use]
    pub fn backend_features(&self) -> BackendFeatures { self.core.backend_features }

    /// Registered (non-internal) events.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.core.lock_state().user_event_count
    }

    /// Events currently queued for activation.
    #[must_use]
    pub fn active_count(&self) -> usize { self.core.lock_state().active_count }

    /// Keeps the loop alive without an fd/signal/timer registration, for
    /// event-like work tracked outside the base.
    pub fn add_virtual(&self) {
        self.core.lock_state().virtual_count += 1;
    }

    /// Releases one [`add_virtual`](Self::add_virtual) hold.
    pub fn del_virtual(&self) {
        let mut state = self.core.lock_state();
        state.virtual_count = state.virtual_count.saturating_sub(1);
        self.core.wake_loop(&state);
    }

    /// Referential-integrity walk over the internal structures; panics on
    /// breach. Debug builds only - expensive and only useful to tests.
    #[cfg(debug_assertions)]
    pub fn assert_ok(&self) {
        self.core.lock_state().assert_ok();
    }
}

fn union_of(entry: &FdEntry, events: &EventArena) -> EventMask {
    let mut union = EventMask::NONE;
    for &id in &entry.events {
        if let Some(record) = events.get(id)
            && let EventWhat::Io { mask, .. } = record.what
        {
            union |= mask & EventMask::BACKEND_BITS;
        }
    }
    union
}

fn rebind_same_kind(
    kind: BackendKind,
    request: &crate::backend::ProbeRequest<'_>,
) -> EventResult<Box<dyn Backend>> {
    // Reinit must come back on the same method: a different backend could
    // change feature guarantees events were registered under.
    let avoid: Vec<BackendKind> = [BackendKind::Epoll, BackendKind::Poll, BackendKind::Select]
        .into_iter()
        .filter(|candidate| *candidate != kind)
        .collect();
    let request = crate::backend::ProbeRequest {
        avoid: &avoid,
        require_features: request.require_features,
        ignore_env: request.ignore_env,
        epoll_use_changelist: request.epoll_use_changelist,
    };
    crate::backend::bind_backend(&request)
}
