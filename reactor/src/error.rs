// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words epoll signum loopexit

//! The error taxonomy for the reactor crate. See [`EventError`].

use crate::backend::BackendKind;

/// Convenience alias used across the crate's public API.
pub type EventResult<T> = Result<T, EventError>;

/// Errors reported by the registration API and the loop driver.
///
/// Each variant carries a dedicated [diagnostic code] and, where a caller can
/// actually do something about it, actionable help text. Transient conditions
/// (`EINTR` during a backend wait, a clock observed running backwards) are
/// absorbed internally and never surface here.
///
/// [diagnostic code]: miette::Diagnostic::code
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum EventError {
    /// Contradictory registration arguments (e.g. a signal event combined with
    /// fd readiness bits, or an empty I/O interest mask).
    #[error("invalid event registration: {reason}")]
    #[diagnostic(code(r3bl_reactor::event::invalid_arg))]
    InvalidArg {
        /// What was contradictory about the request.
        reason: &'static str,
    },

    /// The operation requires a registered event.
    #[error("event is not registered with the base")]
    #[diagnostic(code(r3bl_reactor::event::not_registered))]
    NotRegistered,

    /// The OS rejected the subscription change for this fd/mask with a
    /// permanent error. The event is left unregistered.
    #[error("backend refused fd {fd} mask change")]
    #[diagnostic(
        code(r3bl_reactor::backend::refused),
        help(
            "The kernel rejected the subscription (closed fd, unsupported fd \
             type for this backend, or resource limits). Check the fd is open \
             and pollable."
        )
    )]
    BackendRefused {
        /// The fd whose subscription was refused.
        fd: i32,
        /// The OS error returned by the readiness syscall.
        #[source]
        source: rustix::io::Errno,
    },

    /// No backend survived config/env filtering, or every candidate failed to
    /// initialize.
    #[error("no usable event backend available")]
    #[diagnostic(
        code(r3bl_reactor::backend::none_available),
        help(
            "Every candidate backend was avoided (config avoid set, EVENT_NO* \
             env vars, required features) or failed to initialize. Relax the \
             required feature set or unset the EVENT_NO* variables."
        )
    )]
    NoBackendAvailable,

    /// The backend's wait failed with a non-transient error; the loop exited.
    #[error("backend dispatch failed")]
    #[diagnostic(code(r3bl_reactor::backend::dispatch))]
    DispatchFailed {
        /// The OS error returned by the readiness syscall.
        #[source]
        source: rustix::io::Errno,
    },

    /// `run_loop` was called on a base whose loop is already running.
    #[error("event loop is already running on this base")]
    #[diagnostic(
        code(r3bl_reactor::base::reentrant_loop),
        help(
            "A base's loop is single-entry: calling run_loop from inside a \
             callback, or from a second thread while another thread drives \
             the same base, is rejected. Use a second base for a second loop."
        )
    )]
    ReentrantLoop,

    /// `EDGE_TRIGGERED` was requested against a backend without the feature.
    #[error("{backend} backend cannot provide edge-triggered readiness")]
    #[diagnostic(
        code(r3bl_reactor::backend::edge_unsupported),
        help(
            "Drop EDGE_TRIGGERED from the mask, or require the edge-triggered \
             feature in the base config so a capable backend is selected."
        )
    )]
    EdgeTriggeredUnsupported {
        /// The backend bound to this base.
        backend: BackendKind,
    },

    /// Another base already owns the signal number.
    #[error("signal {signum} is already claimed by another event base")]
    #[diagnostic(
        code(r3bl_reactor::signal::in_use),
        help(
            "Exactly one base at a time may own a given signal number. Route \
             all events for this signal through the base that registered it \
             first."
        )
    )]
    SignalInUse {
        /// The contested signal number.
        signum: i32,
    },

    /// Creating the self-pipe, eventfd, or installing the signal handler
    /// failed.
    #[error("failed to set up internal notification plumbing")]
    #[diagnostic(code(r3bl_reactor::base::notify_setup))]
    NotifySetup {
        /// The underlying OS error.
        #[source]
        source: rustix::io::Errno,
    },

    /// Event priority outside `[0, nactivequeues)`.
    #[error("priority {priority} out of range (base has {nqueues} queues)")]
    #[diagnostic(code(r3bl_reactor::event::priority_out_of_range))]
    PriorityOutOfRange {
        /// The rejected priority.
        priority: usize,
        /// The number of activation queues configured on the base.
        nqueues: usize,
    },

    /// `priority_init` after events were already added.
    #[error("priority_init is only legal before any event is added")]
    #[diagnostic(code(r3bl_reactor::base::priority_init_too_late))]
    PriorityInitTooLate,

    /// The owning [`EventBase`] was dropped while this handle was alive.
    ///
    /// [`EventBase`]: crate::base::EventBase
    #[error("the owning event base no longer exists")]
    #[diagnostic(code(r3bl_reactor::event::base_gone))]
    BaseGone,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_their_context() {
        let err = EventError::BackendRefused {
            fd: 7,
            source: rustix::io::Errno::BADF,
        };
        assert_eq!(err.to_string(), "backend refused fd 7 mask change");

        let err = EventError::PriorityOutOfRange {
            priority: 9,
            nqueues: 4,
        };
        assert_eq!(
            err.to_string(),
            "priority 9 out of range (base has 4 queues)"
        );
    }
}
