// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words signum

//! The tagged payload of an event registration. See [`EventWhat`].

use super::EventMask;
use crate::error::EventError;
use std::os::fd::RawFd;

/// What an event waits on.
///
/// The original design overlaid fd and signal fields in a union and told them
/// apart by mask bits; here the variants are disjoint by construction and the
/// cross-kind invariants are enforced once, in [`validate`].
///
/// [`validate`]: Self::validate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventWhat {
    /// Readiness on a file descriptor. `mask` holds `READ` and/or `WRITE`,
    /// optionally `PERSIST` and `EDGE_TRIGGERED`.
    Io {
        /// The descriptor to watch. Must stay open while registered.
        fd: RawFd,
        /// Interest bits plus registration modifiers.
        mask: EventMask,
    },
    /// Delivery of a signal. Always level-style; `PERSIST` is implied by
    /// passing it in [`Event::new`]'s mask position via [`Self::signal`].
    ///
    /// [`Event::new`]: crate::event::Event::new
    Signal {
        /// The signal number.
        signum: i32,
        /// Either `NONE` or `PERSIST`.
        mask: EventMask,
    },
    /// A pure timer: no resource, fires only on its deadline.
    Timer {
        /// Either `NONE` or `PERSIST`.
        mask: EventMask,
    },
}

impl EventWhat {
    /// Shorthand for an fd registration.
    #[must_use]
    pub const fn io(fd: RawFd, mask: EventMask) -> Self { Self::Io { fd, mask } }

    /// Shorthand for a signal registration.
    #[must_use]
    pub const fn signal(signum: i32, mask: EventMask) -> Self {
        Self::Signal { signum, mask }
    }

    /// Shorthand for a one-shot timer.
    #[must_use]
    pub const fn timer() -> Self {
        Self::Timer {
            mask: EventMask::NONE,
        }
    }

    /// Shorthand for a periodic (persisting) timer.
    #[must_use]
    pub const fn periodic_timer() -> Self {
        Self::Timer {
            mask: EventMask::PERSIST,
        }
    }

    /// Rejects cross-kind mask combinations at construction time.
    pub(crate) fn validate(&self) -> Result<(), EventError> {
        let invalid = |reason| Err(EventError::InvalidArg { reason });
        match *self {
            Self::Io { fd, mask } => {
                if fd < 0 {
                    return invalid("fd event requires a non-negative fd");
                }
                if !mask.intersects(EventMask::IO_BITS) {
                    return invalid("fd event requires READ and/or WRITE");
                }
                if mask.intersects(EventMask::SIGNAL | EventMask::TIMEOUT) {
                    return invalid("fd event cannot carry SIGNAL or TIMEOUT bits");
                }
            }
            Self::Signal { signum, mask } => {
                if signum <= 0 {
                    return invalid("signal event requires a positive signum");
                }
                if !mask.difference(EventMask::PERSIST).is_empty() {
                    return invalid("signal event mask may only carry PERSIST");
                }
            }
            Self::Timer { mask } => {
                if !mask.difference(EventMask::PERSIST).is_empty() {
                    return invalid("timer event mask may only carry PERSIST");
                }
            }
        }
        Ok(())
    }

    /// The full registration mask (kind bit folded in), as reported by
    /// `pending`.
    #[must_use]
    pub(crate) fn registration_mask(&self) -> EventMask {
        match *self {
            Self::Io { mask, .. } => mask,
            Self::Signal { mask, .. } => mask | EventMask::SIGNAL,
            Self::Timer { mask } => mask,
        }
    }

    /// Whether the event survives its own callback.
    #[must_use]
    pub(crate) fn is_persistent(&self) -> bool {
        self.registration_mask().contains(EventMask::PERSIST)
    }
}
