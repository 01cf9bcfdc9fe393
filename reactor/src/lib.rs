// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words epoll kqueue signum ncalls

//! # r3bl_reactor
//!
//! A portable readiness reactor: fd, signal, and timer multiplexing onto
//! user-supplied callbacks, with identical semantics across the underlying OS
//! mechanisms (`epoll`, `poll`, `select`).
//!
//! The pieces, leaves first:
//!
//! 1. [`timeouts`] - the cached monotonic clock, the timer heap, and
//!    common-timeout buckets for large populations of identically-timed
//!    events.
//! 2. [`registry`] - the fd and signal registration tables.
//! 3. [`backend`] - the pluggable poller contract and its epoll/poll/select
//!    implementations over [`rustix`].
//! 4. [`signals`] - process-wide signum ownership plus the self-pipe that
//!    turns deliveries into fd readability.
//! 5. [`event`] - [`Event`], the registration handle.
//! 6. [`base`] - [`EventBase`], the reactor that owns all of the above and
//!    drives the loop.
//!
//! # Quick start
//!
//! ```no_run
//! use r3bl_reactor::{Event, EventBase, EventMask, EventWhat, LoopFlags};
//! use std::time::Duration;
//!
//! # fn main() -> miette::Result<()> {
//! let base = EventBase::new()?;
//!
//! let tick = Event::new(
//!     &base,
//!     EventWhat::periodic_timer(),
//!     |activation| println!("tick: {:?}", activation.res),
//! )?;
//! tick.add_with_timeout(Duration::from_millis(100))?;
//!
//! base.run_loop(LoopFlags::ONCE)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Threading model
//!
//! Callbacks are single-threaded cooperative: at most one callback per base
//! runs at a time, on the thread driving [`EventBase::run_loop`].
//! Registration calls are safe from any thread; a mutation arriving while the
//! loop is blocked in the kernel preempts the wait through the internal
//! wakeup channel. Cross-thread [`Event::del`] against a running callback
//! blocks until that callback returns - the single blocking operation in the
//! API.

pub mod backend;
pub mod base;
pub mod error;
pub mod event;
pub mod registry;
pub mod signals;
pub mod timeouts;

pub use backend::{BackendFeatures, BackendKind};
pub use base::{ConfigFlags, EventBase, EventConfig, LoopExit, LoopFlags};
pub use error::{EventError, EventResult};
pub use event::{Activation, Event, EventCallback, EventMask, EventWhat};
pub use timeouts::{CommonTimeout, Timeout};
