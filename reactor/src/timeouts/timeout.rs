// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The user-facing timeout argument of `add`. See [`Timeout`].

use super::CommonTimeout;
use std::time::Duration;

/// How long a registration waits before firing with `TIMEOUT`.
///
/// Deadlines are always absolute internally: a `Timeout` is resolved against
/// the loop's cached monotonic `now` at `add` time (and again on each re-arm
/// of a persistent event).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// A private duration: the event gets its own slot in the timer heap.
    Duration(Duration),
    /// A shared duration bucket: the event joins the token's FIFO queue and
    /// the heap carries one trigger for the whole population.
    Common(CommonTimeout),
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self { Self::Duration(d) }
}

impl From<CommonTimeout> for Timeout {
    fn from(token: CommonTimeout) -> Self { Self::Common(token) }
}

impl Timeout {
    /// The relative duration this timeout stands for.
    #[must_use]
    pub fn duration(&self) -> Duration {
        match self {
            Self::Duration(d) => *d,
            Self::Common(token) => token.duration(),
        }
    }
}
