// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Interest and result bits shared by the registration API and the backends.
//! See [`EventMask`].

use bitflags::bitflags;

bitflags! {
    /// A small bit set describing what an event waits for (interest) or why
    /// it fired (result).
    ///
    /// The same type serves both roles, exactly as in the wire-level contract
    /// with backends: `READ`/`WRITE`/`SIGNAL` appear on both sides, `PERSIST`
    /// and `EDGE_TRIGGERED` are registration-only modifiers, and `TIMEOUT` is
    /// result-only (a deadline expiry is never *registered* through the mask -
    /// it travels through the timer heap).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventMask: u8 {
        /// Result-only: the event's deadline expired.
        const TIMEOUT = 0x01;
        /// The fd became readable.
        const READ = 0x02;
        /// The fd became writable.
        const WRITE = 0x04;
        /// The signal was delivered.
        const SIGNAL = 0x08;
        /// Keep the event registered after its callback runs.
        const PERSIST = 0x10;
        /// Request edge-triggered readiness from the backend.
        const EDGE_TRIGGERED = 0x20;
    }
}

impl EventMask {
    /// The empty mask.
    pub const NONE: Self = Self::empty();

    /// The fd direction bits.
    pub(crate) const IO_BITS: Self = Self::READ.union(Self::WRITE);

    /// The bits a backend subscribes to the kernel: fd direction plus the
    /// edge-trigger modifier.
    pub(crate) const BACKEND_BITS: Self = Self::IO_BITS.union(Self::EDGE_TRIGGERED);
}

impl Default for EventMask {
    fn default() -> Self { Self::empty() }
}
