// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words ncalls

//! What a callback receives when its event fires. See [`Activation`].

use super::EventMask;

/// The payload handed to an event callback.
///
/// `res` says *why* the event fired: some union of `READ`, `WRITE`, `SIGNAL`,
/// `TIMEOUT`. Activations of the same event that pile up before the callback
/// gets to run are coalesced into one delivery; `ncalls` carries the count
/// (signal events use this to surface how many deliveries landed between two
/// loop iterations; everything else normally sees `1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activation {
    /// The condition(s) that fired.
    pub res: EventMask,
    /// How many deliveries this single callback invocation stands for.
    pub ncalls: u32,
}

/// The user callback attached to an event.
///
/// Invoked on whichever thread drives the base's loop, with the base's
/// registration lock released - the callback may freely call `add`, `del`,
/// `active`, or `defer` on the same base.
pub type EventCallback = Box<dyn FnMut(Activation) + Send + 'static>;
