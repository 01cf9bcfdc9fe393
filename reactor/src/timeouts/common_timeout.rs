// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words timeval usec tv_sec tv_usec

//! Common-timeout buckets: O(1) amortized timer management for large
//! populations of identically-timed events. See [`CommonTimeout`] and
//! [`CommonTimeoutQueue`].

use crate::event::EventId;
use std::collections::VecDeque;
use std::time::Duration;

/// Sentinel in the top nibble of the microsecond field marking a timeval as a
/// common-timeout token rather than a literal duration.
const MAGIC: u32 = 0x5000_0000;
const MAGIC_MASK: u32 = 0xF000_0000;
/// The queue index rides in the byte below the sentinel nibble.
const INDEX_MASK: u32 = 0x0FF0_0000;
const INDEX_SHIFT: u32 = 20;
/// Mask recovering the real microseconds from an encoded field.
const MICROSECONDS_MASK: u32 = 0x000F_FFFF;

/// Hard cap implied by the index byte.
pub(crate) const MAX_COMMON_TIMEOUTS: usize = 256;

/// An opaque registration token for a shared timeout duration.
///
/// Obtained from [`EventBase::init_common_timeout`] and passed back through
/// [`Timeout::Common`]. The token is a timeval in disguise: the seconds field
/// carries the duration's seconds, and the microsecond field carries the real
/// microseconds under [`MICROSECONDS_MASK`] with a sentinel nibble and the
/// queue index packed above them. Events added with the same token share one
/// FIFO bucket and a single slot in the timer heap, instead of one heap entry
/// each.
///
/// [`EventBase::init_common_timeout`]: crate::base::EventBase::init_common_timeout
/// [`Timeout::Common`]: crate::base::Timeout::Common
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonTimeout {
    tv_sec: u64,
    tv_usec: u32,
}

impl CommonTimeout {
    /// Packs `duration` and the owning queue's index into a token.
    ///
    /// The microsecond component always fits: it is < 1 000 000, well under
    /// [`MICROSECONDS_MASK`].
    pub(crate) fn encode(queue_index: usize, duration: Duration) -> Self {
        debug_assert!(queue_index < MAX_COMMON_TIMEOUTS);
        let index_bits =
            (u32::try_from(queue_index).unwrap_or(0) << INDEX_SHIFT) & INDEX_MASK;
        Self {
            tv_sec: duration.as_secs(),
            tv_usec: MAGIC | index_bits | (duration.subsec_micros() & MICROSECONDS_MASK),
        }
    }

    /// The shared duration this token stands for.
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::new(self.tv_sec, (self.tv_usec & MICROSECONDS_MASK) * 1_000)
    }

    pub(crate) fn queue_index(&self) -> usize {
        ((self.tv_usec & INDEX_MASK) >> INDEX_SHIFT) as usize
    }

    /// Whether a raw microsecond field carries the sentinel nibble.
    pub(crate) fn is_marked(tv_usec: u32) -> bool {
        tv_usec & MAGIC_MASK == MAGIC
    }
}

/// One FIFO bucket of events sharing a duration.
///
/// Entries are appended on `add`, so their deadlines are non-decreasing; the
/// head always carries the earliest. A single internal *trigger event* sits in
/// the timer heap at the head's deadline; when it fires, the loop activates
/// every entry that is due and re-arms the trigger at the new head.
pub(crate) struct CommonTimeoutQueue {
    pub(crate) duration: Duration,
    pub(crate) entries: VecDeque<EventId>,
    /// The internal timer event representing this queue in the heap.
    pub(crate) trigger: EventId,
}

impl CommonTimeoutQueue {
    pub(crate) fn new(duration: Duration, trigger: EventId) -> Self {
        Self {
            duration,
            entries: VecDeque::new(),
            trigger,
        }
    }

    /// Removes an arbitrary entry (`del` path). The FIFO is only ever scanned
    /// here; the hot paths (append, pop-front) are O(1).
    pub(crate) fn remove(&mut self, id: EventId) -> bool {
        match self.entries.iter().position(|entry| *entry == id) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }
}
