// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Lifecycle bits of an event record. Internal to the base.

use bitflags::bitflags;

bitflags! {
    /// Which collections an event currently sits in.
    ///
    /// The bits are not mutually exclusive: a registered event can be active
    /// at the same time (its callback is queued while its registration
    /// stands). An event with no bits set is *initialized* - created but
    /// detached.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct EventState: u8 {
        /// Linked in the master list and the fd/signal map (registered).
        const INSERTED = 0x01;
        /// Queued in an activation queue.
        const ACTIVE = 0x02;
        /// Has a deadline in the timer heap or a common-timeout queue.
        const TIMEOUT = 0x04;
        /// Owned by the base itself; excluded from the "no events left"
        /// check.
        const INTERNAL = 0x08;
        /// Parked for activation at the next iteration.
        const ACTIVE_LATER = 0x20;
    }
}

impl EventState {
    pub(crate) const fn initialized() -> Self { Self::empty() }

    /// `true` when the event is in no collection at all.
    pub(crate) const fn is_detached(self) -> bool {
        self.difference(Self::INTERNAL).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_and_active_coexist() {
        let mut state = EventState::initialized();
        state.insert(EventState::INSERTED);
        state.insert(EventState::ACTIVE);
        assert!(state.contains(EventState::INSERTED));
        assert!(state.contains(EventState::ACTIVE));
        state.remove(EventState::ACTIVE);
        assert!(state.contains(EventState::INSERTED));
        assert!(!state.contains(EventState::ACTIVE));
    }

    #[test]
    fn internal_bit_does_not_count_as_attached() {
        let mut state = EventState::initialized();
        state.insert(EventState::INTERNAL);
        assert!(state.is_detached());
        state.insert(EventState::TIMEOUT);
        assert!(!state.is_detached());
    }
}
