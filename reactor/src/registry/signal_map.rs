// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words signum signums

//! The signal registration table: signum → interested events.

use crate::event::EventId;
use smallvec::SmallVec;

/// signum → interest list. Signal numbers are small and dense, so this is
/// always the vector variant; delivery de-duplication happens at the
/// self-pipe, not here.
#[derive(Default)]
pub(crate) struct SignalMap {
    slots: Vec<SmallVec<[EventId; 2]>>,
}

impl SignalMap {
    pub(crate) fn add(&mut self, signum: i32, id: EventId) {
        let index = slot_index(signum);
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, SmallVec::new);
        }
        self.slots[index].push(id);
    }

    /// Returns `true` when this was the last event interested in `signum`.
    pub(crate) fn remove(&mut self, signum: i32, id: EventId) -> bool {
        let index = slot_index(signum);
        let Some(list) = self.slots.get_mut(index) else {
            return false;
        };
        list.retain(|entry| *entry != id);
        list.is_empty()
    }

    pub(crate) fn events_for(&self, signum: i32) -> &[EventId] {
        self.slots
            .get(slot_index(signum))
            .map_or(&[], SmallVec::as_slice)
    }

    /// Signums with at least one interested event.
    pub(crate) fn registered_signums(&self) -> impl Iterator<Item = i32> + '_ {
        self.slots.iter().enumerate().filter_map(|(signum, list)| {
            (!list.is_empty()).then_some(signum as i32)
        })
    }
}

fn slot_index(signum: i32) -> usize {
    debug_assert!(signum > 0, "signal events require a positive signum");
    usize::try_from(signum).unwrap_or(0)
}
