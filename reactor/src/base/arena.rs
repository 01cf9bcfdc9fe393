// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words ncalls

//! The event arena: every record a base owns, with stable generational
//! identity. See [`EventArena`] and [`EventRecord`].

use crate::event::{EventCallback, EventId, EventMask, EventState, EventWhat};
use crate::timeouts::{MonotonicInstant, Timeout};

/// Callbacks the base runs for its own plumbing events. These execute inline
/// with the registration lock held (they only mutate base state), unlike user
/// callbacks which run unlocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InternalCb {
    /// Drain the signal self-pipe and fan deliveries out to the signal map.
    SignalPipe,
    /// Drain the thread-wakeup channel.
    Notifier,
    /// A common-timeout queue's trigger fired: activate the due heads and
    /// re-arm.
    CommonTimeoutTrigger(usize),
    /// The `loopexit(after)` one-shot: set the termination flag.
    LoopExitTimer,
}

/// One event's full registration record.
///
/// The intrusive links of the original design (heap index, queue membership,
/// map buckets) become plain indices here; the collections hold [`EventId`]s
/// and each record knows where it sits, so arbitrary removal stays cheap.
pub(crate) struct EventRecord {
    pub(crate) what: EventWhat,
    pub(crate) state: EventState,
    pub(crate) priority: usize,
    /// `None` for internal events, and transiently while the callback runs
    /// (it is taken out so the lock can be released around the call).
    pub(crate) callback: Option<EventCallback>,
    pub(crate) internal: Option<InternalCb>,

    /// The timeout requested at `add` time; persistent events re-arm from it.
    pub(crate) requested_timeout: Option<Timeout>,
    pub(crate) deadline: Option<MonotonicInstant>,
    /// Position in the timer heap, maintained by the heap itself.
    pub(crate) heap_index: Option<usize>,
    /// Which common-timeout queue holds this event, if any.
    pub(crate) common_queue: Option<usize>,

    /// Accumulated result mask while the event sits in an activation queue.
    pub(crate) active_res: EventMask,
    /// Coalesced call count surfaced to the callback as `ncalls`.
    pub(crate) ncalls: u32,
}

impl EventRecord {
    pub(crate) fn new(what: EventWhat, callback: Option<EventCallback>) -> Self {
        Self {
            what,
            state: EventState::initialized(),
            priority: 0,
            callback,
            internal: None,
            requested_timeout: None,
            deadline: None,
            heap_index: None,
            common_queue: None,
            active_res: EventMask::NONE,
            ncalls: 0,
        }
    }

    pub(crate) fn is_internal(&self) -> bool { self.internal.is_some() }

    pub(crate) fn is_registered(&self) -> bool {
        self.state.contains(EventState::INSERTED)
    }
}

struct Slot {
    generation: u32,
    record: Option<EventRecord>,
}

/// Slab of event records with generational ids.
///
/// This is the master event list: iteration order is slot order, which is
/// stable enough for integrity walks and fork-reinit; free slots are recycled
/// with a bumped generation so stale ids never alias.
#[derive(Default)]
pub(crate) struct EventArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl EventArena {
    pub(crate) fn insert(&mut self, record: EventRecord) -> EventId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                debug_assert!(slot.record.is_none());
                slot.record = Some(record);
                EventId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = u32::try_from(self.slots.len())
                    .expect("event arena exceeds u32 indices");
                self.slots.push(Slot {
                    generation: 0,
                    record: Some(record),
                });
                EventId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    pub(crate) fn get(&self, id: EventId) -> Option<&EventRecord> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.record.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: EventId) -> Option<&mut EventRecord> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.record.as_mut()
    }

    pub(crate) fn remove(&mut self, id: EventId) -> Option<EventRecord> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let record = slot.record.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(record)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (EventId, &EventRecord)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.record.as_ref().map(|record| {
                (
                    EventId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    record,
                )
            })
        })
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (EventId, &mut EventRecord)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.record.as_mut().map(move |record| {
                (
                    EventId {
                        index: index as u32,
                        generation,
                    },
                    record,
                )
            })
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

/// The heap writes entry positions straight into the records.
impl crate::timeouts::HeapIndexStore for EventArena {
    fn set_heap_index(&mut self, id: EventId, index: Option<usize>) {
        if let Some(record) = self.get_mut(id) {
            record.heap_index = index;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn timer_record() -> EventRecord {
        EventRecord::new(EventWhat::timer(), Some(Box::new(|_| {})))
    }

    #[test]
    fn stale_ids_never_alias_recycled_slots() {
        let mut arena = EventArena::default();
        let first = arena.insert(timer_record());
        arena.remove(first).unwrap();

        let second = arena.insert(timer_record());
        assert_eq!(first.index, second.index, "slot is recycled");
        assert_ne!(first.generation, second.generation);
        assert!(arena.get(first).is_none());
        assert!(arena.get(second).is_some());
    }

    #[test]
    fn len_tracks_live_records() {
        let mut arena = EventArena::default();
        let a = arena.insert(timer_record());
        let b = arena.insert(timer_record());
        assert_eq!(arena.len(), 2);
        arena.remove(a).unwrap();
        assert_eq!(arena.len(), 1);
        assert_eq!(arena.iter().count(), 1);
        arena.remove(b).unwrap();
        assert_eq!(arena.len(), 0);
    }
}
