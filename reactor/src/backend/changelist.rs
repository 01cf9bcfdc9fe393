// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words fdinfo

//! Batched subscription deltas. See [`Changelist`].

use crate::event::EventMask;
use std::os::fd::RawFd;

/// One fd's accumulated subscription change: the mask the kernel knew before
/// the batch started, and the mask it should know next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FdChange {
    pub(crate) fd: RawFd,
    pub(crate) old: EventMask,
    pub(crate) new: EventMask,
}

/// Subscription deltas accumulated between dispatches.
///
/// Two users: backends that amortize kernel calls by applying all changes at
/// dispatch time (`epoll_use_changelist`), and the base itself, which parks
/// deltas here when a mutation arrives from a non-owner thread while the
/// backend wait is in flight.
///
/// Successive changes to the same fd merge: the recorded `old` stays the mask
/// from before the first change, `new` tracks the latest target. An fd whose
/// merged delta ends where it started drops out entirely.
#[derive(Default)]
pub(crate) struct Changelist {
    changes: Vec<FdChange>,
}

impl Changelist {
    pub(crate) fn record(&mut self, fd: RawFd, old: EventMask, new: EventMask) {
        if let Some(existing) = self.changes.iter_mut().find(|c| c.fd == fd) {
            existing.new = new;
            if existing.new == existing.old {
                self.changes.retain(|c| c.fd != fd);
            }
            return;
        }
        if old != new {
            self.changes.push(FdChange { fd, old, new });
        }
    }

    pub(crate) fn is_empty(&self) -> bool { self.changes.is_empty() }

    pub(crate) fn len(&self) -> usize { self.changes.len() }

    pub(crate) fn drain(&mut self) -> std::vec::Drain<'_, FdChange> {
        self.changes.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const R: EventMask = EventMask::READ;
    const W: EventMask = EventMask::WRITE;

    #[test]
    fn merges_changes_per_fd() {
        let mut list = Changelist::default();
        list.record(3, EventMask::NONE, R);
        list.record(3, R, R | W);
        list.record(4, EventMask::NONE, W);
        assert_eq!(list.len(), 2);
        let changes: Vec<_> = list.drain().collect();
        assert_eq!(
            changes[0],
            FdChange {
                fd: 3,
                old: EventMask::NONE,
                new: R | W
            }
        );
        assert_eq!(
            changes[1],
            FdChange {
                fd: 4,
                old: EventMask::NONE,
                new: W
            }
        );
    }

    #[test]
    fn add_then_del_cancels_out() {
        let mut list = Changelist::default();
        list.record(7, EventMask::NONE, R);
        list.record(7, R, EventMask::NONE);
        assert!(list.is_empty());
    }

    #[test]
    fn no_op_changes_are_not_recorded() {
        let mut list = Changelist::default();
        list.record(7, R, R);
        assert!(list.is_empty());
    }
}
