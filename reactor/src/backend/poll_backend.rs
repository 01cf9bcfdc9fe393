// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words pollfd revents POLLERR POLLHUP POLLNVAL

//! The portable level-triggered backend over `poll(2)`. See [`PollBackend`].

use super::{
    Backend, BackendFeatures, BackendKind, DispatchError, ReadySink,
    timeout_to_timespec,
};
use crate::event::EventMask;
use rustix::event::{PollFd, PollFlags};
use rustix::io::Errno;
use std::collections::HashMap;
use std::os::fd::{BorrowedFd, RawFd};
use std::time::Duration;

/// `poll(2)`-based readiness.
///
/// Keeps a compact interest array (the shape the syscall wants) plus an fd →
/// slot index so subscription changes stay O(1); a removal back-fills the hole
/// with the tail entry. Subscription changes are pure bookkeeping here - the
/// kernel sees the whole array on every wait, which is what makes this
/// backend level-triggered and edge-incapable.
#[derive(Default)]
pub(crate) struct PollBackend {
    interest: Vec<(RawFd, EventMask)>,
    slot_of: HashMap<RawFd, usize>,
}

impl PollBackend {
    pub(crate) fn new() -> Result<Self, Errno> { Ok(Self::default()) }

    fn set_interest(&mut self, fd: RawFd, mask: EventMask) {
        let mask = mask & EventMask::IO_BITS;
        match self.slot_of.get(&fd) {
            Some(&slot) if mask.is_empty() => {
                self.interest.swap_remove(slot);
                self.slot_of.remove(&fd);
                if let Some(&(moved_fd, _)) = self.interest.get(slot) {
                    self.slot_of.insert(moved_fd, slot);
                }
            }
            Some(&slot) => self.interest[slot].1 = mask,
            None if mask.is_empty() => {}
            None => {
                self.slot_of.insert(fd, self.interest.len());
                self.interest.push((fd, mask));
            }
        }
    }
}

impl Backend for PollBackend {
    fn kind(&self) -> BackendKind { BackendKind::Poll }

    fn features(&self) -> BackendFeatures { BackendFeatures::NONE }

    fn add(
        &mut self,
        fd: RawFd,
        _old: EventMask,
        new: EventMask,
        _fdinfo: &mut [u8],
    ) -> Result<(), Errno> {
        self.set_interest(fd, new);
        Ok(())
    }

    fn del(
        &mut self,
        fd: RawFd,
        old: EventMask,
        drop: EventMask,
        _fdinfo: &mut [u8],
    ) -> Result<(), Errno> {
        self.set_interest(fd, old.difference(drop));
        Ok(())
    }

    fn dispatch(
        &mut self,
        timeout: Option<Duration>,
        sink: &mut ReadySink,
    ) -> Result<(), DispatchError> {
        let mut poll_fds: Vec<PollFd<'_>> = self
            .interest
            .iter()
            .map(|&(fd, mask)| {
                // Safety: registration handed us raw fds the caller promised
                // stay open while registered; borrowed only for this wait.
                let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
                PollFd::from_borrowed_fd(borrowed, poll_flags(mask))
            })
            .collect();

        let timespec = timeout_to_timespec(timeout);
        let n_ready = rustix::event::poll(&mut poll_fds, timespec.as_ref())
            .map_err(DispatchError::from_errno)?;
        if n_ready == 0 {
            return Ok(());
        }

        for (slot, poll_fd) in poll_fds.iter().enumerate() {
            let res = revents_to_mask(poll_fd.revents());
            if !res.is_empty() {
                sink.io_ready(self.interest[slot].0, res);
            }
        }
        Ok(())
    }
}

fn poll_flags(mask: EventMask) -> PollFlags {
    let mut flags = PollFlags::empty();
    if mask.contains(EventMask::READ) {
        flags |= PollFlags::IN;
    }
    if mask.contains(EventMask::WRITE) {
        flags |= PollFlags::OUT;
    }
    flags
}

fn revents_to_mask(revents: PollFlags) -> EventMask {
    let mut mask = EventMask::NONE;
    if revents.intersects(PollFlags::IN | PollFlags::HUP) {
        mask |= EventMask::READ;
    }
    if revents.intersects(PollFlags::OUT) {
        mask |= EventMask::WRITE;
    }
    if revents.intersects(PollFlags::ERR | PollFlags::NVAL) {
        mask |= EventMask::READ | EventMask::WRITE;
    }
    mask
}
