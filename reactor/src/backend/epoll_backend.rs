// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words epoll fdinfo EEXIST ENOENT EBADF EPOLLERR EPOLLHUP RDHUP

//! The edge-capable Linux backend over `epoll`. See [`EpollBackend`].

use super::{
    Backend, BackendFeatures, BackendKind, Changelist, DispatchError, ReadySink,
    timeout_to_timespec,
};
use crate::event::EventMask;
use rustix::event::epoll;
use rustix::io::Errno;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd, RawFd};
use std::time::Duration;

/// How many readiness records one wait can harvest before the buffer grows.
const INITIAL_EVENT_CAPACITY: usize = 64;

/// `epoll_wait`-based readiness with O(1) subscription changes and optional
/// changelist batching.
///
/// The per-fd scratch byte caches the mask the kernel currently knows, which
/// makes `add`/`del` self-correcting: the kernel op (`ADD` vs `MOD` vs `DEL`)
/// is chosen from the cache, and an `EEXIST`/`ENOENT` answer re-syncs it.
///
/// With batching enabled (the `epoll_use_changelist` config flag), `add`/`del`
/// only record deltas; [`dispatch`] applies the merged batch right before the
/// wait, collapsing add/del churn between iterations into at most one kernel
/// call per fd.
///
/// [`dispatch`]: Backend::dispatch
pub(crate) struct EpollBackend {
    epfd: OwnedFd,
    events_buf: Vec<epoll::Event>,
    batch: Option<Changelist>,
}

// `epoll::Event`'s `data` union carries a `*mut c_void` variant for pointer
// provenance, which makes the type non-`Send` by default. This backend only
// ever stores a `u64` fd in that field (see `event_data`/`event.data.u64()`
// above), never a real pointer, so sending it across threads is safe.
unsafe impl Send for EpollBackend {}

impl EpollBackend {
    pub(crate) fn new(use_changelist: bool) -> Result<Self, Errno> {
        let epfd = epoll::create(epoll::CreateFlags::CLOEXEC)?;
        Ok(Self {
            epfd,
            events_buf: Vec::with_capacity(INITIAL_EVENT_CAPACITY),
            batch: use_changelist.then(Changelist::default),
        })
    }

    /// One kernel call moving `fd` from subscription `old` to `new`.
    fn apply(&self, fd: RawFd, old: EventMask, new: EventMask) -> Result<(), Errno> {
        // Safety: registration handed us a raw fd the caller promised stays
        // open while registered; it is only borrowed for this syscall.
        let source = unsafe { BorrowedFd::borrow_raw(fd) };
        let was_in = old.intersects(EventMask::IO_BITS);
        let wants_in = new.intersects(EventMask::IO_BITS);
        match (was_in, wants_in) {
            (false, true) => {
                match epoll::add(&self.epfd, source, event_data(fd), event_flags(new)) {
                    // Kernel already knew the fd: re-sync with a modify.
                    Err(Errno::EXIST) => {
                        epoll::modify(&self.epfd, source, event_data(fd), event_flags(new))
                    }
                    result => result,
                }
            }
            (true, true) => {
                match epoll::modify(&self.epfd, source, event_data(fd), event_flags(new)) {
                    Err(Errno::NOENT) => {
                        epoll::add(&self.epfd, source, event_data(fd), event_flags(new))
                    }
                    result => result,
                }
            }
            (true, false) => match epoll::delete(&self.epfd, source) {
                // The fd may have been closed out from under us; removal is
                // then already done.
                Err(Errno::NOENT | Errno::BADF) => Ok(()),
                result => result,
            },
            (false, false) => Ok(()),
        }
    }

    fn flush_batch(&mut self) {
        let Some(mut batch) = self.batch.take() else {
            return;
        };
        for change in batch.drain() {
            if let Err(errno) = self.apply(change.fd, change.old, change.new) {
                // Refusals surface synchronously on the unbatched path; here
                // the registration is already in place, so log and move on,
                // as the wait itself will report the fd if it is truly bad.
                tracing::warn!(
                    fd = change.fd,
                    old = ?change.old,
                    new = ?change.new,
                    %errno,
                    "epoll changelist entry refused"
                );
            }
        }
        self.batch = Some(batch);
    }
}

impl Backend for EpollBackend {
    fn kind(&self) -> BackendKind { BackendKind::Epoll }

    fn features(&self) -> BackendFeatures {
        BackendFeatures::EDGE_TRIGGERED
            | BackendFeatures::O1_ADD
            | BackendFeatures::REINIT_AFTER_FORK
    }

    fn fdinfo_len(&self) -> usize { 1 }

    fn add(
        &mut self,
        fd: RawFd,
        old: EventMask,
        new: EventMask,
        fdinfo: &mut [u8],
    ) -> Result<(), Errno> {
        // Trust the scratch byte over the caller's view of `old`: it tracks
        // what the kernel actually acknowledged.
        let known = EventMask::from_bits_truncate(fdinfo[0]);
        let old = if known.is_empty() { old } else { known };
        if let Some(batch) = &mut self.batch {
            batch.record(fd, old, new);
        } else {
            self.apply(fd, old, new)?;
        }
        fdinfo[0] = new.bits();
        Ok(())
    }

    fn del(
        &mut self,
        fd: RawFd,
        old: EventMask,
        drop: EventMask,
        fdinfo: &mut [u8],
    ) -> Result<(), Errno> {
        let known = EventMask::from_bits_truncate(fdinfo[0]);
        let old = if known.is_empty() { old } else { known };
        let remaining = old.difference(drop);
        if let Some(batch) = &mut self.batch {
            batch.record(fd, old, remaining);
        } else {
            self.apply(fd, old, remaining)?;
        }
        fdinfo[0] = remaining.bits();
        Ok(())
    }

    fn dispatch(
        &mut self,
        timeout: Option<Duration>,
        sink: &mut ReadySink,
    ) -> Result<(), DispatchError> {
        self.flush_batch();

        self.events_buf.clear();
        let timespec = timeout_to_timespec(timeout);
        epoll::wait(
            self.epfd.as_fd(),
            rustix::buffer::spare_capacity(&mut self.events_buf),
            timespec.as_ref(),
        )
        .map_err(DispatchError::from_errno)?;

        let saturated = self.events_buf.len() == self.events_buf.capacity();
        for event in &self.events_buf {
            let fd = event.data.u64() as RawFd;
            let res = flags_to_mask(event.flags);
            if !res.is_empty() {
                sink.io_ready(fd, res);
            }
        }
        // A full harvest means more fds may be ready than fit; grow so the
        // next wait sees them all in one call.
        if saturated {
            self.events_buf.reserve(self.events_buf.capacity());
        }
        Ok(())
    }
}

fn event_data(fd: RawFd) -> epoll::EventData {
    epoll::EventData::new_u64(fd as u64)
}

fn event_flags(mask: EventMask) -> epoll::EventFlags {
    let mut flags = epoll::EventFlags::empty();
    if mask.contains(EventMask::READ) {
        flags |= epoll::EventFlags::IN;
    }
    if mask.contains(EventMask::WRITE) {
        flags |= epoll::EventFlags::OUT;
    }
    if mask.contains(EventMask::EDGE_TRIGGERED) {
        flags |= epoll::EventFlags::ET;
    }
    flags
}

fn flags_to_mask(flags: epoll::EventFlags) -> EventMask {
    let mut mask = EventMask::NONE;
    if flags.intersects(epoll::EventFlags::IN | epoll::EventFlags::RDHUP) {
        mask |= EventMask::READ;
    }
    if flags.intersects(epoll::EventFlags::OUT) {
        mask |= EventMask::WRITE;
    }
    // Error and hangup wake both directions; the fd map narrows the result to
    // each event's actual interest.
    if flags.intersects(epoll::EventFlags::ERR | epoll::EventFlags::HUP) {
        mask |= EventMask::READ | EventMask::WRITE;
    }
    mask
}
