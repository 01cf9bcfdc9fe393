// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words nfds readfds writefds exceptfds

//! The `select(2)` fallback backend. See [`SelectBackend`].

use super::{
    Backend, BackendFeatures, BackendKind, DispatchError, ReadySink,
    timeout_to_timespec,
};
use crate::event::EventMask;
use rustix::event::{FdSetElement, FdSetIter, fd_set_insert, fd_set_num_elements};
use rustix::io::Errno;
use std::collections::BTreeMap;
use std::os::fd::RawFd;
use std::time::Duration;

/// `select(2)`-based readiness, the lowest common denominator.
///
/// Interest lives in an ordered map (the largest key yields `nfds` for free);
/// the bit sets handed to the kernel are rebuilt from it on every wait, since
/// `select` clobbers its arguments. rustix's allocated fd sets are not bound
/// by `FD_SETSIZE`, so unlike the classic libc interface this fallback has no
/// 1024-fd ceiling.
#[derive(Default)]
pub(crate) struct SelectBackend {
    interest: BTreeMap<RawFd, EventMask>,
    read_set: Vec<FdSetElement>,
    write_set: Vec<FdSetElement>,
}

impl SelectBackend {
    pub(crate) fn new() -> Result<Self, Errno> { Ok(Self::default()) }

    fn nfds(&self) -> RawFd {
        self.interest.keys().next_back().map_or(0, |fd| fd + 1)
    }
}

impl Backend for SelectBackend {
    fn kind(&self) -> BackendKind { BackendKind::Select }

    fn features(&self) -> BackendFeatures { BackendFeatures::NONE }

    fn add(
        &mut self,
        fd: RawFd,
        _old: EventMask,
        new: EventMask,
        _fdinfo: &mut [u8],
    ) -> Result<(), Errno> {
        let mask = new & EventMask::IO_BITS;
        if mask.is_empty() {
            self.interest.remove(&fd);
        } else {
            self.interest.insert(fd, mask);
        }
        Ok(())
    }

    fn del(
        &mut self,
        fd: RawFd,
        old: EventMask,
        drop: EventMask,
        _fdinfo: &mut [u8],
    ) -> Result<(), Errno> {
        let remaining = old.difference(drop) & EventMask::IO_BITS;
        if remaining.is_empty() {
            self.interest.remove(&fd);
        } else {
            self.interest.insert(fd, remaining);
        }
        Ok(())
    }

    fn dispatch(
        &mut self,
        timeout: Option<Duration>,
        sink: &mut ReadySink,
    ) -> Result<(), DispatchError> {
        let nfds = self.nfds();
        let set_len = fd_set_num_elements(self.interest.len(), nfds);
        self.read_set.clear();
        self.read_set.resize(set_len, FdSetElement::default());
        self.write_set.clear();
        self.write_set.resize(set_len, FdSetElement::default());

        for (&fd, &mask) in &self.interest {
            if mask.contains(EventMask::READ) {
                fd_set_insert(&mut self.read_set, fd);
            }
            if mask.contains(EventMask::WRITE) {
                fd_set_insert(&mut self.write_set, fd);
            }
        }

        let timespec = timeout_to_timespec(timeout);
        // Safety: every fd in the sets comes from the interest table, whose
        // entries the registration API promises stay open while registered.
        let n_ready = unsafe {
            rustix::event::select(
                nfds,
                Some(&mut self.read_set),
                Some(&mut self.write_set),
                None,
                timespec.as_ref(),
            )
        }
        .map_err(DispatchError::from_errno)?;
        if n_ready == 0 {
            return Ok(());
        }

        for fd in FdSetIter::new(&self.read_set) {
            sink.io_ready(fd, EventMask::READ);
        }
        for fd in FdSetIter::new(&self.write_set) {
            sink.io_ready(fd, EventMask::WRITE);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::os::fd::AsRawFd;

    #[test]
    fn readiness_on_a_pipe() {
        let mut backend = SelectBackend::new().unwrap();
        let (read_end, write_end) = rustix::pipe::pipe().unwrap();
        let raw = read_end.as_raw_fd();
        let mut no_info = [];
        backend
            .add(raw, EventMask::NONE, EventMask::READ, &mut no_info)
            .unwrap();

        let mut sink = ReadySink::default();
        backend.dispatch(Some(Duration::ZERO), &mut sink).unwrap();
        assert_eq!(sink.drain().count(), 0);

        rustix::io::write(&write_end, b"hi").unwrap();
        backend
            .dispatch(Some(Duration::from_secs(5)), &mut sink)
            .unwrap();
        assert_eq!(sink.drain().collect::<Vec<_>>(), vec![(raw, EventMask::READ)]);
    }

    #[test]
    fn del_removes_interest_entirely() {
        let mut backend = SelectBackend::new().unwrap();
        let mut no_info = [];
        backend
            .add(5, EventMask::NONE, EventMask::READ | EventMask::WRITE, &mut no_info)
            .unwrap();
        backend
            .del(
                5,
                EventMask::READ | EventMask::WRITE,
                EventMask::READ | EventMask::WRITE,
                &mut no_info,
            )
            .unwrap();
        assert!(backend.interest.is_empty());
        assert_eq!(backend.nfds(), 0);
    }
}
