// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words eventfd EFD

//! The thread-wakeup channel. See [`Notifier`].

use rustix::event::{EventfdFlags, eventfd};
use rustix::io::Errno;
use rustix::pipe::{PipeFlags, pipe_with};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

/// The fd primitive behind a [`Notifier`].
enum NotifyChannel {
    /// One fd, kernel-counted; a single 8-byte read clears any number of
    /// writes.
    EventFd(OwnedFd),
    /// Classic self-pipe fallback.
    Pipe { read: OwnedFd, write: OwnedFd },
}

/// Preempts an in-progress backend wait from another thread.
///
/// Any operation invoked off the loop thread that must be observed before the
/// current wait ends (add/del/active, loopbreak, a deferred callback) calls
/// [`notify`]. The base registers [`read_fd`] as an internal event whose only
/// job is to drain the channel.
///
/// `is_notify_pending` suppresses duplicate writes: between a `notify` and
/// the loop's drain, any number of further notifies collapse into the first
/// byte.
///
/// [`notify`]: Self::notify
/// [`read_fd`]: Self::read_fd
pub(crate) struct Notifier {
    channel: NotifyChannel,
    is_notify_pending: AtomicBool,
}

impl Notifier {
    /// Prefers an eventfd-style primitive; falls back to a pipe where the
    /// syscall does not exist.
    pub(crate) fn new() -> Result<Self, Errno> {
        let channel = match eventfd(0, EventfdFlags::CLOEXEC | EventfdFlags::NONBLOCK) {
            Ok(fd) => NotifyChannel::EventFd(fd),
            Err(_) => {
                let (read, write) = pipe_with(PipeFlags::CLOEXEC | PipeFlags::NONBLOCK)?;
                NotifyChannel::Pipe { read, write }
            }
        };
        Ok(Self {
            channel,
            is_notify_pending: AtomicBool::new(false),
        })
    }

    /// The fd the base watches for wakeups.
    pub(crate) fn read_fd(&self) -> RawFd {
        match &self.channel {
            NotifyChannel::EventFd(fd) => fd.as_raw_fd(),
            NotifyChannel::Pipe { read, .. } => read.as_raw_fd(),
        }
    }

    /// Wakes the loop. Coalesces with an already-pending wakeup.
    pub(crate) fn notify(&self) {
        if self.is_notify_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let result = match &self.channel {
            NotifyChannel::EventFd(fd) => rustix::io::write(fd, &1u64.to_ne_bytes()),
            NotifyChannel::Pipe { write, .. } => rustix::io::write(write, &[1u8]),
        };
        if let Err(errno) = result {
            // A full channel still wakes the loop; anything else is worth a
            // log line.
            if errno != Errno::WOULDBLOCK && errno != Errno::AGAIN {
                tracing::warn!(%errno, "loop wakeup write failed");
            }
        }
    }

    /// Drains the channel and clears the pending flag. Runs on the loop
    /// thread from the internal event's callback.
    pub(crate) fn drain(&self) {
        match &self.channel {
            NotifyChannel::EventFd(fd) => {
                let mut buf = [0u8; 8];
                let _ = rustix::io::read(fd, &mut buf);
            }
            NotifyChannel::Pipe { read, .. } => {
                let mut buf = [0u8; 64];
                while matches!(rustix::io::read(read, &mut buf), Ok(n) if n > 0) {}
            }
        }
        self.is_notify_pending.store(false, Ordering::Release);
    }
}
