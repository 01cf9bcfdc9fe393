// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words signum signums WOULDBLOCK

//! The per-base signal self-pipe. See [`SignalPipe`].

use rustix::io::Errno;
use rustix::pipe::{PipeFlags, pipe_with};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

/// Translates asynchronous signal deliveries into ordinary fd readability.
///
/// The process handler (see [`claim_signal`]) writes one signum byte per
/// delivery into the write end; the base registers the read end as an
/// internal fd event. Draining counts bytes per signum, which is where
/// coalescing becomes the `ncalls` surfaced to callbacks.
///
/// [`claim_signal`]: super::claim_signal
pub(crate) struct SignalPipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl SignalPipe {
    pub(crate) fn new() -> Result<Self, Errno> {
        let (read, write) = pipe_with(PipeFlags::CLOEXEC | PipeFlags::NONBLOCK)?;
        Ok(Self { read, write })
    }

    pub(crate) fn read_fd(&self) -> RawFd { self.read.as_raw_fd() }

    pub(crate) fn write_fd(&self) -> RawFd { self.write.as_raw_fd() }

    /// Empties the pipe and tallies deliveries per signum.
    pub(crate) fn drain(&self) -> Vec<(i32, u32)> {
        let mut counts: Vec<(i32, u32)> = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            match rustix::io::read(&self.read, &mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    for &byte in &buf[..n] {
                        let signum = i32::from(byte);
                        match counts.iter_mut().find(|(s, _)| *s == signum) {
                            Some((_, count)) => *count += 1,
                            None => counts.push((signum, 1)),
                        }
                    }
                }
                Err(errno) if errno == Errno::WOULDBLOCK || errno == Errno::AGAIN => {
                    break;
                }
                Err(Errno::INTR) => {}
                Err(errno) => {
                    tracing::warn!(%errno, "signal pipe drain failed");
                    break;
                }
            }
        }
        counts
    }
}
