// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Scenario tests driving whole bases: real pipes, real waits, real threads.

mod common_timeout_scenarios;
mod loop_scenarios;
mod priority_scenarios;
mod signal_scenarios;

use crate::{EventBase, EventConfig};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

/// A nonblocking pipe pair for readiness scenarios.
pub(crate) fn test_pipe() -> (OwnedFd, OwnedFd) {
    rustix::pipe::pipe_with(
        rustix::pipe::PipeFlags::CLOEXEC | rustix::pipe::PipeFlags::NONBLOCK,
    )
    .expect("pipe creation")
}

pub(crate) fn write_all(fd: &OwnedFd, bytes: &[u8]) {
    rustix::io::write(fd, bytes).expect("pipe write");
}

pub(crate) fn raw(fd: &OwnedFd) -> RawFd { fd.as_raw_fd() }

/// A base that ignores the ambient environment, so `EVENT_NO*` variables in
/// the test runner's environment cannot skew scenarios.
pub(crate) fn test_base() -> EventBase {
    EventBase::with_config(
        EventConfig::new().flags(crate::ConfigFlags::IGNORE_ENV),
    )
    .expect("base creation")
}
