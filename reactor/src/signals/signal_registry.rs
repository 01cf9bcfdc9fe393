// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words signum sigaction

//! Process-wide signal ownership. See [`claim_signal`].
//!
//! Signal dispositions are process-global, so two bases watching the same
//! signum would race each other's handlers. This registry enforces the rule:
//! exactly one base at a time owns a given signum. Registration is
//! check-and-insert under one lock; a conflicting claim fails with
//! [`EventError::SignalInUse`].

use crate::error::EventError;
use rustix::io::Errno;
use std::collections::BTreeMap;
use std::os::fd::{BorrowedFd, RawFd};
use std::sync::Mutex;

struct Claim {
    base_id: u64,
    sig_id: signal_hook::SigId,
}

static CLAIMS: Mutex<BTreeMap<i32, Claim>> = Mutex::new(BTreeMap::new());

/// Claims `signum` for `base_id` and installs the process handler.
///
/// The handler does the absolute minimum that is async-signal-safe: write the
/// single signum byte to the owning base's self-pipe. Draining, fan-out to
/// interested events, and `ncalls` accounting all happen on the loop thread.
pub(crate) fn claim_signal(
    signum: i32,
    base_id: u64,
    pipe_write_fd: RawFd,
) -> Result<(), EventError> {
    let mut claims = CLAIMS.lock().expect("signal registry poisoned");
    if let Some(existing) = claims.get(&signum) {
        if existing.base_id == base_id {
            return Ok(());
        }
        return Err(EventError::SignalInUse { signum });
    }

    let action = move || {
        // Async-signal-safe: a single write(2) on a non-blocking pipe. If the
        // pipe is full the byte is dropped; the reader coalesces counts
        // anyway.
        //
        // Safety: the write end outlives the claim - release_signal
        // unregisters this action before the owning base closes the pipe.
        let fd = unsafe { BorrowedFd::borrow_raw(pipe_write_fd) };
        let _ = rustix::io::write(fd, &[signum as u8]);
    };
    // Safety: the action is async-signal-safe per above; registration happens
    // before any delivery can observe it.
    let sig_id = unsafe { signal_hook::low_level::register(signum, action) }
        .map_err(|error| EventError::NotifySetup {
            source: Errno::from_io_error(&error).unwrap_or(Errno::INVAL),
        })?;

    claims.insert(signum, Claim { base_id, sig_id });
    tracing::debug!(signum, base_id, "signal claimed");
    Ok(())
}

/// Drops `base_id`'s claim on `signum`, restoring the previous disposition.
/// No-op when the claim is not held (or held by someone else).
pub(crate) fn release_signal(signum: i32, base_id: u64) {
    let mut claims = CLAIMS.lock().expect("signal registry poisoned");
    if claims.get(&signum).is_some_and(|c| c.base_id == base_id) {
        let claim = claims.remove(&signum).expect("checked above");
        signal_hook::low_level::unregister(claim.sig_id);
        tracing::debug!(signum, base_id, "signal released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn second_base_cannot_claim_the_same_signum() {
        let (read_end, write_end) = rustix::pipe::pipe().unwrap();
        let raw = {
            use std::os::fd::AsRawFd;
            write_end.as_raw_fd()
        };

        claim_signal(signal_hook::consts::SIGUSR2, 1, raw).unwrap();
        // Same base re-claims idempotently.
        claim_signal(signal_hook::consts::SIGUSR2, 1, raw).unwrap();
        // A different base is refused.
        assert!(matches!(
            claim_signal(signal_hook::consts::SIGUSR2, 2, raw),
            Err(EventError::SignalInUse { .. })
        ));

        release_signal(signal_hook::consts::SIGUSR2, 1);
        // After release the other base may claim.
        claim_signal(signal_hook::consts::SIGUSR2, 2, raw).unwrap();
        release_signal(signal_hook::consts::SIGUSR2, 2);
        drop(read_end);
    }
}
