// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words fdinfo epoll kqueue evport EINTR

//! The pluggable poller contract. See [`Backend`].

use crate::event::EventMask;
use bitflags::bitflags;
use rustix::io::Errno;
use std::os::fd::RawFd;
use std::time::Duration;

/// Which concrete readiness multiplexer a base is bound to.
///
/// The `Display`/`FromStr` names double as the method names used by the
/// config `avoid` set and by the `EVENT_NO{NAME}` environment variables.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum BackendKind {
    /// Edge-capable kernel queue (`epoll_wait`). Linux only.
    Epoll,
    /// Level-triggered `poll(2)`.
    Poll,
    /// Level-triggered `select(2)` fallback.
    Select,
}

bitflags! {
    /// Capability bits a backend advertises and a config may require.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BackendFeatures: u8 {
        /// Supports `EDGE_TRIGGERED` subscriptions.
        const EDGE_TRIGGERED = 0x01;
        /// Subscription changes are O(1) rather than O(registered fds).
        const O1_ADD = 0x02;
        /// Descriptors are pointer-like handles, not dense small integers;
        /// the fd map switches to its hash-table variant.
        const FDS_DISJOINT_FROM_INTS = 0x04;
        /// Backend state does not survive `fork`; the child must call
        /// `reinit`.
        const REINIT_AFTER_FORK = 0x08;
    }
}

impl BackendFeatures {
    /// No capabilities: the portable level-triggered baseline.
    pub const NONE: Self = Self::empty();
}

impl Default for BackendFeatures {
    fn default() -> Self { Self::empty() }
}

/// How a backend wait ended when it did not simply succeed.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum DispatchError {
    /// `EINTR`-equivalent: the loop retries without counting the iteration as
    /// failed.
    Transient,
    /// Permanent failure; the loop exits with an error.
    Fatal(Errno),
}

impl DispatchError {
    /// Classifies an errno from a readiness syscall.
    pub(crate) fn from_errno(errno: Errno) -> Self {
        if errno == Errno::INTR {
            Self::Transient
        } else {
            Self::Fatal(errno)
        }
    }
}

/// Where a backend reports readiness during [`Backend::dispatch`].
///
/// The sink decouples the kernel-facing wait (which runs with the base
/// unlocked) from activation-queue insertion (which needs the base locked):
/// the backend records raw `(fd, result)` pairs here and the loop maps them to
/// events afterwards.
#[derive(Default)]
pub(crate) struct ReadySink {
    ready: Vec<(RawFd, EventMask)>,
}

impl ReadySink {
    pub(crate) fn io_ready(&mut self, fd: RawFd, res: EventMask) {
        self.ready.push((fd, res));
    }

    pub(crate) fn drain(&mut self) -> std::vec::Drain<'_, (RawFd, EventMask)> {
        self.ready.drain(..)
    }

    pub(crate) fn clear(&mut self) { self.ready.clear(); }
}

/// A readiness multiplexer pluggable into a base.
///
/// The contract is five operations plus metadata. Construction (the `init`
/// operation) is each implementation's `new`, invoked by the probe; release
/// (`dealloc`) is `Drop`. The remaining three are methods:
///
/// - [`add`]/[`del`] apply subscription deltas. Both receive the mask that
///   was previously communicated for the fd (`old`) so the implementation can
///   pick the right kernel operation; both must be idempotent and accept
///   `old == new`.
/// - [`dispatch`] blocks up to `timeout` (`None` = indefinitely) and reports
///   every ready fd into the sink. `EINTR` is always [`Transient`].
///
/// Implementations run behind the base's backend lock and never see
/// concurrent calls; `Send` is required because the base (and therefore the
/// loop) may migrate across threads between iterations.
///
/// [`Transient`]: DispatchError::Transient
/// [`add`]: Self::add
/// [`del`]: Self::del
/// [`dispatch`]: Self::dispatch
pub(crate) trait Backend: Send {
    fn kind(&self) -> BackendKind;

    fn features(&self) -> BackendFeatures;

    /// Bytes of per-fd scratch the fd map reserves for this backend.
    fn fdinfo_len(&self) -> usize { 0 }

    /// Moves the kernel subscription for `fd` from `old` to `new` (a
    /// superset: bits are being enabled). `fdinfo` is this fd's scratch from
    /// the map, zeroed on first use.
    fn add(
        &mut self,
        fd: RawFd,
        old: EventMask,
        new: EventMask,
        fdinfo: &mut [u8],
    ) -> Result<(), Errno>;

    /// Symmetric to [`add`]: disables the bits of `drop`, where `old` is the
    /// current full subscription.
    ///
    /// [`add`]: Self::add
    fn del(
        &mut self,
        fd: RawFd,
        old: EventMask,
        drop: EventMask,
        fdinfo: &mut [u8],
    ) -> Result<(), Errno>;

    /// Waits for readiness and reports it into `sink`.
    fn dispatch(
        &mut self,
        timeout: Option<Duration>,
        sink: &mut ReadySink,
    ) -> Result<(), DispatchError>;
}

/// Converts a loop timeout to the timespec the rustix wait calls take.
pub(crate) fn timeout_to_timespec(timeout: Option<Duration>) -> Option<rustix::time::Timespec> {
    timeout.map(|d| rustix::time::Timespec {
        tv_sec: i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
        tv_nsec: i64::from(d.subsec_nanos()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    #[test]
    fn kind_names_match_env_var_suffixes() {
        assert_eq!(BackendKind::Epoll.to_string(), "epoll");
        assert_eq!(BackendKind::Poll.to_string(), "poll");
        assert_eq!(BackendKind::Select.to_string(), "select");
        assert_eq!(BackendKind::from_str("epoll").unwrap(), BackendKind::Epoll);
        assert!(BackendKind::from_str("iocp").is_err());
    }

    #[test]
    fn eintr_is_transient_everything_else_fatal() {
        assert_eq!(
            DispatchError::from_errno(Errno::INTR),
            DispatchError::Transient
        );
        assert_eq!(
            DispatchError::from_errno(Errno::BADF),
            DispatchError::Fatal(Errno::BADF)
        );
    }

    #[test]
    fn feature_bits_compose() {
        let features = BackendFeatures::EDGE_TRIGGERED | BackendFeatures::O1_ADD;
        assert!(features.contains(BackendFeatures::EDGE_TRIGGERED));
        assert!(!features.contains(BackendFeatures::REINIT_AFTER_FORK));
    }
}
