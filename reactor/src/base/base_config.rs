// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words iocp cpus

//! Construction-time options for an event base. See [`EventConfig`].

use crate::backend::{BackendFeatures, BackendKind};
use bitflags::bitflags;

bitflags! {
    /// Behavior flags fixed at base construction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConfigFlags: u8 {
        /// Skip the cross-thread wakeup plumbing (no notifier fd, no
        /// internal wakeup event). For bases driven and mutated by a single
        /// thread only.
        const NO_LOCK = 0x01;
        /// Ignore the `EVENT_NO*` / `EVENT_SHOW_METHOD` /
        /// `EVENT_PRECISE_TIMER` environment variables.
        const IGNORE_ENV = 0x02;
        /// Accepted for config compatibility; completion ports do not exist
        /// on the platforms this crate builds for.
        const STARTUP_IOCP = 0x04;
        /// Use the precise (non-coarse) monotonic clock for deadlines.
        const PRECISE_TIMER = 0x08;
        /// Sample the clock on every read instead of once per loop
        /// iteration.
        const NO_CACHE_TIME = 0x10;
        /// Let the epoll backend batch subscription changes into a
        /// changelist applied at dispatch time.
        const EPOLL_USE_CHANGELIST = 0x20;
    }
}

impl Default for ConfigFlags {
    fn default() -> Self { Self::empty() }
}

/// What to build an [`EventBase`] from. The builder-style setters mirror how
/// a config is assembled in practice: start from `default()`, avoid methods
/// or require features, set flags, construct.
///
/// [`EventBase`]: crate::base::EventBase
#[derive(Debug, Clone, Default)]
pub struct EventConfig {
    pub(crate) avoid: Vec<BackendKind>,
    pub(crate) require_features: BackendFeatures,
    pub(crate) flags: ConfigFlags,
    /// A hint for backends that size worker pools from CPU count (completion
    /// ports). Stored, unused by the readiness backends.
    pub(crate) n_cpus_hint: Option<usize>,
}

impl EventConfig {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Never bind the named method. May be called multiple times.
    #[must_use]
    pub fn avoid_method(mut self, kind: BackendKind) -> Self {
        if !self.avoid.contains(&kind) {
            self.avoid.push(kind);
        }
        self
    }

    /// Only bind a backend advertising every bit of `features`.
    #[must_use]
    pub fn require_features(mut self, features: BackendFeatures) -> Self {
        self.require_features = self.require_features | features;
        self
    }

    #[must_use]
    pub fn flags(mut self, flags: ConfigFlags) -> Self {
        self.flags = self.flags | flags;
        self
    }

    #[must_use]
    pub fn n_cpus_hint(mut self, n: usize) -> Self {
        self.n_cpus_hint = Some(n);
        self
    }

    pub(crate) fn ignore_env(&self) -> bool {
        self.flags.contains(ConfigFlags::IGNORE_ENV)
    }

    /// Precise timing: the flag, or the `EVENT_PRECISE_TIMER` env var unless
    /// the env is ignored.
    pub(crate) fn precise_timer(&self) -> bool {
        self.flags.contains(ConfigFlags::PRECISE_TIMER)
            || (!self.ignore_env() && std::env::var_os("EVENT_PRECISE_TIMER").is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builder_accumulates() {
        let config = EventConfig::new()
            .avoid_method(BackendKind::Select)
            .avoid_method(BackendKind::Select)
            .require_features(BackendFeatures::O1_ADD)
            .flags(ConfigFlags::IGNORE_ENV | ConfigFlags::PRECISE_TIMER)
            .n_cpus_hint(8);
        assert_eq!(config.avoid, vec![BackendKind::Select]);
        assert!(config.require_features.contains(BackendFeatures::O1_ADD));
        assert!(config.flags.contains(ConfigFlags::IGNORE_ENV));
        assert!(config.precise_timer());
        assert_eq!(config.n_cpus_hint, Some(8));
    }
}
