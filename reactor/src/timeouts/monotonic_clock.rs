// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words gettime CLOCK_MONOTONIC_COARSE

//! The loop's time source: a monotonic clock with per-iteration caching and
//! skew detection. See [`MonotonicClock`].

use rustix::time::{ClockId, clock_gettime};
use std::time::Duration;

/// An instant on the base's monotonic timeline.
///
/// Stored as the offset from the clock's (unspecified) epoch. Only ever
/// produced by [`MonotonicClock`], so instants from different bases are never
/// mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonotonicInstant(Duration);

impl MonotonicInstant {
    pub(crate) const ZERO: Self = Self(Duration::ZERO);

    /// Stand-in for an overflowed deadline computation; effectively "never".
    pub(crate) const FAR_FUTURE: Self =
        Self(Duration::from_secs(u64::MAX / 4));

    #[must_use]
    pub(crate) fn checked_add(self, d: Duration) -> Option<Self> {
        self.0.checked_add(d).map(Self)
    }

    /// Saturating: instants before `earlier` yield zero.
    #[must_use]
    pub(crate) fn duration_since(self, earlier: Self) -> Duration {
        self.0.saturating_sub(earlier.0)
    }

    /// Shifts the instant earlier by `d`, used by the skew-rebase path.
    #[must_use]
    pub(crate) fn rebase_back(self, d: Duration) -> Self {
        Self(self.0.saturating_sub(d))
    }

    #[cfg(test)]
    pub(crate) fn from_offset(d: Duration) -> Self { Self(d) }
}

/// Where raw time samples come from.
///
/// The OS implementation is [`OsClock`]; tests inject deterministic sources to
/// exercise the skew-rebase path, which a real monotonic clock never triggers.
pub(crate) trait ClockSource: Send {
    fn raw_now(&self) -> Duration;
}

/// Samples `CLOCK_MONOTONIC`, or the coarse variant when precise timing was
/// not requested (the coarse clock is a fraction of the cost and its
/// granularity is well under the slack of any readiness backend).
pub(crate) struct OsClock {
    clock_id: ClockId,
}

impl OsClock {
    pub(crate) fn new(precise: bool) -> Self {
        let clock_id = if precise {
            ClockId::Monotonic
        } else {
            #[cfg(target_os = "linux")]
            {
                ClockId::MonotonicCoarse
            }
            #[cfg(not(target_os = "linux"))]
            {
                ClockId::Monotonic
            }
        };
        Self { clock_id }
    }
}

impl ClockSource for OsClock {
    fn raw_now(&self) -> Duration {
        let ts = clock_gettime(self.clock_id);
        Duration::new(
            u64::try_from(ts.tv_sec).unwrap_or(0),
            u32::try_from(ts.tv_nsec).unwrap_or(0),
        )
    }
}

/// The cached clock owned by a base.
///
/// The loop refreshes the cache exactly once per iteration; every deadline
/// computation inside that iteration reads the same `now`, so a burst of
/// timers scheduled together shares one sample. The `no_cache_time` config
/// flag turns each [`now()`] call into a fresh sample instead.
///
/// [`now()`]: Self::now
pub(crate) struct MonotonicClock {
    source: Box<dyn ClockSource>,
    caching: bool,
    cached: Option<MonotonicInstant>,
    last_sample: Option<MonotonicInstant>,
}

impl MonotonicClock {
    pub(crate) fn new(source: Box<dyn ClockSource>, caching: bool) -> Self {
        Self {
            source,
            caching,
            cached: None,
            last_sample: None,
        }
    }

    /// Takes a fresh sample and updates the cache.
    ///
    /// Returns the backwards delta if the sample lands before the previous
    /// one. The caller is expected to rebase all pending deadlines by that
    /// delta so remaining durations are preserved.
    pub(crate) fn refresh(&mut self) -> Option<Duration> {
        let sample = MonotonicInstant(self.source.raw_now());
        let skew = match self.last_sample {
            Some(last) if sample < last => {
                let delta = last.duration_since(sample);
                tracing::warn!(
                    backwards_by = ?delta,
                    "monotonic clock ran backwards; rebasing deadlines"
                );
                Some(delta)
            }
            _ => None,
        };
        self.last_sample = Some(sample);
        self.cached = if self.caching { Some(sample) } else { None };
        skew
    }

    /// The current instant: the iteration's cached sample, or a fresh one when
    /// caching is off (or nothing is cached yet).
    pub(crate) fn now(&mut self) -> MonotonicInstant {
        match self.cached {
            Some(cached) if self.caching => cached,
            _ => {
                let sample = MonotonicInstant(self.source.raw_now());
                self.last_sample = Some(self.last_sample.map_or(sample, |l| l.max(sample)));
                sample
            }
        }
    }

    /// Drops the cached sample at the end of an iteration so time observed
    /// outside the loop is never stale.
    pub(crate) fn invalidate(&mut self) { self.cached = None; }
}

/// Deterministic clock source for tests: hands out the queued samples in
/// order, then repeats the last one.
#[cfg(test)]
pub(crate) struct FakeClock {
    samples: std::sync::Mutex<Vec<Duration>>,
}

#[cfg(test)]
impl FakeClock {
    pub(crate) fn with_samples(samples: Vec<Duration>) -> Self {
        assert!(!samples.is_empty());
        Self {
            samples: std::sync::Mutex::new(samples),
        }
    }
}

#[cfg(test)]
impl ClockSource for FakeClock {
    fn raw_now(&self) -> Duration {
        let mut samples = self.samples.lock().unwrap();
        if samples.len() > 1 {
            samples.remove(0)
        } else {
            samples[0]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn cached_now_is_stable_within_an_iteration() {
        let fake = FakeClock::with_samples(vec![
            Duration::from_secs(10),
            Duration::from_secs(20),
        ]);
        let mut clock = MonotonicClock::new(Box::new(fake), true);
        clock.refresh();
        let a = clock.now();
        let b = clock.now();
        assert_eq!(a, b);
        assert_eq!(a, MonotonicInstant::from_offset(Duration::from_secs(10)));
    }

    #[test]
    fn uncached_now_samples_every_time() {
        let fake = FakeClock::with_samples(vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(3),
        ]);
        let mut clock = MonotonicClock::new(Box::new(fake), false);
        clock.refresh();
        let a = clock.now();
        let b = clock.now();
        assert!(b > a);
    }

    #[test]
    fn backwards_sample_reports_the_delta() {
        let fake = FakeClock::with_samples(vec![
            Duration::from_secs(100),
            Duration::from_secs(97),
        ]);
        let mut clock = MonotonicClock::new(Box::new(fake), true);
        assert_eq!(clock.refresh(), None);
        assert_eq!(clock.refresh(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn os_clock_is_monotonic() {
        let clock = OsClock::new(true);
        let a = clock.raw_now();
        let b = clock.raw_now();
        assert!(b >= a);
    }
}
