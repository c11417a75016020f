use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use method_tracer_common::MISSING;

use crate::domain::Method;
use crate::events::MethodTimingEvent;

/// Counters updated from instrumented code.
///
/// Kept on their own cache line so threads hammering one method do not
/// false-share with neighbouring entries.
#[derive(Debug)]
#[repr(align(64))]
struct Counters {
    invocations: AtomicU64,
    time: AtomicI64,
    minimum: AtomicI64,
    maximum: AtomicI64,
}

/// Statistics cell for one timed method.
#[derive(Debug)]
pub struct TimedMethod {
    counters: Counters,
    published: AtomicBool,
    method: Method,
}

/// Plain copy of the counters at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingSnapshot {
    pub invocations: u64,
    pub time: i64,
    pub minimum: i64,
    pub maximum: i64,
}

impl TimedMethod {
    #[must_use]
    pub fn new(method: Method) -> Self {
        Self {
            counters: Counters {
                invocations: AtomicU64::new(0),
                time: AtomicI64::new(0),
                minimum: AtomicI64::new(i64::MAX),
                maximum: AtomicI64::new(i64::MIN),
            },
            published: AtomicBool::new(false),
            method,
        }
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Record one invocation. Never blocks and never allocates.
    ///
    /// A zero duration is counted but does not move the minimum or maximum,
    /// since it only says the clock did not tick.
    #[inline]
    pub fn record(&self, duration: i64) {
        let counters = &self.counters;
        counters.invocations.fetch_add(1, Ordering::Relaxed);
        counters.time.fetch_add(duration, Ordering::Relaxed);
        if duration == 0 {
            return;
        }

        let mut current = counters.minimum.load(Ordering::Relaxed);
        while duration < current {
            match counters.minimum.compare_exchange_weak(
                current,
                duration,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let mut current = counters.maximum.load(Ordering::Relaxed);
        while duration > current {
            match counters.maximum.compare_exchange_weak(
                current,
                duration,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn publish(&self) {
        self.published.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_published(&self) -> bool {
        self.published.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn snapshot(&self) -> TimingSnapshot {
        TimingSnapshot {
            invocations: self.counters.invocations.load(Ordering::Relaxed),
            time: self.counters.time.load(Ordering::Relaxed),
            minimum: self.counters.minimum.load(Ordering::Relaxed),
            maximum: self.counters.maximum.load(Ordering::Relaxed),
        }
    }

    /// Build the timing event for the current counters.
    #[must_use]
    pub fn to_event(&self, timestamp: i64) -> MethodTimingEvent {
        self.snapshot().to_event(timestamp, self.method.id.0)
    }
}

impl TimingSnapshot {
    /// Rounded average, or [`MISSING`] everywhere when there is nothing to
    /// average: no invocations, or a clock that never advanced.
    #[must_use]
    pub fn to_event(self, timestamp: i64, method_id: u64) -> MethodTimingEvent {
        let missing = MethodTimingEvent {
            timestamp,
            method_id,
            invocations: self.invocations,
            minimum: MISSING,
            average: MISSING,
            maximum: MISSING,
        };
        let Ok(invocations) = i64::try_from(self.invocations) else {
            return missing;
        };
        if invocations == 0 || self.time == 0 {
            return missing;
        }
        MethodTimingEvent {
            average: (self.time + invocations / 2) / invocations,
            minimum: if self.minimum == i64::MAX { MISSING } else { self.minimum },
            maximum: self.maximum,
            ..missing
        }
    }
}
