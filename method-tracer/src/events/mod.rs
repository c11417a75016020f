//! Events emitted by the tracer
//!
//! Two event types leave the engine:
//! - [`MethodTimingEvent`]: one aggregated record per published timed method per flush
//! - [`MethodTraceEvent`]: one record per traced invocation
//!
//! Where they go is decided by an [`EventSink`]. [`RecordingSink`] keeps them in
//! memory; the `export` module writes them out.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

pub use method_tracer_common::MISSING;

use crate::domain::MethodId;

/// Aggregated timing of one method since it started being measured.
///
/// `minimum`, `average` and `maximum` are [`MISSING`] when the clock was too
/// coarse or the method never ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodTimingEvent {
    pub timestamp: i64,
    pub method_id: u64,
    pub invocations: u64,
    pub minimum: i64,
    pub average: i64,
    pub maximum: i64,
}

impl MethodTimingEvent {
    #[must_use]
    pub fn method_id(&self) -> MethodId {
        MethodId(self.method_id)
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        self.average == MISSING
    }
}

/// A single traced invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodTraceEvent {
    pub start_time: i64,
    pub duration: i64,
    pub method_id: u64,
}

impl MethodTraceEvent {
    #[must_use]
    pub fn method_id(&self) -> MethodId {
        MethodId(self.method_id)
    }
}

/// Either event, tagged the way the recording stores them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "jdk.MethodTiming")]
    MethodTiming(MethodTimingEvent),
    #[serde(rename = "jdk.MethodTrace")]
    MethodTrace(MethodTraceEvent),
}

/// Destination for emitted events.
///
/// `method_trace` is called from instrumented code on arbitrary threads.
pub trait EventSink: Send + Sync {
    fn method_timing(&self, event: &MethodTimingEvent);
    fn method_trace(&self, event: &MethodTraceEvent);
}

/// Sink that keeps every event in memory, in arrival order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take all events recorded so far.
    pub fn drain(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }

    #[must_use]
    pub fn timings(&self) -> Vec<MethodTimingEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|e| match e {
                Event::MethodTiming(timing) => Some(*timing),
                Event::MethodTrace(_) => None,
            })
            .collect()
    }

    #[must_use]
    pub fn traces(&self) -> Vec<MethodTraceEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|e| match e {
                Event::MethodTrace(trace) => Some(*trace),
                Event::MethodTiming(_) => None,
            })
            .collect()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }
}

impl EventSink for RecordingSink {
    fn method_timing(&self, event: &MethodTimingEvent) {
        self.push(Event::MethodTiming(*event));
    }

    fn method_trace(&self, event: &MethodTraceEvent) {
        self.push(Event::MethodTrace(*event));
    }
}
