//! Entry points called from instrumented code.
//!
//! Everything here runs on application threads for every invocation of an
//! instrumented method: no locks, no allocation, no logging, no panics.

use method_tracer_common::Probe;

use super::PlatformTracer;
use crate::domain::MethodId;
use crate::events::MethodTraceEvent;

impl PlatformTracer {
    /// Timestamp source called in the method prologue.
    #[inline]
    pub fn timestamp(&self) -> i64 {
        self.native.counter_time()
    }

    /// Add one measurement to a timed method. Unknown ids are dropped.
    #[inline]
    pub fn add_timing(&self, id: MethodId, duration: i64) {
        if let Some(timed) = self.timed_methods.pin().get(&id) {
            timed.record(duration);
        }
    }

    /// Add one measurement to `java.lang.Object::<init>`.
    #[inline]
    pub fn add_object_timing(&self, duration: i64) {
        if let Some(timed) = self.object_init.load().as_ref() {
            timed.record(duration);
        }
    }

    pub fn trace(&self, start: i64, id: MethodId) {
        let duration = self.elapsed(start);
        self.emit_trace(start, duration, id);
    }

    pub fn timing(&self, start: i64, id: MethodId) {
        self.add_timing(id, self.elapsed(start));
    }

    pub fn trace_timing(&self, start: i64, id: MethodId) {
        let duration = self.elapsed(start);
        self.emit_trace(start, duration, id);
        self.add_timing(id, duration);
    }

    pub fn trace_object_init(&self, start: i64, id: MethodId) {
        let duration = self.elapsed(start);
        self.emit_trace(start, duration, id);
    }

    pub fn timing_object_init(&self, start: i64, _id: MethodId) {
        self.add_object_timing(self.elapsed(start));
    }

    pub fn trace_timing_object_init(&self, start: i64, id: MethodId) {
        let duration = self.elapsed(start);
        self.emit_trace(start, duration, id);
        self.add_object_timing(duration);
    }

    /// Dispatch to the probe a rewritten method calls on exit.
    pub fn call_probe(&self, probe: Probe, start: i64, id: MethodId) {
        match probe {
            Probe::Trace => self.trace(start, id),
            Probe::Timing => self.timing(start, id),
            Probe::TraceTiming => self.trace_timing(start, id),
            Probe::TraceObjectInit => self.trace_object_init(start, id),
            Probe::TimingObjectInit => self.timing_object_init(start, id),
            Probe::TraceTimingObjectInit => self.trace_timing_object_init(start, id),
        }
    }

    #[inline]
    fn elapsed(&self, start: i64) -> i64 {
        self.timestamp().saturating_sub(start)
    }

    #[inline]
    fn emit_trace(&self, start_time: i64, duration: i64, id: MethodId) {
        if self.native.is_thread_excluded() {
            return;
        }
        self.sink.method_trace(&MethodTraceEvent { start_time, duration, method_id: id.0 });
    }
}
