//! # Platform Tracer
//!
//! ```text
//!   set_filters ──▶ NativeLayer::set_method_trace_filters
//!                          │ retransform matching classes
//!                          ▼
//!                   MethodTraceHook::on_method_trace
//!                          │ Instrumentation + update_timing
//!                          ▼
//!   instrumented code ──▶ probes (timestamp, trace, timing, ...)
//!                          │ lock-free counters
//!                          ▼
//!   periodic flush ──▶ emit_timing ──▶ EventSink
//! ```
//!
//! - [`native`]: the traits the runtime implements and calls
//! - [`platform`]: [`PlatformTracer`] itself: filters, registries, emission
//! - `probes`: hot-path entry points
//! - `warm_up`: the one-time self-test run by [`PlatformTracer::initialize`]

pub mod native;
pub mod platform;
mod probes;
mod warm_up;

pub use native::{ClassCandidates, MethodTraceHook, NativeFilters, NativeLayer};
pub use platform::{PlatformTracer, TracerState};
pub use warm_up::WARM_UP_ITERATIONS;
