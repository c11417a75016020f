//! # Shared Values (Native Layer ↔ Tracer)
//!
//! Defines the values that cross the boundary between the host runtime's
//! native layer, the rewritten bytecode and the tracer itself. Everything here
//! is plain data with a stable encoding, so it stays `no_std`.
//!
//! ## Key Types
//!
//! - [`ClassId`] / [`MethodId`] - opaque identifiers assigned by the runtime
//! - [`Modification`] - which probes a method needs, with its 2-bit encoding
//! - [`Probe`] - the static entry points injected into rewritten methods

#![no_std]

use core::fmt;

// ============================================================================
// Probe ABI
// ============================================================================

/// Internal name of the class that owns every injected probe method.
pub const PROBE_OWNER: &str = "jdk/jfr/tracing/MethodTracer";

/// Name of the timestamp source called at method entry.
pub const TIMESTAMP_METHOD: &str = "timestamp";

/// Descriptor of the timestamp source: `static long timestamp()`.
pub const TIMESTAMP_DESCRIPTOR: &str = "()J";

/// Descriptor shared by all exit probes: `static void probe(long start, long id)`.
pub const PROBE_DESCRIPTOR: &str = "(JJ)V";

/// Sentinel emitted for minimum, average and maximum when a timed method has
/// no usable measurement yet (no invocations, or a clock too coarse to see
/// any elapsed time).
pub const MISSING: i64 = i64::MIN;

/// Number of low bits of a [`MethodId`] that identify the method within its class.
pub const METHOD_INDEX_BITS: u32 = 16;

// ============================================================================
// Identifiers
// ============================================================================

/// Class identifier assigned by the host runtime.
///
/// Stable across redefinitions of the same class within one process run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u64);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Class#{}", self.0)
    }
}

/// Method identifier assigned by the host runtime.
///
/// The upper 48 bits identify the owning class; nothing else about the layout
/// is assumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub u64);

impl MethodId {
    /// Compose an identifier from a class id and a method index.
    #[must_use]
    pub const fn new(class: ClassId, index: u16) -> Self {
        Self((class.0 << METHOD_INDEX_BITS) | index as u64)
    }

    /// Class that owns this method.
    #[must_use]
    pub const fn class_id(self) -> ClassId {
        ClassId(self.0 >> METHOD_INDEX_BITS)
    }

    /// Raw value as pushed by `ldc2_w` in rewritten bytecode.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn as_jlong(self) -> i64 {
        self.0 as i64
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Method#{:#x}", self.0)
    }
}

// ============================================================================
// Modification
// ============================================================================

/// Capabilities requested for one method: timing, tracing, both or none.
///
/// Encoded as `bit0 = timing`, `bit1 = tracing` when passed to and from the
/// native layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Modification {
    timing: bool,
    tracing: bool,
}

impl Modification {
    pub const NONE: Self = Self { timing: false, tracing: false };
    pub const TIMING: Self = Self { timing: true, tracing: false };
    pub const TRACING: Self = Self { timing: false, tracing: true };
    pub const TIMING_TRACING: Self = Self { timing: true, tracing: true };

    const TIMING_BIT: i32 = 0b01;
    const TRACING_BIT: i32 = 0b10;

    #[must_use]
    pub const fn new(timing: bool, tracing: bool) -> Self {
        Self { timing, tracing }
    }

    /// Decode from the native representation. Bits above bit 1 are ignored.
    #[must_use]
    pub const fn from_bits(bits: i32) -> Self {
        Self {
            timing: bits & Self::TIMING_BIT != 0,
            tracing: bits & Self::TRACING_BIT != 0,
        }
    }

    #[must_use]
    pub const fn to_bits(self) -> i32 {
        let mut bits = 0;
        if self.timing {
            bits |= Self::TIMING_BIT;
        }
        if self.tracing {
            bits |= Self::TRACING_BIT;
        }
        bits
    }

    #[must_use]
    pub const fn timing(self) -> bool {
        self.timing
    }

    #[must_use]
    pub const fn tracing(self) -> bool {
        self.tracing
    }

    #[must_use]
    pub const fn is_none(self) -> bool {
        !self.timing && !self.tracing
    }

    /// Union of two modifications.
    #[must_use]
    pub const fn combine(self, other: Self) -> Self {
        Self {
            timing: self.timing || other.timing,
            tracing: self.tracing || other.tracing,
        }
    }
}

impl fmt::Display for Modification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match (self.timing, self.tracing) {
            (false, false) => "none",
            (true, false) => "timing",
            (false, true) => "tracing",
            (true, true) => "timing+tracing",
        };
        f.write_str(label)
    }
}

// ============================================================================
// Probes
// ============================================================================

/// Exit probe injected before every return and throw of a rewritten method.
///
/// The `*ObjectInit` variants are used for `java.lang.Object::<init>`, which
/// runs so early and so often that it bypasses the general registry lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Probe {
    Trace,
    Timing,
    TraceTiming,
    TraceObjectInit,
    TimingObjectInit,
    TraceTimingObjectInit,
}

impl Probe {
    pub const ALL: [Self; 6] = [
        Self::Trace,
        Self::Timing,
        Self::TraceTiming,
        Self::TraceObjectInit,
        Self::TimingObjectInit,
        Self::TraceTimingObjectInit,
    ];

    /// Select the probe for a modification, or `None` when nothing is requested.
    #[must_use]
    pub const fn select(modification: Modification, object_init: bool) -> Option<Self> {
        match (modification.timing, modification.tracing, object_init) {
            (false, false, _) => None,
            (false, true, false) => Some(Self::Trace),
            (true, false, false) => Some(Self::Timing),
            (true, true, false) => Some(Self::TraceTiming),
            (false, true, true) => Some(Self::TraceObjectInit),
            (true, false, true) => Some(Self::TimingObjectInit),
            (true, true, true) => Some(Self::TraceTimingObjectInit),
        }
    }

    /// Static method name on [`PROBE_OWNER`].
    #[must_use]
    pub const fn method_name(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Timing => "timing",
            Self::TraceTiming => "traceTiming",
            Self::TraceObjectInit => "traceObjectInit",
            Self::TimingObjectInit => "timingObjectInit",
            Self::TraceTimingObjectInit => "traceTimingObjectInit",
        }
    }

    /// Look a probe up by its method name.
    #[must_use]
    pub fn from_method_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|probe| probe.method_name() == name)
    }
}
