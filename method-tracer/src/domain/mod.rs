//! Domain model for method-tracer
//!
//! This module contains core domain types and errors that provide:
//! - Compile-time safety via newtype pattern
//! - Self-documenting function signatures
//! - Structured error handling

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use method_tracer_common::{ClassId, MethodId, Modification};
pub use types::{ClassLoader, Method};

pub use errors::{ClassFormatError, InstrumentationError, TracerError};
