//! Bytecode instrumentation
//!
//! [`Instrumentation`] decides which methods of a class to rewrite and
//! [`Transform`] rewrites a single method body.

#[allow(clippy::module_inception)]
mod instrumentation;
pub mod transform;

pub use instrumentation::Instrumentation;
pub use transform::Transform;
