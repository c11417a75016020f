//! Runtime implementations of the native layer
//!
//! [`OfflineRuntime`] runs the tracer in-process over class files read from
//! disk, without a host VM. It is what the CLI and the integration tests use.

pub mod offline;

pub use offline::OfflineRuntime;
