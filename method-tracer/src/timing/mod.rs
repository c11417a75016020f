//! Timing statistics
//!
//! [`TimedMethod`] is the per-method counter block updated by instrumented
//! code; [`TimedClass`] groups the timed methods of one defining class so
//! they can be published, emitted and dropped together.

pub mod timed_class;
pub mod timed_method;

pub use timed_class::TimedClass;
pub use timed_method::{TimedMethod, TimingSnapshot};
