//! Event export
//!
//! Writes emitted events as JSON lines, one object per event, tagged with the
//! event type. The output can be consumed with `jq` or loaded line by line.

pub mod json_lines;

pub use json_lines::JsonLinesSink;
