//! # Method Tracer - Dynamic Method Tracing and Timing for JVM Bytecode
//!
//! Method Tracer selects methods with user filters, rewrites their bytecode so
//! every exit reports to a probe, and aggregates per-method timing in a
//! lock-free registry that a periodic flush turns into events.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Filters (--trace / --timing / JSON)             │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ set_filters
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Native Layer (runtime side)                    │
//! │  • Matches filters against loaded classes                       │
//! │  • Assigns class and method ids                                 │
//! │  • Retransforms classes whose modifications changed             │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ on_method_trace (original bytes + candidates)
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Method Tracer (This Crate)                      │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐        │
//! │  │   Exclude    │──▶│  Instrument  │──▶│  Transform   │        │
//! │  │    List      │   │  (per class) │   │ (per method) │        │
//! │  └──────────────┘   └──────┬───────┘   └──────────────┘        │
//! │                            │ update_timing                      │
//! │                            ▼                                    │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐        │
//! │  │    Probes    │──▶│ TimedMethod  │◀──│  TimedClass  │        │
//! │  │  (hot path)  │   │  (atomics)   │   │  (publish)   │        │
//! │  └──────────────┘   └──────────────┘   └──────┬───────┘        │
//! │                                               │ emit_timing     │
//! │                                               ▼                 │
//! │                                        ┌──────────────┐        │
//! │                                        │  Event Sink  │        │
//! │                                        │ (JSON lines) │        │
//! │                                        └──────────────┘        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! ### Core Pipeline Modules
//!
//! - [`filter`]: Parse filter text and match it against classes and methods
//!
//! - [`exclude`]: Classes and methods that must never be instrumented
//!
//! - [`classfile`]: Structural class-file model
//!   - Constant pool, members and attributes
//!   - Instruction decoding and code relocation
//!   - `StackMapTable` re-encoding so rewritten methods still verify
//!
//! - [`instrumentation`]: Decide what to rewrite and inject the probes
//!
//! - [`timing`]: Per-method counters and per-class grouping
//!
//! - [`tracer`]: [`PlatformTracer`](tracer::PlatformTracer), the orchestrator
//!   - Runtime callbacks, registries, filter updates, flush
//!   - Hot-path probes called by instrumented code
//!
//! ### Output and Runtime Modules
//!
//! - [`events`]: Timing and trace events, the sink trait
//!
//! - [`export`]: JSON-lines event output
//!
//! - [`runtime`]: In-process native layer over class files on disk
//!
//! - [`cli`]: Command-line argument parsing and the filter config file
//!
//! - [`domain`]: Core domain types (`MethodId`, `ClassId`, `Method`) and errors
//!
//! ## Probe Protocol
//!
//! A rewritten method calls `MethodTracer.timestamp()J` on entry and stores
//! the result in a fresh local. Before each return and `athrow` it pushes the
//! start time and its method id and calls one of:
//!
//! | Modification   | Probe                                       |
//! |----------------|---------------------------------------------|
//! | tracing        | `trace` / `traceObjectInit`                 |
//! | timing         | `timing` / `timingObjectInit`               |
//! | both           | `traceTiming` / `traceTimingObjectInit`     |
//!
//! The `ObjectInit` variants are used for `java.lang.Object::<init>` only.
//!
//! ## Typical Usage
//!
//! ```bash
//! # Time every method of a class and print the report
//! method-tracer --timing com.example.Service Service.class
//!
//! # Trace annotated methods and write the rewritten classes
//! method-tracer --trace @com.example.Traced --output out/ classes/*.class
//! ```
//!
//! ## Key Concepts
//!
//! - **Modification**: timing, tracing, both or none, per method
//! - **Publish**: marks a timed method for emission at the next flush
//! - **Missing**: `i64::MIN`, emitted when no average can be computed
//! - **Exclusion list**: bootstrap classes the tracer itself depends on

// Expose modules for testing
pub mod classfile;
pub mod cli;
pub mod domain;
pub mod events;
pub mod exclude;
pub mod export;
pub mod filter;
pub mod instrumentation;
pub mod runtime;
pub mod timing;
pub mod tracer;
