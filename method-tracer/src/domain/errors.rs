//! Structured error types for method-tracer
//!
//! Using thiserror for automatic Display implementation and error chaining.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassFormatError {
    #[error("Unexpected end of class data at offset {0}")]
    UnexpectedEof(usize),

    #[error("Bad magic number {0:#010x}")]
    BadMagic(u32),

    #[error("Unknown constant pool tag {tag} at index {index}")]
    UnknownConstantTag { tag: u8, index: u16 },

    #[error("Constant pool index {index} is not a {expected}")]
    BadConstant { index: u16, expected: &'static str },

    #[error("Constant pool is full")]
    ConstantPoolOverflow,

    #[error("Invalid opcode {opcode:#04x} at offset {offset}")]
    InvalidOpcode { opcode: u8, offset: usize },

    #[error("Branch target {target} out of range at offset {offset}")]
    BadBranchTarget { offset: usize, target: i64 },

    #[error("Malformed descriptor: {0}")]
    BadDescriptor(String),

    #[error("Unknown stack map frame type {0}")]
    BadStackMapFrame(u8),

    #[error("{0} trailing bytes after class data")]
    TrailingBytes(usize),
}

#[derive(Error, Debug)]
pub enum InstrumentationError {
    #[error(transparent)]
    ClassFormat(#[from] ClassFormatError),

    #[error("Relocated branch in {method} at offset {offset} no longer fits in 16 bits")]
    BranchOutOfRange { method: String, offset: usize },

    #[error("Instrumented code of {method} is {length} bytes, over the 65535 byte limit")]
    CodeTooLarge { method: String, length: usize },

    #[error("Method {method} needs more than 65535 local slots")]
    TooManyLocals { method: String },

    #[error("Candidate arrays disagree in length: {ids} ids, {names} names, {signatures} signatures, {modifications} modifications")]
    MismatchedCandidates {
        ids: usize,
        names: usize,
        signatures: usize,
        modifications: usize,
    },
}

#[derive(Error, Debug)]
pub enum TracerError {
    #[error("Warm-up failed: {0}")]
    WarmUp(String),

    #[error("Native layer error: {0}")]
    Native(String),

    #[error(transparent)]
    Instrumentation(#[from] InstrumentationError),
}
