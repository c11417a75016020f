//! One-time warm-up run before user filters apply.
//!
//! Instruments a synthetic `java.lang.Object` and drives every probe through
//! the full path, so the tracer's own code is loaded and hot before real
//! classes start calling it. All timing state is reset afterwards.

use std::panic::{catch_unwind, AssertUnwindSafe};

use log::debug;
use method_tracer_common::{Modification, Probe};

use super::native::ClassCandidates;
use super::PlatformTracer;
use crate::classfile::{ClassFile, CodeAttribute, ACC_PUBLIC};
use crate::domain::{ClassFormatError, ClassId, ClassLoader, MethodId, TracerError};
use crate::instrumentation::transform::probe_calls;

pub const WARM_UP_ITERATIONS: u64 = 10_000;

/// Reserved for the warm-up; runtimes hand out class ids from 1.
const WARM_UP_CLASS: ClassId = ClassId(0);

/// Probes that add to the object constructor's timing per iteration.
const TIMED_PROBES_PER_ITERATION: u64 = 4;

impl PlatformTracer {
    /// The calling thread is excluded from tracing for the duration, even
    /// when a probe panics.
    pub(super) fn warm_up(&self) -> Result<(), TracerError> {
        self.native.exclude_thread();
        let result = catch_unwind(AssertUnwindSafe(|| self.exercise_probes()))
            .unwrap_or_else(|_| Err(TracerError::WarmUp("warm-up panicked".to_string())));
        self.reset();
        self.native.include_thread();
        result?;
        self.native.export_probe_interface()
    }

    fn exercise_probes(&self) -> Result<(), TracerError> {
        let bytecode = object_class().map_err(|err| TracerError::WarmUp(err.to_string()))?;
        let id = MethodId::new(WARM_UP_CLASS, 0);
        let names = ["<init>".to_string()];
        let signatures = ["()V".to_string()];
        let candidates = ClassCandidates {
            module: Some("java.base"),
            loader: ClassLoader::Bootstrap,
            class_name: "java/lang/Object",
            bytecode: &bytecode,
            ids: &[id],
            names: &names,
            signatures: &signatures,
            modifications: &[Modification::TIMING_TRACING.to_bits()],
        };
        let rewritten = self.instrument(&candidates)?.ok_or_else(|| {
            TracerError::WarmUp("java.lang.Object::<init> was left unchanged".to_string())
        })?;
        check_rewritten(&rewritten)?;

        debug!("Exercising probes {WARM_UP_ITERATIONS} times");
        for _ in 0..WARM_UP_ITERATIONS {
            let start = self.timestamp();
            for probe in Probe::ALL {
                self.call_probe(probe, start, id);
            }
        }

        let timed = self
            .object_init_method()
            .ok_or_else(|| TracerError::WarmUp("object constructor is not timed".to_string()))?;
        let expected = WARM_UP_ITERATIONS * TIMED_PROBES_PER_ITERATION;
        let counted = timed.snapshot().invocations;
        if counted != expected {
            return Err(TracerError::WarmUp(format!(
                "probes counted {counted} of {expected} invocations"
            )));
        }
        Ok(())
    }
}

/// `java.lang.Object` with an empty constructor.
fn object_class() -> Result<Vec<u8>, ClassFormatError> {
    let mut class = ClassFile::new("java/lang/Object", "java/lang/Object", 52)?;
    class.super_class = 0;
    let body = CodeAttribute {
        max_stack: 0,
        max_locals: 1,
        code: vec![0xb1],
        exception_table: vec![],
        attributes: vec![],
    };
    class.add_method(ACC_PUBLIC, "<init>", "()V", &body)?;
    Ok(class.to_bytes())
}

fn check_rewritten(bytecode: &[u8]) -> Result<(), TracerError> {
    let class = ClassFile::parse(bytecode).map_err(|err| TracerError::WarmUp(err.to_string()))?;
    let method = class
        .methods
        .first()
        .ok_or_else(|| TracerError::WarmUp("constructor is missing".to_string()))?;
    let code_index = method
        .code_index(&class.constant_pool)
        .ok_or_else(|| TracerError::WarmUp("constructor lost its code".to_string()))?;
    let code = CodeAttribute::parse(&method.attributes[code_index].data)
        .map_err(|err| TracerError::WarmUp(err.to_string()))?;
    let calls = probe_calls(&class.constant_pool, &code)
        .map_err(|err| TracerError::WarmUp(err.to_string()))?;
    if calls.last().map(String::as_str) != Some(Probe::TraceTimingObjectInit.method_name()) {
        return Err(TracerError::WarmUp(format!("unexpected probe calls {calls:?}")));
    }
    Ok(())
}
