//! Per-method rewriter.
//!
//! ```text
//! entry:   invokestatic MethodTracer.timestamp()J
//!          lstore <fresh slot>
//!          ...original code...
//! exit:    lload <fresh slot>            (before every return, and every
//!                                         athrow outside a handler range)
//!          ldc2_w <method id>
//!          invokestatic MethodTracer.<probe>(JJ)V
//!          <return / athrow>
//! ```
//!
//! Branches into an exit land on the injected sequence; branches to the
//! first instruction land after the entry prologue. An `athrow` covered by
//! one of the method's own handlers is not an exit: the handler runs in the
//! same frame and reaches its own return.

use std::collections::BTreeMap;

use log::debug;
use method_tracer_common::{
    Probe, PROBE_DESCRIPTOR, PROBE_OWNER, TIMESTAMP_DESCRIPTOR, TIMESTAMP_METHOD,
};

use crate::classfile::bytes::{ByteReader, ByteWriter};
use crate::classfile::code::{self, opcodes, CodeAttribute, Relocated};
use crate::classfile::stack_map::{self, VerificationType};
use crate::classfile::{
    AttributeInfo, ClassFile, ConstantPool, LINE_NUMBER_TABLE, LOCAL_VARIABLE_TABLE,
    LOCAL_VARIABLE_TYPE_TABLE, RUNTIME_INVISIBLE_TYPE_ANNOTATIONS, RUNTIME_VISIBLE_TYPE_ANNOTATIONS,
    STACK_MAP_TABLE,
};
use crate::domain::{ClassFormatError, InstrumentationError, Method};

/// Extra operand stack needed by the exit sequence: two longs.
const PROBE_STACK: u16 = 4;

pub struct Transform<'a> {
    method: &'a Method,
}

impl<'a> Transform<'a> {
    #[must_use]
    pub fn new(method: &'a Method) -> Self {
        Self { method }
    }

    /// Probe this method's exits call, if any.
    #[must_use]
    pub fn probe(&self) -> Option<Probe> {
        Probe::select(self.method.modification, self.method.is_object_init())
    }

    /// Rewrite the body of `class.methods[index]` in place.
    ///
    /// Returns `false` when there is nothing to do (no probe, or no code).
    pub fn apply(&self, class: &mut ClassFile, index: usize) -> Result<bool, InstrumentationError> {
        let Some(probe) = self.probe() else {
            return Ok(false);
        };
        let is_object_class = class.name()? == "java/lang/Object";
        let ClassFile { constant_pool: pool, methods, this_class, .. } = class;
        let member = &mut methods[index];
        let Some(code_index) = member.code_index(pool) else {
            return Ok(false);
        };
        let method_name = member.name(pool)?.into_owned();
        let descriptor = member.descriptor(pool)?.into_owned();
        let is_static = member.is_static();

        let mut code = CodeAttribute::parse(&member.attributes[code_index].data)?;
        let instructions = code::decode_instructions(&code.code)?;
        let slot = code.max_locals;
        let max_locals = slot.checked_add(2).ok_or_else(|| InstrumentationError::TooManyLocals {
            method: self.method.name.clone(),
        })?;

        let timestamp = pool.add_method_ref(PROBE_OWNER, TIMESTAMP_METHOD, TIMESTAMP_DESCRIPTOR)?;
        let probe_ref = pool.add_method_ref(PROBE_OWNER, probe.method_name(), PROBE_DESCRIPTOR)?;
        let method_id = pool.add_long(self.method.id.as_jlong())?;

        let mut prologue = ByteWriter::new();
        prologue.u8(opcodes::INVOKESTATIC);
        prologue.u16(timestamp);
        local_op(&mut prologue, opcodes::LSTORE, slot);
        let prologue = prologue.into_inner();

        let mut exit = ByteWriter::new();
        local_op(&mut exit, opcodes::LLOAD, slot);
        exit.u8(opcodes::LDC2_W);
        exit.u16(method_id);
        exit.u8(opcodes::INVOKESTATIC);
        exit.u16(probe_ref);
        let exit = exit.into_inner();

        let handlers = &code.exception_table;
        let splices: BTreeMap<usize, Vec<u8>> = instructions
            .iter()
            .filter(|i| i.is_return() || (i.is_throw() && !handled_locally(handlers, i.offset)))
            .map(|i| (i.offset, exit.clone()))
            .collect();

        let relocated = code::relocate(
            &self.method.name,
            code.code.len(),
            &instructions,
            &code.code,
            &prologue,
            &splices,
        )?;

        for handler in &mut code.exception_table {
            handler.start_pc = relocated.map(usize::from(handler.start_pc))?;
            handler.end_pc = relocated.map(usize::from(handler.end_pc))?;
            handler.handler_pc = relocated.map(usize::from(handler.handler_pc))?;
        }

        let mut attributes = Vec::with_capacity(code.attributes.len());
        for attribute in std::mem::take(&mut code.attributes) {
            if attribute.is_named(pool, RUNTIME_VISIBLE_TYPE_ANNOTATIONS)
                || attribute.is_named(pool, RUNTIME_INVISIBLE_TYPE_ANNOTATIONS)
            {
                continue;
            }
            let data = if attribute.is_named(pool, STACK_MAP_TABLE) {
                let initial = stack_map::initial_locals(
                    pool,
                    *this_class,
                    &method_name,
                    &descriptor,
                    is_static,
                    is_object_class,
                )?;
                remap_stack_map(&attribute.data, &initial, &relocated, usize::from(slot))?
            } else if attribute.is_named(pool, LINE_NUMBER_TABLE) {
                remap_line_numbers(&attribute.data, &relocated)?
            } else if attribute.is_named(pool, LOCAL_VARIABLE_TABLE)
                || attribute.is_named(pool, LOCAL_VARIABLE_TYPE_TABLE)
            {
                remap_local_variables(&attribute.data, &relocated)?
            } else {
                attribute.data
            };
            attributes.push(AttributeInfo { name_index: attribute.name_index, data });
        }

        code.code = relocated.code;
        code.attributes = attributes;
        code.max_locals = max_locals;
        code.max_stack = code.max_stack.saturating_add(PROBE_STACK);
        member.attributes[code_index].data = code.to_bytes();

        debug!(
            "Rewrote {} with {} ({} exit sites, slot {slot})",
            self.method.name,
            probe.method_name(),
            splices.len()
        );
        Ok(true)
    }
}

/// Emit a long load/store, widening when the slot does not fit in a byte.
fn local_op(writer: &mut ByteWriter, opcode: u8, slot: u16) {
    if let Ok(narrow) = u8::try_from(slot) {
        writer.u8(opcode);
        writer.u8(narrow);
    } else {
        writer.u8(opcodes::WIDE);
        writer.u8(opcode);
        writer.u16(slot);
    }
}

fn remap_stack_map(
    data: &[u8],
    initial: &[VerificationType],
    relocated: &Relocated,
    slot: usize,
) -> Result<Vec<u8>, ClassFormatError> {
    let mut frames = stack_map::decode(data, initial)?;
    for frame in &mut frames {
        frame.offset = u32::from(relocated.map(frame.offset as usize)?);
        for item in frame.locals.iter_mut().chain(frame.stack.iter_mut()) {
            if let VerificationType::Uninitialized(offset) = item {
                *offset = relocated.map(usize::from(*offset))?;
            }
        }
        frame.set_local(slot, VerificationType::Long);
    }
    Ok(stack_map::encode(&frames))
}

fn remap_line_numbers(data: &[u8], relocated: &Relocated) -> Result<Vec<u8>, ClassFormatError> {
    let mut reader = ByteReader::new(data);
    let mut writer = ByteWriter::new();
    let count = reader.u16()?;
    writer.u16(count);
    for _ in 0..count {
        writer.u16(relocated.map(usize::from(reader.u16()?))?);
        writer.u16(reader.u16()?);
    }
    Ok(writer.into_inner())
}

/// Shared by `LocalVariableTable` and `LocalVariableTypeTable`.
fn remap_local_variables(data: &[u8], relocated: &Relocated) -> Result<Vec<u8>, ClassFormatError> {
    let mut reader = ByteReader::new(data);
    let mut writer = ByteWriter::new();
    let count = reader.u16()?;
    writer.u16(count);
    for _ in 0..count {
        let start = usize::from(reader.u16()?);
        let end = start + usize::from(reader.u16()?);
        let new_start = relocated.map(start)?;
        let new_end = relocated.map(end)?;
        writer.u16(new_start);
        writer.u16(new_end - new_start);
        writer.bytes(reader.bytes(6)?);
    }
    Ok(writer.into_inner())
}

/// Probe calls found in a method body, in code order. Used by tests and the
/// CLI report to confirm what was injected.
pub fn probe_calls(
    pool: &ConstantPool,
    code: &CodeAttribute,
) -> Result<Vec<String>, ClassFormatError> {
    let mut calls = Vec::new();
    for instruction in code::decode_instructions(&code.code)? {
        if instruction.opcode != opcodes::INVOKESTATIC {
            continue;
        }
        let operand = instruction.offset + 1;
        let index = u16::from_be_bytes([code.code[operand], code.code[operand + 1]]);
        if let Ok((owner, name, _)) = pool.method_ref(index) {
            if owner == PROBE_OWNER {
                calls.push(name.into_owned());
            }
        }
    }
    Ok(calls)
}

/// Whether an instruction at `offset` lies inside some handler's range.
fn handled_locally(handlers: &[code::ExceptionHandler], offset: usize) -> bool {
    handlers.iter().any(|h| (usize::from(h.start_pc)..usize::from(h.end_pc)).contains(&offset))
}
