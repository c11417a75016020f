//! `Code` attribute model, instruction decoding and code relocation.
//!
//! Relocation is the one editing primitive the instrumentation needs: given
//! a prologue and byte sequences to splice in before chosen instructions, it
//! lays the method out again and rewrites every branch and switch so control
//! flow is unchanged. Offsets held elsewhere (exception table, debug tables,
//! stack map frames) are translated through [`Relocated::map`].

use std::collections::BTreeMap;

use super::bytes::{ByteReader, ByteWriter};
use super::AttributeInfo;
use crate::domain::{ClassFormatError, InstrumentationError};

pub mod opcodes {
    pub const LDC2_W: u8 = 0x14;
    pub const LLOAD: u8 = 0x16;
    pub const LSTORE: u8 = 0x37;
    pub const IINC: u8 = 0x84;
    pub const IRETURN: u8 = 0xac;
    pub const RETURN: u8 = 0xb1;
    pub const INVOKESTATIC: u8 = 0xb8;
    pub const ATHROW: u8 = 0xbf;
    pub const WIDE: u8 = 0xc4;
    pub const TABLESWITCH: u8 = 0xaa;
    pub const LOOKUPSWITCH: u8 = 0xab;
    pub const GOTO_W: u8 = 0xc8;
    pub const JSR_W: u8 = 0xc9;
}

use opcodes::{ATHROW, GOTO_W, IINC, IRETURN, JSR_W, LOOKUPSWITCH, RETURN, TABLESWITCH, WIDE};

/// Largest legal `code_length`.
pub const MAX_CODE_LENGTH: usize = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<AttributeInfo>,
}

impl CodeAttribute {
    pub fn parse(data: &[u8]) -> Result<Self, ClassFormatError> {
        let mut reader = ByteReader::new(data);
        let max_stack = reader.u16()?;
        let max_locals = reader.u16()?;
        let code_length = reader.u32()? as usize;
        let code = reader.bytes(code_length)?.to_vec();
        let handler_count = reader.u16()?;
        let exception_table = (0..handler_count)
            .map(|_| {
                Ok(ExceptionHandler {
                    start_pc: reader.u16()?,
                    end_pc: reader.u16()?,
                    handler_pc: reader.u16()?,
                    catch_type: reader.u16()?,
                })
            })
            .collect::<Result<_, ClassFormatError>>()?;
        let attributes = AttributeInfo::parse_all(&mut reader)?;
        if reader.remaining() > 0 {
            return Err(ClassFormatError::TrailingBytes(reader.remaining()));
        }
        Ok(Self { max_stack, max_locals, code, exception_table, attributes })
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.u16(self.max_stack);
        writer.u16(self.max_locals);
        writer.length_prefixed(&self.code);
        writer.u16(self.exception_table.len() as u16);
        for handler in &self.exception_table {
            writer.u16(handler.start_pc);
            writer.u16(handler.end_pc);
            writer.u16(handler.handler_pc);
            writer.u16(handler.catch_type);
        }
        AttributeInfo::write_all(&self.attributes, &mut writer);
        writer.into_inner()
    }
}

// =============================================================================
// INSTRUCTIONS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionKind {
    /// Copied verbatim; `length` includes the opcode.
    Plain { length: usize },
    /// Conditional or unconditional jump to an absolute target.
    Branch { target: usize, wide: bool },
    TableSwitch { default: usize, low: i32, high: i32, targets: Vec<usize> },
    LookupSwitch { default: usize, pairs: Vec<(i32, usize)> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub offset: usize,
    pub opcode: u8,
    pub kind: InstructionKind,
}

impl Instruction {
    /// Normal return of any type.
    #[must_use]
    pub fn is_return(&self) -> bool {
        (IRETURN..=RETURN).contains(&self.opcode)
    }

    #[must_use]
    pub fn is_throw(&self) -> bool {
        self.opcode == ATHROW
    }

    /// Encoded size when placed at `offset` (switch padding depends on it).
    fn size_at(&self, offset: usize) -> usize {
        match &self.kind {
            InstructionKind::Plain { length } => *length,
            InstructionKind::Branch { wide, .. } => {
                if *wide {
                    5
                } else {
                    3
                }
            }
            InstructionKind::TableSwitch { targets, .. } => {
                1 + switch_padding(offset) + 12 + 4 * targets.len()
            }
            InstructionKind::LookupSwitch { pairs, .. } => {
                1 + switch_padding(offset) + 8 + 8 * pairs.len()
            }
        }
    }
}

fn switch_padding(offset: usize) -> usize {
    (4 - (offset + 1) % 4) % 4
}

/// Length of fixed-size instructions, `None` for variable or invalid opcodes.
fn fixed_length(opcode: u8) -> Option<usize> {
    Some(match opcode {
        0x00..=0x0f
        | 0x1a..=0x35
        | 0x3b..=0x83
        | 0x85..=0x98
        | 0xac..=0xb1
        | 0xbe
        | 0xbf
        | 0xc2
        | 0xc3 => 1,
        0x10 | 0x12 | 0x15..=0x19 | 0x36..=0x3a | 0xa9 | 0xbc => 2,
        0x11 | 0x13 | 0x14 | 0x84 | 0xb2..=0xb8 | 0xbb | 0xbd | 0xc0 | 0xc1 => 3,
        0xc5 => 4,
        0xb9 | 0xba => 5,
        _ => return None,
    })
}

fn is_branch16(opcode: u8) -> bool {
    matches!(opcode, 0x99..=0xa8 | 0xc6 | 0xc7)
}

fn absolute_target(
    offset: usize,
    relative: i64,
    code_len: usize,
) -> Result<usize, ClassFormatError> {
    #[allow(clippy::cast_possible_wrap)]
    let target = offset as i64 + relative;
    if target < 0 || target >= code_len as i64 {
        return Err(ClassFormatError::BadBranchTarget { offset, target });
    }
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    Ok(target as usize)
}

/// Decode a method body into instructions with absolute branch targets.
pub fn decode_instructions(code: &[u8]) -> Result<Vec<Instruction>, ClassFormatError> {
    let mut reader = ByteReader::new(code);
    let mut instructions = Vec::new();
    while reader.remaining() > 0 {
        let offset = reader.position();
        let opcode = reader.u8()?;
        let kind = if is_branch16(opcode) {
            let relative = i64::from(reader.i16()?);
            let target = absolute_target(offset, relative, code.len())?;
            InstructionKind::Branch { target, wide: false }
        } else if opcode == GOTO_W || opcode == JSR_W {
            let relative = i64::from(reader.i32()?);
            let target = absolute_target(offset, relative, code.len())?;
            InstructionKind::Branch { target, wide: true }
        } else if opcode == TABLESWITCH {
            reader.skip(switch_padding(offset))?;
            let default = absolute_target(offset, i64::from(reader.i32()?), code.len())?;
            let low = reader.i32()?;
            let high = reader.i32()?;
            if high < low {
                return Err(ClassFormatError::InvalidOpcode { opcode, offset });
            }
            let count = i64::from(high) - i64::from(low) + 1;
            let targets = (0..count)
                .map(|_| absolute_target(offset, i64::from(reader.i32()?), code.len()))
                .collect::<Result<_, _>>()?;
            InstructionKind::TableSwitch { default, low, high, targets }
        } else if opcode == LOOKUPSWITCH {
            reader.skip(switch_padding(offset))?;
            let default = absolute_target(offset, i64::from(reader.i32()?), code.len())?;
            let npairs = reader.i32()?;
            if npairs < 0 {
                return Err(ClassFormatError::InvalidOpcode { opcode, offset });
            }
            let pairs = (0..npairs)
                .map(|_| {
                    let key = reader.i32()?;
                    Ok((key, absolute_target(offset, i64::from(reader.i32()?), code.len())?))
                })
                .collect::<Result<_, ClassFormatError>>()?;
            InstructionKind::LookupSwitch { default, pairs }
        } else if opcode == WIDE {
            let modified = reader.u8()?;
            let length = if modified == IINC { 6 } else { 4 };
            reader.skip(length - 2)?;
            InstructionKind::Plain { length }
        } else {
            let length =
                fixed_length(opcode).ok_or(ClassFormatError::InvalidOpcode { opcode, offset })?;
            reader.skip(length - 1)?;
            InstructionKind::Plain { length }
        };
        instructions.push(Instruction { offset, opcode, kind });
    }
    Ok(instructions)
}

// =============================================================================
// RELOCATION
// =============================================================================

const NOT_A_BOUNDARY: u32 = u32::MAX;

/// Result of re-laying out a method body.
#[derive(Debug, Clone)]
pub struct Relocated {
    pub code: Vec<u8>,
    /// New offset for each old instruction boundary (and the end of code).
    anchors: Vec<u32>,
}

impl Relocated {
    /// Translate an old instruction offset (or the old code length).
    ///
    /// Instructions with spliced code before them map to the start of that
    /// code, so branches into them still run it.
    pub fn map(&self, old_offset: usize) -> Result<u16, ClassFormatError> {
        match self.anchors.get(old_offset) {
            #[allow(clippy::cast_possible_truncation)]
            Some(&new) if new != NOT_A_BOUNDARY => Ok(new as u16),
            _ => Err(ClassFormatError::BadBranchTarget { offset: old_offset, target: -1 }),
        }
    }
}

/// Lay out `instructions` again with `prologue` in front and the byte
/// sequences in `splices` inserted before the instructions at their keys.
///
/// Branches that targeted the first instruction land after the prologue.
pub fn relocate(
    method: &str,
    code_length: usize,
    instructions: &[Instruction],
    original: &[u8],
    prologue: &[u8],
    splices: &BTreeMap<usize, Vec<u8>>,
) -> Result<Relocated, InstrumentationError> {
    let mut anchors = vec![NOT_A_BOUNDARY; code_length + 1];
    let mut starts = Vec::with_capacity(instructions.len());
    let mut position = prologue.len();
    for instruction in instructions {
        anchors[instruction.offset] = to_u32(position);
        position += splices.get(&instruction.offset).map_or(0, Vec::len);
        starts.push(position);
        position += instruction.size_at(position);
    }
    anchors[code_length] = to_u32(position);
    if position > MAX_CODE_LENGTH {
        return Err(InstrumentationError::CodeTooLarge {
            method: method.to_string(),
            length: position,
        });
    }

    let anchor = |old: usize| -> i64 { i64::from(anchors[old]) };
    let mut writer = ByteWriter::new();
    writer.bytes(prologue);
    for (instruction, &start) in instructions.iter().zip(&starts) {
        if let Some(splice) = splices.get(&instruction.offset) {
            writer.bytes(splice);
        }
        debug_assert_eq!(writer.len(), start);
        #[allow(clippy::cast_possible_wrap)]
        let here = start as i64;
        match &instruction.kind {
            InstructionKind::Plain { length } => {
                writer.bytes(&original[instruction.offset..instruction.offset + length]);
            }
            InstructionKind::Branch { target, wide } => {
                writer.u8(instruction.opcode);
                let relative = anchor(*target) - here;
                if *wide {
                    writer.i32(to_i32(relative));
                } else {
                    let short = i16::try_from(relative).map_err(|_| {
                        InstrumentationError::BranchOutOfRange {
                            method: method.to_string(),
                            offset: instruction.offset,
                        }
                    })?;
                    writer.i16(short);
                }
            }
            InstructionKind::TableSwitch { default, low, high, targets } => {
                writer.u8(instruction.opcode);
                writer.bytes(&[0; 3][..switch_padding(start)]);
                writer.i32(to_i32(anchor(*default) - here));
                writer.i32(*low);
                writer.i32(*high);
                for target in targets {
                    writer.i32(to_i32(anchor(*target) - here));
                }
            }
            InstructionKind::LookupSwitch { default, pairs } => {
                writer.u8(instruction.opcode);
                writer.bytes(&[0; 3][..switch_padding(start)]);
                writer.i32(to_i32(anchor(*default) - here));
                writer.i32(to_i32(pairs.len() as i64));
                for (key, target) in pairs {
                    writer.i32(*key);
                    writer.i32(to_i32(anchor(*target) - here));
                }
            }
        }
    }
    Ok(Relocated { code: writer.into_inner(), anchors })
}

// Code length is bounded by MAX_CODE_LENGTH, so these never truncate.
#[allow(clippy::cast_possible_truncation)]
fn to_u32(value: usize) -> u32 {
    value as u32
}

#[allow(clippy::cast_possible_truncation)]
fn to_i32(value: i64) -> i32 {
    value as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_simple_body() {
        // iload_1; ifeq +5; iconst_1; ireturn; iconst_0; ireturn
        let code = [0x1b, 0x99, 0x00, 0x05, 0x04, 0xac, 0x03, 0xac];
        let instructions = decode_instructions(&code).unwrap();
        assert_eq!(instructions.len(), 6);
        assert_eq!(instructions[1].kind, InstructionKind::Branch { target: 6, wide: false });
        assert!(instructions[3].is_return());
        assert!(!instructions[0].is_return());
    }

    #[test]
    fn test_decode_rejects_bad_opcode_and_target() {
        assert!(matches!(
            decode_instructions(&[0xff]),
            Err(ClassFormatError::InvalidOpcode { .. })
        ));
        assert!(matches!(
            decode_instructions(&[0xa7, 0x00, 0x10]),
            Err(ClassFormatError::BadBranchTarget { .. })
        ));
    }

    #[test]
    fn test_decode_wide_and_tableswitch() {
        // wide iinc 0x0100 by 1; iload_0; tableswitch (offset 7, pad 0) default/0/1 -> 0x1c
        let mut code = vec![0xc4, 0x84, 0x01, 0x00, 0x00, 0x01, 0x1a, 0xaa];
        for value in [0x1c_i32, 0, 1, 0x1c, 0x1c] {
            code.extend_from_slice(&value.to_be_bytes());
        }
        code.extend_from_slice(&[0x00; 8]);
        code.push(0xb1);
        let instructions = decode_instructions(&code).unwrap();
        assert_eq!(instructions[0].kind, InstructionKind::Plain { length: 6 });
        match &instructions[2].kind {
            InstructionKind::TableSwitch { default, targets, .. } => {
                assert_eq!(*default, 35);
                assert_eq!(targets, &vec![35, 35]);
            }
            other => panic!("expected tableswitch, got {other:?}"),
        }
    }

    #[test]
    fn test_relocate_shifts_branches() {
        // iload_1; ifeq -> 6; iconst_1; ireturn; iconst_0; ireturn
        let code = [0x1b, 0x99, 0x00, 0x05, 0x04, 0xac, 0x03, 0xac];
        let instructions = decode_instructions(&code).unwrap();
        let mut splices = BTreeMap::new();
        splices.insert(5, vec![0x00, 0x00]);
        splices.insert(7, vec![0x00, 0x00]);
        let relocated = relocate("t", code.len(), &instructions, &code, &[0x00], &splices).unwrap();

        assert_eq!(relocated.map(0).unwrap(), 1);
        assert_eq!(relocated.map(5).unwrap(), 6);
        // iconst_0 moved from 6 to 9, ifeq now at 2
        assert_eq!(relocated.map(6).unwrap(), 9);
        assert_eq!(relocated.code[2], 0x99);
        assert_eq!(i16::from_be_bytes([relocated.code[3], relocated.code[4]]), 7);
        assert_eq!(relocated.map(code.len()).unwrap(), 13);
        assert!(relocated.map(2).is_err());
    }

    #[test]
    fn test_relocate_repads_switch() {
        // iload_0; lookupswitch (pad 2) default -> 20, 0 pairs ; return at 12
        let mut code = vec![0x1a, 0xab, 0x00, 0x00];
        code.extend_from_slice(&11_i32.to_be_bytes());
        code.extend_from_slice(&0_i32.to_be_bytes());
        code.push(0xb1);
        let instructions = decode_instructions(&code).unwrap();
        let relocated =
            relocate("t", code.len(), &instructions, &code, &[0x00], &BTreeMap::new()).unwrap();
        // switch now at 2 with 1 byte of padding; return moves to 12
        assert_eq!(relocated.code.len(), 13);
        assert_eq!(i32::from_be_bytes(relocated.code[4..8].try_into().unwrap()), 10);
        assert_eq!(relocated.code[12], 0xb1);
    }

    #[test]
    fn test_code_attribute_round_trip() {
        let attribute = CodeAttribute {
            max_stack: 2,
            max_locals: 1,
            code: vec![0x2a, 0xb0],
            exception_table: vec![ExceptionHandler {
                start_pc: 0,
                end_pc: 1,
                handler_pc: 1,
                catch_type: 0,
            }],
            attributes: vec![],
        };
        assert_eq!(CodeAttribute::parse(&attribute.to_bytes()).unwrap(), attribute);
    }
}
