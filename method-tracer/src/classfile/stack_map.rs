//! `StackMapTable` decoding and re-encoding.
//!
//! Frames are decoded against the implicit initial frame of the method into
//! absolute offsets with explicit locals and stack. The rewriter then adjusts
//! them and writes everything back as `full_frame` entries, which keeps the
//! encoder independent of how the original compiler compressed the table.

use super::bytes::{ByteReader, ByteWriter};
use super::constant_pool::ConstantPool;
use crate::domain::ClassFormatError;

const ITEM_TOP: u8 = 0;
const ITEM_INTEGER: u8 = 1;
const ITEM_FLOAT: u8 = 2;
const ITEM_DOUBLE: u8 = 3;
const ITEM_LONG: u8 = 4;
const ITEM_NULL: u8 = 5;
const ITEM_UNINITIALIZED_THIS: u8 = 6;
const ITEM_OBJECT: u8 = 7;
const ITEM_UNINITIALIZED: u8 = 8;

const SAME_LOCALS_1_STACK_ITEM_EXTENDED: u8 = 247;
const CHOP_MIN: u8 = 248;
const CHOP_MAX: u8 = 250;
const SAME_FRAME_EXTENDED: u8 = 251;
const APPEND_MAX: u8 = 254;
const FULL_FRAME: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    /// Constant pool index of a `Class` entry.
    Object(u16),
    /// Offset of the `new` instruction that created the value.
    Uninitialized(u16),
}

impl VerificationType {
    /// Local variable slots occupied by a value of this type.
    #[must_use]
    pub fn slots(self) -> usize {
        match self {
            Self::Long | Self::Double => 2,
            _ => 1,
        }
    }

    fn read(reader: &mut ByteReader<'_>) -> Result<Self, ClassFormatError> {
        Ok(match reader.u8()? {
            ITEM_TOP => Self::Top,
            ITEM_INTEGER => Self::Integer,
            ITEM_FLOAT => Self::Float,
            ITEM_DOUBLE => Self::Double,
            ITEM_LONG => Self::Long,
            ITEM_NULL => Self::Null,
            ITEM_UNINITIALIZED_THIS => Self::UninitializedThis,
            ITEM_OBJECT => Self::Object(reader.u16()?),
            ITEM_UNINITIALIZED => Self::Uninitialized(reader.u16()?),
            other => return Err(ClassFormatError::BadStackMapFrame(other)),
        })
    }

    fn write(self, writer: &mut ByteWriter) {
        match self {
            Self::Top => writer.u8(ITEM_TOP),
            Self::Integer => writer.u8(ITEM_INTEGER),
            Self::Float => writer.u8(ITEM_FLOAT),
            Self::Double => writer.u8(ITEM_DOUBLE),
            Self::Long => writer.u8(ITEM_LONG),
            Self::Null => writer.u8(ITEM_NULL),
            Self::UninitializedThis => writer.u8(ITEM_UNINITIALIZED_THIS),
            Self::Object(index) => {
                writer.u8(ITEM_OBJECT);
                writer.u16(index);
            }
            Self::Uninitialized(offset) => {
                writer.u8(ITEM_UNINITIALIZED);
                writer.u16(offset);
            }
        }
    }
}

/// A fully expanded frame at an absolute bytecode offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub offset: u32,
    pub locals: Vec<VerificationType>,
    pub stack: Vec<VerificationType>,
}

impl Frame {
    /// Set the local at `slot` to `value`, padding the gap with `Top`.
    ///
    /// Only used for a slot at or beyond every slot the frame already
    /// describes, which holds for a freshly allocated local.
    pub fn set_local(&mut self, slot: usize, value: VerificationType) {
        let mut used: usize = self.locals.iter().map(|t| t.slots()).sum();
        while used < slot {
            self.locals.push(VerificationType::Top);
            used += 1;
        }
        self.locals.push(value);
    }
}

/// Locals of the implicit frame at offset 0, derived from the descriptor.
pub fn initial_locals(
    pool: &mut ConstantPool,
    this_class: u16,
    method_name: &str,
    descriptor: &str,
    is_static: bool,
    is_object_class: bool,
) -> Result<Vec<VerificationType>, ClassFormatError> {
    let mut locals = Vec::new();
    if !is_static {
        if method_name == "<init>" && !is_object_class {
            locals.push(VerificationType::UninitializedThis);
        } else {
            locals.push(VerificationType::Object(this_class));
        }
    }
    for parameter in parameter_types(descriptor)? {
        let vtype = match parameter.as_bytes()[0] {
            b'B' | b'C' | b'I' | b'S' | b'Z' => VerificationType::Integer,
            b'F' => VerificationType::Float,
            b'J' => VerificationType::Long,
            b'D' => VerificationType::Double,
            b'L' => VerificationType::Object(pool.add_class(&parameter[1..parameter.len() - 1])?),
            _ => VerificationType::Object(pool.add_class(parameter)?),
        };
        locals.push(vtype);
    }
    Ok(locals)
}

/// Split a method descriptor into its parameter type descriptors.
pub fn parameter_types(descriptor: &str) -> Result<Vec<&str>, ClassFormatError> {
    let bad = || ClassFormatError::BadDescriptor(descriptor.to_string());
    let inner = descriptor
        .strip_prefix('(')
        .and_then(|rest| rest.split_once(')'))
        .map(|(params, _)| params)
        .ok_or_else(bad)?;

    let bytes = inner.as_bytes();
    let mut parameters = Vec::new();
    let mut start = 0;
    while start < bytes.len() {
        let mut end = start;
        while bytes[end] == b'[' {
            end += 1;
            if end >= bytes.len() {
                return Err(bad());
            }
        }
        match bytes[end] {
            b'L' => {
                let semicolon = inner[end..].find(';').ok_or_else(bad)?;
                end += semicolon;
            }
            b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' => {}
            _ => return Err(bad()),
        }
        parameters.push(&inner[start..=end]);
        start = end + 1;
    }
    Ok(parameters)
}

/// Decode a `StackMapTable` attribute body into absolute, expanded frames.
pub fn decode(
    data: &[u8],
    initial_locals: &[VerificationType],
) -> Result<Vec<Frame>, ClassFormatError> {
    let mut reader = ByteReader::new(data);
    let count = reader.u16()?;
    let mut frames = Vec::with_capacity(usize::from(count));
    let mut locals = initial_locals.to_vec();
    let mut previous: Option<u32> = None;

    for _ in 0..count {
        let frame_type = reader.u8()?;
        let (delta, stack) = match frame_type {
            0..=63 => (u16::from(frame_type), Vec::new()),
            64..=127 => (u16::from(frame_type - 64), vec![VerificationType::read(&mut reader)?]),
            SAME_LOCALS_1_STACK_ITEM_EXTENDED => {
                let delta = reader.u16()?;
                (delta, vec![VerificationType::read(&mut reader)?])
            }
            CHOP_MIN..=CHOP_MAX => {
                let delta = reader.u16()?;
                let chop = usize::from(SAME_FRAME_EXTENDED - frame_type);
                locals.truncate(locals.len().saturating_sub(chop));
                (delta, Vec::new())
            }
            SAME_FRAME_EXTENDED => (reader.u16()?, Vec::new()),
            252..=APPEND_MAX => {
                let delta = reader.u16()?;
                for _ in 0..(frame_type - SAME_FRAME_EXTENDED) {
                    locals.push(VerificationType::read(&mut reader)?);
                }
                (delta, Vec::new())
            }
            FULL_FRAME => {
                let delta = reader.u16()?;
                let local_count = reader.u16()?;
                locals = (0..local_count)
                    .map(|_| VerificationType::read(&mut reader))
                    .collect::<Result<_, _>>()?;
                let stack_count = reader.u16()?;
                let stack = (0..stack_count)
                    .map(|_| VerificationType::read(&mut reader))
                    .collect::<Result<_, _>>()?;
                (delta, stack)
            }
            reserved => return Err(ClassFormatError::BadStackMapFrame(reserved)),
        };
        let offset = match previous {
            None => u32::from(delta),
            Some(prev) => prev + u32::from(delta) + 1,
        };
        previous = Some(offset);
        frames.push(Frame { offset, locals: locals.clone(), stack });
    }
    Ok(frames)
}

/// Encode frames as a `StackMapTable` attribute body of `full_frame` entries.
///
/// Frames must be sorted by offset with no duplicates.
#[allow(clippy::cast_possible_truncation)]
pub fn encode(frames: &[Frame]) -> Vec<u8> {
    let mut writer = ByteWriter::new();
    writer.u16(frames.len() as u16);
    let mut previous: Option<u32> = None;
    for frame in frames {
        let delta = match previous {
            None => frame.offset,
            Some(prev) => frame.offset - prev - 1,
        };
        previous = Some(frame.offset);
        writer.u8(FULL_FRAME);
        writer.u16(delta as u16);
        writer.u16(frame.locals.len() as u16);
        for local in &frame.locals {
            local.write(&mut writer);
        }
        writer.u16(frame.stack.len() as u16);
        for item in &frame.stack {
            item.write(&mut writer);
        }
    }
    writer.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use VerificationType::{Integer, Long, Object, Top};

    #[test]
    fn test_parameter_types() {
        let params = parameter_types("(IJ[Ljava/lang/String;[[DLjava/util/List;Z)V").unwrap();
        assert_eq!(params, vec!["I", "J", "[Ljava/lang/String;", "[[D", "Ljava/util/List;", "Z"]);
        assert!(parameter_types("()V").unwrap().is_empty());
        assert!(parameter_types("(Q)V").is_err());
        assert!(parameter_types("(Ljava/lang").is_err());
    }

    #[test]
    fn test_initial_locals() {
        let mut pool = ConstantPool::new();
        let this = pool.add_class("a/B").unwrap();
        let locals = initial_locals(&mut pool, this, "run", "(JI)V", false, false).unwrap();
        assert_eq!(locals, vec![Object(this), Long, Integer]);

        let ctor = initial_locals(&mut pool, this, "<init>", "()V", false, false).unwrap();
        assert_eq!(ctor, vec![VerificationType::UninitializedThis]);

        let object_ctor = initial_locals(&mut pool, this, "<init>", "()V", false, true).unwrap();
        assert_eq!(object_ctor, vec![Object(this)]);
    }

    #[test]
    fn test_decode_compressed_frames() {
        // same_frame(5), append(+I) delta 3,
        // same_locals_1_stack_item(Integer) delta 2, chop 1 delta 0
        let data =
            [0x00, 0x04, 5, 252, 0x00, 0x03, ITEM_INTEGER, 64 + 2, ITEM_INTEGER, 250, 0x00, 0x00];
        let frames = decode(&data, &[Long]).unwrap();
        let offsets: Vec<u32> = frames.iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![5, 9, 12, 13]);
        assert_eq!(frames[1].locals, vec![Long, Integer]);
        assert_eq!(frames[2].stack, vec![Integer]);
        assert_eq!(frames[3].locals, vec![Long]);
    }

    #[test]
    fn test_encode_then_decode_full_frames() {
        let frames = vec![
            Frame { offset: 4, locals: vec![Integer], stack: vec![] },
            Frame { offset: 10, locals: vec![Integer, Long], stack: vec![Integer] },
        ];
        let decoded = decode(&encode(&frames), &[]).unwrap();
        assert_eq!(decoded, frames);
    }

    #[test]
    fn test_set_local_pads_with_top() {
        let mut frame = Frame { offset: 0, locals: vec![Long], stack: vec![] };
        frame.set_local(4, Long);
        assert_eq!(frame.locals, vec![Long, Top, Top, Long]);
    }

    #[test]
    fn test_reserved_frame_type() {
        assert_eq!(decode(&[0x00, 0x01, 200], &[]), Err(ClassFormatError::BadStackMapFrame(200)));
    }
}
