//! Constant pool model.
//!
//! Entries keep their raw form so an untouched pool writes back byte-for-byte.
//! `Long` and `Double` occupy two slots; the second slot is `Unusable`.

use std::borrow::Cow;

use super::bytes::{ByteReader, ByteWriter};
use crate::domain::ClassFormatError;

const TAG_UTF8: u8 = 1;
const TAG_INTEGER: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_FIELDREF: u8 = 9;
const TAG_METHODREF: u8 = 10;
const TAG_INTERFACE_METHODREF: u8 = 11;
const TAG_NAME_AND_TYPE: u8 = 12;
const TAG_METHOD_HANDLE: u8 = 15;
const TAG_METHOD_TYPE: u8 = 16;
const TAG_DYNAMIC: u8 = 17;
const TAG_INVOKE_DYNAMIC: u8 = 18;
const TAG_MODULE: u8 = 19;
const TAG_PACKAGE: u8 = 20;

/// Largest usable constant pool index.
const MAX_POOL_SIZE: usize = u16::MAX as usize;

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Modified UTF-8 bytes, as stored.
    Utf8(Vec<u8>),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(u16),
    String(u16),
    FieldRef { class: u16, name_and_type: u16 },
    MethodRef { class: u16, name_and_type: u16 },
    InterfaceMethodRef { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
    MethodHandle { kind: u8, reference: u16 },
    MethodType(u16),
    Dynamic { bootstrap: u16, name_and_type: u16 },
    InvokeDynamic { bootstrap: u16, name_and_type: u16 },
    Module(u16),
    Package(u16),
    /// Slot 0 and the slot after a `Long` or `Double`.
    Unusable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self { entries: vec![Constant::Unusable] }
    }
}

impl ConstantPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn parse(reader: &mut ByteReader<'_>) -> Result<Self, ClassFormatError> {
        let count = reader.u16()?;
        let mut entries = Vec::with_capacity(usize::from(count));
        entries.push(Constant::Unusable);
        let mut index: u16 = 1;
        while index < count {
            let tag = reader.u8()?;
            let constant = match tag {
                TAG_UTF8 => {
                    let len = reader.u16()?;
                    Constant::Utf8(reader.bytes(usize::from(len))?.to_vec())
                }
                TAG_INTEGER => Constant::Integer(reader.i32()?),
                TAG_FLOAT => Constant::Float(reader.u32()?),
                #[allow(clippy::cast_possible_wrap)]
                TAG_LONG => Constant::Long(reader.u64()? as i64),
                TAG_DOUBLE => Constant::Double(reader.u64()?),
                TAG_CLASS => Constant::Class(reader.u16()?),
                TAG_STRING => Constant::String(reader.u16()?),
                TAG_FIELDREF => {
                    Constant::FieldRef { class: reader.u16()?, name_and_type: reader.u16()? }
                }
                TAG_METHODREF => {
                    Constant::MethodRef { class: reader.u16()?, name_and_type: reader.u16()? }
                }
                TAG_INTERFACE_METHODREF => Constant::InterfaceMethodRef {
                    class: reader.u16()?,
                    name_and_type: reader.u16()?,
                },
                TAG_NAME_AND_TYPE => {
                    Constant::NameAndType { name: reader.u16()?, descriptor: reader.u16()? }
                }
                TAG_METHOD_HANDLE => {
                    Constant::MethodHandle { kind: reader.u8()?, reference: reader.u16()? }
                }
                TAG_METHOD_TYPE => Constant::MethodType(reader.u16()?),
                TAG_DYNAMIC => {
                    Constant::Dynamic { bootstrap: reader.u16()?, name_and_type: reader.u16()? }
                }
                TAG_INVOKE_DYNAMIC => Constant::InvokeDynamic {
                    bootstrap: reader.u16()?,
                    name_and_type: reader.u16()?,
                },
                TAG_MODULE => Constant::Module(reader.u16()?),
                TAG_PACKAGE => Constant::Package(reader.u16()?),
                _ => return Err(ClassFormatError::UnknownConstantTag { tag, index }),
            };
            let wide = matches!(constant, Constant::Long(_) | Constant::Double(_));
            entries.push(constant);
            index += 1;
            if wide {
                entries.push(Constant::Unusable);
                index += 1;
            }
        }
        // A wide constant in the last slot would overshoot the declared count.
        entries.truncate(usize::from(count.max(1)));
        Ok(Self { entries })
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn write(&self, writer: &mut ByteWriter) {
        writer.u16(self.entries.len() as u16);
        for constant in &self.entries {
            match constant {
                Constant::Utf8(bytes) => {
                    writer.u8(TAG_UTF8);
                    writer.u16(bytes.len() as u16);
                    writer.bytes(bytes);
                }
                Constant::Integer(v) => {
                    writer.u8(TAG_INTEGER);
                    writer.i32(*v);
                }
                Constant::Float(v) => {
                    writer.u8(TAG_FLOAT);
                    writer.u32(*v);
                }
                #[allow(clippy::cast_sign_loss)]
                Constant::Long(v) => {
                    writer.u8(TAG_LONG);
                    writer.u64(*v as u64);
                }
                Constant::Double(v) => {
                    writer.u8(TAG_DOUBLE);
                    writer.u64(*v);
                }
                Constant::Class(i) => write_u16_entry(writer, TAG_CLASS, *i),
                Constant::String(i) => write_u16_entry(writer, TAG_STRING, *i),
                Constant::FieldRef { class, name_and_type } => {
                    write_pair_entry(writer, TAG_FIELDREF, *class, *name_and_type);
                }
                Constant::MethodRef { class, name_and_type } => {
                    write_pair_entry(writer, TAG_METHODREF, *class, *name_and_type);
                }
                Constant::InterfaceMethodRef { class, name_and_type } => {
                    write_pair_entry(writer, TAG_INTERFACE_METHODREF, *class, *name_and_type);
                }
                Constant::NameAndType { name, descriptor } => {
                    write_pair_entry(writer, TAG_NAME_AND_TYPE, *name, *descriptor);
                }
                Constant::MethodHandle { kind, reference } => {
                    writer.u8(TAG_METHOD_HANDLE);
                    writer.u8(*kind);
                    writer.u16(*reference);
                }
                Constant::MethodType(i) => write_u16_entry(writer, TAG_METHOD_TYPE, *i),
                Constant::Dynamic { bootstrap, name_and_type } => {
                    write_pair_entry(writer, TAG_DYNAMIC, *bootstrap, *name_and_type);
                }
                Constant::InvokeDynamic { bootstrap, name_and_type } => {
                    write_pair_entry(writer, TAG_INVOKE_DYNAMIC, *bootstrap, *name_and_type);
                }
                Constant::Module(i) => write_u16_entry(writer, TAG_MODULE, *i),
                Constant::Package(i) => write_u16_entry(writer, TAG_PACKAGE, *i),
                Constant::Unusable => {}
            }
        }
    }

    /// Number of slots, including the unusable slot 0.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    #[must_use]
    pub fn get(&self, index: u16) -> Option<&Constant> {
        self.entries.get(usize::from(index))
    }

    /// Resolve a `Utf8` entry. Modified UTF-8 quirks are decoded lossily.
    pub fn utf8(&self, index: u16) -> Result<Cow<'_, str>, ClassFormatError> {
        match self.get(index) {
            Some(Constant::Utf8(bytes)) => Ok(String::from_utf8_lossy(bytes)),
            _ => Err(ClassFormatError::BadConstant { index, expected: "Utf8" }),
        }
    }

    /// Resolve a `Class` entry to its internal name.
    pub fn class_name(&self, index: u16) -> Result<Cow<'_, str>, ClassFormatError> {
        match self.get(index) {
            Some(Constant::Class(name)) => self.utf8(*name),
            _ => Err(ClassFormatError::BadConstant { index, expected: "Class" }),
        }
    }

    pub fn add_utf8(&mut self, value: &str) -> Result<u16, ClassFormatError> {
        let bytes = value.as_bytes();
        let existing = self.position(|c| matches!(c, Constant::Utf8(b) if b.as_slice() == bytes));
        match existing {
            Some(index) => Ok(index),
            None => self.push(Constant::Utf8(bytes.to_vec())),
        }
    }

    pub fn add_class(&mut self, internal_name: &str) -> Result<u16, ClassFormatError> {
        let name = self.add_utf8(internal_name)?;
        self.add_unique(Constant::Class(name))
    }

    pub fn add_name_and_type(
        &mut self,
        name: &str,
        descriptor: &str,
    ) -> Result<u16, ClassFormatError> {
        let name = self.add_utf8(name)?;
        let descriptor = self.add_utf8(descriptor)?;
        self.add_unique(Constant::NameAndType { name, descriptor })
    }

    pub fn add_method_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u16, ClassFormatError> {
        let class = self.add_class(owner)?;
        let name_and_type = self.add_name_and_type(name, descriptor)?;
        self.add_unique(Constant::MethodRef { class, name_and_type })
    }

    pub fn add_long(&mut self, value: i64) -> Result<u16, ClassFormatError> {
        self.add_unique(Constant::Long(value))
    }

    /// Resolve a `Methodref` to `(owner, name, descriptor)`.
    pub fn method_ref(
        &self,
        index: u16,
    ) -> Result<(Cow<'_, str>, Cow<'_, str>, Cow<'_, str>), ClassFormatError> {
        let Some(Constant::MethodRef { class, name_and_type }) = self.get(index) else {
            return Err(ClassFormatError::BadConstant { index, expected: "Methodref" });
        };
        let Some(Constant::NameAndType { name, descriptor }) = self.get(*name_and_type) else {
            return Err(ClassFormatError::BadConstant {
                index: *name_and_type,
                expected: "NameAndType",
            });
        };
        Ok((self.class_name(*class)?, self.utf8(*name)?, self.utf8(*descriptor)?))
    }

    fn add_unique(&mut self, constant: Constant) -> Result<u16, ClassFormatError> {
        match self.position(|c| *c == constant) {
            Some(index) => Ok(index),
            None => self.push(constant),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn position(&self, predicate: impl Fn(&Constant) -> bool) -> Option<u16> {
        // Index fits: the pool never grows past MAX_POOL_SIZE entries.
        self.entries.iter().position(predicate).map(|i| i as u16)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn push(&mut self, constant: Constant) -> Result<u16, ClassFormatError> {
        let wide = matches!(constant, Constant::Long(_) | Constant::Double(_));
        let needed = if wide { 2 } else { 1 };
        if self.entries.len() + needed > MAX_POOL_SIZE {
            return Err(ClassFormatError::ConstantPoolOverflow);
        }
        let index = self.entries.len() as u16;
        self.entries.push(constant);
        if wide {
            self.entries.push(Constant::Unusable);
        }
        Ok(index)
    }
}

fn write_u16_entry(writer: &mut ByteWriter, tag: u8, value: u16) {
    writer.u8(tag);
    writer.u16(value);
}

fn write_pair_entry(writer: &mut ByteWriter, tag: u8, first: u16, second: u16) {
    writer.u8(tag);
    writer.u16(first);
    writer.u16(second);
}
