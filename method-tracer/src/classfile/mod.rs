//! # JVM Class-File Model
//!
//! A structural model of the class-file format, just deep enough to rewrite
//! method bodies and write the class back out:
//!
//! - [`ClassFile`]: header, constant pool, members, attributes
//! - [`ConstantPool`]: raw entries plus the few builders the rewriter needs
//! - [`CodeAttribute`](code::CodeAttribute): method bodies and relocation
//! - [`stack_map`]: `StackMapTable` frames for verifiable output
//!
//! Everything the rewriter does not touch is kept as raw bytes, so untouched
//! methods, fields and attributes are written back exactly as they were read.

pub mod bytes;
pub mod code;
pub mod constant_pool;
pub mod stack_map;

pub use code::CodeAttribute;
pub use constant_pool::{Constant, ConstantPool};

use std::borrow::Cow;

use bytes::{ByteReader, ByteWriter};

use crate::domain::ClassFormatError;

pub const MAGIC: u32 = 0xCAFE_BABE;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_SUPER: u16 = 0x0020;

pub const CODE: &str = "Code";
pub const STACK_MAP_TABLE: &str = "StackMapTable";
pub const LINE_NUMBER_TABLE: &str = "LineNumberTable";
pub const LOCAL_VARIABLE_TABLE: &str = "LocalVariableTable";
pub const LOCAL_VARIABLE_TYPE_TABLE: &str = "LocalVariableTypeTable";
pub const RUNTIME_VISIBLE_ANNOTATIONS: &str = "RuntimeVisibleAnnotations";
pub const RUNTIME_INVISIBLE_ANNOTATIONS: &str = "RuntimeInvisibleAnnotations";
pub const RUNTIME_VISIBLE_TYPE_ANNOTATIONS: &str = "RuntimeVisibleTypeAnnotations";
pub const RUNTIME_INVISIBLE_TYPE_ANNOTATIONS: &str = "RuntimeInvisibleTypeAnnotations";

/// An attribute kept as its name index plus raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeInfo {
    pub name_index: u16,
    pub data: Vec<u8>,
}

impl AttributeInfo {
    pub(crate) fn parse_all(reader: &mut ByteReader<'_>) -> Result<Vec<Self>, ClassFormatError> {
        let count = reader.u16()?;
        (0..count)
            .map(|_| {
                let name_index = reader.u16()?;
                let length = reader.u32()? as usize;
                Ok(Self { name_index, data: reader.bytes(length)?.to_vec() })
            })
            .collect()
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn write_all(attributes: &[Self], writer: &mut ByteWriter) {
        writer.u16(attributes.len() as u16);
        for attribute in attributes {
            writer.u16(attribute.name_index);
            writer.length_prefixed(&attribute.data);
        }
    }

    /// Check the attribute name without allocating.
    #[must_use]
    pub fn is_named(&self, pool: &ConstantPool, name: &str) -> bool {
        matches!(
            pool.get(self.name_index),
            Some(Constant::Utf8(bytes)) if bytes.as_slice() == name.as_bytes()
        )
    }
}

/// Field or method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<AttributeInfo>,
}

impl MemberInfo {
    fn parse(reader: &mut ByteReader<'_>) -> Result<Self, ClassFormatError> {
        Ok(Self {
            access_flags: reader.u16()?,
            name_index: reader.u16()?,
            descriptor_index: reader.u16()?,
            attributes: AttributeInfo::parse_all(reader)?,
        })
    }

    fn write(&self, writer: &mut ByteWriter) {
        writer.u16(self.access_flags);
        writer.u16(self.name_index);
        writer.u16(self.descriptor_index);
        AttributeInfo::write_all(&self.attributes, writer);
    }

    pub fn name<'p>(&self, pool: &'p ConstantPool) -> Result<Cow<'p, str>, ClassFormatError> {
        pool.utf8(self.name_index)
    }

    pub fn descriptor<'p>(&self, pool: &'p ConstantPool) -> Result<Cow<'p, str>, ClassFormatError> {
        pool.utf8(self.descriptor_index)
    }

    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }

    /// Index of the `Code` attribute, absent for abstract and native methods.
    #[must_use]
    pub fn code_index(&self, pool: &ConstantPool) -> Option<usize> {
        self.attributes.iter().position(|a| a.is_named(pool, CODE))
    }

    /// Annotation type names in dotted form.
    pub fn annotations(&self, pool: &ConstantPool) -> Result<Vec<String>, ClassFormatError> {
        annotation_names(&self.attributes, pool)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<MemberInfo>,
    pub methods: Vec<MemberInfo>,
    pub attributes: Vec<AttributeInfo>,
}

impl ClassFile {
    /// Start an empty public class. Used to synthesize classes.
    pub fn new(name: &str, super_name: &str, major_version: u16) -> Result<Self, ClassFormatError> {
        let mut constant_pool = ConstantPool::new();
        let this_class = constant_pool.add_class(name)?;
        let super_class = constant_pool.add_class(super_name)?;
        Ok(Self {
            minor_version: 0,
            major_version,
            constant_pool,
            access_flags: ACC_PUBLIC | ACC_SUPER,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        })
    }

    pub fn parse(data: &[u8]) -> Result<Self, ClassFormatError> {
        let mut reader = ByteReader::new(data);
        let magic = reader.u32()?;
        if magic != MAGIC {
            return Err(ClassFormatError::BadMagic(magic));
        }
        let minor_version = reader.u16()?;
        let major_version = reader.u16()?;
        let constant_pool = ConstantPool::parse(&mut reader)?;
        let access_flags = reader.u16()?;
        let this_class = reader.u16()?;
        let super_class = reader.u16()?;
        let interface_count = reader.u16()?;
        let interfaces = (0..interface_count).map(|_| reader.u16()).collect::<Result<_, _>>()?;
        let field_count = reader.u16()?;
        let fields =
            (0..field_count).map(|_| MemberInfo::parse(&mut reader)).collect::<Result<_, _>>()?;
        let method_count = reader.u16()?;
        let methods =
            (0..method_count).map(|_| MemberInfo::parse(&mut reader)).collect::<Result<_, _>>()?;
        let attributes = AttributeInfo::parse_all(&mut reader)?;
        if reader.remaining() > 0 {
            return Err(ClassFormatError::TrailingBytes(reader.remaining()));
        }
        Ok(Self {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.u32(MAGIC);
        writer.u16(self.minor_version);
        writer.u16(self.major_version);
        self.constant_pool.write(&mut writer);
        writer.u16(self.access_flags);
        writer.u16(self.this_class);
        writer.u16(self.super_class);
        writer.u16(self.interfaces.len() as u16);
        for interface in &self.interfaces {
            writer.u16(*interface);
        }
        writer.u16(self.fields.len() as u16);
        for field in &self.fields {
            field.write(&mut writer);
        }
        writer.u16(self.methods.len() as u16);
        for method in &self.methods {
            method.write(&mut writer);
        }
        AttributeInfo::write_all(&self.attributes, &mut writer);
        writer.into_inner()
    }

    /// Internal name of this class, e.g. `java/lang/Object`.
    pub fn name(&self) -> Result<String, ClassFormatError> {
        Ok(self.constant_pool.class_name(self.this_class)?.into_owned())
    }

    /// Class-level annotation type names in dotted form.
    pub fn annotations(&self) -> Result<Vec<String>, ClassFormatError> {
        annotation_names(&self.attributes, &self.constant_pool)
    }

    /// Add a method with a body. Used to synthesize classes.
    pub fn add_method(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        code: &CodeAttribute,
    ) -> Result<(), ClassFormatError> {
        let name_index = self.constant_pool.add_utf8(name)?;
        let descriptor_index = self.constant_pool.add_utf8(descriptor)?;
        let code_name = self.constant_pool.add_utf8(CODE)?;
        self.methods.push(MemberInfo {
            access_flags,
            name_index,
            descriptor_index,
            attributes: vec![AttributeInfo { name_index: code_name, data: code.to_bytes() }],
        });
        Ok(())
    }
}

fn annotation_names(
    attributes: &[AttributeInfo],
    pool: &ConstantPool,
) -> Result<Vec<String>, ClassFormatError> {
    let mut names = Vec::new();
    for attribute in attributes {
        if attribute.is_named(pool, RUNTIME_VISIBLE_ANNOTATIONS)
            || attribute.is_named(pool, RUNTIME_INVISIBLE_ANNOTATIONS)
        {
            let mut reader = ByteReader::new(&attribute.data);
            let count = reader.u16()?;
            for _ in 0..count {
                let type_index = read_annotation(&mut reader)?;
                let descriptor = pool.utf8(type_index)?;
                let name = descriptor
                    .strip_prefix('L')
                    .and_then(|d| d.strip_suffix(';'))
                    .unwrap_or(descriptor.as_ref());
                names.push(name.replace('/', "."));
            }
        }
    }
    Ok(names)
}

/// Skip over one annotation, returning its type descriptor index.
fn read_annotation(reader: &mut ByteReader<'_>) -> Result<u16, ClassFormatError> {
    let type_index = reader.u16()?;
    let pairs = reader.u16()?;
    for _ in 0..pairs {
        reader.u16()?;
        skip_element_value(reader)?;
    }
    Ok(type_index)
}

fn skip_element_value(reader: &mut ByteReader<'_>) -> Result<(), ClassFormatError> {
    let offset = reader.position();
    match reader.u8()? {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' | b'c' => reader.skip(2),
        b'e' => reader.skip(4),
        b'@' => read_annotation(reader).map(|_| ()),
        b'[' => {
            let count = reader.u16()?;
            (0..count).try_for_each(|_| skip_element_value(reader))
        }
        tag => Err(ClassFormatError::InvalidOpcode { opcode: tag, offset }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_class() -> ClassFile {
        let mut class = ClassFile::new("com/example/App", "java/lang/Object", 52).unwrap();
        let code = CodeAttribute {
            max_stack: 0,
            max_locals: 1,
            code: vec![0xb1],
            exception_table: vec![],
            attributes: vec![],
        };
        class.add_method(ACC_PUBLIC, "run", "()V", &code).unwrap();
        class
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        let bytes = sample_class().to_bytes();
        let parsed = ClassFile::parse(&bytes).unwrap();
        assert_eq!(parsed.to_bytes(), bytes);
        assert_eq!(parsed.name().unwrap(), "com/example/App");
        let method = &parsed.methods[0];
        assert_eq!(method.name(&parsed.constant_pool).unwrap(), "run");
        assert_eq!(method.code_index(&parsed.constant_pool), Some(0));
    }

    #[test]
    fn test_bad_magic() {
        assert_eq!(ClassFile::parse(&[0, 0, 0, 1]), Err(ClassFormatError::BadMagic(1)));
        assert_eq!(ClassFile::parse(&[0xCA, 0xFE]), Err(ClassFormatError::UnexpectedEof(0)));
    }

    #[test]
    fn test_annotation_names() {
        let mut class = sample_class();
        let name = class.constant_pool.add_utf8(RUNTIME_VISIBLE_ANNOTATIONS).unwrap();
        let trace = class.constant_pool.add_utf8("Lcom/example/Trace;").unwrap();
        let value_name = class.constant_pool.add_utf8("value").unwrap();
        let mut writer = ByteWriter::new();
        writer.u16(1);
        writer.u16(trace);
        writer.u16(1);
        writer.u16(value_name);
        writer.u8(b'[');
        writer.u16(1);
        writer.u8(b's');
        writer.u16(value_name);
        let attribute = AttributeInfo { name_index: name, data: writer.into_inner() };
        class.methods[0].attributes.push(attribute);

        let parsed = ClassFile::parse(&class.to_bytes()).unwrap();
        let annotations = parsed.methods[0].annotations(&parsed.constant_pool).unwrap();
        assert_eq!(annotations, vec!["com.example.Trace"]);
        assert!(parsed.annotations().unwrap().is_empty());
    }
}
