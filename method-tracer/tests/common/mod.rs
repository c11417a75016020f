//! Class-file fixtures shared by the integration tests.

#![allow(dead_code)]

use method_tracer::classfile::bytes::ByteWriter;
use method_tracer::classfile::code::{CodeAttribute, ExceptionHandler};
use method_tracer::classfile::{
    AttributeInfo, ClassFile, ACC_PUBLIC, ACC_STATIC, RUNTIME_VISIBLE_ANNOTATIONS,
};

/// `return`
pub const RETURN_VOID: &[u8] = &[0xb1];

/// `iload_0; ifeq +5; iconst_1; ireturn; iconst_0; ireturn`
pub const BRANCHY_INT: &[u8] = &[0x1a, 0x99, 0x00, 0x05, 0x04, 0xac, 0x03, 0xac];

pub struct ClassBuilder {
    class: ClassFile,
}

impl ClassBuilder {
    /// `name` in internal form, e.g. `com/example/App`.
    pub fn new(name: &str) -> Self {
        Self { class: ClassFile::new(name, "java/lang/Object", 52).unwrap() }
    }

    /// Static method with the given body.
    pub fn method(mut self, name: &str, descriptor: &str, max_locals: u16, body: &[u8]) -> Self {
        let code = CodeAttribute {
            max_stack: 2,
            max_locals,
            code: body.to_vec(),
            exception_table: Vec::new(),
            attributes: Vec::new(),
        };
        self.class.add_method(ACC_PUBLIC | ACC_STATIC, name, descriptor, &code).unwrap();
        self
    }

    pub fn void_method(self, name: &str) -> Self {
        self.method(name, "()V", 0, RETURN_VOID)
    }

    /// Static method with one catch-all handler covering `[start, end)`.
    pub fn method_with_handler(
        mut self,
        name: &str,
        body: &[u8],
        handler: ExceptionHandler,
    ) -> Self {
        let code = CodeAttribute {
            max_stack: 2,
            max_locals: 1,
            code: body.to_vec(),
            exception_table: vec![handler],
            attributes: Vec::new(),
        };
        self.class.add_method(ACC_PUBLIC | ACC_STATIC, name, "()V", &code).unwrap();
        self
    }

    /// Annotate the last added method.
    pub fn annotate_method(mut self, annotation: &str) -> Self {
        let attribute = self.annotation_attribute(annotation);
        self.class.methods.last_mut().unwrap().attributes.push(attribute);
        self
    }

    pub fn annotate_class(mut self, annotation: &str) -> Self {
        let attribute = self.annotation_attribute(annotation);
        self.class.attributes.push(attribute);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.class.to_bytes()
    }

    /// `annotation` in dotted form.
    fn annotation_attribute(&mut self, annotation: &str) -> AttributeInfo {
        let pool = &mut self.class.constant_pool;
        let name_index = pool.add_utf8(RUNTIME_VISIBLE_ANNOTATIONS).unwrap();
        let type_index = pool.add_utf8(&format!("L{};", annotation.replace('.', "/"))).unwrap();
        let mut writer = ByteWriter::new();
        writer.u16(1);
        writer.u16(type_index);
        writer.u16(0);
        AttributeInfo { name_index, data: writer.into_inner() }
    }
}

/// Decoded body of method `index`.
pub fn code_of(bytes: &[u8], index: usize) -> (ClassFile, CodeAttribute) {
    let class = ClassFile::parse(bytes).unwrap();
    let method = &class.methods[index];
    let code_index = method.code_index(&class.constant_pool).unwrap();
    let code = CodeAttribute::parse(&method.attributes[code_index].data).unwrap();
    (class, code)
}

/// Names of the probe methods a method body calls, in code order.
pub fn probes_of(bytes: &[u8], index: usize) -> Vec<String> {
    let (class, code) = code_of(bytes, index);
    method_tracer::instrumentation::transform::probe_calls(&class.constant_pool, &code).unwrap()
}
