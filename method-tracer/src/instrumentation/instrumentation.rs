use std::collections::HashMap;

use log::debug;

use super::transform::Transform;
use crate::classfile::ClassFile;
use crate::domain::{ClassLoader, InstrumentationError, Method, MethodId, Modification};
use crate::exclude;

/// Rewrites one class given its original bytes and the candidate methods
/// the runtime reported for it.
#[derive(Debug)]
pub struct Instrumentation {
    class_name: String,
    loader: ClassLoader,
    bytecode: Vec<u8>,
    /// Candidates keyed by (name, descriptor).
    methods: HashMap<(String, String), Method>,
}

impl Instrumentation {
    /// `class_name` is the internal form, e.g. `com/example/App`.
    #[must_use]
    pub fn new(class_name: impl Into<String>, loader: ClassLoader, bytecode: Vec<u8>) -> Self {
        Self { class_name: class_name.into(), loader, bytecode, methods: HashMap::new() }
    }

    pub fn add_method(
        &mut self,
        id: MethodId,
        name: &str,
        signature: &str,
        modification: Modification,
    ) {
        let method = Method::new(id, modification, Method::qualified_name(&self.class_name, name));
        self.methods.insert((name.to_string(), signature.to_string()), method);
    }

    pub fn methods(&self) -> impl Iterator<Item = &Method> {
        self.methods.values()
    }

    /// Rewritten class bytes, or `None` when no method needed a change.
    pub fn generate_bytecode(&self) -> Result<Option<Vec<u8>>, InstrumentationError> {
        let mut class = ClassFile::parse(&self.bytecode)?;
        let mut modified = 0usize;

        for index in 0..class.methods.len() {
            let member = &class.methods[index];
            let name = member.name(&class.constant_pool)?;
            let descriptor = member.descriptor(&class.constant_pool)?;
            let key = (name.into_owned(), descriptor.into_owned());
            let Some(method) = self.methods.get(&key) else {
                continue;
            };
            if method.modification.is_none() {
                continue;
            }
            if self.loader.is_bootstrap() && exclude::contains_method(&method.name) {
                debug!("Excluding method {} from instrumentation", method.name);
                continue;
            }
            if Transform::new(method).apply(&mut class, index)? {
                modified += 1;
            }
        }

        if modified == 0 {
            return Ok(None);
        }
        debug!("Instrumented {modified} method(s) in {}", self.class_name);
        Ok(Some(class.to_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::{CodeAttribute, ACC_PUBLIC, ACC_STATIC};
    use crate::domain::ClassId;

    const APP: ClassLoader = ClassLoader::Defined(1);

    fn class_bytes(name: &str, methods: &[&str]) -> Vec<u8> {
        let mut class = ClassFile::new(name, "java/lang/Object", 52).unwrap();
        for method in methods {
            let code = CodeAttribute {
                max_stack: 0,
                max_locals: 0,
                code: vec![0xb1],
                exception_table: vec![],
                attributes: vec![],
            };
            class.add_method(ACC_PUBLIC | ACC_STATIC, method, "()V", &code).unwrap();
        }
        class.to_bytes()
    }

    fn id(index: u16) -> MethodId {
        MethodId::new(ClassId(1), index)
    }

    fn run_class() -> Instrumentation {
        Instrumentation::new("a/B", APP, class_bytes("a/B", &["run"]))
    }

    #[test]
    fn test_unchanged_without_candidates() {
        let instrumentation = run_class();
        assert_eq!(instrumentation.generate_bytecode().unwrap(), None);
    }

    #[test]
    fn test_unchanged_when_modification_is_none() {
        let mut instrumentation = run_class();
        instrumentation.add_method(id(0), "run", "()V", Modification::NONE);
        assert_eq!(instrumentation.generate_bytecode().unwrap(), None);
    }

    #[test]
    fn test_signature_must_match() {
        let mut instrumentation = run_class();
        instrumentation.add_method(id(0), "run", "(I)V", Modification::TIMING);
        assert_eq!(instrumentation.generate_bytecode().unwrap(), None);
    }

    #[test]
    fn test_only_candidates_are_rewritten() {
        let original = class_bytes("a/B", &["run", "idle"]);
        let mut instrumentation = Instrumentation::new("a/B", APP, original.clone());
        instrumentation.add_method(id(0), "run", "()V", Modification::TIMING);
        let rewritten = instrumentation.generate_bytecode().unwrap().unwrap();
        assert_ne!(rewritten, original);

        let class = ClassFile::parse(&rewritten).unwrap();
        let before = ClassFile::parse(&original).unwrap();
        assert_ne!(class.methods[0].attributes, before.methods[0].attributes);
        assert_eq!(class.methods[1].attributes, before.methods[1].attributes);
        assert_eq!(instrumentation.methods().next().unwrap().name, "a.B::run");
    }

    #[test]
    fn test_excluded_method_on_bootstrap_loader() {
        let bytes = class_bytes("java/lang/Thread", &["currentThread"]);
        let mut bootstrap =
            Instrumentation::new("java/lang/Thread", ClassLoader::Bootstrap, bytes.clone());
        bootstrap.add_method(id(0), "currentThread", "()V", Modification::TRACING);
        assert_eq!(bootstrap.generate_bytecode().unwrap(), None);

        let mut app = Instrumentation::new("java/lang/Thread", ClassLoader::Defined(7), bytes);
        app.add_method(id(0), "currentThread", "()V", Modification::TRACING);
        assert!(app.generate_bytecode().unwrap().is_some());
    }

    #[test]
    fn test_garbage_bytes_fail() {
        let mut instrumentation = Instrumentation::new("a/B", APP, vec![0, 1, 2, 3]);
        instrumentation.add_method(id(0), "run", "()V", Modification::TIMING);
        assert!(matches!(
            instrumentation.generate_bytecode(),
            Err(InstrumentationError::ClassFormat(_))
        ));
    }
}
