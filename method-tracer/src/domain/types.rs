//! Domain types providing compile-time safety and self-documentation

use std::fmt;

use super::{ClassId, MethodId, Modification};

/// Qualified name of the universal object constructor.
pub const OBJECT_INIT: &str = "java.lang.Object::<init>";

/// Defining loader of a class, as reported by the runtime.
///
/// Only the distinction "bootstrap or not" matters to the tracer: classes on
/// the bootstrap loader are subject to the exclusion list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassLoader {
    Bootstrap,
    /// Any other loader, identified by an opaque runtime handle.
    Defined(u64),
}

impl ClassLoader {
    #[must_use]
    pub fn is_bootstrap(self) -> bool {
        matches!(self, Self::Bootstrap)
    }
}

impl fmt::Display for ClassLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bootstrap => f.write_str("bootstrap"),
            Self::Defined(handle) => write!(f, "loader@{handle:#x}"),
        }
    }
}

/// One instrumentation target.
///
/// `name` is the qualified form `package.Class::method`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Method {
    pub id: MethodId,
    pub modification: Modification,
    pub name: String,
}

impl Method {
    #[must_use]
    pub fn new(id: MethodId, modification: Modification, name: impl Into<String>) -> Self {
        Self { id, modification, name: name.into() }
    }

    /// Build the qualified name from an internal class name and a method name.
    #[must_use]
    pub fn qualified_name(internal_class_name: &str, method_name: &str) -> String {
        format!("{}::{method_name}", internal_class_name.replace('/', "."))
    }

    #[must_use]
    pub fn class_id(&self) -> ClassId {
        self.id.class_id()
    }

    #[must_use]
    pub fn is_object_init(&self) -> bool {
        self.name == OBJECT_INIT
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.id, self.modification)
    }
}
