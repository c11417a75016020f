//! Classes and methods that must never be instrumented.
//!
//! The probes injected into rewritten methods call back into the tracer, which
//! in turn relies on strings, atomics, hash maps and the event machinery. If
//! any of those were themselves instrumented, the first probe call would
//! re-enter the probe path before it is ready, causing unbounded recursion,
//! deadlock on class initialization, or class-loading circularity.
//!
//! The tables are compiled in; they are not configurable at runtime. Class
//! names use the internal form (`java/lang/String`), method names use the
//! qualified form (`java.lang.Thread::currentThread`).

/// Classes excluded by exact internal name.
const EXCLUDED_CLASSES: &[&str] = &[
    "java/lang/String",
    "java/lang/StringLatin1",
    "java/lang/StringUTF16",
    "java/lang/StringConcatHelper",
    "java/lang/StringBuilder",
    "java/lang/AbstractStringBuilder",
    "java/lang/Long",
    "java/lang/Integer",
    "java/lang/Math",
    "java/lang/System",
    "java/lang/ThreadLocal",
    "java/lang/ThreadLocal$ThreadLocalMap",
    "java/util/concurrent/ConcurrentHashMap",
    "java/util/concurrent/ConcurrentHashMap$Node",
    "java/util/concurrent/atomic/AtomicLong",
    "java/util/concurrent/atomic/AtomicBoolean",
    "java/util/HashMap",
    "java/util/HashMap$Node",
    "java/util/Objects",
    "java/util/Arrays",
    "jdk/internal/misc/Unsafe",
    "jdk/internal/util/Preconditions",
    "jdk/internal/util/ArraysSupport",
];

/// Packages and type families excluded by internal-name prefix.
const EXCLUDED_PREFIXES: &[&str] = &[
    "jdk/jfr/",
    "jdk/internal/event/",
    "jdk/internal/classfile/",
    "java/lang/classfile/",
    "java/lang/invoke/",
    "java/lang/ref/",
    "sun/invoke/",
    "jdk/internal/vm/",
    "jdk/internal/reflect/",
];

/// Individual methods excluded by qualified name.
const EXCLUDED_METHODS: &[&str] = &[
    "java.lang.Thread::currentThread",
    "java.lang.Thread::currentCarrierThread",
    "java.lang.Thread::getNextThreadIdOffset",
    "java.lang.Object::getClass",
    "java.lang.Object::hashCode",
    "java.lang.Class::getName",
    "java.lang.Class::initClassName",
    "java.lang.Class::isPrimitive",
];

/// Check whether a class (internal name) must never be instrumented.
#[must_use]
pub fn contains_class(internal_name: &str) -> bool {
    EXCLUDED_CLASSES.contains(&internal_name)
        || EXCLUDED_PREFIXES.iter().any(|prefix| internal_name.starts_with(prefix))
}

/// Check whether a method (qualified name) must never be instrumented.
#[must_use]
pub fn contains_method(qualified_name: &str) -> bool {
    EXCLUDED_METHODS.contains(&qualified_name)
}
