//! Method filters supplied by the user.
//!
//! A filter string selects methods in one of four ways:
//!
//! | Text                 | Selects                                        |
//! |----------------------|------------------------------------------------|
//! | `com.example.Foo`    | every method of class `com.example.Foo`        |
//! | `com.example.Foo::b` | method `b` of class `com.example.Foo`          |
//! | `::b`                | method `b` in any class                        |
//! | `@com.example.Trace` | methods annotated (or in a class annotated)    |
//!
//! Invalid text produces no filter at all and is dropped from the effective
//! filter set.

use method_tracer_common::Modification;

const METHOD_SEPARATOR: &str = "::";
const ANNOTATION_PREFIX: char = '@';

/// Method names that are not identifiers but may still be selected.
const LIFECYCLE_METHODS: &[&str] = &["<clinit>", "<init>"];

/// Reserved words that can never be used as a name segment.
const KEYWORDS: &[&str] = &[
    "_", "abstract", "assert", "boolean", "break", "byte", "case", "catch", "char", "class",
    "const", "continue", "default", "do", "double", "else", "enum", "extends", "false", "final",
    "finally", "float", "for", "goto", "if", "implements", "import", "instanceof", "int",
    "interface", "long", "native", "new", "null", "package", "private", "protected", "public",
    "return", "short", "static", "strictfp", "super", "switch", "synchronized", "this", "throw",
    "throws", "transient", "true", "try", "void", "volatile", "while",
];

/// Parsed method selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Filter {
    pub class_name: Option<String>,
    pub method_name: Option<String>,
    pub annotation_name: Option<String>,
    pub modification: Modification,
}

impl Filter {
    /// Parse filter text, returning `None` when it is not a valid selector.
    #[must_use]
    pub fn parse(text: &str, modification: Modification) -> Option<Self> {
        if let Some(annotation) = text.strip_prefix(ANNOTATION_PREFIX) {
            return is_qualified_name(annotation).then(|| Self {
                class_name: None,
                method_name: None,
                annotation_name: Some(annotation.to_string()),
                modification,
            });
        }

        if let Some((class_part, method_part)) = text.split_once(METHOD_SEPARATOR) {
            if !is_method_name(method_part) {
                return None;
            }
            let class_name = if class_part.is_empty() {
                None
            } else if is_qualified_name(class_part) {
                Some(class_part.to_string())
            } else {
                return None;
            };
            return Some(Self {
                class_name,
                method_name: Some(method_part.to_string()),
                annotation_name: None,
                modification,
            });
        }

        is_qualified_name(text).then(|| Self {
            class_name: Some(text.to_string()),
            method_name: None,
            annotation_name: None,
            modification,
        })
    }

    #[must_use]
    pub fn is_valid(text: &str) -> bool {
        Self::parse(text, Modification::NONE).is_some()
    }

    /// Check whether this filter selects a method.
    ///
    /// `class_name` is the dotted class name; annotation names are dotted too.
    #[must_use]
    pub fn matches(
        &self,
        class_name: &str,
        method_name: &str,
        class_annotations: &[String],
        method_annotations: &[String],
    ) -> bool {
        if let Some(annotation) = &self.annotation_name {
            return class_annotations.iter().chain(method_annotations).any(|a| a == annotation);
        }
        let class_matches = self.class_name.as_deref().map_or(true, |c| c == class_name);
        let method_matches = self.method_name.as_deref().map_or(true, |m| m == method_name);
        class_matches && method_matches
    }
}

/// Parse a list of filter texts, silently dropping the invalid ones.
pub fn parse_filters<I, S>(texts: I, modification: Modification) -> Vec<Filter>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    texts.into_iter().filter_map(|text| Filter::parse(text.as_ref(), modification)).collect()
}

fn is_method_name(name: &str) -> bool {
    LIFECYCLE_METHODS.contains(&name) || is_identifier(name)
}

fn is_qualified_name(name: &str) -> bool {
    !name.is_empty() && name.split('.').all(is_identifier)
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    is_identifier_start(first) && chars.all(is_identifier_part) && !KEYWORDS.contains(&segment)
}

fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_identifier_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}
