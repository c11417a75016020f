//! Boundary with the runtime's native layer.

use crate::domain::{ClassId, ClassLoader, MethodId, TracerError};
use crate::filter::Filter;
use method_tracer_common::Modification;

/// Filters flattened into parallel arrays, one slot per filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeFilters {
    pub class_names: Vec<Option<String>>,
    pub method_names: Vec<Option<String>>,
    pub annotation_names: Vec<Option<String>>,
    pub modifications: Vec<i32>,
}

impl NativeFilters {
    pub fn from_filters<'a>(filters: impl IntoIterator<Item = &'a Filter>) -> Self {
        let mut native = Self::default();
        for filter in filters {
            native.class_names.push(filter.class_name.clone());
            native.method_names.push(filter.method_name.clone());
            native.annotation_names.push(filter.annotation_name.clone());
            native.modifications.push(filter.modification.to_bits());
        }
        native
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modifications.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modifications.is_empty()
    }

    /// Rebuild the filters from the arrays.
    pub fn filters(&self) -> impl Iterator<Item = Filter> + '_ {
        (0..self.len()).map(|i| Filter {
            class_name: self.class_names[i].clone(),
            method_name: self.method_names[i].clone(),
            annotation_name: self.annotation_names[i].clone(),
            modification: Modification::from_bits(self.modifications[i]),
        })
    }
}

/// A class the runtime wants (re)instrumented, with its candidate methods
/// given as parallel arrays.
#[derive(Debug, Clone, Copy)]
pub struct ClassCandidates<'a> {
    pub module: Option<&'a str>,
    pub loader: ClassLoader,
    /// Internal name, e.g. `com/example/App`.
    pub class_name: &'a str,
    pub bytecode: &'a [u8],
    pub ids: &'a [MethodId],
    pub names: &'a [String],
    pub signatures: &'a [String],
    pub modifications: &'a [i32],
}

/// Callback the runtime invokes when a class with candidate methods is
/// loaded or retransformed.
pub trait MethodTraceHook: Send + Sync {
    /// New class bytes, or `None` to keep the bytes the runtime already has.
    fn on_method_trace(&self, candidates: &ClassCandidates<'_>) -> Option<Vec<u8>>;
}

/// Services the tracer needs from the runtime.
pub trait NativeLayer: Send + Sync {
    /// Install `filters` and retransform every loaded class whose methods'
    /// modifications changed, calling `hook` for each. Returns the ids of
    /// classes that now have at least one matching method.
    fn set_method_trace_filters(
        &self,
        filters: &NativeFilters,
        hook: &dyn MethodTraceHook,
    ) -> Result<Vec<ClassId>, TracerError>;

    /// Class ids unloaded since the previous call.
    fn drain_stale_method_tracer_ids(&self) -> Vec<ClassId>;

    /// Monotonic ticks used for timestamps and durations.
    fn counter_time(&self) -> i64;

    fn exclude_thread(&self);

    fn include_thread(&self);

    fn is_thread_excluded(&self) -> bool;

    /// Make the probe class accessible to every module.
    fn export_probe_interface(&self) -> Result<(), TracerError>;
}
