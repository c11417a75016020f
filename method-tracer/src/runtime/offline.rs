use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use log::{debug, info};
use method_tracer_common::Modification;

use crate::classfile::ClassFile;
use crate::domain::{ClassFormatError, ClassId, ClassLoader, Method, MethodId, TracerError};
use crate::filter::Filter;
use crate::tracer::{ClassCandidates, MethodTraceHook, NativeFilters, NativeLayer};

thread_local! {
    static THREAD_EXCLUDED: Cell<bool> = const { Cell::new(false) };
}

#[derive(Debug, Clone)]
struct LoadedMethod {
    name: String,
    descriptor: String,
    annotations: Vec<String>,
    modification: Modification,
}

#[derive(Debug)]
struct LoadedClass {
    id: ClassId,
    /// Internal name.
    name: String,
    loader: ClassLoader,
    annotations: Vec<String>,
    methods: Vec<LoadedMethod>,
    original: Arc<[u8]>,
    current: Arc<[u8]>,
    unloaded: bool,
}

impl LoadedClass {
    fn dotted_name(&self) -> String {
        self.name.replace('/', ".")
    }

    #[allow(clippy::cast_possible_truncation)]
    fn method_id(&self, index: usize) -> MethodId {
        MethodId::new(self.id, index as u16)
    }

    /// Combined modification of every filter matching each method.
    fn modifications(&self, filters: &[Filter]) -> Vec<Modification> {
        let class_name = self.dotted_name();
        self.methods
            .iter()
            .map(|method| {
                filters
                    .iter()
                    .filter(|f| {
                        f.matches(&class_name, &method.name, &self.annotations, &method.annotations)
                    })
                    .fold(Modification::NONE, |acc, f| acc.combine(f.modification))
            })
            .collect()
    }
}

/// A retransformation to run outside the class table lock.
struct Retransform {
    class_id: ClassId,
    class_name: String,
    loader: ClassLoader,
    original: Arc<[u8]>,
    ids: Vec<MethodId>,
    names: Vec<String>,
    signatures: Vec<String>,
    modifications: Vec<i32>,
}

/// In-process stand-in for the runtime's native layer.
///
/// Classes are defined from class-file bytes. Class ids start at 1 and method
/// ids are `class_id << 16 | method_index`. Retransformation always starts
/// from the bytes the class was defined with.
#[derive(Debug)]
pub struct OfflineRuntime {
    classes: RwLock<Vec<LoadedClass>>,
    filters: RwLock<Vec<Filter>>,
    stale: Mutex<Vec<ClassId>>,
    epoch: Instant,
    exported: AtomicBool,
}

impl Default for OfflineRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl OfflineRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self {
            classes: RwLock::new(Vec::new()),
            filters: RwLock::new(Vec::new()),
            stale: Mutex::new(Vec::new()),
            epoch: Instant::now(),
            exported: AtomicBool::new(false),
        }
    }

    /// Define a class and apply the current filters to it.
    pub fn define_class(
        &self,
        bytecode: Vec<u8>,
        loader: ClassLoader,
        hook: &dyn MethodTraceHook,
    ) -> Result<ClassId, ClassFormatError> {
        let class = ClassFile::parse(&bytecode)?;
        let annotations = class.annotations()?;
        let mut methods = Vec::with_capacity(class.methods.len());
        for member in &class.methods {
            methods.push(LoadedMethod {
                name: member.name(&class.constant_pool)?.into_owned(),
                descriptor: member.descriptor(&class.constant_pool)?.into_owned(),
                annotations: member.annotations(&class.constant_pool)?,
                modification: Modification::NONE,
            });
        }
        let name = class.name()?;
        let bytes: Arc<[u8]> = bytecode.into();

        let id = {
            let mut classes = self.classes.write().unwrap_or_else(PoisonError::into_inner);
            let id = ClassId(classes.len() as u64 + 1);
            classes.push(LoadedClass {
                id,
                name,
                loader,
                annotations,
                methods,
                original: Arc::clone(&bytes),
                current: bytes,
                unloaded: false,
            });
            id
        };
        debug!("Defined class {id}");

        let filters = self.filters.read().unwrap_or_else(PoisonError::into_inner).clone();
        if !filters.is_empty() {
            self.apply_filters(&filters, Some(id), hook);
        }
        Ok(id)
    }

    /// Unload a class. Its id is reported by the next
    /// [`NativeLayer::drain_stale_method_tracer_ids`].
    pub fn unload_class(&self, id: ClassId) -> bool {
        let mut classes = self.classes.write().unwrap_or_else(PoisonError::into_inner);
        let Some(class) = classes.iter_mut().find(|c| c.id == id && !c.unloaded) else {
            return false;
        };
        class.unloaded = true;
        self.stale.lock().unwrap_or_else(PoisonError::into_inner).push(id);
        true
    }

    /// Bytes currently installed for a class.
    #[must_use]
    pub fn class_bytes(&self, id: ClassId) -> Option<Vec<u8>> {
        self.with_class(id, |class| class.current.to_vec())
    }

    /// Internal name of a class.
    #[must_use]
    pub fn class_name(&self, id: ClassId) -> Option<String> {
        self.with_class(id, |class| class.name.clone())
    }

    #[must_use]
    pub fn is_modified(&self, id: ClassId) -> bool {
        self.with_class(id, |class| !Arc::ptr_eq(&class.original, &class.current)).unwrap_or(false)
    }

    /// Every method that currently has a modification, across loaded classes.
    #[must_use]
    pub fn modified_methods(&self) -> Vec<Method> {
        let classes = self.classes.read().unwrap_or_else(PoisonError::into_inner);
        classes
            .iter()
            .filter(|class| !class.unloaded)
            .flat_map(|class| {
                class.methods.iter().enumerate().filter(|(_, m)| !m.modification.is_none()).map(
                    move |(index, m)| {
                        let name = Method::qualified_name(&class.name, &m.name);
                        Method::new(class.method_id(index), m.modification, name)
                    },
                )
            })
            .collect()
    }

    /// Ids of loaded, not unloaded, classes in definition order.
    #[must_use]
    pub fn class_ids(&self) -> Vec<ClassId> {
        let classes = self.classes.read().unwrap_or_else(PoisonError::into_inner);
        classes.iter().filter(|c| !c.unloaded).map(|c| c.id).collect()
    }

    #[must_use]
    pub fn is_exported(&self) -> bool {
        self.exported.load(Ordering::Acquire)
    }

    fn with_class<T>(&self, id: ClassId, f: impl FnOnce(&LoadedClass) -> T) -> Option<T> {
        let classes = self.classes.read().unwrap_or_else(PoisonError::into_inner);
        classes.iter().find(|c| c.id == id && !c.unloaded).map(f)
    }

    /// Recompute modifications, retransform changed classes and return the
    /// ids of classes with at least one matching method.
    fn apply_filters(
        &self,
        filters: &[Filter],
        only: Option<ClassId>,
        hook: &dyn MethodTraceHook,
    ) -> Vec<ClassId> {
        let mut matched = Vec::new();
        let mut work = Vec::new();
        {
            let mut classes = self.classes.write().unwrap_or_else(PoisonError::into_inner);
            for class in
                classes.iter_mut().filter(|c| !c.unloaded && only.map_or(true, |id| c.id == id))
            {
                let modifications = class.modifications(filters);
                if modifications.iter().any(|m| !m.is_none()) {
                    matched.push(class.id);
                }
                let changed =
                    class.methods.iter().zip(&modifications).any(|(m, new)| m.modification != *new);
                if !changed {
                    continue;
                }

                let mut retransform = Retransform {
                    class_id: class.id,
                    class_name: class.name.clone(),
                    loader: class.loader,
                    original: Arc::clone(&class.original),
                    ids: Vec::new(),
                    names: Vec::new(),
                    signatures: Vec::new(),
                    modifications: Vec::new(),
                };
                for (index, new) in modifications.into_iter().enumerate() {
                    let id = class.method_id(index);
                    let method = &mut class.methods[index];
                    // Unchanged instrumented methods are resent since the class
                    // is rebuilt from its original bytes.
                    if method.modification.is_none() && new.is_none() {
                        continue;
                    }
                    method.modification = new;
                    retransform.ids.push(id);
                    retransform.names.push(method.name.clone());
                    retransform.signatures.push(method.descriptor.clone());
                    retransform.modifications.push(new.to_bits());
                }
                work.push(retransform);
            }
        }

        for retransform in work {
            let candidates = ClassCandidates {
                module: None,
                loader: retransform.loader,
                class_name: &retransform.class_name,
                bytecode: &retransform.original,
                ids: &retransform.ids,
                names: &retransform.names,
                signatures: &retransform.signatures,
                modifications: &retransform.modifications,
            };
            let bytes = hook.on_method_trace(&candidates).map(Arc::<[u8]>::from);
            let mut classes = self.classes.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(class) = classes.iter_mut().find(|c| c.id == retransform.class_id) {
                class.current = bytes.unwrap_or_else(|| Arc::clone(&class.original));
            }
        }
        matched
    }
}

impl NativeLayer for OfflineRuntime {
    fn set_method_trace_filters(
        &self,
        filters: &NativeFilters,
        hook: &dyn MethodTraceHook,
    ) -> Result<Vec<ClassId>, TracerError> {
        let filters: Vec<Filter> = filters.filters().collect();
        self.filters.write().unwrap_or_else(PoisonError::into_inner).clone_from(&filters);
        let matched = self.apply_filters(&filters, None, hook);
        info!("{} filter(s) installed, {} class(es) matched", filters.len(), matched.len());
        Ok(matched)
    }

    fn drain_stale_method_tracer_ids(&self) -> Vec<ClassId> {
        std::mem::take(&mut *self.stale.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn counter_time(&self) -> i64 {
        i64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }

    fn exclude_thread(&self) {
        THREAD_EXCLUDED.with(|excluded| excluded.set(true));
    }

    fn include_thread(&self) {
        THREAD_EXCLUDED.with(|excluded| excluded.set(false));
    }

    fn is_thread_excluded(&self) -> bool {
        THREAD_EXCLUDED.with(Cell::get)
    }

    fn export_probe_interface(&self) -> Result<(), TracerError> {
        self.exported.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::{CodeAttribute, ACC_PUBLIC, ACC_STATIC};
    use crate::filter::parse_filters;

    const APP: ClassLoader = ClassLoader::Defined(1);

    /// Hook that records every request and leaves classes unchanged.
    #[derive(Default)]
    struct Spy {
        calls: Mutex<Vec<(String, Vec<MethodId>, Vec<i32>)>>,
    }

    impl MethodTraceHook for Spy {
        fn on_method_trace(&self, candidates: &ClassCandidates<'_>) -> Option<Vec<u8>> {
            self.calls.lock().unwrap().push((
                candidates.class_name.to_string(),
                candidates.ids.to_vec(),
                candidates.modifications.to_vec(),
            ));
            None
        }
    }

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

    fn install(
        runtime: &OfflineRuntime,
        texts: &[&str],
        modification: Modification,
        hook: &dyn MethodTraceHook,
    ) -> Vec<ClassId> {
        let filters = parse_filters(texts, modification);
        runtime.set_method_trace_filters(&NativeFilters::from_filters(&filters), hook).unwrap()
    }

    #[test]
    fn test_ids_are_sequential() {
        let runtime = OfflineRuntime::new();
        let spy = Spy::default();
        let a = runtime.define_class(class_bytes("a/A", &["x"]), APP, &spy).unwrap();
        let b = runtime.define_class(class_bytes("a/B", &["x"]), APP, &spy).unwrap();
        assert_eq!((a, b), (ClassId(1), ClassId(2)));
        assert_eq!(runtime.class_name(b).as_deref(), Some("a/B"));
        assert!(spy.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_only_changed_classes_are_retransformed() {
        let runtime = OfflineRuntime::new();
        let spy = Spy::default();
        runtime.define_class(class_bytes("a/A", &["x", "y"]), APP, &spy).unwrap();
        runtime.define_class(class_bytes("a/B", &["x"]), APP, &spy).unwrap();

        let matched = install(&runtime, &["a.A::y"], Modification::TIMING, &spy);
        assert_eq!(matched, vec![ClassId(1)]);
        {
            let calls = spy.calls.lock().unwrap();
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].0, "a/A");
            assert_eq!(calls[0].1, vec![MethodId::new(ClassId(1), 1)]);
            assert_eq!(calls[0].2, vec![1]);
        }

        // Same filters again: nothing changed, no callback.
        install(&runtime, &["a.A::y"], Modification::TIMING, &spy);
        assert_eq!(spy.calls.lock().unwrap().len(), 1);

        // Dropping the filter reports the method with no modification.
        install(&runtime, &[], Modification::TIMING, &spy);
        let calls = spy.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].2, vec![0]);
    }

    #[test]
    fn test_instrumented_methods_are_resent() {
        let runtime = OfflineRuntime::new();
        let spy = Spy::default();
        runtime.define_class(class_bytes("a/A", &["x", "y"]), APP, &spy).unwrap();
        install(&runtime, &["a.A::x"], Modification::TRACING, &spy);
        let filters: Vec<Filter> = parse_filters(["a.A::x", "a.A::y"], Modification::TRACING);
        runtime.set_method_trace_filters(&NativeFilters::from_filters(&filters), &spy).unwrap();

        let calls = spy.calls.lock().unwrap();
        assert_eq!(calls[1].1, vec![MethodId::new(ClassId(1), 0), MethodId::new(ClassId(1), 1)]);
        assert_eq!(runtime.modified_methods().len(), 2);
    }

    #[test]
    fn test_filters_apply_to_later_classes() {
        let runtime = OfflineRuntime::new();
        let spy = Spy::default();
        install(&runtime, &["::run"], Modification::TRACING, &spy);
        let id = runtime.define_class(class_bytes("a/A", &["run"]), APP, &spy).unwrap();
        assert_eq!(spy.calls.lock().unwrap().len(), 1);
        assert!(!runtime.is_modified(id));
    }

    #[test]
    fn test_unload_feeds_stale_ids() {
        let runtime = OfflineRuntime::new();
        let spy = Spy::default();
        let id = runtime.define_class(class_bytes("a/A", &["x"]), APP, &spy).unwrap();
        assert!(runtime.unload_class(id));
        assert!(!runtime.unload_class(id));
        assert_eq!(runtime.drain_stale_method_tracer_ids(), vec![id]);
        assert!(runtime.drain_stale_method_tracer_ids().is_empty());
        assert!(runtime.class_bytes(id).is_none());
    }

    #[test]
    fn test_thread_exclusion_is_per_thread() {
        let runtime = Arc::new(OfflineRuntime::new());
        runtime.exclude_thread();
        assert!(runtime.is_thread_excluded());
        let other = Arc::clone(&runtime);
        assert!(!std::thread::spawn(move || other.is_thread_excluded()).join().unwrap());
        runtime.include_thread();
        assert!(!runtime.is_thread_excluded());
    }

    #[test]
    fn test_counter_time_is_monotonic() {
        let runtime = OfflineRuntime::new();
        let first = runtime.counter_time();
        assert!(runtime.counter_time() >= first);
    }
}
