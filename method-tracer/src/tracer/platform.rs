use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use log::{debug, info, warn};

use super::native::{ClassCandidates, MethodTraceHook, NativeFilters, NativeLayer};
use crate::domain::{ClassId, InstrumentationError, Method, MethodId, Modification, TracerError};
use crate::events::EventSink;
use crate::exclude;
use crate::filter::{parse_filters, Filter};
use crate::instrumentation::Instrumentation;
use crate::timing::{TimedClass, TimedMethod};

/// Lifecycle of the tracing feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TracerState {
    Uninitialized = 0,
    Initializing = 1,
    Ready = 2,
    /// Warm-up failed; the tracer stays inert for the rest of the process.
    Unavailable = 3,
}

impl TracerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Uninitialized,
            1 => Self::Initializing,
            2 => Self::Ready,
            _ => Self::Unavailable,
        }
    }
}

#[derive(Debug, Default)]
struct FilterState {
    trace: Vec<Filter>,
    timing: Vec<Filter>,
}

impl FilterState {
    fn is_empty(&self) -> bool {
        self.trace.is_empty() && self.timing.is_empty()
    }
}

/// Orchestrates filters, instrumentation and timing statistics.
///
/// Two registries hold the timed methods:
/// - `timed_methods`: id to method, read lock-free by the probes
/// - `timed_classes`: per-class groups used for publish, emit and unload
///
/// Both are only changed together, by `update_timing`, `remove_classes` and
/// `reset`.
///
/// Filters set before [`initialize`](Self::initialize) completes are kept
/// and applied once the tracer is ready.
pub struct PlatformTracer {
    pub(super) native: Arc<dyn NativeLayer>,
    pub(super) sink: Arc<dyn EventSink>,
    pub(super) timed_methods: papaya::HashMap<MethodId, Arc<TimedMethod>>,
    timed_classes: DashMap<ClassId, Arc<TimedClass>>,
    pub(super) object_init: ArcSwapOption<TimedMethod>,
    filters: Mutex<FilterState>,
    metadata_lock: Arc<Mutex<()>>,
    initialization: Mutex<()>,
    state: AtomicU8,
}

impl PlatformTracer {
    pub fn new(native: Arc<dyn NativeLayer>, sink: Arc<dyn EventSink>) -> Self {
        Self::with_metadata_lock(native, sink, Arc::new(Mutex::new(())))
    }

    /// Share the recording's metadata lock so emission never overlaps a
    /// metadata rotation.
    pub fn with_metadata_lock(
        native: Arc<dyn NativeLayer>,
        sink: Arc<dyn EventSink>,
        metadata_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            native,
            sink,
            timed_methods: papaya::HashMap::new(),
            timed_classes: DashMap::new(),
            object_init: ArcSwapOption::empty(),
            filters: Mutex::new(FilterState::default()),
            metadata_lock,
            initialization: Mutex::new(()),
            state: AtomicU8::new(TracerState::Uninitialized as u8),
        }
    }

    #[must_use]
    pub fn state(&self) -> TracerState {
        TracerState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn metadata_lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.metadata_lock)
    }

    /// Run the one-time warm-up, then apply any filters set meanwhile.
    ///
    /// Later calls are no-ops; a call made while another thread is still
    /// initializing returns once that thread is done. On failure the tracer
    /// becomes [`TracerState::Unavailable`] and ignores filters and class
    /// callbacks from then on.
    pub fn initialize(&self) -> Result<(), TracerError> {
        let _initializing = self.initialization.lock().unwrap_or_else(PoisonError::into_inner);
        if self.state() != TracerState::Uninitialized {
            return Ok(());
        }
        self.state.store(TracerState::Initializing as u8, Ordering::Release);
        if let Err(err) = self.warm_up() {
            self.state.store(TracerState::Unavailable as u8, Ordering::Release);
            warn!("Method tracing unavailable: {err}");
            return Err(err);
        }

        // Ready is stored under the filter lock, so set_filters either
        // deferred its list to here or sees Ready and applies it itself.
        let filters = self.filters.lock().unwrap_or_else(PoisonError::into_inner);
        self.state.store(TracerState::Ready as u8, Ordering::Release);
        info!("Method tracer initialized");
        if filters.is_empty() {
            return Ok(());
        }
        self.apply_filters(&filters)
    }

    // =========================================================================
    // Policy-facing operations
    // =========================================================================

    /// Replace the trace or timing filter list and reapply all filters.
    ///
    /// Invalid texts are dropped. Clearing an already empty filter set does
    /// not reach the native layer. Before the tracer is ready the list is
    /// only stored.
    pub fn set_filters<I, S>(&self, modification: Modification, texts: I) -> Result<(), TracerError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if self.state() == TracerState::Unavailable {
            debug!("Ignoring filters, method tracing is unavailable");
            return Ok(());
        }
        let parsed = parse_filters(texts, modification);
        let mut filters = self.filters.lock().unwrap_or_else(PoisonError::into_inner);
        let was_empty = filters.is_empty();
        if modification.tracing() {
            filters.trace.clone_from(&parsed);
        }
        if modification.timing() {
            filters.timing = parsed;
        }
        if self.state() != TracerState::Ready {
            debug!("Deferring method filters until the tracer is initialized");
            return Ok(());
        }
        if was_empty && filters.is_empty() {
            return Ok(());
        }
        self.apply_filters(&filters)
    }

    fn apply_filters(&self, filters: &FilterState) -> Result<(), TracerError> {
        let native = NativeFilters::from_filters(filters.trace.iter().chain(&filters.timing));
        info!("Applying {} method filter(s)", native.len());
        let classes = self.native.set_method_trace_filters(&native, self)?;
        for class in &classes {
            self.publish_class(*class);
        }
        debug!("{} class(es) match the current filters", classes.len());
        Ok(())
    }

    /// Emit one timing event per published timed method.
    ///
    /// Runs under the metadata lock. Classes the runtime reports as unloaded
    /// are dropped first. Returns the number of events emitted.
    pub fn emit_timing(&self) -> usize {
        let _metadata = self.metadata_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let stale = self.native.drain_stale_method_tracer_ids();
        if !stale.is_empty() {
            debug!("Dropping timing for {} unloaded class(es)", stale.len());
            self.remove_classes(&stale);
        }
        let timestamp = self.native.counter_time();
        let mut emitted = 0;
        for entry in &self.timed_classes {
            emitted += entry.value().emit(timestamp, self.sink.as_ref());
        }
        emitted
    }

    /// Mark every timed method of a class for emission. Unknown ids are ignored.
    pub fn publish_class(&self, class_id: ClassId) {
        if let Some(class) = self.timed_class(class_id) {
            class.publish();
        }
    }

    // =========================================================================
    // Registry bookkeeping
    // =========================================================================

    /// Bring the registries in line with the modifications of `methods`.
    ///
    /// Methods with timing are added unless already present; methods without
    /// timing are removed. Classes left without timed methods are dropped.
    /// Applying the same input twice changes nothing the second time.
    pub fn update_timing<'a>(&self, methods: impl IntoIterator<Item = &'a Method>) {
        let timed_methods = self.timed_methods.pin();
        for method in methods {
            let class_id = method.class_id();
            if method.modification.timing() {
                let class = Arc::clone(self.timed_classes.entry(class_id).or_default().value());
                if class.contains(method.id) {
                    continue;
                }
                let timed = class.add(method.clone());
                if method.is_object_init() {
                    self.object_init.store(Some(Arc::clone(&timed)));
                }
                timed_methods.insert(method.id, timed);
            } else if let Some(class) = self.timed_class(class_id) {
                if let Some(timed) = class.remove(method.id) {
                    self.clear_object_init(&timed);
                    timed_methods.remove(&method.id);
                }
                if class.is_empty() {
                    self.timed_classes.remove_if(&class_id, |_, class| class.is_empty());
                }
            }
        }
    }

    /// Drop all timing state for the given classes.
    pub fn remove_classes(&self, class_ids: &[ClassId]) {
        let timed_methods = self.timed_methods.pin();
        for class_id in class_ids {
            if let Some((_, class)) = self.timed_classes.remove(class_id) {
                for timed in class.methods() {
                    self.clear_object_init(&timed);
                    timed_methods.remove(&timed.method().id);
                }
            }
        }
    }

    /// Forget every timed method and class.
    pub fn reset(&self) {
        self.timed_classes.clear();
        self.timed_methods.pin().clear();
        self.object_init.store(None);
    }

    fn clear_object_init(&self, timed: &Arc<TimedMethod>) {
        self.object_init.rcu(|current| match current {
            Some(object) if Arc::ptr_eq(object, timed) => None,
            other => other.clone(),
        });
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    #[must_use]
    pub fn timed_method(&self, id: MethodId) -> Option<Arc<TimedMethod>> {
        self.timed_methods.pin().get(&id).cloned()
    }

    #[must_use]
    pub fn timed_class(&self, class_id: ClassId) -> Option<Arc<TimedClass>> {
        self.timed_classes.get(&class_id).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn timed_method_count(&self) -> usize {
        self.timed_methods.pin().len()
    }

    #[must_use]
    pub fn timed_class_count(&self) -> usize {
        self.timed_classes.len()
    }

    /// The timed `java.lang.Object::<init>`, if it is currently timed.
    #[must_use]
    pub fn object_init_method(&self) -> Option<Arc<TimedMethod>> {
        self.object_init.load_full()
    }

    // =========================================================================
    // Class callbacks
    // =========================================================================

    /// Register the candidates, update timing and rewrite the class.
    pub(super) fn instrument(
        &self,
        candidates: &ClassCandidates<'_>,
    ) -> Result<Option<Vec<u8>>, InstrumentationError> {
        let count = candidates.ids.len();
        if candidates.names.len() != count
            || candidates.signatures.len() != count
            || candidates.modifications.len() != count
        {
            return Err(InstrumentationError::MismatchedCandidates {
                ids: count,
                names: candidates.names.len(),
                signatures: candidates.signatures.len(),
                modifications: candidates.modifications.len(),
            });
        }

        let mut instrumentation = Instrumentation::new(
            candidates.class_name,
            candidates.loader,
            candidates.bytecode.to_vec(),
        );
        for i in 0..count {
            instrumentation.add_method(
                candidates.ids[i],
                &candidates.names[i],
                &candidates.signatures[i],
                Modification::from_bits(candidates.modifications[i]),
            );
        }
        self.update_timing(instrumentation.methods());
        instrumentation.generate_bytecode()
    }
}

impl MethodTraceHook for PlatformTracer {
    /// Never fails: errors and panics leave the class unchanged.
    fn on_method_trace(&self, candidates: &ClassCandidates<'_>) -> Option<Vec<u8>> {
        if self.state() == TracerState::Unavailable {
            return None;
        }
        let class_name = candidates.class_name;
        if candidates.loader.is_bootstrap() && exclude::contains_class(class_name) {
            debug!("Excluding class {class_name} from instrumentation");
            return None;
        }
        match catch_unwind(AssertUnwindSafe(|| self.instrument(candidates))) {
            Ok(Ok(bytecode)) => bytecode,
            Ok(Err(err)) => {
                warn!("Could not instrument {class_name}: {err}");
                None
            }
            Err(_) => {
                warn!("Instrumentation of {class_name} panicked, leaving it unchanged");
                None
            }
        }
    }
}

impl std::fmt::Debug for PlatformTracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformTracer")
            .field("state", &self.state())
            .field("timed_methods", &self.timed_method_count())
            .field("timed_classes", &self.timed_class_count())
            .finish_non_exhaustive()
    }
}
