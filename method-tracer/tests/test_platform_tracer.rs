mod common;

use std::sync::Arc;

use common::{probes_of, ClassBuilder};
use method_tracer::domain::{ClassId, ClassLoader, Method, MethodId, Modification};
use method_tracer::events::{RecordingSink, MISSING};
use method_tracer::runtime::OfflineRuntime;
use method_tracer::tracer::{NativeLayer, PlatformTracer, TracerState};

const APP: ClassLoader = ClassLoader::Defined(1);

struct Harness {
    runtime: Arc<OfflineRuntime>,
    sink: Arc<RecordingSink>,
    tracer: PlatformTracer,
}

impl Harness {
    fn ready() -> Self {
        let runtime = Arc::new(OfflineRuntime::new());
        let sink = Arc::new(RecordingSink::new());
        let tracer = PlatformTracer::new(runtime.clone(), sink.clone());
        tracer.initialize().unwrap();
        Self { runtime, sink, tracer }
    }

    fn define(&self, bytes: Vec<u8>) -> ClassId {
        self.runtime.define_class(bytes, APP, &self.tracer).unwrap()
    }
}

fn app_class() -> Vec<u8> {
    ClassBuilder::new("com/example/App").void_method("run").void_method("stop").build()
}

#[test]
fn test_initialize_leaves_no_state_behind() {
    let h = Harness::ready();
    assert_eq!(h.tracer.state(), TracerState::Ready);
    assert!(h.runtime.is_exported());
    assert_eq!(h.tracer.timed_method_count(), 0);
    assert_eq!(h.tracer.timed_class_count(), 0);
    assert!(h.tracer.object_init_method().is_none());
    assert!(h.sink.drain().is_empty());
    assert!(!h.runtime.is_thread_excluded());

    // A second call is a no-op
    h.tracer.initialize().unwrap();
    assert_eq!(h.tracer.state(), TracerState::Ready);
}

#[test]
fn test_timing_filter_end_to_end() {
    let h = Harness::ready();
    let class = h.define(app_class());
    h.tracer.set_filters(Modification::TIMING, ["com.example.App::run"]).unwrap();

    assert!(h.runtime.is_modified(class));
    let bytes = h.runtime.class_bytes(class).unwrap();
    assert_eq!(probes_of(&bytes, 0), vec!["timestamp", "timing"]);
    assert!(probes_of(&bytes, 1).is_empty());

    let run = MethodId::new(class, 0);
    let timed = h.tracer.timed_method(run).unwrap();
    assert!(timed.is_published());
    assert_eq!(timed.method().name, "com.example.App::run");
    assert!(h.tracer.timed_method(MethodId::new(class, 1)).is_none());

    h.tracer.add_timing(run, 10);
    h.tracer.add_timing(run, 1);
    h.tracer.add_timing(run, 0);
    assert_eq!(h.tracer.emit_timing(), 1);

    let events = h.sink.timings();
    assert_eq!(events.len(), 1);
    let event = events[0];
    assert_eq!(event.method_id(), run);
    assert_eq!(event.invocations, 3);
    assert_eq!(event.minimum, 1);
    assert_eq!(event.average, 4);
    assert_eq!(event.maximum, 10);
}

#[test]
fn test_unmeasured_method_emits_missing() {
    let h = Harness::ready();
    let class = h.define(app_class());
    h.tracer.set_filters(Modification::TIMING, ["com.example.App"]).unwrap();

    assert_eq!(h.tracer.emit_timing(), 2);
    for event in h.sink.timings() {
        assert_eq!(event.method_id().class_id(), class);
        assert_eq!(event.invocations, 0);
        assert!(event.is_missing());
        assert_eq!((event.minimum, event.maximum), (MISSING, MISSING));
    }
}

#[test]
fn test_tracing_only_methods_are_not_timed() {
    let h = Harness::ready();
    let class = h.define(app_class());
    h.tracer.set_filters(Modification::TRACING, ["::stop"]).unwrap();

    let bytes = h.runtime.class_bytes(class).unwrap();
    assert_eq!(probes_of(&bytes, 1), vec!["timestamp", "trace"]);
    assert_eq!(h.tracer.timed_method_count(), 0);
    assert_eq!(h.tracer.emit_timing(), 0);
}

#[test]
fn test_trace_and_timing_filters_combine() {
    let h = Harness::ready();
    let class = h.define(app_class());
    h.tracer.set_filters(Modification::TRACING, ["com.example.App::run"]).unwrap();
    h.tracer.set_filters(Modification::TIMING, ["com.example.App"]).unwrap();

    let bytes = h.runtime.class_bytes(class).unwrap();
    assert_eq!(probes_of(&bytes, 0), vec!["timestamp", "traceTiming"]);
    assert_eq!(probes_of(&bytes, 1), vec!["timestamp", "timing"]);
    assert_eq!(h.tracer.timed_method_count(), 2);

    // Dropping the timing list leaves the trace probe in place.
    h.tracer.set_filters(Modification::TIMING, Vec::<String>::new()).unwrap();
    let bytes = h.runtime.class_bytes(class).unwrap();
    assert_eq!(probes_of(&bytes, 0), vec!["timestamp", "trace"]);
    assert!(probes_of(&bytes, 1).is_empty());
    assert_eq!(h.tracer.timed_method_count(), 0);
    assert_eq!(h.tracer.timed_class_count(), 0);
}

#[test]
fn test_clearing_filters_restores_original_bytes() {
    let h = Harness::ready();
    let original = app_class();
    let class = h.define(original.clone());
    h.tracer.set_filters(Modification::TIMING, ["com.example.App"]).unwrap();
    assert!(h.runtime.is_modified(class));

    h.tracer.set_filters(Modification::TIMING, Vec::<String>::new()).unwrap();
    assert!(!h.runtime.is_modified(class));
    assert_eq!(h.runtime.class_bytes(class).unwrap(), original);
}

#[test]
fn test_empty_filters_never_reach_runtime() {
    let h = Harness::ready();
    let class = h.define(app_class());
    h.tracer.set_filters(Modification::TIMING_TRACING, ["not a filter"]).unwrap();
    assert!(!h.runtime.is_modified(class));
    assert!(h.runtime.modified_methods().is_empty());
}

#[test]
fn test_classes_defined_after_filters_are_instrumented() {
    let h = Harness::ready();
    h.tracer.set_filters(Modification::TIMING, ["com.example.Late"]).unwrap();
    let class = h.define(ClassBuilder::new("com/example/Late").void_method("go").build());

    assert!(h.runtime.is_modified(class));
    let timed = h.tracer.timed_method(MethodId::new(class, 0)).unwrap();
    // Reported only once the runtime publishes the loaded class
    assert!(!timed.is_published());
    h.tracer.publish_class(class);
    assert!(timed.is_published());
}

#[test]
fn test_filters_set_before_initialize_survive_warm_up() {
    let runtime = Arc::new(OfflineRuntime::new());
    let sink = Arc::new(RecordingSink::new());
    let tracer = PlatformTracer::new(runtime.clone(), sink.clone());
    let class = runtime.define_class(app_class(), APP, &tracer).unwrap();

    tracer.set_filters(Modification::TIMING, ["com.example.App"]).unwrap();
    assert_eq!(tracer.state(), TracerState::Uninitialized);
    assert!(!runtime.is_modified(class));

    tracer.initialize().unwrap();
    assert_eq!(tracer.state(), TracerState::Ready);
    assert!(runtime.is_modified(class));
    let run = MethodId::new(class, 0);
    assert!(tracer.timed_method(run).is_some_and(|timed| timed.is_published()));

    tracer.add_timing(run, 7);
    assert_eq!(tracer.emit_timing(), 2);
    assert!(sink.timings().iter().any(|event| event.method_id() == run && event.invocations == 1));
}

#[test]
fn test_annotation_filter() {
    let h = Harness::ready();
    let annotated_method = h.define(
        ClassBuilder::new("com/example/A")
            .void_method("plain")
            .void_method("marked")
            .annotate_method("com.example.Traced")
            .build(),
    );
    let annotated_class = h.define(
        ClassBuilder::new("com/example/B")
            .void_method("one")
            .annotate_class("com.example.Traced")
            .build(),
    );
    let untouched = h.define(ClassBuilder::new("com/example/C").void_method("one").build());
    h.tracer.set_filters(Modification::TIMING, ["@com.example.Traced"]).unwrap();

    let bytes = h.runtime.class_bytes(annotated_method).unwrap();
    assert!(probes_of(&bytes, 0).is_empty());
    assert_eq!(probes_of(&bytes, 1), vec!["timestamp", "timing"]);
    assert!(h.runtime.is_modified(annotated_class));
    assert!(!h.runtime.is_modified(untouched));
    assert_eq!(h.tracer.timed_class_count(), 2);
}

#[test]
fn test_excluded_bootstrap_class_is_left_alone() {
    let h = Harness::ready();
    let bytes = ClassBuilder::new("java/lang/String").void_method("length").build();
    let string = h.runtime.define_class(bytes, ClassLoader::Bootstrap, &h.tracer).unwrap();
    h.tracer.set_filters(Modification::TIMING, ["java.lang.String"]).unwrap();

    assert!(!h.runtime.is_modified(string));
    assert_eq!(h.tracer.timed_method_count(), 0);
}

#[test]
fn test_same_class_name_from_app_loader_is_instrumented() {
    let h = Harness::ready();
    let class = h.define(ClassBuilder::new("java/lang/String").void_method("length").build());
    h.tracer.set_filters(Modification::TIMING, ["java.lang.String"]).unwrap();
    assert!(h.runtime.is_modified(class));
}

#[test]
fn test_unloaded_classes_are_dropped_at_emit() {
    let h = Harness::ready();
    let class = h.define(app_class());
    h.tracer.set_filters(Modification::TIMING, ["com.example.App"]).unwrap();
    assert_eq!(h.tracer.timed_class_count(), 1);

    assert!(h.runtime.unload_class(class));
    assert_eq!(h.tracer.emit_timing(), 0);
    assert_eq!(h.tracer.timed_class_count(), 0);
    assert_eq!(h.tracer.timed_method_count(), 0);
    assert!(h.sink.timings().is_empty());
}

#[test]
fn test_update_timing_is_idempotent() {
    let h = Harness::ready();
    let id = MethodId::new(ClassId(7), 3);
    let methods = [Method::new(id, Modification::TIMING, "a.B::c")];

    h.tracer.update_timing(&methods);
    let first = h.tracer.timed_method(id).unwrap();
    first.record(5);
    h.tracer.update_timing(&methods);
    let second = h.tracer.timed_method(id).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.snapshot().invocations, 1);
    assert_eq!(h.tracer.timed_method_count(), 1);
    assert_eq!(h.tracer.timed_class_count(), 1);

    h.tracer.update_timing(&[Method::new(id, Modification::TRACING, "a.B::c")]);
    assert_eq!(h.tracer.timed_method_count(), 0);
    assert_eq!(h.tracer.timed_class_count(), 0);
}

#[test]
fn test_publish_unknown_class_is_ignored() {
    let h = Harness::ready();
    h.tracer.publish_class(ClassId(42));
    assert_eq!(h.tracer.emit_timing(), 0);
}

#[test]
fn test_unpublished_methods_are_not_emitted() {
    let h = Harness::ready();
    let id = MethodId::new(ClassId(9), 0);
    h.tracer.update_timing(&[Method::new(id, Modification::TIMING, "a.B::c")]);
    h.tracer.add_timing(id, 3);
    assert_eq!(h.tracer.emit_timing(), 0);

    h.tracer.publish_class(ClassId(9));
    assert_eq!(h.tracer.emit_timing(), 1);
}

#[test]
fn test_object_init_uses_singleton() {
    let h = Harness::ready();
    let id = MethodId::new(ClassId(3), 0);
    h.tracer.update_timing(&[Method::new(id, Modification::TIMING, "java.lang.Object::<init>")]);
    let object = h.tracer.object_init_method().unwrap();

    h.tracer.add_object_timing(8);
    assert_eq!(object.snapshot().invocations, 1);

    h.tracer.remove_classes(&[ClassId(3)]);
    assert!(h.tracer.object_init_method().is_none());
    // Dropped silently once removed
    h.tracer.add_object_timing(8);
    assert_eq!(object.snapshot().invocations, 1);
}

#[test]
fn test_trace_probe_emits_events_unless_excluded() {
    let h = Harness::ready();
    let id = MethodId::new(ClassId(2), 1);
    let start = h.tracer.timestamp();
    h.tracer.trace(start, id);

    let traces = h.sink.traces();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].method_id(), id);
    assert_eq!(traces[0].start_time, start);
    assert!(traces[0].duration >= 0);

    h.runtime.exclude_thread();
    h.tracer.trace(h.tracer.timestamp(), id);
    h.runtime.include_thread();
    assert_eq!(h.sink.traces().len(), 1);
}

#[test]
fn test_concurrent_probes_while_filters_change() {
    let h = Harness::ready();
    let class = h.define(app_class());
    h.tracer.set_filters(Modification::TIMING, ["com.example.App"]).unwrap();
    let run = MethodId::new(class, 0);

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..1000 {
                    h.tracer.add_timing(run, 2);
                }
            });
        }
        scope.spawn(|| {
            for _ in 0..10 {
                h.tracer.set_filters(Modification::TIMING, ["com.example.App"]).unwrap();
            }
        });
    });

    // Reapplying the same filters keeps the same counters.
    let timed = h.tracer.timed_method(run).unwrap();
    assert_eq!(timed.snapshot().invocations, 4000);
    assert_eq!(timed.snapshot().minimum, 2);
}
