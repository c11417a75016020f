use std::sync::Arc;

use dashmap::DashMap;

use super::TimedMethod;
use crate::domain::{Method, MethodId};
use crate::events::EventSink;

/// Timed methods of one defining class.
#[derive(Debug, Default)]
pub struct TimedClass {
    methods: DashMap<MethodId, Arc<TimedMethod>>,
}

impl TimedClass {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start timing `method`, returning the existing cell if it is already timed.
    pub fn add(&self, method: Method) -> Arc<TimedMethod> {
        Arc::clone(
            self.methods
                .entry(method.id)
                .or_insert_with(|| Arc::new(TimedMethod::new(method)))
                .value(),
        )
    }

    pub fn remove(&self, id: MethodId) -> Option<Arc<TimedMethod>> {
        self.methods.remove(&id).map(|(_, method)| method)
    }

    #[must_use]
    pub fn get(&self, id: MethodId) -> Option<Arc<TimedMethod>> {
        self.methods.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn contains(&self, id: MethodId) -> bool {
        self.methods.contains_key(&id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// All timed methods, in no particular order.
    #[must_use]
    pub fn methods(&self) -> Vec<Arc<TimedMethod>> {
        self.methods.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Mark every method eligible for emission.
    pub fn publish(&self) {
        for entry in &self.methods {
            entry.value().publish();
        }
    }

    /// Emit one timing event per published method. Returns how many were emitted.
    pub fn emit(&self, timestamp: i64, sink: &dyn EventSink) -> usize {
        let mut emitted = 0;
        for entry in &self.methods {
            let method = entry.value();
            if method.is_published() {
                sink.method_timing(&method.to_event(timestamp));
                emitted += 1;
            }
        }
        emitted
    }
}
