use std::io::{self, BufWriter, Write};
use std::sync::{Mutex, PoisonError};

use log::warn;

use crate::events::{Event, EventSink, MethodTimingEvent, MethodTraceEvent};

/// Writes every event as one JSON object per line.
///
/// Write failures are remembered and reported once by [`JsonLinesSink::finish`];
/// events after the first failure are dropped.
pub struct JsonLinesSink<W: Write + Send> {
    inner: Mutex<State<W>>,
}

struct State<W: Write> {
    writer: BufWriter<W>,
    written: u64,
    error: Option<io::Error>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        let state = State { writer: BufWriter::new(writer), written: 0, error: None };
        Self { inner: Mutex::new(state) }
    }

    /// Number of events written so far
    pub fn written(&self) -> u64 {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).written
    }

    /// Flush buffered output, returning the first error seen.
    pub fn finish(&self) -> io::Result<u64> {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(err) = state.error.take() {
            return Err(err);
        }
        state.writer.flush()?;
        Ok(state.written)
    }

    fn write(&self, event: &Event) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if state.error.is_some() {
            return;
        }
        let result = serde_json::to_writer(&mut state.writer, event)
            .map_err(io::Error::from)
            .and_then(|()| state.writer.write_all(b"\n"));
        match result {
            Ok(()) => state.written += 1,
            Err(err) => {
                warn!("Event output failed, dropping further events: {err}");
                state.error = Some(err);
            }
        }
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn method_timing(&self, event: &MethodTimingEvent) {
        self.write(&Event::MethodTiming(*event));
    }

    fn method_trace(&self, event: &MethodTraceEvent) {
        self.write(&Event::MethodTrace(*event));
    }
}
