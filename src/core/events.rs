//! Event sink implementations.
//!
//! Sinks observe scheduler, budget, and registry transitions. Delivery is
//! fire-and-forget: a failing or panicking sink never affects scheduling.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::util::clock::now_ms;

/// Event structure recorded by sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreEvent {
    /// Event name, e.g. `job.claimed` or `budget.delayed`.
    pub name: String,
    /// Event-specific context.
    pub payload: Value,
    /// Timestamp milliseconds.
    pub created_at_ms: u64,
}

/// Event sink abstraction.
pub trait EventSink: Send + Sync {
    /// Deliver an event. Must not block.
    fn emit(&self, name: &str, payload: &Value);
}

/// Shared handle to an optional sink.
pub type SharedEventSink = Arc<dyn EventSink>;

/// Deliver an event, swallowing panics from the sink.
///
/// Callers must not hold their own state lock while calling this.
pub fn emit_safely(sink: Option<&SharedEventSink>, name: &str, payload: &Value) {
    let Some(sink) = sink else {
        return;
    };
    if catch_unwind(AssertUnwindSafe(|| sink.emit(name, payload))).is_err() {
        tracing::warn!(event = name, "event sink panicked; event dropped");
    }
}

/// In-memory event sink for testing and dev.
pub struct InMemoryEventSink {
    events: Mutex<VecDeque<CoreEvent>>,
    max_events: usize,
}

impl InMemoryEventSink {
    /// Create a new in-memory sink with a bounded buffer.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events.min(1024))),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    pub fn events(&self) -> Vec<CoreEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Names of stored events in delivery order.
    pub fn names(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.name.clone()).collect()
    }
}

impl EventSink for InMemoryEventSink {
    fn emit(&self, name: &str, payload: &Value) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(CoreEvent {
            name: name.to_string(),
            payload: payload.clone(),
            created_at_ms: now_ms(),
        });
    }
}

/// Sink that forwards events to a bounded channel; drops when the receiver lags.
#[cfg(not(target_arch = "wasm32"))]
pub struct ChannelEventSink {
    tx: crossbeam_channel::Sender<CoreEvent>,
}

#[cfg(not(target_arch = "wasm32"))]
impl ChannelEventSink {
    /// Create a sink and the receiving end of its channel.
    pub fn bounded(capacity: usize) -> (Self, crossbeam_channel::Receiver<CoreEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Self { tx }, rx)
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl EventSink for ChannelEventSink {
    fn emit(&self, name: &str, payload: &Value) {
        let event = CoreEvent {
            name: name.to_string(),
            payload: payload.clone(),
            created_at_ms: now_ms(),
        };
        if let Err(e) = self.tx.try_send(event) {
            tracing::debug!(event = name, "event channel unavailable: {e}");
        }
    }
}
