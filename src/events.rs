//! Multi-listener event broadcaster (spec.md 9 "Events"): `ExecutionStarted`
//! / `ExecutionCompleted` / `SecurityViolation` / `ToolRegistered` /
//! `ToolUnregistered`. Listener panics are caught so one bad listener can
//! never abort the pipeline.

use crate::model::{Severity, ToolExecutionContext, ToolExecutionResult};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::error;

#[derive(Debug, Clone)]
pub enum Event {
    ExecutionStarted {
        tool_id: String,
        correlation_id: String,
    },
    ExecutionCompleted {
        result: Box<ToolExecutionResult>,
    },
    SecurityViolation {
        tool_id: String,
        correlation_id: String,
        description: String,
        severity: Severity,
    },
    ToolRegistered {
        tool_id: String,
    },
    ToolUnregistered {
        tool_id: String,
    },
}

impl Event {
    pub fn execution_started(tool_id: &str, correlation_id: &str, _context: &ToolExecutionContext) -> Self {
        Event::ExecutionStarted {
            tool_id: tool_id.to_string(),
            correlation_id: correlation_id.to_string(),
        }
    }
}

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// A small listener list guarded by a lock (spec.md 9). Cheap to clone --
/// every clone shares the same underlying listener `Vec`.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<RwLock<Vec<Listener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn(&Event) + Send + Sync + 'static) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(listener));
    }

    /// Emits `event` to every listener. A listener that panics is caught
    /// and logged; the remaining listeners and the caller are unaffected.
    pub fn emit(&self, event: Event) {
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner()).clone();
        for listener in listeners {
            let event_ref = &event;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener(event_ref)));
            if outcome.is_err() {
                error!("event listener panicked; pipeline continues");
            }
        }
    }
}

/// Helper so the registry can announce a mutation without constructing a
/// full `ToolMetadata` reference at the call site.
pub fn tool_registered(tool_id: &str) -> Event {
    Event::ToolRegistered { tool_id: tool_id.to_string() }
}

pub fn tool_unregistered(tool_id: &str) -> Event {
    Event::ToolUnregistered { tool_id: tool_id.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emit_reaches_all_listeners() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c1 = counter.clone();
        bus.subscribe(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = counter.clone();
        bus.subscribe(move |_| {
            c2.fetch_add(10, Ordering::SeqCst);
        });

        bus.emit(tool_registered("echo"));
        assert_eq!(counter.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn panicking_listener_does_not_abort_others() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));

        bus.subscribe(|_| panic!("boom"));
        let c = counter.clone();
        bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(tool_registered("echo"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
