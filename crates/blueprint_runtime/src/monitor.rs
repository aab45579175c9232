// Monitor - Execution notifications for editors and tools
//
// Callbacks run on the thread performing the step, after the graph and the
// execution state have been unlocked. A monitor may query the context (current
// node, step count, pin values) from inside a callback.

use blueprint_types::{IdType, StepResult};
use serde::{Deserialize, Serialize};

use crate::action::Event;
use crate::pin::FlowPin;

/// Receives execution notifications; every method defaults to a no-op
pub trait ContextMonitor: Send + Sync {
    fn on_start(&self, _entry: FlowPin) {}
    fn on_error(&self, _message: &str) {}
    fn on_done(&self, _step_count: u64) {}
    fn on_pause(&self) {}
    fn on_resume(&self) {}
    fn on_step_next(&self) {}
    fn on_step_current(&self) {}
    fn on_pre_step(&self, _node: IdType, _entry: FlowPin) {}
    fn on_post_step(&self, _node: IdType, _result: StepResult) {}
}

// ─────────────────────────────────────────────────────────────────────────────
// Event Monitor
// ─────────────────────────────────────────────────────────────────────────────

/// A monitor notification as plain data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ContextEvent {
    Start { entry: IdType },
    Error { message: String },
    Done { step_count: u64 },
    Pause,
    Resume,
    StepNext,
    StepCurrent,
    PreStep { node: IdType, entry: IdType },
    PostStep { node: IdType, result: StepResult },
}

/// Monitor publishing every notification on an `Event`
#[derive(Debug, Default)]
pub struct EventMonitor {
    pub events: Event<ContextEvent>,
}

impl EventMonitor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContextMonitor for EventMonitor {
    fn on_start(&self, entry: FlowPin) {
        self.events.invoke(&ContextEvent::Start { entry: entry.id() });
    }

    fn on_error(&self, message: &str) {
        self.events.invoke(&ContextEvent::Error {
            message: message.to_string(),
        });
    }

    fn on_done(&self, step_count: u64) {
        self.events.invoke(&ContextEvent::Done { step_count });
    }

    fn on_pause(&self) {
        self.events.invoke(&ContextEvent::Pause);
    }

    fn on_resume(&self) {
        self.events.invoke(&ContextEvent::Resume);
    }

    fn on_step_next(&self) {
        self.events.invoke(&ContextEvent::StepNext);
    }

    fn on_step_current(&self) {
        self.events.invoke(&ContextEvent::StepCurrent);
    }

    fn on_pre_step(&self, node: IdType, entry: FlowPin) {
        self.events.invoke(&ContextEvent::PreStep {
            node,
            entry: entry.id(),
        });
    }

    fn on_post_step(&self, node: IdType, result: StepResult) {
        self.events.invoke(&ContextEvent::PostStep { node, result });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_event_monitor_publishes() {
        let monitor = EventMonitor::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        monitor.events.subscribe(move |e| sink.lock().push(e.clone()));

        monitor.on_start(FlowPin(3));
        monitor.on_post_step(4, StepResult::Success);
        monitor.on_done(1);

        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], ContextEvent::Start { entry: 3 });
        assert_eq!(seen[2], ContextEvent::Done { step_count: 1 });
    }

    #[test]
    fn test_context_event_json() {
        let json = serde_json::to_value(ContextEvent::PostStep {
            node: 2,
            result: StepResult::Done,
        })
        .unwrap();
        assert_eq!(json["event"], "post_step");
        assert_eq!(json["result"], "Done");
    }
}
