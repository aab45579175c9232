// Action - Typed publish/subscribe used to wire editor commands to the engine
//
// An `Event<A>` is a list of handlers invoked with a borrowed argument. An
// `Action` is a named, switchable command with a trigger and a change event.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

/// Handle returned by `Event::subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<A> = Arc<dyn Fn(&A) + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Event
// ─────────────────────────────────────────────────────────────────────────────

/// A set of handlers invoked together
pub struct Event<A> {
    handlers: Mutex<Vec<(SubscriptionId, Handler<A>)>>,
    next_id: AtomicU64,
}

impl<A> Default for Event<A> {
    fn default() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<A> Event<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler; false if it was not subscribed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(sub, _)| *sub != id);
        handlers.len() != before
    }

    /// Call every handler in subscription order
    ///
    /// Handlers are called outside the lock, so they may subscribe or
    /// unsubscribe; such changes apply from the next invocation on.
    pub fn invoke(&self, arg: &A) {
        let handlers: Vec<Handler<A>> = self.handlers.lock().iter().map(|(_, h)| Arc::clone(h)).collect();
        for handler in handlers {
            handler(arg);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.lock().is_empty()
    }

    pub fn clear(&self) {
        self.handlers.lock().clear();
    }
}

impl<A> fmt::Debug for Event<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event").field("handlers", &self.len()).finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Action
// ─────────────────────────────────────────────────────────────────────────────

/// Named command that can be enabled, disabled and triggered
#[derive(Debug)]
pub struct Action {
    name: String,
    enabled: AtomicBool,
    /// Fired with the action name when triggered while enabled
    pub on_triggered: Event<String>,
    /// Fired with the new enabled state when it changes
    pub on_change: Event<bool>,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: AtomicBool::new(true),
            on_triggered: Event::new(),
            on_change: Event::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        if self.enabled.swap(enabled, Ordering::SeqCst) != enabled {
            self.on_change.invoke(&enabled);
        }
    }

    /// Trigger the action; returns false when it is disabled
    pub fn execute(&self) -> bool {
        if !self.is_enabled() {
            tracing::debug!(action = %self.name, "disabled action ignored");
            return false;
        }
        self.on_triggered.invoke(&self.name);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_event_subscribe_and_invoke() {
        let event = Event::<i32>::new();
        let total = Arc::new(AtomicUsize::new(0));

        let t = Arc::clone(&total);
        let first = event.subscribe(move |v| {
            t.fetch_add(*v as usize, Ordering::SeqCst);
        });
        let t = Arc::clone(&total);
        event.subscribe(move |v| {
            t.fetch_add(*v as usize * 10, Ordering::SeqCst);
        });

        event.invoke(&2);
        assert_eq!(total.load(Ordering::SeqCst), 22);

        assert!(event.unsubscribe(first));
        assert!(!event.unsubscribe(first));
        event.invoke(&1);
        assert_eq!(total.load(Ordering::SeqCst), 32);
        assert_eq!(event.len(), 1);
    }

    #[test]
    fn test_action_respects_enabled() {
        let action = Action::new("Run");
        let fired = Arc::new(AtomicUsize::new(0));
        let changes = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&fired);
        action.on_triggered.subscribe(move |name| {
            assert_eq!(name, "Run");
            f.fetch_add(1, Ordering::SeqCst);
        });
        let c = Arc::clone(&changes);
        action.on_change.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(action.execute());
        action.set_enabled(false);
        action.set_enabled(false);
        assert!(!action.execute());

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(changes.load(Ordering::SeqCst), 1);
    }
}
