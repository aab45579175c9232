// Executor - Node execution context
//
// `NodeContext` is what a node sees while it executes: pull-based access to
// its input values, writes to its outputs, the callstack, and the services
// the owning context carries (log span, device policy).

use std::collections::HashMap;

use blueprint_types::{IdType, PinValue};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::ExecState;
use crate::pin::{FlowPin, PinTable};

// ─────────────────────────────────────────────────────────────────────────────
// Services
// ─────────────────────────────────────────────────────────────────────────────

/// Which compute device nodes should prefer
///
/// A negative index selects the CPU path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePolicy {
    pub device_index: i32,
}

impl Default for DevicePolicy {
    fn default() -> Self {
        Self { device_index: -1 }
    }
}

impl DevicePolicy {
    pub fn gpu(index: u32) -> Self {
        Self {
            device_index: index as i32,
        }
    }

    pub fn cpu() -> Self {
        Self::default()
    }

    pub fn is_cpu(&self) -> bool {
        self.device_index < 0
    }

    /// GPU index, `None` on the CPU path
    pub fn gpu_index(&self) -> Option<u32> {
        u32::try_from(self.device_index).ok()
    }
}

/// Per-context handles passed to nodes instead of process globals
#[derive(Debug, Clone)]
pub struct Services {
    pub run_id: Uuid,
    pub span: tracing::Span,
    pub device: DevicePolicy,
}

impl Services {
    pub fn new(device: DevicePolicy) -> Self {
        let run_id = Uuid::new_v4();
        Self {
            run_id,
            span: tracing::info_span!("blueprint", run_id = %run_id),
            device,
        }
    }
}

impl Default for Services {
    fn default() -> Self {
        Self::new(DevicePolicy::default())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Value Resolution
// ─────────────────────────────────────────────────────────────────────────────

/// Resolve the value a pin currently carries
///
/// A linked pin takes the value of the pin it links to, transitively; an
/// unlinked pin (or one whose link dangles) yields its own literal. The
/// result is converted to the requesting pin's type when possible and
/// memoized in `cache`.
pub(crate) fn resolve_pin_value(
    pins: &PinTable,
    cache: &mut HashMap<IdType, PinValue>,
    pin: IdType,
) -> PinValue {
    if let Some(value) = cache.get(&pin) {
        return value.clone();
    }
    let Some(requested) = pins.get(pin) else {
        return PinValue::Void;
    };

    let mut visited = vec![pin];
    let mut source = requested;
    while let Some(next) = pins.link_target(source.id) {
        if visited.contains(&next.id) {
            tracing::warn!(pin_id = pin, "link cycle while resolving pin value");
            break;
        }
        visited.push(next.id);
        source = next;
    }

    let value = source
        .value
        .convert_to(requested.pin_type)
        .unwrap_or_else(|| source.value.clone());
    cache.insert(pin, value.clone());
    value
}

// ─────────────────────────────────────────────────────────────────────────────
// Node Context
// ─────────────────────────────────────────────────────────────────────────────

/// Context passed to `Node::execute` and the lifecycle hooks
pub struct NodeContext<'a> {
    pins: &'a mut PinTable,
    state: &'a mut ExecState,
    services: &'a Services,
    node_id: IdType,
    threading: bool,
}

impl<'a> NodeContext<'a> {
    pub(crate) fn new(
        pins: &'a mut PinTable,
        state: &'a mut ExecState,
        services: &'a Services,
        node_id: IdType,
        threading: bool,
    ) -> Self {
        Self {
            pins,
            state,
            services,
            node_id,
            threading,
        }
    }

    /// Id of the node being executed
    pub fn node_id(&self) -> IdType {
        self.node_id
    }

    /// Whether this runs on the background stepping thread
    pub fn is_threading(&self) -> bool {
        self.threading
    }

    pub fn device(&self) -> &DevicePolicy {
        &self.services.device
    }

    pub fn run_id(&self) -> Uuid {
        self.services.run_id
    }

    pub fn step_count(&self) -> u64 {
        self.state.step_count
    }

    /// Resolved value of a pin
    pub fn pin_value(&mut self, pin: IdType) -> PinValue {
        resolve_pin_value(&*self.pins, &mut self.state.values, pin)
    }

    /// Resolved value of a pin, or `T::default()` when it does not convert
    pub fn get_pin_value<T>(&mut self, pin: IdType) -> T
    where
        T: TryFrom<PinValue> + Default,
    {
        T::try_from(self.pin_value(pin)).unwrap_or_default()
    }

    /// Write a pin's value; later reads in this step see it
    pub fn set_pin_value(&mut self, pin: IdType, value: impl Into<PinValue>) {
        if self.pins.set_value(pin, value) {
            self.state.values.clear();
        } else {
            tracing::warn!(node_id = self.node_id, pin_id = pin, "set_pin_value on unknown pin");
        }
    }

    /// Resume flow at `pin` once the current chain runs out
    pub fn push_return_point(&mut self, pin: FlowPin) {
        self.state.callstack.push(pin);
    }

    pub fn callstack_depth(&self) -> usize {
        self.state.callstack.len()
    }

    pub fn pins(&self) -> &PinTable {
        &*self.pins
    }

    pub fn pins_mut(&mut self) -> &mut PinTable {
        &mut *self.pins
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pin::Pin;
    use blueprint_types::{PinKind, PinType};

    fn table() -> PinTable {
        let mut pins = PinTable::new();
        pins.insert(Pin::new(10, 1, "Out", PinType::Int32, PinKind::Output)).unwrap();
        pins.insert(Pin::new(20, 2, "In", PinType::Float, PinKind::Input)).unwrap();
        pins.insert(Pin::new(21, 2, "Text", PinType::String, PinKind::Input)).unwrap();
        pins.link(20, 10).unwrap();
        pins.set_value(10, 7);
        pins.set_value(20, 1.5f32);
        pins.set_value(21, "literal");
        pins
    }

    #[test]
    fn test_linked_pin_reads_provider() {
        let pins = table();
        let mut cache = HashMap::new();
        assert_eq!(resolve_pin_value(&pins, &mut cache, 20), PinValue::Float(7.0));
        assert_eq!(resolve_pin_value(&pins, &mut cache, 21), PinValue::String("literal".into()));
        assert_eq!(resolve_pin_value(&pins, &mut cache, 999), PinValue::Void);
    }

    #[test]
    fn test_node_context_values() {
        let mut pins = table();
        let mut state = ExecState::default();
        let services = Services::default();
        let mut ctx = NodeContext::new(&mut pins, &mut state, &services, 2, false);

        assert_eq!(ctx.get_pin_value::<f32>(20), 7.0);
        assert_eq!(ctx.get_pin_value::<String>(21), "literal");
        // Wrong type falls back to the default
        assert_eq!(ctx.get_pin_value::<bool>(21), false);

        ctx.set_pin_value(10, 9);
        assert_eq!(ctx.get_pin_value::<f32>(20), 9.0);

        ctx.push_return_point(FlowPin(30));
        assert_eq!(ctx.callstack_depth(), 1);
    }

    #[test]
    fn test_device_policy() {
        assert!(DevicePolicy::default().is_cpu());
        assert_eq!(DevicePolicy::gpu(1).gpu_index(), Some(1));
        assert_eq!(DevicePolicy::cpu().gpu_index(), None);
    }
}
