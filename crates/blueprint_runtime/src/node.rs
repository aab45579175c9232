// Node - Capability interface implemented by every node type
//
// Concrete nodes embed a `NodeBase` holding the state every node shares
// (id, name, group, break point, pins) and implement `Node::execute`, the
// state transition the context drives. Type descriptors with their factory
// are generated by `#[blueprint_node]`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};

use blueprint_types::{
    IdMap, IdType, INVALID_ID, LoadError, NodeStyle, NodeType, PinKind, PinType, PinValue,
    node_type_id,
};

use crate::executor::NodeContext;
use crate::graph::Graph;
use crate::pin::{FlowPin, LinkError, Pin, PinTable};
use crate::registry::PinExTypeInfo;

// ─────────────────────────────────────────────────────────────────────────────
// Node Type Descriptor
// ─────────────────────────────────────────────────────────────────────────────

/// Factory creating a fresh node (and its pins) inside a graph
pub type NodeFactory = Arc<dyn Fn(&mut Graph) -> Box<dyn Node> + Send + Sync>;

/// Identity, version and factory of a node type
#[derive(Clone)]
pub struct NodeTypeInfo {
    /// FNV-1a of "TypeName*Catalog"
    pub id: IdType,
    pub name: String,
    /// Packed engine version the type was built against
    pub version: u32,
    pub node_type: NodeType,
    pub style: NodeStyle,
    pub catalog: String,
    factory: Option<NodeFactory>,
}

impl NodeTypeInfo {
    pub fn new<F>(
        name: impl Into<String>,
        catalog: impl Into<String>,
        version: u32,
        node_type: NodeType,
        style: NodeStyle,
        factory: F,
    ) -> Self
    where
        F: Fn(&mut Graph) -> Box<dyn Node> + Send + Sync + 'static,
    {
        let name = name.into();
        let catalog = catalog.into();
        Self {
            id: node_type_id(&name, &catalog),
            name,
            version,
            node_type,
            style,
            catalog,
            factory: Some(Arc::new(factory)),
        }
    }

    /// Descriptor for a type that is not registered; it has no factory
    pub fn unresolved(id: IdType, name: impl Into<String>, version: u32) -> Self {
        Self {
            id,
            name: name.into(),
            version,
            node_type: NodeType::Dummy,
            style: NodeStyle::Dummy,
            catalog: String::new(),
            factory: None,
        }
    }

    /// Run the factory
    pub fn create(&self, graph: &mut Graph) -> Option<Box<dyn Node>> {
        self.factory.as_ref().map(|f| f(graph))
    }

    pub fn has_factory(&self) -> bool {
        self.factory.is_some()
    }
}

impl fmt::Debug for NodeTypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeTypeInfo")
            .field("id", &format_args!("{:#010x}", self.id))
            .field("name", &self.name)
            .field("version", &format_args!("{:#010x}", self.version))
            .field("node_type", &self.node_type)
            .field("style", &self.style)
            .field("catalog", &self.catalog)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Step Flow
// ─────────────────────────────────────────────────────────────────────────────

/// What a node wants the context to do after it executed
#[derive(Debug, Clone, PartialEq)]
pub enum StepFlow {
    /// Follow this output flow pin
    Continue(FlowPin),
    /// No further flow from this node; resume from the callstack if any
    Return,
    /// Intentional end of the run; the callstack is discarded
    Exit,
    /// The node could not proceed
    Fail(String),
}

impl From<FlowPin> for StepFlow {
    fn from(pin: FlowPin) -> Self {
        if pin.is_valid() {
            StepFlow::Continue(pin)
        } else {
            StepFlow::Return
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output Slot
// ─────────────────────────────────────────────────────────────────────────────

/// Last output of a node, readable by a renderer without locking the graph
///
/// The node publishes under the slot's own lock inside `execute`; readers
/// take a snapshot and tolerate it being one step stale.
#[derive(Debug, Clone, Default)]
pub struct OutputSlot(Arc<Mutex<PinValue>>);

impl OutputSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, value: PinValue) {
        *self.0.lock() = value;
    }

    pub fn snapshot(&self) -> PinValue {
        self.0.lock().clone()
    }

    pub fn clear(&self) {
        *self.0.lock() = PinValue::Void;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Node Base
// ─────────────────────────────────────────────────────────────────────────────

/// State shared by every node
#[derive(Debug, Clone)]
pub struct NodeBase {
    pub id: IdType,
    pub name: String,
    /// Owning group node, `0` at top level
    pub group_id: IdType,
    pub break_point: bool,
    /// Editor position
    pub pos: Option<[f32; 2]>,
    /// Editor size
    pub size: Option<[f32; 2]>,
    inputs: Vec<IdType>,
    outputs: Vec<IdType>,
    type_info: NodeTypeInfo,
}

impl NodeBase {
    /// New base with a fresh node id
    pub fn new(graph: &mut Graph, type_info: NodeTypeInfo) -> Self {
        let id = graph.make_node_id();
        Self::with_id(id, type_info)
    }

    /// New base with a caller-chosen id
    pub fn with_id(id: IdType, type_info: NodeTypeInfo) -> Self {
        Self {
            id,
            name: type_info.name.clone(),
            group_id: INVALID_ID,
            break_point: false,
            pos: None,
            size: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            type_info,
        }
    }

    pub fn type_info(&self) -> &NodeTypeInfo {
        &self.type_info
    }

    pub fn inputs(&self) -> &[IdType] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[IdType] {
        &self.outputs
    }

    /// Id of the input pin at `index`, `INVALID_ID` when out of range
    pub fn input(&self, index: usize) -> IdType {
        self.inputs.get(index).copied().unwrap_or(INVALID_ID)
    }

    /// Id of the output pin at `index`, `INVALID_ID` when out of range
    pub fn output(&self, index: usize) -> IdType {
        self.outputs.get(index).copied().unwrap_or(INVALID_ID)
    }

    /// Whether `pin` belongs to this node
    pub fn owns_pin(&self, pin: IdType) -> bool {
        self.inputs.contains(&pin) || self.outputs.contains(&pin)
    }

    pub fn add_input(&mut self, graph: &mut Graph, name: &str, pin_type: PinType) -> IdType {
        let id = graph.make_pin(self.id, name, pin_type, PinKind::Input);
        self.inputs.push(id);
        id
    }

    pub fn add_output(&mut self, graph: &mut Graph, name: &str, pin_type: PinType) -> IdType {
        let id = graph.make_pin(self.id, name, pin_type, PinKind::Output);
        self.outputs.push(id);
        id
    }

    pub fn add_flow_input(&mut self, graph: &mut Graph, name: &str) -> FlowPin {
        FlowPin(self.add_input(graph, name, PinType::Flow))
    }

    pub fn add_flow_output(&mut self, graph: &mut Graph, name: &str) -> FlowPin {
        FlowPin(self.add_output(graph, name, PinType::Flow))
    }

    /// Add an input of a registered custom pin kind, seeded with its default value
    pub fn add_custom_input(&mut self, graph: &mut Graph, name: &str, kind: &PinExTypeInfo) -> IdType {
        let id = self.add_input(graph, name, PinType::Custom);
        if let Some(pin) = graph.pins.get_mut(id) {
            pin.ex_type = Some(kind.id);
            pin.value = kind.default_value();
        }
        id
    }

    /// Drop a pin from this node's lists without touching the pin table
    pub(crate) fn forget_pin(&mut self, pin: IdType) -> bool {
        let before = self.inputs.len() + self.outputs.len();
        self.inputs.retain(|p| *p != pin);
        self.outputs.retain(|p| *p != pin);
        before != self.inputs.len() + self.outputs.len()
    }

    /// Insert an already built output pin (dynamic pins discovered at runtime)
    pub fn insert_output_pin(
        &mut self,
        pins: &mut PinTable,
        mut pin: Pin,
        index: Option<usize>,
    ) -> Result<IdType, LinkError> {
        pin.node = self.id;
        pin.kind = PinKind::Output;
        let id = pin.id;
        pins.insert(pin)?;
        match index {
            Some(i) if i <= self.outputs.len() => self.outputs.insert(i, id),
            _ => self.outputs.push(id),
        }
        Ok(id)
    }

    /// Adopt pins created outside the regular builders
    pub(crate) fn adopt_pins(&mut self, inputs: Vec<IdType>, outputs: Vec<IdType>) {
        self.inputs = inputs;
        self.outputs = outputs;
    }

    /// Change the node id, updating the back-reference of every owned pin
    pub fn set_id(&mut self, pins: &mut PinTable, id: IdType) {
        self.id = id;
        for pin in self.inputs.iter().chain(self.outputs.iter()) {
            if let Some(p) = pins.get_mut(*pin) {
                p.node = id;
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────────────────────────────────────

    /// Restore the conventional node keys and pin states
    pub fn load(&mut self, value: &Value, pins: &mut PinTable) -> Result<(), LoadError> {
        let obj = value
            .as_object()
            .ok_or_else(|| LoadError::NodeLoad("node fragment is not an object".into()))?;

        if let Some(id) = obj.get("id") {
            let id = json_id(id).ok_or_else(|| LoadError::NodeLoad(format!("invalid node id {}", id)))?;
            self.set_id(pins, id);
        }
        if let Some(name) = obj.get("name").and_then(Value::as_str) {
            self.name = name.to_string();
        }
        if let Some(group) = obj.get("group_id") {
            self.group_id = json_id(group).unwrap_or(INVALID_ID);
        }
        self.break_point = obj.get("break_point").and_then(Value::as_bool).unwrap_or(false);
        self.pos = obj.get("pos").and_then(json_vec2);
        self.size = obj.get("size").and_then(json_vec2);

        let saved_inputs = pin_array(obj, "input_pins").map_err(LoadError::InputPin)?;
        if saved_inputs.len() != self.inputs.len() {
            return Err(LoadError::PinNumber {
                side: "input",
                saved: saved_inputs.len(),
                expected: self.inputs.len(),
            });
        }
        let saved_outputs = pin_array(obj, "output_pins").map_err(LoadError::OutputPin)?;
        if saved_outputs.len() != self.outputs.len() {
            return Err(LoadError::PinNumber {
                side: "output",
                saved: saved_outputs.len(),
                expected: self.outputs.len(),
            });
        }

        for (i, saved) in saved_inputs.iter().enumerate() {
            self.inputs[i] = load_pin(pins, self.inputs[i], saved).map_err(LoadError::InputPin)?;
        }
        for (i, saved) in saved_outputs.iter().enumerate() {
            self.outputs[i] = load_pin(pins, self.outputs[i], saved).map_err(LoadError::OutputPin)?;
        }
        Ok(())
    }

    /// Write the conventional node keys and pin states
    pub fn save(&self, value: &mut Map<String, Value>, pins: &PinTable, map: &IdMap) {
        value.insert("type_id".into(), Value::from(self.type_info.id));
        value.insert("type_name".into(), Value::from(self.type_info.name.clone()));
        value.insert("version".into(), Value::from(self.type_info.version));
        value.insert("id".into(), Value::from(map.resolve(self.id)));
        value.insert("name".into(), Value::from(self.name.clone()));
        value.insert("break_point".into(), Value::from(self.break_point));
        value.insert("group_id".into(), Value::from(map.resolve(self.group_id)));
        if let Some(pos) = self.pos {
            value.insert("pos".into(), serde_json::json!(pos));
        }
        if let Some(size) = self.size {
            value.insert("size".into(), serde_json::json!(size));
        }
        let inputs = self.inputs.iter().filter_map(|id| save_pin(pins, *id, map)).collect();
        let outputs = self.outputs.iter().filter_map(|id| save_pin(pins, *id, map)).collect();
        value.insert("input_pins".into(), Value::Array(inputs));
        value.insert("output_pins".into(), Value::Array(outputs));
    }
}

pub(crate) fn json_id(value: &Value) -> Option<IdType> {
    value.as_u64().and_then(|v| IdType::try_from(v).ok())
}

fn json_vec2(value: &Value) -> Option<[f32; 2]> {
    let arr = value.as_array().filter(|a| a.len() == 2)?;
    Some([arr[0].as_f64()? as f32, arr[1].as_f64()? as f32])
}

fn pin_array<'a>(obj: &'a Map<String, Value>, key: &str) -> Result<&'a [Value], String> {
    match obj.get(key) {
        None => Ok(&[]),
        Some(Value::Array(arr)) => Ok(arr.as_slice()),
        Some(_) => Err(format!("'{}' is not an array", key)),
    }
}

/// Apply a saved pin fragment to the live pin `current`; returns the pin's id afterwards
fn load_pin(pins: &mut PinTable, current: IdType, saved: &Value) -> Result<IdType, String> {
    let obj = saved.as_object().ok_or("pin fragment is not an object")?;
    let id = obj
        .get("id")
        .and_then(json_id)
        .ok_or("pin fragment has no valid id")?;

    let pin_type = pins.get(current).map(|p| p.pin_type).ok_or("pin vanished during load")?;
    if let Some(saved_type) = obj.get("type").and_then(Value::as_str) {
        let saved_type: PinType = saved_type.parse().map_err(|e: blueprint_types::UnknownPinType| e.to_string())?;
        if saved_type != pin_type {
            return Err(format!("pin {} saved as {}, node declares {}", id, saved_type, pin_type));
        }
    }

    let value = obj
        .get("value")
        .map(|v| PinValue::from_json(pin_type, v).map_err(|e| format!("pin {}: {}", id, e)))
        .transpose()?;

    // Nothing below can fail once the pin carries its saved id
    pins.rekey(current, id).map_err(|e| e.to_string())?;
    let pin = pins.get_mut(id).ok_or("pin vanished during load")?;
    if let Some(value) = value {
        pin.value = value;
    }
    pin.link = obj.get("link").and_then(json_id);
    if let Some(ex) = obj.get("ex_type").and_then(json_id) {
        pin.ex_type = Some(ex);
    }
    Ok(id)
}

/// Persisted form of one pin
pub(crate) fn save_pin(pins: &PinTable, id: IdType, map: &IdMap) -> Option<Value> {
    let pin = pins.get(id)?;
    let mut obj = Map::new();
    obj.insert("id".into(), Value::from(map.resolve(pin.id)));
    obj.insert("name".into(), Value::from(pin.name.clone()));
    obj.insert("type".into(), Value::from(pin.pin_type.name()));
    match pins.link_target(id) {
        Some(target) => {
            obj.insert("link".into(), Value::from(map.resolve(target.id)));
        }
        None => {
            if let Some(value) = pin.value.to_json() {
                obj.insert("value".into(), value);
            }
        }
    }
    if let Some(ex) = pin.ex_type {
        obj.insert("ex_type".into(), Value::from(ex));
    }
    Some(Value::Object(obj))
}

// ─────────────────────────────────────────────────────────────────────────────
// Node Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Downcasting support for node trait objects
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A unit of computation in a blueprint graph
pub trait Node: AsAny + Send {
    fn base(&self) -> &NodeBase;
    fn base_mut(&mut self) -> &mut NodeBase;

    /// Execute the node after flow entered through `entry`
    ///
    /// Inputs are read with `ctx.get_pin_value`, outputs written with
    /// `ctx.set_pin_value`. `threading` is true on the background stepping
    /// thread. Must not panic; report problems with `StepFlow::Fail`.
    fn execute(&mut self, ctx: &mut NodeContext<'_>, entry: FlowPin, threading: bool) -> StepFlow;

    fn type_info(&self) -> &NodeTypeInfo {
        self.base().type_info()
    }

    fn id(&self) -> IdType {
        self.base().id
    }

    fn name(&self) -> &str {
        &self.base().name
    }

    fn input_pins(&self) -> &[IdType] {
        self.base().inputs()
    }

    fn output_pins(&self) -> &[IdType] {
        self.base().outputs()
    }

    // Auto-link hints for the editor

    fn auto_link_input_flow_pin(&self, pins: &PinTable) -> Option<IdType> {
        first_pin(pins, self.input_pins(), true)
    }

    fn auto_link_output_flow_pin(&self, pins: &PinTable) -> Option<IdType> {
        first_pin(pins, self.output_pins(), true)
    }

    fn auto_link_input_data_pin(&self, pins: &PinTable) -> Option<IdType> {
        first_pin(pins, self.input_pins(), false)
    }

    fn auto_link_output_data_pin(&self, pins: &PinTable) -> Option<IdType> {
        first_pin(pins, self.output_pins(), false)
    }

    // Lifecycle

    /// Re-arm per-run state before a fresh run
    fn reset(&mut self, _ctx: &mut NodeContext<'_>) {}

    fn on_stop(&mut self, _ctx: &mut NodeContext<'_>) {}

    fn on_pause(&mut self, _ctx: &mut NodeContext<'_>) {}

    fn on_resume(&mut self, _ctx: &mut NodeContext<'_>) {}

    fn on_step_next(&mut self, _ctx: &mut NodeContext<'_>) {}

    fn on_step_current(&mut self, _ctx: &mut NodeContext<'_>) {}

    /// The graph is being cleared
    fn on_close(&mut self, _pins: &mut PinTable) {}

    /// A member of this (group) node is being deleted
    fn on_node_delete(&mut self, _node: IdType) {}

    // Persistence

    fn load(&mut self, value: &Value, pins: &mut PinTable) -> Result<(), LoadError> {
        self.base_mut().load(value, pins)
    }

    fn save(&self, value: &mut Map<String, Value>, pins: &PinTable, map: &IdMap) {
        self.base().save(value, pins, map)
    }

    /// A link from `receiver` to `provider` is about to be removed
    ///
    /// By default the receiver keeps the provider's last value as its literal.
    fn was_unlinked(&mut self, receiver: IdType, provider: IdType, pins: &mut PinTable) {
        pins.snapshot_link_value(receiver, provider);
    }
}

fn first_pin(pins: &PinTable, ids: &[IdType], flow: bool) -> Option<IdType> {
    ids.iter()
        .copied()
        .find(|id| pins.get(*id).is_some_and(|p| p.is_flow() == flow))
}
