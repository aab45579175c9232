// Dummy Node - Stand-in for nodes whose type cannot be instantiated
//
// Unknown type ids, major version mismatches and fragments that fail to load
// all end up here. The dummy rebuilds the saved pins so links stay intact and
// keeps the raw fragment so saving writes the node back the way it came in.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::warn;

use blueprint_types::{IdMap, IdType, INVALID_ID, LoadError, PinKind, PinType, PinValue};

use crate::executor::NodeContext;
use crate::node::{Node, NodeBase, NodeTypeInfo, StepFlow, json_id, save_pin};
use crate::pin::{FlowPin, Pin, PinTable};

/// Placeholder preserving an unresolvable node
#[derive(Debug)]
pub struct DummyNode {
    base: NodeBase,
    fragment: Map<String, Value>,
    /// Pin values as parsed from the fragment, to tell edits from lossy conversions
    loaded: HashMap<IdType, PinValue>,
}

impl DummyNode {
    /// Build a dummy from a saved node fragment, registering its pins
    pub fn from_fragment(value: &Value, pins: &mut PinTable) -> Result<Self, LoadError> {
        let obj = value
            .as_object()
            .ok_or_else(|| LoadError::NodeLoad("node fragment is not an object".into()))?;
        let id = obj
            .get("id")
            .and_then(json_id)
            .ok_or_else(|| LoadError::NodeLoad("node fragment has no valid id".into()))?;
        let type_id = obj.get("type_id").and_then(json_id).unwrap_or(INVALID_ID);
        let type_name = obj.get("type_name").and_then(Value::as_str).unwrap_or("Unknown");
        let version = obj
            .get("version")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0);

        let mut base = NodeBase::with_id(id, NodeTypeInfo::unresolved(type_id, type_name, version));
        if let Some(name) = obj.get("name").and_then(Value::as_str) {
            base.name = name.to_string();
        }
        base.group_id = obj.get("group_id").and_then(json_id).unwrap_or(INVALID_ID);
        base.break_point = obj.get("break_point").and_then(Value::as_bool).unwrap_or(false);

        let inputs = register_pins(obj, "input_pins", id, PinKind::Input, pins).map_err(LoadError::InputPin)?;
        let outputs = match register_pins(obj, "output_pins", id, PinKind::Output, pins) {
            Ok(outputs) => outputs,
            Err(e) => {
                for pin in &inputs {
                    pins.remove(*pin);
                }
                return Err(LoadError::OutputPin(e));
            }
        };
        let loaded = inputs
            .iter()
            .chain(&outputs)
            .filter_map(|id| pins.get(*id).map(|p| (*id, p.value.clone())))
            .collect();
        base.adopt_pins(inputs, outputs);

        Ok(Self {
            base,
            fragment: obj.clone(),
            loaded,
        })
    }

    /// Type id the saved node declared
    pub fn original_type_id(&self) -> IdType {
        self.base.type_info().id
    }

    pub fn fragment(&self) -> &Map<String, Value> {
        &self.fragment
    }
}

fn register_pins(
    obj: &Map<String, Value>,
    key: &str,
    node: IdType,
    kind: PinKind,
    pins: &mut PinTable,
) -> Result<Vec<IdType>, String> {
    let saved = match obj.get(key) {
        None => return Ok(Vec::new()),
        Some(Value::Array(arr)) => arr,
        Some(_) => return Err(format!("'{}' is not an array", key)),
    };

    let mut ids = Vec::with_capacity(saved.len());
    for fragment in saved {
        match register_pin(fragment, node, kind, pins) {
            Ok(id) => ids.push(id),
            Err(e) => {
                for id in ids {
                    pins.remove(id);
                }
                return Err(e);
            }
        }
    }
    Ok(ids)
}

fn register_pin(fragment: &Value, node: IdType, kind: PinKind, pins: &mut PinTable) -> Result<IdType, String> {
    let obj = fragment.as_object().ok_or("pin fragment is not an object")?;
    let id = obj.get("id").and_then(json_id).ok_or("pin fragment has no valid id")?;
    let name = obj.get("name").and_then(Value::as_str).unwrap_or_default();
    let pin_type = obj
        .get("type")
        .and_then(Value::as_str)
        .and_then(|t| t.parse::<PinType>().ok())
        .unwrap_or(PinType::Any);

    let mut pin = Pin::new(id, node, name, pin_type, kind);
    if let Some(value) = obj.get("value") {
        pin.value = PinValue::from_json(pin_type, value).unwrap_or_else(|_| PinValue::Custom(value.clone()));
    }
    pin.link = obj.get("link").and_then(json_id);
    pin.ex_type = obj.get("ex_type").and_then(json_id);
    pins.insert(pin).map_err(|e| e.to_string())?;
    Ok(id)
}

impl Node for DummyNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn execute(&mut self, _ctx: &mut NodeContext<'_>, _entry: FlowPin, _threading: bool) -> StepFlow {
        warn!(node = self.base.id, type_id = self.original_type_id(), "dummy node cannot execute");
        StepFlow::Fail(format!(
            "node {} has unresolved type {} ({:#010x})",
            self.base.id,
            self.base.type_info().name,
            self.original_type_id()
        ))
    }

    fn load(&mut self, value: &Value, pins: &mut PinTable) -> Result<(), LoadError> {
        for pin in self.base.inputs().iter().chain(self.base.outputs()) {
            pins.remove(*pin);
        }
        *self = Self::from_fragment(value, pins)?;
        Ok(())
    }

    /// Write the raw fragment back, overlaying what may have changed since load
    fn save(&self, value: &mut Map<String, Value>, pins: &PinTable, map: &IdMap) {
        *value = self.fragment.clone();
        value.insert("id".into(), Value::from(map.resolve(self.base.id)));
        if self.fragment.contains_key("name") || self.base.name != self.base.type_info().name {
            value.insert("name".into(), Value::from(self.base.name.clone()));
        }
        if self.fragment.contains_key("group_id") || self.base.group_id != INVALID_ID {
            value.insert("group_id".into(), Value::from(map.resolve(self.base.group_id)));
        }
        if self.fragment.contains_key("break_point") || self.base.break_point {
            value.insert("break_point".into(), Value::from(self.base.break_point));
        }
        if let Some(pos) = self.base.pos {
            value.insert("pos".into(), serde_json::json!(pos));
        }
        if let Some(size) = self.base.size {
            value.insert("size".into(), serde_json::json!(size));
        }
        overlay_pins(value, "input_pins", self.base.inputs(), pins, map, &self.loaded);
        overlay_pins(value, "output_pins", self.base.outputs(), pins, map, &self.loaded);
    }
}

/// Refresh the saved pin fragments from the live pins, keeping unknown keys
///
/// A literal is only rewritten when the live value differs from what was
/// parsed at load, so the saved JSON number keeps its exact spelling.
fn overlay_pins(
    value: &mut Map<String, Value>,
    key: &str,
    ids: &[IdType],
    pins: &PinTable,
    map: &IdMap,
    loaded: &HashMap<IdType, PinValue>,
) {
    let Some(Value::Array(saved)) = value.get_mut(key) else {
        return;
    };
    for (fragment, id) in saved.iter_mut().zip(ids) {
        let (Some(obj), Some(Value::Object(live))) = (fragment.as_object_mut(), save_pin(pins, *id, map)) else {
            continue;
        };
        if let Some(id) = live.get("id") {
            obj.insert("id".into(), id.clone());
        }
        match live.get("link") {
            Some(link) => {
                obj.insert("link".into(), link.clone());
            }
            None => {
                obj.remove("link");
            }
        }
        let edited = pins
            .get(*id)
            .is_some_and(|p| loaded.get(id).is_none_or(|v| *v != p.value));
        if let (true, Some(v)) = (edited, live.get("value")) {
            obj.insert("value".into(), v.clone());
        }
    }
}
