// Blueprint - Facade owning one graph and the context executing it
//
// `Bp` is what editors and tools talk to: node and link editing, execution
// control, and persistence of the graph as a JSON document. The graph is
// shared with the context's stepping thread; every editing call takes the
// graph lock for its whole duration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};

use blueprint_types::{
    IdMap, IdType, INVALID_ID, LoadError, PinType, PinValue, StepResult, version_major,
};

use crate::config::EngineConfig;
use crate::context::{Context, ContextOptions, Lifecycle};
use crate::dummy::DummyNode;
use crate::graph::Graph;
use crate::node::{Node, json_id};
use crate::nodes::GroupNode;
use crate::pin::{FlowPin, LinkError, Pin, PinTable};
use crate::registry::{NodeRegistry, PinExRegistry};

/// Editor offset applied to cloned nodes
const CLONE_OFFSET: [f32; 2] = [20.0, 20.0];

/// Errors of the file helpers
#[derive(Debug, thiserror::Error)]
pub enum BlueprintError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid blueprint JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Load(#[from] LoadError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Bp
// ─────────────────────────────────────────────────────────────────────────────

/// A blueprint: graph, execution context and the registries it draws from
///
/// The registry is the last field so nodes whose code lives in a plugin are
/// dropped before the plugin library can be.
pub struct Bp {
    graph: Arc<Mutex<Graph>>,
    context: Context,
    pin_ex: Arc<PinExRegistry>,
    options: ContextOptions,
    registry: Arc<NodeRegistry>,
}

impl Default for Bp {
    fn default() -> Self {
        Self::new(Arc::new(NodeRegistry::with_builtins()))
    }
}

impl Bp {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self::with_registries(registry, Arc::new(PinExRegistry::new()), ContextOptions::default())
    }

    pub fn with_registries(
        registry: Arc<NodeRegistry>,
        pin_ex: Arc<PinExRegistry>,
        options: ContextOptions,
    ) -> Self {
        let graph = Arc::new(Mutex::new(Graph::new()));
        let context = Context::new(Arc::clone(&graph), options.clone());
        Self {
            graph,
            context,
            pin_ex,
            options,
            registry,
        }
    }

    /// Blueprint using the engine settings from `config`
    pub fn from_config(config: &EngineConfig, registry: Arc<NodeRegistry>, pin_ex: Arc<PinExRegistry>) -> Self {
        Self::with_registries(registry, pin_ex, config.context_options())
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn pin_ex_registry(&self) -> &Arc<PinExRegistry> {
        &self.pin_ex
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Read access to the graph under its lock
    pub fn with_graph<R>(&self, f: impl FnOnce(&Graph) -> R) -> R {
        f(&*self.graph.lock())
    }

    /// Write access to the graph under its lock
    pub fn with_graph_mut<R>(&self, f: impl FnOnce(&mut Graph) -> R) -> R {
        f(&mut *self.graph.lock())
    }

    pub fn node_count(&self) -> usize {
        self.graph.lock().node_count()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Nodes
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a node of a registered type; returns its id
    pub fn create_node(&self, type_id: IdType) -> Option<IdType> {
        let mut graph = self.graph.lock();
        let Some(node) = self.registry.create(type_id, &mut graph) else {
            warn!(type_id, "cannot create node of unknown type");
            return None;
        };
        let id = graph.push_node(node);
        debug!(node_id = id, type_id, "node created");
        Some(id)
    }

    pub fn create_node_by_name(&self, name: &str) -> Option<IdType> {
        let type_id = match self.registry.find_by_name(name) {
            Some(info) => info.id,
            None => {
                warn!(name, "cannot create node of unknown type");
                return None;
            }
        };
        self.create_node(type_id)
    }

    /// Build a node in place and add it to the graph
    pub fn add_node<N, F>(&self, build: F) -> IdType
    where
        N: Node + 'static,
        F: FnOnce(&mut Graph) -> N,
    {
        let mut graph = self.graph.lock();
        let node = build(&mut *graph);
        graph.push_node(Box::new(node))
    }

    /// Delete a node with its pins; its group is notified first
    pub fn delete_node(&self, id: IdType) -> bool {
        let mut graph = self.graph.lock();
        let Some(group) = graph.node(id).map(|n| n.base().group_id) else {
            return false;
        };
        if group != INVALID_ID {
            if let Some(group) = graph.node_mut(group) {
                group.on_node_delete(id);
            }
        }
        // Members of a deleted group move to the top level
        for node in graph.nodes.iter_mut() {
            if node.base().group_id == id {
                node.base_mut().group_id = INVALID_ID;
            }
        }
        graph.remove_node(id);
        debug!(node_id = id, "node deleted");
        true
    }

    /// New node of the same type and group, placed next to the original
    pub fn clone_node(&self, id: IdType) -> Option<IdType> {
        let mut graph = self.graph.lock();
        let (type_id, pos, size, group) = {
            let node = graph.node(id)?;
            (node.type_info().id, node.base().pos, node.base().size, node.base().group_id)
        };
        let mut node = self.registry.create(type_id, &mut graph)?;
        node.base_mut().size = size;
        node.base_mut().pos = pos.map(|[x, y]| [x + CLONE_OFFSET[0], y + CLONE_OFFSET[1]]);
        node.base_mut().group_id = group;
        let clone = graph.push_node(node);
        if let Some(group) = graph.node_as_mut::<GroupNode>(group) {
            group.adopt(clone);
        }
        debug!(node_id = id, clone, "node cloned");
        Some(clone)
    }

    /// Move a node into a group (`INVALID_ID` for the top level)
    pub fn set_node_group(&self, id: IdType, group: IdType) -> bool {
        let mut graph = self.graph.lock();
        if id == group || (group != INVALID_ID && graph.node_as::<GroupNode>(group).is_none()) {
            return false;
        }
        let Some(previous) = graph.node(id).map(|n| n.base().group_id) else {
            return false;
        };
        if let Some(previous) = graph.node_mut(previous) {
            previous.on_node_delete(id);
        }
        if let Some(node) = graph.node_mut(id) {
            node.base_mut().group_id = group;
        }
        if let Some(group) = graph.node_as_mut::<GroupNode>(group) {
            group.adopt(id);
        }
        true
    }

    pub fn find_entry_point(&self) -> Option<IdType> {
        self.graph.lock().find_entry_point()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pins & Links
    // ─────────────────────────────────────────────────────────────────────────

    pub fn link(&self, from: IdType, to: IdType) -> Result<(), LinkError> {
        self.graph.lock().pins.link(from, to)?;
        debug!(from, to, "pins linked");
        Ok(())
    }

    /// Remove the outgoing link of `pin`; returns the former target
    ///
    /// For a data input the owning node's `was_unlinked` runs first, so by
    /// default the pin keeps the provider's last value.
    pub fn unlink(&self, pin: IdType) -> Option<IdType> {
        let mut graph = self.graph.lock();
        let Graph { nodes, pins, .. } = &mut *graph;
        let (target, owner, is_data_input) = {
            let p = pins.get(pin)?;
            (p.link?, p.node, p.is_input() && !p.is_flow())
        };
        if is_data_input && pins.contains(target) {
            if let Some(node) = nodes.iter_mut().find(|n| n.id() == owner) {
                node.was_unlinked(pin, target, pins);
            }
        }
        let target = pins.unlink(pin);
        debug!(pin_id = pin, target = ?target, "pin unlinked");
        target
    }

    /// Remove a pin from its node and the pin table, handing it back
    pub fn forget_pin(&self, pin: IdType) -> Option<Pin> {
        let mut graph = self.graph.lock();
        let owner = graph.pins.get(pin)?.node;
        if let Some(node) = graph.node_mut(owner) {
            node.base_mut().forget_pin(pin);
        }
        graph.pins.remove(pin)
    }

    pub fn find_pins_linked_to(&self, pin: IdType) -> Vec<IdType> {
        self.graph.lock().pins.find_pins_linked_to(pin)
    }

    pub fn has_pin_any_link(&self, pin: IdType) -> bool {
        self.graph.lock().pins.has_any_link(pin)
    }

    pub fn set_pin_value(&self, pin: IdType, value: impl Into<PinValue>) -> bool {
        self.graph.lock().pins.set_value(pin, value)
    }

    /// Resolved value of a pin, following links
    pub fn pin_value(&self, pin: IdType) -> PinValue {
        self.context.pin_value(pin)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Execution
    // ─────────────────────────────────────────────────────────────────────────

    /// Output flow pin execution starts from when entering at `node`
    fn entry_flow_pin(&self, node: IdType) -> Option<FlowPin> {
        let graph = self.graph.lock();
        let node = graph.node(node)?;
        node.auto_link_output_flow_pin(&graph.pins).map(FlowPin)
    }

    fn prepare(&self, node: IdType) -> Option<FlowPin> {
        let Some(entry) = self.entry_flow_pin(node) else {
            error!(node_id = node, "node has no output flow pin to start from");
            self.context.set_step_result(StepResult::Error);
            return None;
        };
        if !self.context.is_executing() {
            self.reset_state();
        }
        Some(entry)
    }

    /// Start executing at `node` on the background stepping thread
    pub fn execute(&self, node: IdType) -> StepResult {
        match self.prepare(node) {
            Some(entry) => {
                info!(node_id = node, "executing blueprint");
                self.context.execute(entry)
            }
            None => StepResult::Error,
        }
    }

    /// Run from `node` to completion on the calling thread
    pub fn run(&self, node: IdType) -> StepResult {
        match self.prepare(node) {
            Some(entry) => {
                info!(node_id = node, "running blueprint");
                self.context.run(entry)
            }
            None => StepResult::Error,
        }
    }

    /// Arm execution at `node` for manual stepping through the context
    pub fn start(&self, node: IdType) -> StepResult {
        match self.prepare(node) {
            Some(entry) => self.context.start(entry),
            None => StepResult::Error,
        }
    }

    pub fn pause(&self) -> bool {
        info!("pause requested");
        self.context.pause()
    }

    pub fn resume(&self) -> bool {
        info!("resume requested");
        self.context.resume()
    }

    pub fn thread_step(&self) -> bool {
        debug!("step requested");
        self.context.thread_step()
    }

    pub fn thread_restep(&self) -> bool {
        debug!("restep requested");
        self.context.thread_restep()
    }

    pub fn stop(&self) {
        info!("stop requested");
        self.context.stop();
    }

    /// Clear the execution state and re-arm every node
    pub fn reset_state(&self) {
        self.context.reset_state();
        self.context.relay(Lifecycle::Reset);
    }

    /// Stop execution and drop every node
    pub fn clear(&self) {
        self.context.stop();
        {
            let mut graph = self.graph.lock();
            let Graph { nodes, pins, .. } = &mut *graph;
            for node in nodes.iter_mut() {
                node.on_close(pins);
            }
            graph.reset();
        }
        self.context.reset_state();
        debug!("blueprint cleared");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────────────────────────────────────

    /// Document form of the whole graph
    pub fn save(&self) -> Value {
        let graph = self.graph.lock();
        let map = IdMap::new();
        let nodes: Vec<Value> = graph.nodes().map(|n| save_node(n, &graph.pins, &map)).collect();
        json!({
            "nodes": nodes,
            "state": { "generator_state": graph.generator.state() },
        })
    }

    /// Replace the graph with the one described by `document`
    ///
    /// Nodes that cannot be instantiated are kept as `DummyNode`s; fragments
    /// too malformed for that are skipped. On error the current graph is kept.
    pub fn load(&self, document: &Value) -> Result<(), LoadError> {
        let obj = document
            .as_object()
            .ok_or_else(|| LoadError::Document("document is not a JSON object".into()))?;
        let fragments = obj
            .get("nodes")
            .and_then(Value::as_array)
            .ok_or_else(|| LoadError::NodeLoad("document has no 'nodes' array".into()))?;
        let generator_state = obj
            .get("state")
            .and_then(|s| s.get("generator_state"))
            .and_then(json_id)
            .ok_or_else(|| LoadError::NodeLoad("document has no 'state.generator_state'".into()))?;

        let mut graph = Graph::new();
        // Ids handed out to factories must not collide with any saved id
        let max_saved = fragments.iter().flat_map(fragment_ids).max().unwrap_or(INVALID_ID);
        graph.generator.set_state(generator_state.max(max_saved.saturating_add(1)));

        let mut skipped = 0;
        for (index, fragment) in fragments.iter().enumerate() {
            if let Err(e) = self.load_node(&mut graph, fragment) {
                warn!(index, code = e.code(), error = %e, "skipping node that cannot be loaded");
                skipped += 1;
            }
        }
        let loaded = graph.node_ids();
        self.finish_load(&mut graph, loaded);
        let watermark = generator_state.max(graph.max_id().saturating_add(1));
        graph.generator.set_state(watermark);

        self.clear();
        let nodes = graph.node_count();
        *self.graph.lock() = graph;
        info!(nodes, skipped, generator_state = watermark, "blueprint loaded");
        Ok(())
    }

    /// Instantiate one saved node into `graph`
    fn load_node(&self, graph: &mut Graph, fragment: &Value) -> Result<IdType, LoadError> {
        let type_id = fragment
            .get("type_id")
            .and_then(json_id)
            .ok_or_else(|| LoadError::NodeLoad("node has no 'type_id'".into()))?;
        let id = fragment
            .get("id")
            .and_then(json_id)
            .ok_or_else(|| LoadError::NodeLoad("node has no valid 'id'".into()))?;
        if graph.is_id_in_use(id) {
            return Err(LoadError::NodeLoad(format!("node id {} is already in use", id)));
        }
        let version = fragment
            .get("version")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0);

        let node = match self.registry.find(type_id) {
            None => {
                warn!(node_id = id, type_id, "unknown node type; keeping node as dummy");
                None
            }
            Some(info) if version_major(info.version) != version_major(version) => {
                warn!(
                    node_id = id,
                    type_id,
                    saved = version,
                    registered = info.version,
                    "node type version mismatch; keeping node as dummy"
                );
                None
            }
            Some(info) => info.create(graph).and_then(|mut node| match node.load(fragment, &mut graph.pins) {
                Ok(()) => Some(node),
                Err(e) => {
                    warn!(node_id = id, type_id, error = %e, "node failed to load; keeping node as dummy");
                    graph.release_pins(node.as_ref());
                    None
                }
            }),
        };

        let node = match node {
            Some(node) => node,
            None => Box::new(DummyNode::from_fragment(fragment, &mut graph.pins)?),
        };
        Ok(graph.push_node(node))
    }

    /// Post-load fixups for the nodes just added
    fn finish_load(&self, graph: &mut Graph, added: Vec<IdType>) {
        let dropped = graph.pins.rebuild_reverse_links();
        if dropped > 0 {
            warn!(dropped, "dropped links to missing pins");
        }
        self.fill_custom_defaults(&mut graph.pins);

        let members: Vec<(IdType, IdType)> = added
            .iter()
            .filter_map(|id| graph.node(*id))
            .filter(|n| n.base().group_id != INVALID_ID)
            .map(|n| (n.base().group_id, n.id()))
            .collect();
        for (group, member) in members {
            match graph.node_as_mut::<GroupNode>(group) {
                Some(group) => group.adopt(member),
                None => warn!(node_id = member, group_id = group, "node refers to a missing group"),
            }
        }
    }

    /// Give custom pins without a saved payload their kind's default
    fn fill_custom_defaults(&self, pins: &mut PinTable) {
        let unset: Vec<(IdType, IdType)> = pins
            .iter()
            .filter(|p| p.pin_type == PinType::Custom && p.value == PinValue::Custom(Value::Null))
            .filter_map(|p| p.ex_type.map(|ex| (p.id, ex)))
            .collect();
        for (pin, ex_type) in unset {
            match self.pin_ex.default_value(ex_type) {
                Some(value) => {
                    if let Some(pin) = pins.get_mut(pin) {
                        pin.value = value;
                    }
                }
                None => debug!(pin_id = pin, ex_type, "no registered pin kind for custom pin"),
            }
        }
    }

    /// Copy of this blueprint made through a save and load
    pub fn try_clone(&self) -> Result<Bp, LoadError> {
        let copy = Bp::with_registries(Arc::clone(&self.registry), Arc::clone(&self.pin_ex), self.options.clone());
        copy.load(&self.save())?;
        Ok(copy)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Groups
    // ─────────────────────────────────────────────────────────────────────────

    /// Export a group node with its members
    pub fn export_group(&self, group: IdType) -> Option<Value> {
        let graph = self.graph.lock();
        let group_node = graph.node_as::<GroupNode>(group)?;
        let map = IdMap::new();
        let members: Vec<Value> = graph
            .nodes()
            .filter(|n| n.base().group_id == group)
            .map(|n| save_node(n, &graph.pins, &map))
            .collect();
        Some(json!({
            "group": save_node(group_node, &graph.pins, &map),
            "status": group_node.status().clone(),
            "nodes": members,
        }))
    }

    /// Import an exported group under fresh ids; returns the new group id
    ///
    /// Links to pins outside the import are dropped. With `pos` the group
    /// is moved there and its members keep their relative placement.
    pub fn import(&self, document: &Value, pos: Option<[f32; 2]>) -> Result<IdType, LoadError> {
        let missing = |key: &str| LoadError::GroupLoad(format!("group document has no '{}'", key));
        let group = document.get("group").ok_or_else(|| missing("group"))?;
        let status = document.get("status").ok_or_else(|| missing("status"))?;
        let members = document
            .get("nodes")
            .and_then(Value::as_array)
            .ok_or_else(|| missing("nodes"))?;

        let mut graph = self.graph.lock();

        let mut map = IdMap::new();
        for old in std::iter::once(group).chain(members).flat_map(fragment_ids) {
            if !map.contains(old) {
                let new = graph.make_id();
                map.insert(old, new);
            }
        }
        let new_group = group
            .get("id")
            .and_then(json_id)
            .and_then(|id| map.get(id))
            .ok_or_else(|| LoadError::GroupLoad("group node has no valid id".into()))?;

        let delta = match (pos, group.get("pos").and_then(vec2)) {
            (Some([x, y]), Some([gx, gy])) => Some([x - gx, y - gy]),
            _ => None,
        };

        let mut added = Vec::new();
        let fragments = std::iter::once((group, INVALID_ID)).chain(members.iter().map(|m| (m, new_group)));
        for (fragment, group_id) in fragments {
            let mut fragment = remap_fragment(fragment, &map, group_id);
            if let Some([dx, dy]) = delta {
                offset_pos(&mut fragment, dx, dy);
            }
            if fragment.get("pos").is_none() && group_id == INVALID_ID {
                if let (Some(obj), Some(p)) = (fragment.as_object_mut(), pos) {
                    obj.insert("pos".into(), json!(p));
                }
            }
            match self.load_node(&mut *graph, &fragment) {
                Ok(id) => added.push(id),
                Err(e) => {
                    for id in added {
                        graph.remove_node(id);
                    }
                    return Err(LoadError::GroupLoad(e.to_string()));
                }
            }
        }

        self.finish_load(&mut *graph, added.clone());
        if let Some(group) = graph.node_as_mut::<GroupNode>(new_group) {
            group.set_status(status.clone());
        }
        info!(group_id = new_group, nodes = added.len(), "group imported");
        Ok(new_group)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Files
    // ─────────────────────────────────────────────────────────────────────────

    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<(), BlueprintError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| BlueprintError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let document: Value = serde_json::from_str(&content)?;
        self.load(&document)?;
        Ok(())
    }

    pub fn save_file(&self, path: impl AsRef<Path>) -> Result<(), BlueprintError> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(&self.save())?;
        std::fs::write(path, content).map_err(|source| BlueprintError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl std::fmt::Debug for Bp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bp")
            .field("graph", &*self.graph.lock())
            .field("context", &self.context)
            .field("registry", &self.registry)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fragment Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn save_node(node: &dyn Node, pins: &PinTable, map: &IdMap) -> Value {
    let mut obj = Map::new();
    node.save(&mut obj, pins, map);
    Value::Object(obj)
}

/// Node id and pin ids carried by a saved node fragment
fn fragment_ids(fragment: &Value) -> Vec<IdType> {
    let mut ids: Vec<IdType> = fragment.get("id").and_then(json_id).into_iter().collect();
    for key in ["input_pins", "output_pins"] {
        if let Some(pins) = fragment.get(key).and_then(Value::as_array) {
            ids.extend(pins.iter().filter_map(|p| p.get("id").and_then(json_id)));
        }
    }
    ids
}

/// Rewrite every id in a fragment through `map`; links leaving the map are dropped
fn remap_fragment(fragment: &Value, map: &IdMap, group_id: IdType) -> Value {
    let mut fragment = fragment.clone();
    let Some(obj) = fragment.as_object_mut() else {
        return fragment;
    };
    if let Some(id) = obj.get("id").and_then(json_id) {
        obj.insert("id".into(), Value::from(map.resolve(id)));
    }
    obj.insert("group_id".into(), Value::from(group_id));
    for key in ["input_pins", "output_pins"] {
        let Some(Value::Array(pins)) = obj.get_mut(key) else {
            continue;
        };
        for pin in pins.iter_mut().filter_map(Value::as_object_mut) {
            if let Some(id) = pin.get("id").and_then(json_id) {
                pin.insert("id".into(), Value::from(map.resolve(id)));
            }
            match pin.get("link").and_then(json_id).and_then(|l| map.get(l)) {
                Some(link) => {
                    pin.insert("link".into(), Value::from(link));
                }
                None => {
                    pin.remove("link");
                }
            }
        }
    }
    fragment
}

fn vec2(value: &Value) -> Option<[f32; 2]> {
    let arr = value.as_array().filter(|a| a.len() == 2)?;
    Some([arr[0].as_f64()? as f32, arr[1].as_f64()? as f32])
}

fn offset_pos(fragment: &mut Value, dx: f32, dy: f32) {
    let Some(obj) = fragment.as_object_mut() else {
        return;
    };
    if let Some([x, y]) = obj.get("pos").and_then(vec2) {
        obj.insert("pos".into(), json!([x + dx, y + dy]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use blueprint_types::{BP_ERR_DOC_LOAD, BP_ERR_GROUP_LOAD, BP_ERR_NODE_LOAD};

    use crate::monitor::{ContextEvent, ContextMonitor, EventMonitor};
    use crate::nodes::{AddNode, EntryPointNode, ExitPointNode, FloatNode, LoopNode, PrintNode};

    fn blueprint() -> Bp {
        Bp::default()
    }

    fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    struct Pipeline {
        entry: IdType,
        print: IdType,
    }

    /// Entry → Print(text) → Exit
    fn pipeline(bp: &Bp, text: &str) -> Pipeline {
        let entry = bp.create_node(EntryPointNode::TYPE_ID).unwrap();
        let print = bp.create_node(PrintNode::TYPE_ID).unwrap();
        let exit = bp.create_node(ExitPointNode::TYPE_ID).unwrap();
        let (start, enter, leave, text_pin, end) = bp.with_graph(|g| {
            let p = g.node_as::<PrintNode>(print).unwrap();
            (
                g.node_as::<EntryPointNode>(entry).unwrap().exit(),
                p.enter(),
                p.exit(),
                p.text(),
                g.node_as::<ExitPointNode>(exit).unwrap().enter(),
            )
        });
        bp.link(start.id(), enter.id()).unwrap();
        bp.link(leave.id(), end.id()).unwrap();
        assert!(bp.set_pin_value(text_pin, text));
        Pipeline { entry, print }
    }

    fn printed(bp: &Bp, print: IdType) -> String {
        bp.with_graph(|g| g.node_as::<PrintNode>(print).unwrap().last_string().to_string())
    }

    #[test]
    fn test_linear_pipeline() {
        let bp = blueprint();
        let p = pipeline(&bp, "hello");
        assert_eq!(bp.find_entry_point(), Some(p.entry));

        assert_eq!(bp.run(p.entry), StepResult::Done);
        assert_eq!(bp.context().step_count(), 2);
        assert_eq!(printed(&bp, p.print), "hello");
        assert!(!bp.context().is_executing());

        // A second run starts from a clean state
        assert_eq!(bp.run(p.entry), StepResult::Done);
        assert_eq!(bp.context().step_count(), 2);
    }

    #[test]
    fn test_run_without_flow_output_fails() {
        let bp = blueprint();
        let exit = bp.create_node(ExitPointNode::TYPE_ID).unwrap();
        assert_eq!(bp.run(exit), StepResult::Error);
        assert_eq!(bp.run(4242), StepResult::Error);
    }

    #[test]
    fn test_unresolvable_type_survives_round_trips() {
        let bp = blueprint();
        let p = pipeline(&bp, "unused");
        let mut document = bp.save();

        let dummy = json!({
            "type_id": 0xDEAD_BEEFu32,
            "type_name": "PluginFilter",
            "version": 0x0102_0000,
            "id": 500,
            "name": "Filter",
            "break_point": false,
            "group_id": 0,
            "strength": 0.75,
            "input_pins": [{ "id": 501, "name": "Enter", "type": "Flow" }],
            "output_pins": [{ "id": 502, "name": "Exit", "type": "Flow" }]
        });
        document["nodes"].as_array_mut().unwrap().push(dummy.clone());
        document["state"]["generator_state"] = json!(503);
        // Route the entry into the unknown node
        document["nodes"][0]["output_pins"][0]["link"] = json!(501);

        bp.load(&document).unwrap();
        assert!(bp.with_graph(|g| g.node_as::<DummyNode>(500).is_some()));
        let first = bp.save();
        assert_eq!(first["nodes"][3], dummy);
        assert_eq!(bp.find_pins_linked_to(501).len(), 1);

        bp.load(&first).unwrap();
        assert_eq!(bp.save(), first);

        // Flow into the dummy is an execution error
        assert_eq!(bp.run(p.entry), StepResult::Error);
    }

    #[test]
    fn test_disconnect_preserves_last_value() {
        let bp = blueprint();
        let entry = bp.create_node(EntryPointNode::TYPE_ID).unwrap();
        let float = bp.create_node(FloatNode::TYPE_ID).unwrap();
        let add = bp.create_node(AddNode::TYPE_ID).unwrap();
        let exit = bp.create_node(ExitPointNode::TYPE_ID).unwrap();
        let (start, f, a, end) = bp.with_graph(|g| {
            let f = g.node_as::<FloatNode>(float).unwrap();
            let a = g.node_as::<AddNode>(add).unwrap();
            (
                g.node_as::<EntryPointNode>(entry).unwrap().exit(),
                (f.enter(), f.input(), f.exit(), f.output()),
                (a.enter(), a.a(), a.b(), a.exit(), a.sum()),
                g.node_as::<ExitPointNode>(exit).unwrap().enter(),
            )
        });
        bp.link(start.id(), f.0.id()).unwrap();
        bp.link(f.2.id(), a.0.id()).unwrap();
        bp.link(a.3.id(), end.id()).unwrap();
        bp.link(a.1, f.3).unwrap();
        bp.set_pin_value(f.1, 2.5f32);
        bp.set_pin_value(a.2, 1.0f32);

        assert_eq!(bp.run(entry), StepResult::Done);
        assert_eq!(bp.pin_value(a.4), PinValue::Float(3.5));
        assert!(bp.has_pin_any_link(a.1));

        assert_eq!(bp.unlink(a.1), Some(f.3));
        assert!(!bp.has_pin_any_link(a.1));
        assert_eq!(bp.pin_value(a.1), PinValue::Float(2.5));
    }

    #[test]
    fn test_save_load_round_trip() {
        let bp = blueprint();
        let p = pipeline(&bp, "persisted");
        bp.with_graph_mut(|g| g.node_mut(p.print).unwrap().base_mut().pos = Some([10.0, 20.0]));
        let document = bp.save();
        let generator_state = document["state"]["generator_state"].clone();

        let other = blueprint();
        other.load(&document).unwrap();
        assert_eq!(other.save(), document);
        assert_eq!(other.save()["state"]["generator_state"], generator_state);

        // New ids continue after the restored watermark
        let fresh = other.create_node(PrintNode::TYPE_ID).unwrap();
        assert!(u64::from(fresh) >= generator_state.as_u64().unwrap());

        assert_eq!(other.run(p.entry), StepResult::Done);
        assert_eq!(printed(&other, p.print), "persisted");

        let copy = other.try_clone().unwrap();
        assert_eq!(copy.save(), other.save());
    }

    #[test]
    fn test_ids_are_unique() {
        let bp = blueprint();
        for _ in 0..5 {
            pipeline(&bp, "x");
        }
        let loop_node = bp.create_node(LoopNode::TYPE_ID).unwrap();
        bp.clone_node(loop_node).unwrap();

        let (ids, count) = bp.with_graph(|g| {
            let mut ids = BTreeSet::new();
            let mut count = 0;
            for node in g.nodes() {
                ids.insert(node.id());
                count += 1;
                for pin in node.input_pins().iter().chain(node.output_pins()) {
                    ids.insert(*pin);
                    count += 1;
                }
            }
            (ids, count)
        });
        assert_eq!(ids.len(), count);
        assert!(!ids.contains(&INVALID_ID));
    }

    #[test]
    fn test_delete_and_clone() {
        let bp = blueprint();
        let p = pipeline(&bp, "x");
        bp.with_graph_mut(|g| g.node_mut(p.print).unwrap().base_mut().pos = Some([1.0, 2.0]));

        let clone = bp.clone_node(p.print).unwrap();
        let pos = bp.with_graph(|g| g.node(clone).unwrap().base().pos);
        assert_eq!(pos, Some([21.0, 22.0]));

        let pins = bp.with_graph(|g| g.node(p.print).unwrap().input_pins().to_vec());
        assert!(bp.delete_node(p.print));
        assert!(!bp.delete_node(p.print));
        assert!(bp.with_graph(|g| pins.iter().all(|pin| !g.pins.contains(*pin))));
        // The entry's flow output lost its target with the node
        assert_eq!(bp.run(p.entry), StepResult::Done);
        assert_eq!(bp.context().step_count(), 0);
    }

    #[test]
    fn test_forget_pin() {
        let bp = blueprint();
        let p = pipeline(&bp, "x");
        let text = bp.with_graph(|g| g.node_as::<PrintNode>(p.print).unwrap().text());
        let pin = bp.forget_pin(text).unwrap();
        assert_eq!(pin.id, text);
        assert!(bp.with_graph(|g| !g.node(p.print).unwrap().base().owns_pin(text)));
        assert!(bp.forget_pin(text).is_none());
    }

    #[test]
    fn test_threaded_execute_and_stop() {
        let bp = blueprint();
        let entry = bp.create_node(EntryPointNode::TYPE_ID).unwrap();
        let looped = bp.create_node(LoopNode::TYPE_ID).unwrap();
        let print = bp.create_node(PrintNode::TYPE_ID).unwrap();
        let (start, enter, body, end, print_in) = bp.with_graph(|g| {
            let l = g.node_as::<LoopNode>(looped).unwrap();
            (
                g.node_as::<EntryPointNode>(entry).unwrap().exit(),
                l.enter(),
                l.body(),
                l.end(),
                g.node_as::<PrintNode>(print).unwrap().enter(),
            )
        });
        bp.link(start.id(), enter.id()).unwrap();
        bp.link(body.id(), print_in.id()).unwrap();
        bp.set_pin_value(end, i32::MAX);

        assert_eq!(bp.execute(entry), StepResult::Success);
        wait_until("steps", || bp.context().step_count() >= 10);
        bp.stop();

        assert!(!bp.context().is_thread_running());
        assert!(!bp.context().is_executing());
        assert_eq!(bp.context().callstack_depth(), 0);
        let steps = bp.context().step_count();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(bp.context().step_count(), steps);
        assert!(bp.with_graph(|g| !g.node_as::<LoopNode>(looped).unwrap().is_active()));
    }

    #[test]
    fn test_loop_reenters_through_callstack() {
        let bp = blueprint();
        let entry = bp.create_node(EntryPointNode::TYPE_ID).unwrap();
        let looped = bp.create_node(LoopNode::TYPE_ID).unwrap();
        let print = bp.create_node(PrintNode::TYPE_ID).unwrap();
        let exit = bp.create_node(ExitPointNode::TYPE_ID).unwrap();
        let (start, l, print_in, end) = bp.with_graph(|g| {
            let l = g.node_as::<LoopNode>(looped).unwrap();
            (
                g.node_as::<EntryPointNode>(entry).unwrap().exit(),
                (l.enter(), l.start(), l.end(), l.body(), l.completed()),
                g.node_as::<PrintNode>(print).unwrap().enter(),
                g.node_as::<ExitPointNode>(exit).unwrap().enter(),
            )
        });
        bp.link(start.id(), l.0.id()).unwrap();
        bp.link(l.3.id(), print_in.id()).unwrap();
        bp.link(l.4.id(), end.id()).unwrap();
        bp.set_pin_value(l.1, 0);
        bp.set_pin_value(l.2, 3);

        let monitor = Arc::new(EventMonitor::new());
        let prints = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&prints);
        monitor.events.subscribe(move |e| {
            if let ContextEvent::PreStep { node, .. } = e {
                if *node == print {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }
        });
        let m: Arc<dyn ContextMonitor> = monitor;
        bp.context().set_monitor(Some(m));

        assert_eq!(bp.run(entry), StepResult::Done);
        assert_eq!(prints.load(Ordering::SeqCst), 3);
        assert_eq!(bp.context().step_count(), 8);
        assert_eq!(bp.context().callstack_depth(), 0);
    }

    #[test]
    fn test_break_point_pauses_thread() {
        let bp = blueprint();
        let p = pipeline(&bp, "paused");
        bp.with_graph_mut(|g| g.node_mut(p.print).unwrap().base_mut().break_point = true);

        assert_eq!(bp.execute(p.entry), StepResult::Success);
        let mut hit = false;
        wait_until("break point", || {
            hit |= bp.context().take_pause_event();
            hit
        });
        assert!(bp.context().is_paused());
        assert_eq!(bp.context().step_count(), 0);

        assert!(bp.thread_step());
        wait_until("single step", || bp.context().step_count() == 1);
        assert_eq!(printed(&bp, p.print), "paused");
        assert!(bp.context().is_paused());

        assert!(bp.resume());
        wait_until("completion", || !bp.context().is_executing());
        assert_eq!(bp.context().last_result(), StepResult::Done);
        assert_eq!(bp.context().step_count(), 2);
        bp.stop();
    }

    #[test]
    fn test_import_remaps_ids() {
        let bp = blueprint();
        let group = bp.create_node(GroupNode::TYPE_ID).unwrap();
        let p = pipeline(&bp, "grouped");
        assert!(bp.set_node_group(p.print, group));
        bp.with_graph_mut(|g| {
            let node = g.node_as_mut::<GroupNode>(group).unwrap();
            node.base_mut().pos = Some([100.0, 100.0]);
            node.set_status(json!({ "collapsed": true }));
        });

        let exported = bp.export_group(group).unwrap();
        assert_eq!(exported["nodes"].as_array().unwrap().len(), 1);
        let before = bp.node_count();

        let imported = bp.import(&exported, Some([300.0, 100.0])).unwrap();
        assert_ne!(imported, group);
        assert_eq!(bp.node_count(), before + 2);

        bp.with_graph(|g| {
            let node = g.node_as::<GroupNode>(imported).unwrap();
            assert_eq!(node.status(), &json!({ "collapsed": true }));
            assert_eq!(node.base().pos, Some([300.0, 100.0]));
            assert_eq!(node.children().len(), 1);

            let member = g.node(node.children()[0]).unwrap();
            assert_ne!(member.id(), p.print);
            assert_eq!(member.base().group_id, imported);
            // Links to nodes outside the group were dropped
            assert!(member.input_pins().iter().all(|pin| !g.pins.has_any_link(*pin)));
            assert_eq!(g.pins.value(member.input_pins()[1]), Some(&PinValue::from("grouped")));
        });

        // The original group is untouched
        assert!(bp.has_pin_any_link(bp.with_graph(|g| g.node_as::<PrintNode>(p.print).unwrap().enter().id())));
    }

    #[test]
    fn test_missing_keys_report_error_codes() {
        let bp = blueprint();
        let err = bp.load(&json!({ "nodes": [] })).unwrap_err();
        assert_eq!(err.code(), BP_ERR_NODE_LOAD);
        let err = bp.load(&json!({ "state": { "generator_state": 1 } })).unwrap_err();
        assert_eq!(err.code(), BP_ERR_NODE_LOAD);
        let err = bp.load(&json!(5)).unwrap_err();
        assert_eq!(err.code(), BP_ERR_DOC_LOAD);

        let err = bp.import(&json!({ "nodes": [], "status": {} }), None).unwrap_err();
        assert_eq!(err.code(), BP_ERR_GROUP_LOAD);
        let err = bp.import(&json!({ "group": {}, "nodes": [] }), None).unwrap_err();
        assert_eq!(err.code(), BP_ERR_GROUP_LOAD);
    }

    #[test]
    fn test_broken_fragments_are_skipped() {
        let bp = blueprint();
        let p = pipeline(&bp, "survivor");
        let original = bp.save();

        let mut document = original.clone();
        let nodes = document["nodes"].as_array_mut().unwrap();
        let duplicate = nodes[0].clone();
        nodes.push(json!({ "type_id": 0xDEAD_BEEFu32, "name": "no id" }));
        nodes.push(json!({ "id": 900, "name": "no type" }));
        nodes.push(duplicate);
        nodes.push(json!("not a node"));

        let other = blueprint();
        other.load(&document).unwrap();
        assert_eq!(other.node_count(), 3);
        assert_eq!(other.save(), original);
        assert_eq!(other.run(p.entry), StepResult::Done);
        assert_eq!(printed(&other, p.print), "survivor");
    }

    #[test]
    fn test_failed_load_keeps_current_graph() {
        let bp = blueprint();
        let p = pipeline(&bp, "kept");
        let before = bp.save();

        assert!(bp.load(&json!({ "nodes": [] })).is_err());
        assert!(bp.load(&json!([1, 2, 3])).is_err());
        assert_eq!(bp.save(), before);
        assert_eq!(bp.run(p.entry), StepResult::Done);
    }

    #[test]
    fn test_load_drops_flow_link_into_data_pin() {
        let bp = blueprint();
        let p = pipeline(&bp, "x");
        let text = bp.with_graph(|g| g.node_as::<PrintNode>(p.print).unwrap().text());
        let mut document = bp.save();
        // Entry's flow output rewired straight into Print's text input
        document["nodes"][0]["output_pins"][0]["link"] = json!(text);

        bp.load(&document).unwrap();
        assert!(!bp.has_pin_any_link(text));
        assert!(bp.find_pins_linked_to(text).is_empty());
        assert_eq!(bp.run(p.entry), StepResult::Done);
        assert_eq!(bp.context().step_count(), 0);
    }

    /// Monitor reading the context back while it is being notified
    struct Highlighter {
        bp: std::sync::Weak<Bp>,
        seen: Mutex<Vec<(IdType, u64)>>,
        done_at: Mutex<Option<u64>>,
    }

    impl ContextMonitor for Highlighter {
        fn on_pre_step(&self, _node: IdType, _entry: FlowPin) {
            if let Some(bp) = self.bp.upgrade() {
                let _ = bp.context().current_node();
                let _ = bp.pin_value(INVALID_ID);
            }
        }

        fn on_post_step(&self, _node: IdType, _result: StepResult) {
            if let Some(bp) = self.bp.upgrade() {
                let ctx = bp.context();
                self.seen.lock().push((ctx.current_node(), ctx.step_count()));
            }
        }

        fn on_done(&self, step_count: u64) {
            if let Some(bp) = self.bp.upgrade() {
                assert_eq!(bp.context().step_count(), step_count);
                *self.done_at.lock() = Some(step_count);
            }
        }
    }

    #[test]
    fn test_monitor_may_query_context() {
        let bp = Arc::new(blueprint());
        let p = pipeline(&bp, "watched");
        let monitor = Arc::new(Highlighter {
            bp: Arc::downgrade(&bp),
            seen: Mutex::new(Vec::new()),
            done_at: Mutex::new(None),
        });
        let m: Arc<dyn ContextMonitor> = monitor.clone();
        bp.context().set_monitor(Some(m));

        assert_eq!(bp.run(p.entry), StepResult::Done);
        let seen = monitor.seen.lock().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (p.print, 1));
        assert_eq!(seen[1].1, 2);
        assert_eq!(*monitor.done_at.lock(), Some(2));

        // Same on the stepping thread
        monitor.seen.lock().clear();
        assert_eq!(bp.execute(p.entry), StepResult::Success);
        wait_until("threaded completion", || !bp.context().is_executing());
        bp.stop();
        assert_eq!(monitor.seen.lock().len(), 2);
        bp.context().set_monitor(None);
    }

    #[test]
    fn test_clone_stays_in_group() {
        let bp = blueprint();
        let group = bp.create_node(GroupNode::TYPE_ID).unwrap();
        let p = pipeline(&bp, "x");
        assert!(bp.set_node_group(p.print, group));

        let clone = bp.clone_node(p.print).unwrap();
        bp.with_graph(|g| {
            assert_eq!(g.node(clone).unwrap().base().group_id, group);
            assert!(g.node_as::<GroupNode>(group).unwrap().children().contains(&clone));
        });

        let top = bp.clone_node(p.entry).unwrap();
        assert_eq!(bp.with_graph(|g| g.node(top).unwrap().base().group_id), INVALID_ID);
    }

    #[test]
    fn test_file_helpers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        let bp = blueprint();
        pipeline(&bp, "file");
        bp.save_file(&path).unwrap();

        let other = blueprint();
        other.load_file(&path).unwrap();
        assert_eq!(other.save(), bp.save());
        assert!(matches!(
            other.load_file(dir.path().join("missing.json")),
            Err(BlueprintError::Io { .. })
        ));
    }

    #[test]
    fn test_manual_start_and_step() {
        let bp = blueprint();
        let p = pipeline(&bp, "stepped");
        assert_eq!(bp.start(p.entry), StepResult::Success);
        assert_eq!(bp.context().step(), StepResult::Success);
        assert_eq!(bp.context().current_node(), p.print);
        assert_eq!(bp.context().step(), StepResult::Done);
        assert_eq!(printed(&bp, p.print), "stepped");
    }

    #[test]
    fn test_clear() {
        let bp = blueprint();
        pipeline(&bp, "x");
        bp.clear();
        assert_eq!(bp.node_count(), 0);
        assert!(bp.with_graph(|g| g.pins.is_empty()));
        assert_eq!(bp.find_entry_point(), None);
    }
}
