// Node Registry - Node types and custom pin kinds available to a blueprint
//
// Node types come from the built-in catalog and from plugin libraries. Each
// type is keyed by its type id and carries the factory used by `Bp` when
// creating or loading nodes. Custom pin kinds live in the `PinExRegistry`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use blueprint_types::{IdType, PinValue, fnv1a_32};

use crate::graph::Graph;
use crate::node::{Node, NodeTypeInfo};
use crate::nodes;
use crate::plugin::{self, PluginError, PluginLibrary};

// ─────────────────────────────────────────────────────────────────────────────
// Node Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Registry of all available node types
///
/// Plugin libraries are declared after the type table so the descriptors
/// (whose factories live in plugin code) are dropped before the libraries
/// are unloaded.
pub struct NodeRegistry {
    types: BTreeMap<IdType, NodeTypeInfo>,
    plugins: Vec<PluginLibrary>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            types: BTreeMap::new(),
            plugins: Vec::new(),
        }
    }

    /// Registry holding every built-in node type
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for info in nodes::builtin_types() {
            registry.register(info);
        }
        registry
    }

    /// Register a node type; returns the descriptor it replaced, if any
    pub fn register(&mut self, info: NodeTypeInfo) -> Option<NodeTypeInfo> {
        debug!(type_id = info.id, name = %info.name, catalog = %info.catalog, "registering node type");
        let previous = self.types.insert(info.id, info);
        if let Some(prev) = &previous {
            warn!(type_id = prev.id, name = %prev.name, "node type registered twice; keeping the newer one");
        }
        previous
    }

    pub fn find(&self, type_id: IdType) -> Option<&NodeTypeInfo> {
        self.types.get(&type_id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&NodeTypeInfo> {
        self.types.values().find(|t| t.name == name)
    }

    pub fn contains(&self, type_id: IdType) -> bool {
        self.types.contains_key(&type_id)
    }

    /// Create a node of a registered type; `None` for unknown types
    pub fn create(&self, type_id: IdType, graph: &mut Graph) -> Option<Box<dyn Node>> {
        self.find(type_id)?.create(graph)
    }

    pub fn create_by_name(&self, name: &str, graph: &mut Graph) -> Option<Box<dyn Node>> {
        self.find_by_name(name)?.create(graph)
    }

    pub fn types(&self) -> impl Iterator<Item = &NodeTypeInfo> {
        self.types.values()
    }

    /// Get all catalogs
    pub fn catalogs(&self) -> Vec<String> {
        let mut catalogs: Vec<_> = self.types.values().map(|t| t.catalog.clone()).collect();
        catalogs.sort();
        catalogs.dedup();
        catalogs
    }

    pub fn nodes_in_catalog(&self, catalog: &str) -> Vec<&NodeTypeInfo> {
        self.types.values().filter(|t| t.catalog == catalog).collect()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Plugins
    // ─────────────────────────────────────────────────────────────────────────

    /// Load one plugin library and register the node type it provides
    pub fn load_plugin(&mut self, path: impl AsRef<Path>) -> Result<IdType, PluginError> {
        let (info, library) = plugin::load(path.as_ref())?;
        let type_id = info.id;
        info!(type_id, name = %info.name, path = %path.as_ref().display(), "loaded node plugin");
        self.register(info);
        self.plugins.push(library);
        Ok(type_id)
    }

    /// Load every plugin library in `dir`; failures are logged and skipped
    pub fn load_plugins_from_dir(&mut self, dir: impl AsRef<Path>) -> Result<usize, PluginError> {
        let mut loaded = 0;
        for path in plugin::discover(dir.as_ref())? {
            match self.load_plugin(&path) {
                Ok(_) => loaded += 1,
                Err(e) => warn!(error = %e, "skipping plugin"),
            }
        }
        Ok(loaded)
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("types", &self.types.len())
            .field("plugins", &self.plugins.len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Custom Pin Kinds
// ─────────────────────────────────────────────────────────────────────────────

type DefaultValueFn = Arc<dyn Fn() -> PinValue + Send + Sync>;

/// A custom pin kind: identity plus a default payload constructor
#[derive(Clone)]
pub struct PinExTypeInfo {
    /// FNV-1a of the kind name
    pub id: IdType,
    pub name: String,
    pub version: u32,
    default: DefaultValueFn,
}

impl PinExTypeInfo {
    pub fn new<F>(name: impl Into<String>, version: u32, default: F) -> Self
    where
        F: Fn() -> PinValue + Send + Sync + 'static,
    {
        let name = name.into();
        Self {
            id: fnv1a_32(name.as_bytes()),
            name,
            version,
            default: Arc::new(default),
        }
    }

    pub fn default_value(&self) -> PinValue {
        (self.default)()
    }
}

impl fmt::Debug for PinExTypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinExTypeInfo")
            .field("id", &format_args!("{:#010x}", self.id))
            .field("name", &self.name)
            .field("version", &self.version)
            .finish()
    }
}

/// Registry of custom pin kinds
#[derive(Debug, Default)]
pub struct PinExRegistry {
    kinds: BTreeMap<IdType, PinExTypeInfo>,
}

impl PinExRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, info: PinExTypeInfo) -> Option<PinExTypeInfo> {
        debug!(ex_type = info.id, name = %info.name, "registering pin kind");
        self.kinds.insert(info.id, info)
    }

    pub fn find(&self, id: IdType) -> Option<&PinExTypeInfo> {
        self.kinds.get(&id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&PinExTypeInfo> {
        self.kinds.get(&fnv1a_32(name.as_bytes()))
    }

    /// Default payload of a kind; `None` for unknown kinds
    pub fn default_value(&self, id: IdType) -> Option<PinValue> {
        self.find(id).map(PinExTypeInfo::default_value)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{EntryPointNode, PrintNode};
    use blueprint_types::PinType;

    #[test]
    fn test_empty_registry() {
        let registry = NodeRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        let mut graph = Graph::new();
        assert!(registry.create(0xDEAD_BEEF, &mut graph).is_none());
    }

    #[test]
    fn test_builtins_create_nodes() {
        let registry = NodeRegistry::with_builtins();
        let mut graph = Graph::new();

        let node = registry.create(PrintNode::TYPE_ID, &mut graph).unwrap();
        assert_eq!(node.type_info().name, "PrintNode");
        assert_eq!(node.input_pins().len(), 2);
        assert_eq!(graph.pins.len(), 3);

        let node = registry.create_by_name("EntryPointNode", &mut graph).unwrap();
        assert_eq!(node.type_info().id, EntryPointNode::TYPE_ID);
        assert!(registry.create_by_name("Missing", &mut graph).is_none());
    }

    #[test]
    fn test_catalogs() {
        let registry = NodeRegistry::with_builtins();
        let catalogs = registry.catalogs();
        assert!(catalogs.contains(&"System".to_string()));
        assert!(catalogs.contains(&"Math".to_string()));
        assert!(catalogs.contains(&"Flow".to_string()));
        assert_eq!(registry.nodes_in_catalog("Math").len(), 2);
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = NodeRegistry::new();
        assert!(registry.register(PrintNode::node_type_info()).is_none());
        assert!(registry.register(PrintNode::node_type_info()).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_pin_ex_registry() {
        let mut registry = PinExRegistry::new();
        registry.register(PinExTypeInfo::new("Curve", 1, || {
            PinValue::Custom(serde_json::json!({ "points": [] }))
        }));

        let kind = registry.find_by_name("Curve").unwrap();
        assert_eq!(kind.id, fnv1a_32(b"Curve"));
        assert_eq!(
            registry.default_value(kind.id),
            Some(PinValue::Custom(serde_json::json!({ "points": [] })))
        );
        assert_eq!(registry.default_value(1), None);

        let mut graph = Graph::new();
        let mut base = crate::node::NodeBase::new(&mut graph, PrintNode::node_type_info());
        let pin = base.add_custom_input(&mut graph, "Shape", kind);
        let pin = graph.pins.get(pin).unwrap();
        assert_eq!(pin.pin_type, PinType::Custom);
        assert_eq!(pin.ex_type, Some(kind.id));
    }

    #[test]
    fn test_missing_plugin_directory() {
        let mut registry = NodeRegistry::new();
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            registry.load_plugins_from_dir(&missing),
            Err(PluginError::Io { .. })
        ));
        assert_eq!(registry.load_plugins_from_dir(dir.path()).unwrap(), 0);
    }
}
