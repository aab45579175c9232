// Graph - Node arena, pin table and id generator of one blueprint
//
// The graph is shared between the `Bp` facade and the context's stepping
// thread behind a mutex. Nodes are kept in insertion order, which is also
// the order they are saved in.

use blueprint_types::{IdGenerator, IdType, INVALID_ID, NodeType, PinKind, PinType};

use crate::node::Node;
use crate::pin::{Pin, PinTable};

/// Nodes and pins of one blueprint
pub struct Graph {
    pub(crate) nodes: Vec<Box<dyn Node>>,
    pub pins: PinTable,
    pub generator: IdGenerator,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            pins: PinTable::new(),
            generator: IdGenerator::new(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Ids
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether a node or pin already uses `id`
    pub fn is_id_in_use(&self, id: IdType) -> bool {
        self.pins.contains(id) || self.nodes.iter().any(|n| n.id() == id)
    }

    /// Issue an id that no live node or pin uses
    pub fn make_id(&mut self) -> IdType {
        loop {
            let id = self.generator.generate();
            if id != INVALID_ID && !self.is_id_in_use(id) {
                return id;
            }
        }
    }

    pub fn make_node_id(&mut self) -> IdType {
        self.make_id()
    }

    /// Create a pin for `node` and register it in the pin table
    pub fn make_pin(&mut self, node: IdType, name: &str, pin_type: PinType, kind: PinKind) -> IdType {
        let id = self.make_id();
        // The id was just checked free, so the insert cannot collide
        let _ = self.pins.insert(Pin::new(id, node, name, pin_type, kind));
        id
    }

    /// Highest id used by any live node or pin
    pub fn max_id(&self) -> IdType {
        let node_max = self.nodes.iter().map(|n| n.id()).max().unwrap_or(INVALID_ID);
        let pin_max = self.pins.ids().max().unwrap_or(INVALID_ID);
        node_max.max(pin_max)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Nodes
    // ─────────────────────────────────────────────────────────────────────────

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &dyn Node> {
        self.nodes.iter().map(|n| n.as_ref())
    }

    pub fn node_ids(&self) -> Vec<IdType> {
        self.nodes.iter().map(|n| n.id()).collect()
    }

    pub fn contains_node(&self, id: IdType) -> bool {
        self.nodes.iter().any(|n| n.id() == id)
    }

    pub fn node(&self, id: IdType) -> Option<&(dyn Node + 'static)> {
        self.nodes.iter().find(|n| n.id() == id).map(|n| n.as_ref())
    }

    pub fn node_mut(&mut self, id: IdType) -> Option<&mut (dyn Node + 'static)> {
        self.nodes.iter_mut().find(|n| n.id() == id).map(|n| n.as_mut())
    }

    /// Node downcast to its concrete type
    pub fn node_as<T: Node + 'static>(&self, id: IdType) -> Option<&T> {
        self.node(id)?.as_any().downcast_ref::<T>()
    }

    pub fn node_as_mut<T: Node + 'static>(&mut self, id: IdType) -> Option<&mut T> {
        self.node_mut(id)?.as_any_mut().downcast_mut::<T>()
    }

    /// Node owning `pin`
    pub fn pin_owner(&self, pin: IdType) -> Option<IdType> {
        self.pins.get(pin).map(|p| p.node).filter(|n| self.contains_node(*n))
    }

    /// First node of type `EntryPoint`
    pub fn find_entry_point(&self) -> Option<IdType> {
        self.nodes
            .iter()
            .find(|n| n.type_info().node_type == NodeType::EntryPoint)
            .map(|n| n.id())
    }

    pub(crate) fn push_node(&mut self, node: Box<dyn Node>) -> IdType {
        let id = node.id();
        self.nodes.push(node);
        id
    }

    /// Remove a node and every pin it owns
    pub(crate) fn remove_node(&mut self, id: IdType) -> Option<Box<dyn Node>> {
        let index = self.nodes.iter().position(|n| n.id() == id)?;
        let node = self.nodes.remove(index);
        self.release_pins(node.as_ref());
        Some(node)
    }

    /// Drop the pins of a node that is not (or no longer) part of the graph
    pub(crate) fn release_pins(&mut self, node: &dyn Node) {
        for pin in node.input_pins().iter().chain(node.output_pins()) {
            self.pins.remove(*pin);
        }
    }

    /// Drop all nodes, pins and restart id generation
    pub(crate) fn reset(&mut self) {
        self.nodes.clear();
        self.pins.clear();
        self.generator = IdGenerator::new();
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.node_ids())
            .field("pins", &self.pins.len())
            .field("generator", &self.generator)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_shared_between_nodes_and_pins() {
        let mut graph = Graph::new();
        let node = graph.make_node_id();
        let pin = graph.make_pin(node, "In", PinType::Bool, PinKind::Input);
        let other = graph.make_pin(node, "Out", PinType::Bool, PinKind::Output);
        assert_ne!(node, pin);
        assert_ne!(pin, other);
        assert_eq!(graph.pins.get(pin).map(|p| p.node), Some(node));
    }

    #[test]
    fn test_make_id_skips_ids_in_use() {
        let mut graph = Graph::new();
        graph.pins.insert(Pin::new(1, 99, "Taken", PinType::Int32, PinKind::Input)).unwrap();
        graph.pins.insert(Pin::new(2, 99, "Taken", PinType::Int32, PinKind::Input)).unwrap();
        assert_eq!(graph.make_id(), 3);
        assert_eq!(graph.max_id(), 2);
    }
}
