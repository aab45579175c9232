// Group Node - Visual container for a nested subgraph

use serde_json::{Map, Value};

use blueprint_types::{IdMap, IdType, LoadError};

use crate::blueprint_node;
use crate::executor::NodeContext;
use crate::graph::Graph;
use crate::node::{Node, NodeBase, StepFlow};
use crate::pin::{FlowPin, PinTable};

/// Owns the nodes whose `group_id` points at it
///
/// Membership is rebuilt from the members' `group_id` after a load or an
/// import; the group only keeps the list in step with deletions.
#[blueprint_node(catalog = "System", node_type = Group, style = Group)]
pub struct GroupNode {
    base: NodeBase,
    children: Vec<IdType>,
    /// Editor status blob carried by exported groups
    status: Value,
}

impl GroupNode {
    pub fn new(graph: &mut Graph) -> Self {
        Self {
            base: NodeBase::new(graph, Self::node_type_info()),
            children: Vec::new(),
            status: Value::Object(Map::new()),
        }
    }

    pub fn children(&self) -> &[IdType] {
        &self.children
    }

    pub fn adopt(&mut self, child: IdType) {
        if child != self.base.id && !self.children.contains(&child) {
            self.children.push(child);
        }
    }

    pub fn status(&self) -> &Value {
        &self.status
    }

    pub fn set_status(&mut self, status: Value) {
        self.status = status;
    }
}

impl Node for GroupNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn execute(&mut self, _ctx: &mut NodeContext<'_>, _entry: FlowPin, _threading: bool) -> StepFlow {
        StepFlow::Return
    }

    fn on_node_delete(&mut self, node: IdType) {
        self.children.retain(|c| *c != node);
    }

    fn on_close(&mut self, _pins: &mut PinTable) {
        self.children.clear();
    }

    fn load(&mut self, value: &Value, pins: &mut PinTable) -> Result<(), LoadError> {
        self.base.load(value, pins)?;
        if let Some(status) = value.get("status") {
            self.status = status.clone();
        }
        Ok(())
    }

    fn save(&self, value: &mut Map<String, Value>, pins: &PinTable, map: &IdMap) {
        self.base.save(value, pins, map);
        value.insert("status".into(), self.status.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_membership() {
        let mut graph = Graph::new();
        let mut group = GroupNode::new(&mut graph);
        let own_id = group.id();
        group.adopt(5);
        group.adopt(5);
        group.adopt(own_id);
        group.adopt(6);
        assert_eq!(group.children(), &[5, 6]);

        group.on_node_delete(5);
        assert_eq!(group.children(), &[6]);
    }
}
