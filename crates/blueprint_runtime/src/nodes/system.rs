// System Nodes - Entry point, exit point and print

use tracing::info;

use crate::blueprint_node;
use crate::executor::NodeContext;
use crate::graph::Graph;
use crate::node::{Node, NodeBase, StepFlow};
use crate::pin::FlowPin;
use blueprint_types::IdType;

// ─────────────────────────────────────────────────────────────────────────────
// Entry Point
// ─────────────────────────────────────────────────────────────────────────────

/// Where a run begins; the context starts from its output flow pin
#[blueprint_node(catalog = "System", node_type = EntryPoint, style = Simple)]
pub struct EntryPointNode {
    base: NodeBase,
}

impl EntryPointNode {
    pub fn new(graph: &mut Graph) -> Self {
        let mut base = NodeBase::new(graph, Self::node_type_info());
        base.add_flow_output(graph, "Start");
        Self { base }
    }

    pub fn exit(&self) -> FlowPin {
        FlowPin(self.base.output(0))
    }
}

impl Node for EntryPointNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn execute(&mut self, _ctx: &mut NodeContext<'_>, _entry: FlowPin, _threading: bool) -> StepFlow {
        StepFlow::Continue(self.exit())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Exit Point
// ─────────────────────────────────────────────────────────────────────────────

/// Ends the run, discarding any pending return points
#[blueprint_node(catalog = "System", node_type = ExitPoint, style = Simple)]
pub struct ExitPointNode {
    base: NodeBase,
}

impl ExitPointNode {
    pub fn new(graph: &mut Graph) -> Self {
        let mut base = NodeBase::new(graph, Self::node_type_info());
        base.add_flow_input(graph, "End");
        Self { base }
    }

    pub fn enter(&self) -> FlowPin {
        FlowPin(self.base.input(0))
    }
}

impl Node for ExitPointNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn execute(&mut self, _ctx: &mut NodeContext<'_>, _entry: FlowPin, _threading: bool) -> StepFlow {
        StepFlow::Exit
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Print
// ─────────────────────────────────────────────────────────────────────────────

/// Logs its text input and passes the flow on
#[blueprint_node(catalog = "System")]
pub struct PrintNode {
    base: NodeBase,
    last_string: String,
}

impl PrintNode {
    pub fn new(graph: &mut Graph) -> Self {
        let mut base = NodeBase::new(graph, Self::node_type_info());
        base.add_flow_input(graph, "Enter");
        base.add_input(graph, "String", blueprint_types::PinType::String);
        base.add_flow_output(graph, "Exit");
        Self {
            base,
            last_string: String::new(),
        }
    }

    pub fn enter(&self) -> FlowPin {
        FlowPin(self.base.input(0))
    }

    pub fn text(&self) -> IdType {
        self.base.input(1)
    }

    pub fn exit(&self) -> FlowPin {
        FlowPin(self.base.output(0))
    }

    /// Text resolved by the last execution
    pub fn last_string(&self) -> &str {
        &self.last_string
    }
}

impl Node for PrintNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn execute(&mut self, ctx: &mut NodeContext<'_>, _entry: FlowPin, threading: bool) -> StepFlow {
        self.last_string = ctx.get_pin_value(self.text());
        info!(node_id = self.base.id, threading, text = %self.last_string, "print");
        StepFlow::Continue(self.exit())
    }

    fn reset(&mut self, _ctx: &mut NodeContext<'_>) {
        self.last_string.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blueprint_types::{NodeType, PinType, node_type_id};

    #[test]
    fn test_generated_type_info() {
        assert_eq!(EntryPointNode::TYPE_ID, node_type_id("EntryPointNode", "System"));
        assert_eq!(PrintNode::TYPE_NAME, "PrintNode");
        assert_eq!(ExitPointNode::CATALOG, "System");

        let info = EntryPointNode::node_type_info();
        assert_eq!(info.node_type, NodeType::EntryPoint);
        assert!(info.has_factory());
    }

    #[test]
    fn test_print_pins() {
        let mut graph = Graph::new();
        let print = PrintNode::new(&mut graph);
        assert_eq!(graph.pins.get(print.text()).map(|p| p.pin_type), Some(PinType::String));
        assert_eq!(print.auto_link_input_flow_pin(&graph.pins), Some(print.enter().id()));
        assert_eq!(print.auto_link_input_data_pin(&graph.pins), Some(print.text()));
        assert_eq!(print.auto_link_output_flow_pin(&graph.pins), Some(print.exit().id()));
        assert_eq!(print.auto_link_output_data_pin(&graph.pins), None);
    }
}
