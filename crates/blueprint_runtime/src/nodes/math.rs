// Math Nodes - Float forwarding and addition

use blueprint_types::{IdType, PinType, PinValue};

use crate::blueprint_node;
use crate::executor::NodeContext;
use crate::graph::Graph;
use crate::node::{Node, NodeBase, OutputSlot, StepFlow};
use crate::pin::FlowPin;

// ─────────────────────────────────────────────────────────────────────────────
// Float
// ─────────────────────────────────────────────────────────────────────────────

/// Forwards its input to its output and publishes it for preview
#[blueprint_node(catalog = "Math")]
pub struct FloatNode {
    base: NodeBase,
    preview: OutputSlot,
}

impl FloatNode {
    pub fn new(graph: &mut Graph) -> Self {
        let mut base = NodeBase::new(graph, Self::node_type_info());
        base.add_flow_input(graph, "Enter");
        base.add_input(graph, "In", PinType::Float);
        base.add_flow_output(graph, "Exit");
        base.add_output(graph, "Out", PinType::Float);
        Self {
            base,
            preview: OutputSlot::new(),
        }
    }

    pub fn enter(&self) -> FlowPin {
        FlowPin(self.base.input(0))
    }

    pub fn input(&self) -> IdType {
        self.base.input(1)
    }

    pub fn exit(&self) -> FlowPin {
        FlowPin(self.base.output(0))
    }

    pub fn output(&self) -> IdType {
        self.base.output(1)
    }

    /// Handle a renderer can read the last output from
    pub fn preview(&self) -> OutputSlot {
        self.preview.clone()
    }
}

impl Node for FloatNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn execute(&mut self, ctx: &mut NodeContext<'_>, _entry: FlowPin, _threading: bool) -> StepFlow {
        let value: f32 = ctx.get_pin_value(self.input());
        ctx.set_pin_value(self.output(), value);
        self.preview.publish(PinValue::Float(value));
        StepFlow::Continue(self.exit())
    }

    fn reset(&mut self, _ctx: &mut NodeContext<'_>) {
        self.preview.clear();
    }

    fn on_stop(&mut self, _ctx: &mut NodeContext<'_>) {
        self.preview.clear();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Add
// ─────────────────────────────────────────────────────────────────────────────

/// Sum = A + B
#[blueprint_node(catalog = "Math")]
pub struct AddNode {
    base: NodeBase,
}

impl AddNode {
    pub fn new(graph: &mut Graph) -> Self {
        let mut base = NodeBase::new(graph, Self::node_type_info());
        base.add_flow_input(graph, "Enter");
        base.add_input(graph, "A", PinType::Float);
        base.add_input(graph, "B", PinType::Float);
        base.add_flow_output(graph, "Exit");
        base.add_output(graph, "Sum", PinType::Float);
        Self { base }
    }

    pub fn enter(&self) -> FlowPin {
        FlowPin(self.base.input(0))
    }

    pub fn a(&self) -> IdType {
        self.base.input(1)
    }

    pub fn b(&self) -> IdType {
        self.base.input(2)
    }

    pub fn exit(&self) -> FlowPin {
        FlowPin(self.base.output(0))
    }

    pub fn sum(&self) -> IdType {
        self.base.output(1)
    }
}

impl Node for AddNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn execute(&mut self, ctx: &mut NodeContext<'_>, _entry: FlowPin, _threading: bool) -> StepFlow {
        let a: f32 = ctx.get_pin_value(self.a());
        let b: f32 = ctx.get_pin_value(self.b());
        ctx.set_pin_value(self.sum(), a + b);
        StepFlow::Continue(self.exit())
    }
}
