// Flow Nodes - Branching and callstack-driven loops

use tracing::debug;

use blueprint_types::{IdType, PinType};

use crate::blueprint_node;
use crate::executor::NodeContext;
use crate::graph::Graph;
use crate::node::{Node, NodeBase, StepFlow};
use crate::pin::FlowPin;

// ─────────────────────────────────────────────────────────────────────────────
// Branch
// ─────────────────────────────────────────────────────────────────────────────

/// Continues on `True` or `False` depending on its condition
#[blueprint_node(catalog = "Flow")]
pub struct BranchNode {
    base: NodeBase,
}

impl BranchNode {
    pub fn new(graph: &mut Graph) -> Self {
        let mut base = NodeBase::new(graph, Self::node_type_info());
        base.add_flow_input(graph, "Enter");
        base.add_input(graph, "Condition", PinType::Bool);
        base.add_flow_output(graph, "True");
        base.add_flow_output(graph, "False");
        Self { base }
    }

    pub fn enter(&self) -> FlowPin {
        FlowPin(self.base.input(0))
    }

    pub fn condition(&self) -> IdType {
        self.base.input(1)
    }

    pub fn on_true(&self) -> FlowPin {
        FlowPin(self.base.output(0))
    }

    pub fn on_false(&self) -> FlowPin {
        FlowPin(self.base.output(1))
    }
}

impl Node for BranchNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn execute(&mut self, ctx: &mut NodeContext<'_>, _entry: FlowPin, _threading: bool) -> StepFlow {
        if ctx.get_pin_value::<bool>(self.condition()) {
            StepFlow::Continue(self.on_true())
        } else {
            StepFlow::Continue(self.on_false())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loop
// ─────────────────────────────────────────────────────────────────────────────

/// Runs its body once per index in `[Start, End)`
///
/// Before following `Body` the node pushes its own entry pin as a return
/// point, so the context comes back here when the body chain runs out.
#[blueprint_node(catalog = "Flow")]
pub struct LoopNode {
    base: NodeBase,
    index: i32,
    active: bool,
}

impl LoopNode {
    pub fn new(graph: &mut Graph) -> Self {
        let mut base = NodeBase::new(graph, Self::node_type_info());
        base.add_flow_input(graph, "Enter");
        let start = base.add_input(graph, "Start", PinType::Int32);
        let end = base.add_input(graph, "End", PinType::Int32);
        let step = base.add_input(graph, "Step", PinType::Int32);
        base.add_flow_output(graph, "Body");
        base.add_flow_output(graph, "Completed");
        base.add_output(graph, "Index", PinType::Int32);
        graph.pins.set_value(start, 0);
        graph.pins.set_value(end, 10);
        graph.pins.set_value(step, 1);
        Self {
            base,
            index: 0,
            active: false,
        }
    }

    pub fn enter(&self) -> FlowPin {
        FlowPin(self.base.input(0))
    }

    pub fn start(&self) -> IdType {
        self.base.input(1)
    }

    pub fn end(&self) -> IdType {
        self.base.input(2)
    }

    pub fn step(&self) -> IdType {
        self.base.input(3)
    }

    pub fn body(&self) -> FlowPin {
        FlowPin(self.base.output(0))
    }

    pub fn completed(&self) -> FlowPin {
        FlowPin(self.base.output(1))
    }

    pub fn index_pin(&self) -> IdType {
        self.base.output(2)
    }

    /// Whether an iteration is in progress
    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Node for LoopNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn execute(&mut self, ctx: &mut NodeContext<'_>, _entry: FlowPin, _threading: bool) -> StepFlow {
        let end: i32 = ctx.get_pin_value(self.end());
        let step = match ctx.get_pin_value::<i32>(self.step()) {
            0 => 1,
            s => s,
        };

        if self.active {
            self.index = self.index.saturating_add(step);
        } else {
            self.active = true;
            self.index = ctx.get_pin_value(self.start());
        }

        let in_range = if step > 0 { self.index < end } else { self.index > end };
        if !in_range {
            debug!(node_id = self.base.id, index = self.index, "loop completed");
            self.active = false;
            return StepFlow::Continue(self.completed());
        }

        ctx.set_pin_value(self.index_pin(), self.index);
        ctx.push_return_point(self.enter());
        StepFlow::Continue(self.body())
    }

    fn reset(&mut self, _ctx: &mut NodeContext<'_>) {
        self.index = 0;
        self.active = false;
    }

    fn on_stop(&mut self, _ctx: &mut NodeContext<'_>) {
        self.active = false;
    }
}
