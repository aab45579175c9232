//! Built-in node types
//!
//! The nodes every engine ships with: entry and exit points, printing,
//! branching and looping, a couple of math nodes and the group container.

mod flow;
mod group;
mod math;
mod system;

pub use flow::*;
pub use group::*;
pub use math::*;
pub use system::*;

use crate::node::NodeTypeInfo;

/// Descriptors of every built-in node type
pub fn builtin_types() -> Vec<NodeTypeInfo> {
    vec![
        EntryPointNode::node_type_info(),
        ExitPointNode::node_type_info(),
        PrintNode::node_type_info(),
        BranchNode::node_type_info(),
        LoopNode::node_type_info(),
        FloatNode::node_type_info(),
        AddNode::node_type_info(),
        GroupNode::node_type_info(),
    ]
}
