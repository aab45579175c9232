//! Blueprint Runtime - Execution engine for visual dataflow graphs
//!
//! A blueprint is a graph of nodes exposing typed pins. Flow pins decide the
//! order nodes execute in; data pins carry values, resolved on demand by
//! following links back to their providers.
//!
//! - [`Bp`] owns one graph and its [`Context`]: editing, execution control,
//!   JSON persistence and group import/export.
//! - [`Context`] is the step state machine, driven from the caller or from a
//!   single background thread.
//! - [`Node`] is the interface node types implement; `#[blueprint_node]`
//!   generates their [`NodeTypeInfo`].
//! - [`NodeRegistry`] maps type ids to factories, including node types
//!   loaded from plugin libraries.

// Lets `#[blueprint_node]` expansions inside this crate name it by path
extern crate self as blueprint_runtime;

pub use blueprint_macros::blueprint_node;
pub use blueprint_types;

mod action;
mod blueprint;
mod config;
mod context;
mod dummy;
mod executor;
mod graph;
mod monitor;
mod node;
pub mod nodes;
mod pin;
mod plugin;
mod registry;

pub use action::{Action, Event, SubscriptionId};
pub use blueprint::{BlueprintError, Bp};
pub use config::{ConfigError, EngineConfig, EngineSection, LogSection, PluginSection};
pub use context::{Context, ContextOptions, Lifecycle};
pub use dummy::DummyNode;
pub use executor::{DevicePolicy, NodeContext, Services};
pub use graph::Graph;
pub use monitor::{ContextEvent, ContextMonitor, EventMonitor};
pub use node::{AsAny, Node, NodeBase, NodeFactory, NodeTypeInfo, OutputSlot, StepFlow};
pub use pin::{FlowPin, LinkError, Pin, PinTable};
pub use plugin::{PluginError, PluginLibrary};
pub use registry::{NodeRegistry, PinExRegistry, PinExTypeInfo};
