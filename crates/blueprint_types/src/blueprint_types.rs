//! Blueprint Types - Core type definitions for the blueprint execution engine
//!
//! This crate contains the plain data shared by the runtime, the node macro
//! and plugins: ids and the id generator, pin types and pin values, node
//! kinds, step results, node type ids and the packed engine version, and the
//! load error taxonomy.

mod error;
mod ids;
mod types;
mod value;

pub use error::*;
pub use ids::*;
pub use types::*;
pub use value::*;
