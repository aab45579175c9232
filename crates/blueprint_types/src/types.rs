// Blueprint Types - Core tags for the execution engine
//
// Pin types, node kinds and styles, step results, node type ids and the
// packed engine version. Graph documents carry these by name or number.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Pin Types
// ─────────────────────────────────────────────────────────────────────────────

/// Direction of a pin on a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinKind {
    Input,
    Output,
}

/// Data types that can flow through pins
///
/// Serialized by variant name (`"Flow"`, `"Int32"`, ...) in graph documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinType {
    /// No payload
    Void,
    /// Accepts any payload
    Any,
    /// Execution flow (no data, just control flow)
    Flow,
    Bool,
    Int32,
    Int64,
    Float,
    Double,
    String,
    /// 2D point
    Point,
    /// Vector of floats
    Vector,
    /// Opaque media frame
    Mat,
    /// Extension payload registered in the pin-ex registry
    Custom,
}

impl PinType {
    pub const ALL: [PinType; 13] = [
        PinType::Void,
        PinType::Any,
        PinType::Flow,
        PinType::Bool,
        PinType::Int32,
        PinType::Int64,
        PinType::Float,
        PinType::Double,
        PinType::String,
        PinType::Point,
        PinType::Vector,
        PinType::Mat,
        PinType::Custom,
    ];

    /// Name used in graph documents
    pub fn name(&self) -> &'static str {
        match self {
            PinType::Void => "Void",
            PinType::Any => "Any",
            PinType::Flow => "Flow",
            PinType::Bool => "Bool",
            PinType::Int32 => "Int32",
            PinType::Int64 => "Int64",
            PinType::Float => "Float",
            PinType::Double => "Double",
            PinType::String => "String",
            PinType::Point => "Point",
            PinType::Vector => "Vector",
            PinType::Mat => "Mat",
            PinType::Custom => "Custom",
        }
    }

    /// Check if this is an execution pin type
    pub fn is_flow(&self) -> bool {
        matches!(self, PinType::Flow)
    }

    /// Check if this is a data pin type
    pub fn is_data(&self) -> bool {
        !self.is_flow()
    }

    /// Check if this is one of the numeric scalar types
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            PinType::Int32 | PinType::Int64 | PinType::Float | PinType::Double
        )
    }

    /// Check if this type is compatible with another (for link validation)
    pub fn is_compatible_with(&self, other: &PinType) -> bool {
        match (self, other) {
            (a, b) if a == b => true,
            // Flow only ever links to flow
            (PinType::Flow, _) | (_, PinType::Flow) => false,
            (PinType::Any, _) | (_, PinType::Any) => true,
            // Numeric scalars convert into each other
            (a, b) if a.is_numeric() && b.is_numeric() => true,
            _ => false,
        }
    }
}

impl fmt::Display for PinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown pin type name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown pin type '{0}'")]
pub struct UnknownPinType(pub String);

impl FromStr for PinType {
    type Err = UnknownPinType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PinType::ALL
            .iter()
            .copied()
            .find(|t| t.name() == s)
            .ok_or_else(|| UnknownPinType(s.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Node Kinds
// ─────────────────────────────────────────────────────────────────────────────

/// Role of a node type inside a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NodeType {
    #[default]
    Internal,
    /// Where `run`/`execute` begins
    EntryPoint,
    /// Where a run ends
    ExitPoint,
    /// Visual container owning a nested subgraph
    Group,
    /// Placeholder for a node whose type could not be resolved
    Dummy,
    /// Provided by a dynamically loaded plugin
    External,
}

/// How the editor draws a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NodeStyle {
    #[default]
    Default,
    Simple,
    Comment,
    Group,
    Dummy,
}

// ─────────────────────────────────────────────────────────────────────────────
// Step Results
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of one unit of execution progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StepResult {
    /// Nothing has run yet
    #[default]
    None,
    /// A node executed and there is more flow to follow
    Success,
    /// The flow finished
    Done,
    /// Execution could not proceed
    Error,
}

impl StepResult {
    /// Whether the run is over (either finished or failed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepResult::Done | StepResult::Error)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Type Ids & Versions
// ─────────────────────────────────────────────────────────────────────────────

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a hash
pub const fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// Node type id: FNV-1a of `"{type_name}*{catalog}"`
pub const fn node_type_id(type_name: &str, catalog: &str) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    let parts: [&[u8]; 3] = [type_name.as_bytes(), b"*", catalog.as_bytes()];
    let mut p = 0;
    while p < parts.len() {
        let bytes = parts[p];
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u32;
            hash = hash.wrapping_mul(FNV_PRIME);
            i += 1;
        }
        p += 1;
    }
    hash
}

/// Pack a version as `major<<24 | minor<<16 | patch<<8 | build`
pub const fn version_pack(major: u8, minor: u8, patch: u8, build: u8) -> u32 {
    ((major as u32) << 24) | ((minor as u32) << 16) | ((patch as u32) << 8) | build as u32
}

/// Major component of a packed version
pub const fn version_major(version: u32) -> u8 {
    (version >> 24) as u8
}

/// Engine version; plugins must report exactly this value
pub const VERSION_BLUEPRINT: u32 = version_pack(1, 2, 0, 0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_type_compatibility() {
        assert!(PinType::Float.is_compatible_with(&PinType::Float));
        assert!(PinType::Float.is_compatible_with(&PinType::Int32));
        assert!(PinType::Any.is_compatible_with(&PinType::String));
        assert!(!PinType::Any.is_compatible_with(&PinType::Flow));
        assert!(!PinType::Bool.is_compatible_with(&PinType::String));
    }

    #[test]
    fn test_pin_type_names() {
        for t in PinType::ALL {
            assert_eq!(t.name().parse::<PinType>(), Ok(t));
        }
        assert!("Matrix".parse::<PinType>().is_err());
        assert_eq!(serde_json::to_string(&PinType::Int64).unwrap(), "\"Int64\"");
    }

    #[test]
    fn test_fnv1a_known_values() {
        assert_eq!(fnv1a_32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c_292c);
        assert_eq!(node_type_id("PrintNode", "System"), fnv1a_32(b"PrintNode*System"));
    }

    #[test]
    fn test_version_pack() {
        let v = version_pack(1, 2, 3, 4);
        assert_eq!(v, 0x0102_0304);
        assert_eq!(version_major(v), 1);
    }
}
