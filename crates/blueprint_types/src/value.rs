//! Pin payload values
//!
//! `PinValue` is the closed set of payloads a data pin can carry. Every value
//! knows its `PinType`, so readers can downcast safely and writers can be
//! checked against the pin they target.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::PinType;

// ─────────────────────────────────────────────────────────────────────────────
// Payload Structs
// ─────────────────────────────────────────────────────────────────────────────

/// 2D point payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Opaque media frame
///
/// Frames are produced and consumed by media nodes; the engine only moves
/// them between pins. The pixel payload is shared, cloning a `Mat` is cheap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mat {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    /// Presentation time in seconds
    pub timestamp: f64,
    pub data: Arc<[u8]>,
}

impl Mat {
    pub fn new(width: u32, height: u32, channels: u32, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            width,
            height,
            channels,
            timestamp: 0.0,
            data: data.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pin Value
// ─────────────────────────────────────────────────────────────────────────────

/// Value held by a data pin
#[derive(Debug, Clone, Default, PartialEq)]
pub enum PinValue {
    #[default]
    Void,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    String(String),
    Point(Point),
    Vector(Vec<f32>),
    Mat(Mat),
    /// Extension payload, stored as JSON
    Custom(serde_json::Value),
}

impl PinValue {
    /// Type tag of this value
    pub fn pin_type(&self) -> PinType {
        match self {
            PinValue::Void => PinType::Void,
            PinValue::Bool(_) => PinType::Bool,
            PinValue::Int32(_) => PinType::Int32,
            PinValue::Int64(_) => PinType::Int64,
            PinValue::Float(_) => PinType::Float,
            PinValue::Double(_) => PinType::Double,
            PinValue::String(_) => PinType::String,
            PinValue::Point(_) => PinType::Point,
            PinValue::Vector(_) => PinType::Vector,
            PinValue::Mat(_) => PinType::Mat,
            PinValue::Custom(_) => PinType::Custom,
        }
    }

    /// Default literal for a pin of the given type
    pub fn default_for(pin_type: PinType) -> Self {
        match pin_type {
            PinType::Void | PinType::Any | PinType::Flow => PinValue::Void,
            PinType::Bool => PinValue::Bool(false),
            PinType::Int32 => PinValue::Int32(0),
            PinType::Int64 => PinValue::Int64(0),
            PinType::Float => PinValue::Float(0.0),
            PinType::Double => PinValue::Double(0.0),
            PinType::String => PinValue::String(String::new()),
            PinType::Point => PinValue::Point(Point::default()),
            PinType::Vector => PinValue::Vector(Vec::new()),
            PinType::Mat => PinValue::Mat(Mat::default()),
            PinType::Custom => PinValue::Custom(serde_json::Value::Null),
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, PinValue::Void)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PinValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view (also converts from floating point if lossless)
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PinValue::Int32(i) => Some(*i as i64),
            PinValue::Int64(i) => Some(*i),
            PinValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            PinValue::Double(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Floating point view (also converts from integers)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PinValue::Int32(i) => Some(*i as f64),
            PinValue::Int64(i) => Some(*i as f64),
            PinValue::Float(f) => Some(*f as f64),
            PinValue::Double(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PinValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_mat(&self) -> Option<&Mat> {
        match self {
            PinValue::Mat(m) => Some(m),
            _ => None,
        }
    }

    /// Convert into a value of `target` type, widening between numeric types
    ///
    /// `Any` targets keep the value as is.
    pub fn convert_to(&self, target: PinType) -> Option<PinValue> {
        if target == PinType::Any || self.pin_type() == target {
            return Some(self.clone());
        }
        match target {
            PinType::Int32 => self
                .as_i64()
                .and_then(|i| i32::try_from(i).ok())
                .map(PinValue::Int32),
            PinType::Int64 => self.as_i64().map(PinValue::Int64),
            PinType::Float => self.as_f64().map(|f| PinValue::Float(f as f32)),
            PinType::Double => self.as_f64().map(PinValue::Double),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON Persistence
// ─────────────────────────────────────────────────────────────────────────────

impl PinValue {
    /// Literal as stored in a graph document
    ///
    /// Media frames are runtime-only and have no persisted form.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        use serde_json::Value;
        match self {
            PinValue::Void | PinValue::Mat(_) => None,
            PinValue::Bool(b) => Some(Value::Bool(*b)),
            PinValue::Int32(i) => Some(Value::from(*i)),
            PinValue::Int64(i) => Some(Value::from(*i)),
            PinValue::Float(f) => Some(float_to_json(*f as f64)),
            PinValue::Double(f) => Some(float_to_json(*f)),
            PinValue::String(s) => Some(Value::String(s.clone())),
            PinValue::Point(p) => Some(serde_json::json!([float_to_json(p.x as f64), float_to_json(p.y as f64)])),
            PinValue::Vector(v) => Some(Value::Array(
                v.iter().map(|f| float_to_json(*f as f64)).collect(),
            )),
            PinValue::Custom(v) => Some(v.clone()),
        }
    }

    /// Parse a persisted literal for a pin of `pin_type`
    pub fn from_json(pin_type: PinType, json: &serde_json::Value) -> Result<Self, ValueConversionError> {
        let mismatch = || ValueConversionError::TypeMismatch {
            expected: pin_type.name(),
            actual: json_type_name(json),
        };
        match pin_type {
            PinType::Void | PinType::Flow | PinType::Mat => Ok(PinValue::Void),
            PinType::Any | PinType::Custom => Ok(PinValue::Custom(json.clone())),
            PinType::Bool => json.as_bool().map(PinValue::Bool).ok_or_else(mismatch),
            PinType::Int32 => {
                let i = json.as_i64().ok_or_else(mismatch)?;
                i32::try_from(i)
                    .map(PinValue::Int32)
                    .map_err(|_| ValueConversionError::IntegerOverflow)
            }
            PinType::Int64 => json.as_i64().map(PinValue::Int64).ok_or_else(mismatch),
            PinType::Float => json
                .as_f64()
                .map(|f| PinValue::Float(f as f32))
                .ok_or_else(mismatch),
            PinType::Double => json.as_f64().map(PinValue::Double).ok_or_else(mismatch),
            PinType::String => json
                .as_str()
                .map(|s| PinValue::String(s.to_string()))
                .ok_or_else(mismatch),
            PinType::Point => {
                let arr = json.as_array().filter(|a| a.len() == 2).ok_or_else(mismatch)?;
                let x = arr[0].as_f64().ok_or_else(mismatch)?;
                let y = arr[1].as_f64().ok_or_else(mismatch)?;
                Ok(PinValue::Point(Point::new(x as f32, y as f32)))
            }
            PinType::Vector => {
                let arr = json.as_array().ok_or_else(mismatch)?;
                arr.iter()
                    .map(|v| v.as_f64().map(|f| f as f32).ok_or_else(mismatch))
                    .collect::<Result<Vec<_>, _>>()
                    .map(PinValue::Vector)
            }
        }
    }
}

fn float_to_json(f: f64) -> serde_json::Value {
    serde_json::Number::from_f64(f)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

fn json_type_name(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// From Implementations
// ─────────────────────────────────────────────────────────────────────────────

impl From<bool> for PinValue {
    fn from(v: bool) -> Self {
        PinValue::Bool(v)
    }
}

impl From<i32> for PinValue {
    fn from(v: i32) -> Self {
        PinValue::Int32(v)
    }
}

impl From<i64> for PinValue {
    fn from(v: i64) -> Self {
        PinValue::Int64(v)
    }
}

impl From<f32> for PinValue {
    fn from(v: f32) -> Self {
        PinValue::Float(v)
    }
}

impl From<f64> for PinValue {
    fn from(v: f64) -> Self {
        PinValue::Double(v)
    }
}

impl From<String> for PinValue {
    fn from(v: String) -> Self {
        PinValue::String(v)
    }
}

impl From<&str> for PinValue {
    fn from(v: &str) -> Self {
        PinValue::String(v.to_string())
    }
}

impl From<Point> for PinValue {
    fn from(v: Point) -> Self {
        PinValue::Point(v)
    }
}

impl From<Vec<f32>> for PinValue {
    fn from(v: Vec<f32>) -> Self {
        PinValue::Vector(v)
    }
}

impl From<Mat> for PinValue {
    fn from(v: Mat) -> Self {
        PinValue::Mat(v)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TryFrom Implementations
// ─────────────────────────────────────────────────────────────────────────────

/// Error when converting from PinValue
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueConversionError {
    #[error("Expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("Integer overflow")]
    IntegerOverflow,
}

fn mismatch(expected: PinType, actual: &PinValue) -> ValueConversionError {
    ValueConversionError::TypeMismatch {
        expected: expected.name(),
        actual: actual.pin_type().name(),
    }
}

impl TryFrom<PinValue> for bool {
    type Error = ValueConversionError;
    fn try_from(v: PinValue) -> Result<Self, Self::Error> {
        v.as_bool().ok_or_else(|| mismatch(PinType::Bool, &v))
    }
}

impl TryFrom<PinValue> for i32 {
    type Error = ValueConversionError;
    fn try_from(v: PinValue) -> Result<Self, Self::Error> {
        let i = v.as_i64().ok_or_else(|| mismatch(PinType::Int32, &v))?;
        i32::try_from(i).map_err(|_| ValueConversionError::IntegerOverflow)
    }
}

impl TryFrom<PinValue> for i64 {
    type Error = ValueConversionError;
    fn try_from(v: PinValue) -> Result<Self, Self::Error> {
        v.as_i64().ok_or_else(|| mismatch(PinType::Int64, &v))
    }
}

impl TryFrom<PinValue> for f32 {
    type Error = ValueConversionError;
    fn try_from(v: PinValue) -> Result<Self, Self::Error> {
        v.as_f64()
            .map(|f| f as f32)
            .ok_or_else(|| mismatch(PinType::Float, &v))
    }
}

impl TryFrom<PinValue> for f64 {
    type Error = ValueConversionError;
    fn try_from(v: PinValue) -> Result<Self, Self::Error> {
        v.as_f64().ok_or_else(|| mismatch(PinType::Double, &v))
    }
}

impl TryFrom<PinValue> for String {
    type Error = ValueConversionError;
    fn try_from(v: PinValue) -> Result<Self, Self::Error> {
        match v {
            PinValue::String(s) => Ok(s),
            other => Err(mismatch(PinType::String, &other)),
        }
    }
}

impl TryFrom<PinValue> for Point {
    type Error = ValueConversionError;
    fn try_from(v: PinValue) -> Result<Self, Self::Error> {
        match v {
            PinValue::Point(p) => Ok(p),
            other => Err(mismatch(PinType::Point, &other)),
        }
    }
}

impl TryFrom<PinValue> for Vec<f32> {
    type Error = ValueConversionError;
    fn try_from(v: PinValue) -> Result<Self, Self::Error> {
        match v {
            PinValue::Vector(v) => Ok(v),
            other => Err(mismatch(PinType::Vector, &other)),
        }
    }
}

impl TryFrom<PinValue> for Mat {
    type Error = ValueConversionError;
    fn try_from(v: PinValue) -> Result<Self, Self::Error> {
        match v {
            PinValue::Mat(m) => Ok(m),
            other => Err(mismatch(PinType::Mat, &other)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_primitive_conversions() {
        assert_eq!(i32::try_from(PinValue::from(42)), Ok(42));
        assert_eq!(f32::try_from(PinValue::from(1.5f32)), Ok(1.5));
        assert_eq!(bool::try_from(PinValue::from(true)), Ok(true));
        assert_eq!(String::try_from(PinValue::from("hello")).unwrap(), "hello");
    }

    #[test]
    fn test_numeric_widening() {
        assert_eq!(f64::try_from(PinValue::Int32(3)), Ok(3.0));
        assert_eq!(PinValue::Float(2.0).convert_to(PinType::Int64), Some(PinValue::Int64(2)));
        assert_eq!(PinValue::Int64(i64::MAX).convert_to(PinType::Int32), None);
        assert_eq!(PinValue::from("x").convert_to(PinType::Float), None);
    }

    #[test]
    fn test_type_mismatch() {
        let err = String::try_from(PinValue::Bool(true)).unwrap_err();
        assert_eq!(
            err,
            ValueConversionError::TypeMismatch {
                expected: "String",
                actual: "Bool"
            }
        );
    }

    #[test]
    fn test_json_literals() {
        assert_eq!(PinValue::Float(3.5).to_json(), Some(json!(3.5)));
        assert_eq!(
            PinValue::from_json(PinType::Point, &json!([1.0, 2.0])),
            Ok(PinValue::Point(Point::new(1.0, 2.0)))
        );
        assert_eq!(
            PinValue::from_json(PinType::Int32, &json!(5_000_000_000i64)),
            Err(ValueConversionError::IntegerOverflow)
        );
        assert!(PinValue::from_json(PinType::Bool, &json!("yes")).is_err());
        assert_eq!(PinValue::Mat(Mat::default()).to_json(), None);
    }

    #[test]
    fn test_default_matches_type() {
        for t in PinType::ALL {
            let v = PinValue::default_for(t);
            if !matches!(t, PinType::Void | PinType::Any | PinType::Flow) {
                assert_eq!(v.pin_type(), t);
            }
        }
    }
}
