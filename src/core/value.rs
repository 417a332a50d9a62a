use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A port value: either a scalar or a fixed-shape homogeneous vector.
///
/// The engine never performs numeric work on these itself; it only moves
/// them between ports and hands them to
/// [`NodeModel::compute`](crate::NodeModel::compute) callbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl Value {
    /// Returns the scalar payload, if this is a scalar.
    pub fn scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(v) => Some(*v),
            Value::Vector(_) => None,
        }
    }

    /// Returns the vector payload, if this is a vector.
    pub fn vector(&self) -> Option<&[f64]> {
        match self {
            Value::Scalar(_) => None,
            Value::Vector(v) => Some(v),
        }
    }

    /// Number of elements carried (a scalar counts as one).
    pub fn len(&self) -> usize {
        match self {
            Value::Scalar(_) => 1,
            Value::Vector(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Scalar(0.0)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Scalar(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::Vector(v)
    }
}

/// Ordered name-to-value mapping used for node inputs and outputs.
pub type ValueMap = IndexMap<String, Value>;

/// Metadata attached to a single declared port.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortMeta {
    /// Value used when no connection drives the port.
    pub default: Value,
    /// Fixed vector size, when the port carries a homogeneous vector.
    pub shape: Option<usize>,
}

impl PortMeta {
    /// A scalar port with the given default.
    pub fn scalar(default: f64) -> Self {
        PortMeta {
            default: Value::Scalar(default),
            shape: None,
        }
    }

    /// A vector port of fixed size, zero-filled by default.
    pub fn shaped(shape: usize) -> Self {
        PortMeta {
            default: Value::Vector(vec![0.0; shape]),
            shape: Some(shape),
        }
    }

    /// Resolves the declared default against the shape.
    ///
    /// A scalar default on a shaped port broadcasts to a full vector, so a
    /// port always yields a fixed-size vector before first compute.
    pub fn resolved_default(&self) -> Value {
        match (self.shape, &self.default) {
            (Some(n), Value::Scalar(v)) => Value::Vector(vec![*v; n]),
            _ => self.default.clone(),
        }
    }
}

/// The declared input/output ports of a node, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    pub input: IndexMap<String, PortMeta>,
    pub output: IndexMap<String, PortMeta>,
}

impl Interface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an input port (builder style).
    pub fn input(mut self, name: impl Into<String>, meta: PortMeta) -> Self {
        self.input.insert(name.into(), meta);
        self
    }

    /// Declares an output port (builder style).
    pub fn output(mut self, name: impl Into<String>, meta: PortMeta) -> Self {
        self.output.insert(name.into(), meta);
        self
    }

    /// Input defaults with shapes resolved, in declaration order.
    pub fn input_defaults(&self) -> ValueMap {
        self.input
            .iter()
            .map(|(name, meta)| (name.clone(), meta.resolved_default()))
            .collect()
    }
}
