//! JSON trace format for popcanon.
//!
//! A trace file is a serialized traced graph plus the metadata of the
//! concrete tensors it was traced with. [`parse`] reads one into a
//! [`Trace`]; [`to_json`] writes a graph back out in the same format so a
//! canonicalized graph can be inspected or fed back in.

mod emit;
mod lower;

use std::collections::BTreeMap;

use popcanon_ir::{Graph, IrError, TensorMeta};
use serde::{Deserialize, Serialize};

pub use emit::{to_json, to_trace_file};
pub use lower::{parse_type, parse_type_name};

/// A loaded trace: the graph and the tensors bound to its inputs.
#[derive(Clone, Debug, Default)]
pub struct Trace {
    pub graph: Graph,
    pub input_tensors: Vec<TensorMeta>,
    pub parameter_tensors: Vec<TensorMeta>,
}

/// On-disk form of a trace.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TraceFile {
    #[serde(default)]
    pub inputs: Vec<ValueDecl>,
    #[serde(default)]
    pub parameters: Vec<ValueDecl>,
    #[serde(default)]
    pub nodes: Vec<NodeDecl>,
    /// Names of the graph outputs.
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub input_tensors: Vec<TensorDecl>,
    #[serde(default)]
    pub parameter_tensors: Vec<TensorDecl>,
}

/// A named, typed value, e.g. `{"name": "x", "type": "Float(2, 3)"}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValueDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeDecl {
    /// `dialect::name`.
    pub kind: String,
    /// Names of previously defined values.
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<ValueDecl>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, AttrDecl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<String>,
}

/// An attribute literal. The JSON shape picks the variant: integers before
/// floats, integer lists before float lists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrDecl {
    Int(i64),
    Float(f64),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Str(String),
    Tensor(TensorLiteral),
}

/// A constant tensor attribute: `{"dtype": "Float", "shape": [2], "values": [1.0, 2.0]}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TensorLiteral {
    pub dtype: String,
    pub shape: Vec<usize>,
    pub values: Vec<f64>,
}

/// Metadata of a concrete tensor: `{"dtype": "Half", "shape": [4]}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TensorDecl {
    pub dtype: String,
    pub shape: Vec<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Ir(#[from] IrError),
    #[error("invalid type '{0}'")]
    InvalidType(String),
    #[error("unknown dtype '{0}'")]
    UnknownDtype(String),
    #[error("value '{0}' is used before it is defined")]
    UnknownValue(String),
    #[error("value '{0}' is defined more than once")]
    DuplicateValue(String),
    #[error("attribute '{name}': {message}")]
    Attribute { name: String, message: String },
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Parse a JSON trace into a graph and its tensor metadata.
pub fn parse(source: &str) -> Result<Trace, TraceError> {
    let file: TraceFile = serde_json::from_str(source)?;
    lower::lower_trace(&file)
}
