//! popcanon intermediate representation.
//!
//! An arena-based use-def graph for traced tensor programs. Source-dialect
//! (`aten::`, `prim::`) and target-dialect (`popart::`, `poptorch::`) nodes
//! share one representation so canonicalization can rewrite in place.

pub mod arena;
mod display;
mod error;
pub mod graph;
mod tensor;
mod types;

pub use arena::{Arena, Handle};
pub use display::{dump_graph, value_label};
pub use error::IrError;
pub use graph::{Attribute, Dialect, Graph, Node, NodeKind, Producer, Use, Value};
pub use tensor::{TensorConstant, TensorData, TensorMeta};
pub use types::{ElementType, ListElem, ScalarKind, Shape, ValueType};
