//! Mutable use-def graph for traced tensor programs.
//!
//! Nodes and values live in arenas and refer to each other through
//! [`Handle`]s. A value records its producer and its uses; the graph keeps
//! those back-references consistent across every mutation, so passes can
//! rewire consumers and remove nodes without dangling links.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::arena::{Arena, Handle};
use crate::error::IrError;
use crate::tensor::TensorConstant;
use crate::types::ValueType;

/// Operator namespace.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum Dialect {
    /// Framework operators emitted by the tracer.
    Aten,
    /// Structural trace operators (constants, lists).
    Prim,
    /// Operators of the accelerator compiler.
    Popart,
    /// Custom operators understood by the accelerator compiler.
    Poptorch,
}

impl Dialect {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Aten => "aten",
            Self::Prim => "prim",
            Self::Popart => "popart",
            Self::Poptorch => "poptorch",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "aten" => Some(Self::Aten),
            "prim" => Some(Self::Prim),
            "popart" => Some(Self::Popart),
            "poptorch" => Some(Self::Poptorch),
            _ => None,
        }
    }

    /// `true` for the dialects canonicalization must eliminate.
    pub fn is_source(self) -> bool {
        matches!(self, Self::Aten | Self::Prim)
    }
}

/// Tagged operator identifier, rendered `dialect::name`.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct NodeKind {
    pub dialect: Dialect,
    pub name: Cow<'static, str>,
}

impl NodeKind {
    pub const fn new(dialect: Dialect, name: &'static str) -> Self {
        Self {
            dialect,
            name: Cow::Borrowed(name),
        }
    }

    pub const fn aten(name: &'static str) -> Self {
        Self::new(Dialect::Aten, name)
    }

    pub const fn prim(name: &'static str) -> Self {
        Self::new(Dialect::Prim, name)
    }

    pub const fn popart(name: &'static str) -> Self {
        Self::new(Dialect::Popart, name)
    }

    pub const fn poptorch(name: &'static str) -> Self {
        Self::new(Dialect::Poptorch, name)
    }

    /// Parses `dialect::name`.
    pub fn parse(text: &str) -> Result<Self, IrError> {
        let (prefix, name) = text
            .split_once("::")
            .ok_or_else(|| IrError::InvalidKind(text.into()))?;
        let dialect = Dialect::from_prefix(prefix).ok_or_else(|| IrError::InvalidKind(text.into()))?;
        if name.is_empty() {
            return Err(IrError::InvalidKind(text.into()));
        }
        Ok(Self {
            dialect,
            name: Cow::Owned(name.to_string()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_source(&self) -> bool {
        self.dialect.is_source()
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.dialect.prefix(), self.name)
    }
}

/// A static node attribute.
#[derive(Clone, Debug, PartialEq)]
pub enum Attribute {
    Int(i64),
    Float(f64),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Str(String),
    Tensor(TensorConstant),
    Graph(Box<Graph>),
}

impl Attribute {
    /// Short name of the attribute kind, used in schema diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Ints(_) => "ints",
            Self::Floats(_) => "floats",
            Self::Str(_) => "string",
            Self::Tensor(_) => "tensor",
            Self::Graph(_) => "graph",
        }
    }
}

/// One operation in the graph.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    /// The operator this node performs.
    pub kind: NodeKind,
    /// Static attributes keyed by name.
    pub attrs: BTreeMap<String, Attribute>,
    /// Origin of the node (source location or tracer tag) for diagnostics.
    pub provenance: Option<String>,
    inputs: Vec<Handle<Value>>,
    outputs: Vec<Handle<Value>>,
    alive: bool,
}

impl Node {
    pub fn inputs(&self) -> &[Handle<Value>] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Handle<Value>] {
        &self.outputs
    }

    /// The first output.
    ///
    /// # Panics
    ///
    /// Panics if the node has no outputs.
    pub fn output(&self) -> Handle<Value> {
        self.outputs[0]
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn attr(&self, name: &str) -> Option<&Attribute> {
        self.attrs.get(name)
    }

    pub fn set_attr(&mut self, name: impl Into<String>, attr: Attribute) {
        self.attrs.insert(name.into(), attr);
    }

    pub fn i(&self, name: &str) -> Option<i64> {
        match self.attrs.get(name)? {
            Attribute::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float attribute; integer attributes are widened.
    pub fn f(&self, name: &str) -> Option<f64> {
        match self.attrs.get(name)? {
            Attribute::Float(v) => Some(*v),
            Attribute::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn is(&self, name: &str) -> Option<&[i64]> {
        match self.attrs.get(name)? {
            Attribute::Ints(v) => Some(v),
            _ => None,
        }
    }

    pub fn s(&self, name: &str) -> Option<&str> {
        match self.attrs.get(name)? {
            Attribute::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn t(&self, name: &str) -> Option<&TensorConstant> {
        match self.attrs.get(name)? {
            Attribute::Tensor(v) => Some(v),
            _ => None,
        }
    }
}

/// Where a value comes from.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Producer {
    /// Output `slot` of `node`.
    Node { node: Handle<Node>, slot: usize },
    /// Data input at this position.
    Input(usize),
    /// Trainable parameter at this position.
    Parameter(usize),
}

/// A consumer reference: `node.inputs()[index]` is the value.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct Use {
    pub node: Handle<Node>,
    pub index: usize,
}

/// A single SSA value.
#[derive(Clone, Debug, PartialEq)]
pub struct Value {
    /// Element type and shape.
    pub ty: ValueType,
    /// Debug name carried over from the trace.
    pub name: Option<String>,
    producer: Producer,
    uses: Vec<Use>,
}

impl Value {
    pub fn producer(&self) -> Producer {
        self.producer
    }

    pub fn uses(&self) -> &[Use] {
        &self.uses
    }
}

/// A traced tensor program.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Graph {
    nodes: Arena<Node>,
    values: Arena<Value>,
    /// Live nodes in program order.
    order: Vec<Handle<Node>>,
    inputs: Vec<Handle<Value>>,
    parameters: Vec<Handle<Value>>,
    outputs: Vec<Handle<Value>>,
    insert_point: Option<Handle<Node>>,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a data input and return its value.
    pub fn add_input(&mut self, ty: ValueType, name: impl Into<String>) -> Handle<Value> {
        let value = self.values.alloc(Value {
            ty,
            name: Some(name.into()),
            producer: Producer::Input(self.inputs.len()),
            uses: Vec::new(),
        });
        self.inputs.push(value);
        value
    }

    /// Add a trainable parameter and return its value.
    pub fn add_parameter(&mut self, ty: ValueType, name: impl Into<String>) -> Handle<Value> {
        let value = self.values.alloc(Value {
            ty,
            name: Some(name.into()),
            producer: Producer::Parameter(self.parameters.len()),
            uses: Vec::new(),
        });
        self.parameters.push(value);
        value
    }

    pub fn inputs(&self) -> &[Handle<Value>] {
        &self.inputs
    }

    pub fn parameters(&self) -> &[Handle<Value>] {
        &self.parameters
    }

    pub fn outputs(&self) -> &[Handle<Value>] {
        &self.outputs
    }

    /// Append a graph output and return its position.
    pub fn register_output(&mut self, value: Handle<Value>) -> usize {
        self.outputs.push(value);
        self.outputs.len() - 1
    }

    pub fn set_outputs(&mut self, outputs: Vec<Handle<Value>>) {
        self.outputs = outputs;
    }

    pub fn node(&self, node: Handle<Node>) -> &Node {
        &self.nodes[node]
    }

    /// Mutable access for attribute and provenance edits. Inputs and outputs
    /// are only changed through the graph so use lists stay consistent.
    pub fn node_mut(&mut self, node: Handle<Node>) -> &mut Node {
        &mut self.nodes[node]
    }

    pub fn value(&self, value: Handle<Value>) -> &Value {
        &self.values[value]
    }

    pub fn value_type(&self, value: Handle<Value>) -> &ValueType {
        &self.values[value].ty
    }

    pub fn set_value_type(&mut self, value: Handle<Value>, ty: ValueType) {
        self.values[value].ty = ty;
    }

    pub fn set_value_name(&mut self, value: Handle<Value>, name: impl Into<String>) {
        self.values[value].name = Some(name.into());
    }

    pub fn producer(&self, value: Handle<Value>) -> Producer {
        self.values[value].producer
    }

    /// The node producing `value`, if it is not a graph input or parameter.
    pub fn producer_node(&self, value: Handle<Value>) -> Option<Handle<Node>> {
        match self.values[value].producer {
            Producer::Node { node, .. } => Some(node),
            Producer::Input(_) | Producer::Parameter(_) => None,
        }
    }

    pub fn uses(&self, value: Handle<Value>) -> &[Use] {
        &self.values[value].uses
    }

    pub fn is_output(&self, value: Handle<Value>) -> bool {
        self.outputs.contains(&value)
    }

    /// `true` if any node or the graph itself consumes `value`.
    pub fn is_used(&self, value: Handle<Value>) -> bool {
        !self.values[value].uses.is_empty() || self.is_output(value)
    }

    pub fn insertion_point(&self) -> Option<Handle<Node>> {
        self.insert_point
    }

    /// Set where new nodes are inserted (before `at`, or at the end when
    /// `None`). Returns the previous insertion point.
    pub fn set_insertion_point(&mut self, at: Option<Handle<Node>>) -> Option<Handle<Node>> {
        std::mem::replace(&mut self.insert_point, at)
    }

    /// Run `f` with new nodes inserted before `at`, then restore the
    /// previous insertion point.
    pub fn insert_before<R>(&mut self, at: Handle<Node>, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = self.set_insertion_point(Some(at));
        let result = f(self);
        self.insert_point = previous;
        result
    }

    /// Create a node at the insertion point with one output per entry of
    /// `output_types`.
    pub fn insert_node(
        &mut self,
        kind: NodeKind,
        inputs: Vec<Handle<Value>>,
        output_types: Vec<ValueType>,
    ) -> Handle<Node> {
        let node = self.nodes.alloc(Node {
            kind,
            attrs: BTreeMap::new(),
            provenance: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            alive: true,
        });

        let outputs = output_types
            .into_iter()
            .enumerate()
            .map(|(slot, ty)| {
                self.values.alloc(Value {
                    ty,
                    name: None,
                    producer: Producer::Node { node, slot },
                    uses: Vec::new(),
                })
            })
            .collect();
        self.nodes[node].outputs = outputs;
        self.set_inputs(node, inputs);

        let pos = self
            .insert_point
            .and_then(|at| self.position(at))
            .unwrap_or(self.order.len());
        self.order.insert(pos, node);
        node
    }

    /// Replace the whole input list of `node`, updating use lists.
    pub fn set_inputs(&mut self, node: Handle<Node>, inputs: Vec<Handle<Value>>) {
        let old = std::mem::take(&mut self.nodes[node].inputs);
        for (index, value) in old.into_iter().enumerate() {
            self.values[value]
                .uses
                .retain(|u| !(u.node == node && u.index == index));
        }
        for (index, &value) in inputs.iter().enumerate() {
            self.values[value].uses.push(Use { node, index });
        }
        self.nodes[node].inputs = inputs;
    }

    /// Replace input `index` of `node` with `value`.
    pub fn replace_input(&mut self, node: Handle<Node>, index: usize, value: Handle<Value>) {
        let old = self.nodes[node].inputs[index];
        if old == value {
            return;
        }
        self.values[old]
            .uses
            .retain(|u| !(u.node == node && u.index == index));
        self.values[value].uses.push(Use { node, index });
        self.nodes[node].inputs[index] = value;
    }

    /// Redirect every consumer of `from` (including graph outputs) to `to`.
    pub fn replace_all_uses_with(&mut self, from: Handle<Value>, to: Handle<Value>) {
        self.rewire(from, to, None);
    }

    /// Like [`replace_all_uses_with`](Self::replace_all_uses_with), but
    /// leaves the inputs of `except` untouched. Used when `to` is produced by
    /// a node that itself consumes `from` (e.g. an inserted cast).
    pub fn replace_all_uses_with_except(
        &mut self,
        from: Handle<Value>,
        to: Handle<Value>,
        except: Handle<Node>,
    ) {
        self.rewire(from, to, Some(except));
    }

    fn rewire(&mut self, from: Handle<Value>, to: Handle<Value>, except: Option<Handle<Node>>) {
        if from == to {
            return;
        }
        let uses = std::mem::take(&mut self.values[from].uses);
        let (kept, moved): (Vec<Use>, Vec<Use>) =
            uses.into_iter().partition(|u| Some(u.node) == except);
        for u in &moved {
            self.nodes[u.node].inputs[u.index] = to;
        }
        self.values[from].uses = kept;
        self.values[to].uses.extend(moved);
        for out in &mut self.outputs {
            if *out == from {
                *out = to;
            }
        }
    }

    /// Remove `node` from the graph. All of its outputs must be unused.
    pub fn destroy_node(&mut self, node: Handle<Node>) -> Result<(), IrError> {
        let size = self.nodes.len();
        let n = self
            .nodes
            .get(node)
            .ok_or(IrError::BadHandle {
                index: node.index(),
                size,
            })?;
        if !n.alive {
            return Err(IrError::DeadNode(node.index()));
        }
        for &out in &n.outputs {
            let uses = self.values[out].uses.len() + usize::from(self.is_output(out));
            if uses > 0 {
                return Err(IrError::LiveUses {
                    node: node.index(),
                    kind: n.kind.to_string(),
                    uses,
                });
            }
        }

        self.set_inputs(node, Vec::new());
        self.nodes[node].alive = false;
        if let Some(pos) = self.position(node) {
            self.order.remove(pos);
            if self.insert_point == Some(node) {
                self.insert_point = self.order.get(pos).copied();
            }
        }
        Ok(())
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.order.len()
    }

    /// Live nodes in program order.
    pub fn nodes(&self) -> impl Iterator<Item = (Handle<Node>, &Node)> {
        self.order.iter().map(|&h| (h, &self.nodes[h]))
    }

    /// Snapshot of the program order.
    pub fn node_order(&self) -> Vec<Handle<Node>> {
        self.order.clone()
    }

    /// Live nodes of the given kind, in program order.
    pub fn nodes_of_kind(&self, kind: &NodeKind) -> Vec<Handle<Node>> {
        self.nodes()
            .filter(|(_, n)| &n.kind == kind)
            .map(|(h, _)| h)
            .collect()
    }

    /// Marker for [`nodes_since`](Self::nodes_since).
    pub fn node_mark(&self) -> usize {
        self.nodes.len()
    }

    /// Live nodes created after `mark` was taken, in program order.
    pub fn nodes_since(&self, mark: usize) -> Vec<Handle<Node>> {
        self.order
            .iter()
            .copied()
            .filter(|h| h.index() >= mark)
            .collect()
    }

    /// Position of a live node in program order.
    pub fn position(&self, node: Handle<Node>) -> Option<usize> {
        self.order.iter().position(|&h| h == node)
    }

    /// Graph inputs, parameters, then every output of every live node.
    pub fn live_values(&self) -> Vec<Handle<Value>> {
        let mut values: Vec<Handle<Value>> = self
            .inputs
            .iter()
            .chain(self.parameters.iter())
            .copied()
            .collect();
        for (_, node) in self.nodes() {
            values.extend_from_slice(&node.outputs);
        }
        values
    }

    /// Returns live nodes in topological order.
    ///
    /// The ordering is deterministic: among ready nodes, the one earliest in
    /// program order is emitted first.
    pub fn topological_order(&self) -> Result<Vec<Handle<Node>>, IrError> {
        let n = self.order.len();
        let position: HashMap<Handle<Node>, usize> =
            self.order.iter().enumerate().map(|(i, &h)| (h, i)).collect();

        // Build per-node consumer lists and in-degree (O(V+E))
        let mut in_degree = vec![0usize; n];
        let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (ci, &h) in self.order.iter().enumerate() {
            for &input in &self.nodes[h].inputs {
                if let Producer::Node { node, .. } = self.values[input].producer
                    && let Some(&pi) = position.get(&node)
                {
                    in_degree[ci] += 1;
                    consumers[pi].push(ci);
                }
            }
        }

        // Kahn's algorithm, ready set ordered by program position
        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut result = Vec::with_capacity(n);
        while let Some(idx) = ready.pop_first() {
            result.push(self.order[idx]);
            for &ci in &consumers[idx] {
                in_degree[ci] -= 1;
                if in_degree[ci] == 0 {
                    ready.insert(ci);
                }
            }
        }

        if result.len() != n {
            return Err(IrError::Cycle {
                visited: result.len(),
                total: n,
            });
        }
        Ok(result)
    }

    /// Reorder the program so every producer precedes its consumers.
    pub fn sort_topologically(&mut self) -> Result<(), IrError> {
        self.order = self.topological_order()?;
        Ok(())
    }

    /// Check use-def back-references and program order.
    pub fn verify(&self) -> Result<(), IrError> {
        let mut defined: BTreeSet<Handle<Value>> = self
            .inputs
            .iter()
            .chain(self.parameters.iter())
            .copied()
            .collect();

        for &h in &self.order {
            let node = &self.nodes[h];
            if !node.alive {
                return Err(IrError::DeadNode(h.index()));
            }
            for (index, &input) in node.inputs.iter().enumerate() {
                if !defined.contains(&input) {
                    return Err(IrError::Inconsistent(format!(
                        "{} (node {}) reads value {} before it is defined",
                        node.kind,
                        h.index(),
                        input.index()
                    )));
                }
                if !self.values[input].uses.contains(&Use { node: h, index }) {
                    return Err(IrError::Inconsistent(format!(
                        "value {} is missing use ({}, {index})",
                        input.index(),
                        h.index()
                    )));
                }
            }
            defined.extend(node.outputs.iter().copied());
        }

        for &value in &defined {
            for u in &self.values[value].uses {
                let node = &self.nodes[u.node];
                if !node.alive || node.inputs.get(u.index) != Some(&value) {
                    return Err(IrError::Inconsistent(format!(
                        "value {} lists stale use ({}, {})",
                        value.index(),
                        u.node.index(),
                        u.index
                    )));
                }
            }
        }

        for &out in &self.outputs {
            if !defined.contains(&out) {
                return Err(IrError::Inconsistent(format!(
                    "graph output {} is not defined",
                    out.index()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ElementType;

    fn f32_tensor(dims: &[usize]) -> ValueType {
        ValueType::tensor(ElementType::Float32, dims)
    }

    #[test]
    fn build_simple_graph() {
        let mut graph = Graph::new();

        // MatMul → Add → ReLU
        let a = graph.add_input(f32_tensor(&[4, 8]), "a");
        let b = graph.add_parameter(f32_tensor(&[8, 8]), "b");
        let bias = graph.add_parameter(f32_tensor(&[8]), "bias");
        let mm = graph.insert_node(NodeKind::aten("matmul"), vec![a, b], vec![f32_tensor(&[4, 8])]);
        let mm_out = graph.node(mm).output();
        let add = graph.insert_node(NodeKind::aten("add"), vec![mm_out, bias], vec![f32_tensor(&[4, 8])]);
        let add_out = graph.node(add).output();
        let relu = graph.insert_node(NodeKind::aten("relu"), vec![add_out], vec![f32_tensor(&[4, 8])]);
        graph.register_output(graph.node(relu).output());

        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.uses(mm_out), &[Use { node: add, index: 0 }]);
        assert_eq!(graph.producer(b), Producer::Parameter(0));
        assert_eq!(graph.producer_node(add_out), Some(add));
        graph.verify().unwrap();
    }

    #[test]
    fn node_kind_parse_and_display() {
        let kind = NodeKind::parse("aten::add").unwrap();
        assert_eq!(kind, NodeKind::aten("add"));
        assert!(kind.is_source());
        assert_eq!(NodeKind::popart("reshape").to_string(), "popart::reshape");
        assert!(!NodeKind::poptorch("tensor_constant").is_source());
        assert!(NodeKind::parse("add").is_err());
        assert!(NodeKind::parse("onnx::Add").is_err());
    }

    #[test]
    fn insertion_point_places_nodes_before_anchor() {
        let mut graph = Graph::new();
        let x = graph.add_input(f32_tensor(&[2]), "x");
        let relu = graph.insert_node(NodeKind::aten("relu"), vec![x], vec![f32_tensor(&[2])]);
        let cast = graph.insert_before(relu, |g| {
            g.insert_node(NodeKind::popart("cast"), vec![x], vec![f32_tensor(&[2])])
        });
        assert_eq!(graph.node_order(), vec![cast, relu]);
        assert_eq!(graph.insertion_point(), None);
    }

    #[test]
    fn replace_all_uses_rewires_consumers_and_outputs() {
        let mut graph = Graph::new();
        let x = graph.add_input(f32_tensor(&[2]), "x");
        let n = graph.insert_node(NodeKind::aten("detach"), vec![x], vec![f32_tensor(&[2])]);
        let out = graph.node(n).output();
        let relu = graph.insert_node(NodeKind::aten("relu"), vec![out], vec![f32_tensor(&[2])]);
        graph.register_output(out);

        graph.replace_all_uses_with(out, x);
        assert_eq!(graph.node(relu).inputs(), &[x]);
        assert_eq!(graph.outputs(), &[x]);
        assert!(!graph.is_used(out));
        graph.destroy_node(n).unwrap();
        assert_eq!(graph.node_count(), 1);
        graph.verify().unwrap();
    }

    #[test]
    fn replace_all_uses_except_keeps_the_new_producer_input() {
        let mut graph = Graph::new();
        let x = graph.add_input(f32_tensor(&[2]), "x");
        let relu = graph.insert_node(NodeKind::aten("relu"), vec![x], vec![f32_tensor(&[2])]);
        let cast = graph.insert_before(relu, |g| {
            g.insert_node(NodeKind::popart("cast"), vec![x], vec![f32_tensor(&[2])])
        });
        let cast_out = graph.node(cast).output();
        graph.replace_all_uses_with_except(x, cast_out, cast);
        assert_eq!(graph.node(cast).inputs(), &[x]);
        assert_eq!(graph.node(relu).inputs(), &[cast_out]);
        graph.verify().unwrap();
    }

    #[test]
    fn destroy_rejects_live_outputs() {
        let mut graph = Graph::new();
        let x = graph.add_input(f32_tensor(&[2]), "x");
        let n = graph.insert_node(NodeKind::aten("relu"), vec![x], vec![f32_tensor(&[2])]);
        graph.register_output(graph.node(n).output());
        let err = graph.destroy_node(n).unwrap_err();
        assert!(matches!(err, IrError::LiveUses { uses: 1, .. }));
    }

    #[test]
    fn destroy_twice_is_an_error() {
        let mut graph = Graph::new();
        let x = graph.add_input(f32_tensor(&[2]), "x");
        let n = graph.insert_node(NodeKind::aten("relu"), vec![x], vec![f32_tensor(&[2])]);
        graph.destroy_node(n).unwrap();
        assert!(graph.uses(x).is_empty());
        assert!(matches!(graph.destroy_node(n), Err(IrError::DeadNode(_))));
    }

    #[test]
    fn topological_order_diamond_dag() {
        // A → B, A → C, B → D, C → D, inserted out of order.
        let mut graph = Graph::new();
        let x = graph.add_input(f32_tensor(&[10]), "x");
        let d = graph.insert_node(NodeKind::aten("add"), vec![x, x], vec![f32_tensor(&[10])]);
        let a = graph.insert_node(NodeKind::aten("relu"), vec![x], vec![f32_tensor(&[10])]);
        let a_out = graph.node(a).output();
        let b = graph.insert_node(NodeKind::aten("relu"), vec![a_out], vec![f32_tensor(&[10])]);
        let c = graph.insert_node(NodeKind::aten("relu"), vec![a_out], vec![f32_tensor(&[10])]);
        let b_out = graph.node(b).output();
        let c_out = graph.node(c).output();
        graph.set_inputs(d, vec![b_out, c_out]);

        assert!(graph.verify().is_err());
        graph.sort_topologically().unwrap();
        assert_eq!(graph.node_order(), vec![a, b, c, d]);
        graph.verify().unwrap();
    }

    #[test]
    fn topological_order_detects_cycle() {
        let mut graph = Graph::new();
        let x = graph.add_input(f32_tensor(&[10]), "x");
        let a = graph.insert_node(NodeKind::aten("relu"), vec![x], vec![f32_tensor(&[10])]);
        let a_out = graph.node(a).output();
        let b = graph.insert_node(NodeKind::aten("relu"), vec![a_out], vec![f32_tensor(&[10])]);
        let b_out = graph.node(b).output();
        graph.set_inputs(a, vec![b_out]);

        let err = graph.topological_order().unwrap_err();
        assert!(matches!(err, IrError::Cycle { visited: 0, total: 2 }));
    }

    #[test]
    fn attribute_accessors() {
        let mut graph = Graph::new();
        let n = graph.insert_node(NodeKind::popart("transpose"), vec![], vec![]);
        let node = graph.node_mut(n);
        node.set_attr("perm", Attribute::Ints(vec![1, 0]));
        node.set_attr("axis", Attribute::Int(2));
        node.set_attr("to", Attribute::Str("FLOAT".into()));
        assert_eq!(graph.node(n).is("perm"), Some(&[1i64, 0][..]));
        assert_eq!(graph.node(n).i("axis"), Some(2));
        assert_eq!(graph.node(n).f("axis"), Some(2.0));
        assert_eq!(graph.node(n).s("to"), Some("FLOAT"));
        assert_eq!(graph.node(n).i("perm"), None);
    }
}
