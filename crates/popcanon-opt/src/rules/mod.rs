//! Rewrite rules from source kinds to the target dialect.
//!
//! Each rule receives the node to lower with the graph's insertion point set
//! directly before it, builds replacement target nodes, and returns one
//! replacement value per original output. `Ok(None)` declines: the node is
//! left in place and reported later as unsupported.

mod creation;
mod elementwise;
mod loss;
mod math;
mod passthrough;
mod shape;

use std::collections::HashMap;

use once_cell::sync::Lazy;
use popcanon_ir::{ElementType, Graph, Handle, ListElem, Node, NodeKind, Value, ValueType};
use popcanon_ops::builder::{self, Attrs};
use popcanon_ops::kinds;

use crate::CanonError;
use crate::fold::{ConstValue, constant_value};

/// Replacement values, or `None` to decline.
pub(crate) type RuleResult = Result<Option<Vec<Handle<Value>>>, CanonError>;

pub(crate) type Rule = fn(&mut RuleContext<'_>) -> RuleResult;

type RuleSet = HashMap<NodeKind, Rule>;

static RULES: Lazy<RuleSet> = Lazy::new(|| {
    let mut rules = RuleSet::new();
    elementwise::register(&mut rules);
    shape::register(&mut rules);
    creation::register(&mut rules);
    math::register(&mut rules);
    loss::register(&mut rules);
    passthrough::register(&mut rules);
    rules
});

/// The rule lowering `kind`, if any.
pub(crate) fn rule_for(kind: &NodeKind) -> Option<Rule> {
    RULES.get(kind).copied()
}

/// Every kind with a lowering rule, sorted.
pub fn supported_kinds() -> Vec<&'static NodeKind> {
    let mut kinds: Vec<&'static NodeKind> = RULES.keys().collect();
    kinds.sort();
    kinds
}

fn register_aten(rules: &mut RuleSet, names: &[&'static str], rule: Rule) {
    for &name in names {
        rules.insert(NodeKind::aten(name), rule);
    }
}

/// Single replacement value.
fn replace(value: Handle<Value>) -> RuleResult {
    Ok(Some(vec![value]))
}

/// Element type a torch `ScalarType` code denotes.
fn scalar_type_from_code(code: i64) -> Option<ElementType> {
    match code {
        0 => Some(ElementType::Uint8),
        1 => Some(ElementType::Int8),
        3 => Some(ElementType::Int32),
        4 => Some(ElementType::Int64),
        5 => Some(ElementType::Float16),
        6 | 7 => Some(ElementType::Float32),
        11 => Some(ElementType::Bool),
        _ => None,
    }
}

/// The node under rewrite plus the graph it lives in.
pub(crate) struct RuleContext<'g> {
    pub graph: &'g mut Graph,
    pub node: Handle<Node>,
}

impl<'g> RuleContext<'g> {
    pub fn new(graph: &'g mut Graph, node: Handle<Node>) -> Self {
        Self { graph, node }
    }

    fn n(&self) -> &Node {
        self.graph.node(self.node)
    }

    fn error(&self, message: impl Into<String>) -> CanonError {
        CanonError::Rule {
            kind: self.n().kind.to_string(),
            message: message.into(),
        }
    }

    fn num_inputs(&self) -> usize {
        self.n().inputs().len()
    }

    fn input(&self, i: usize) -> Result<Handle<Value>, CanonError> {
        self.n()
            .inputs()
            .get(i)
            .copied()
            .ok_or_else(|| self.error(format!("missing operand {i}")))
    }

    fn input_type(&self, i: usize) -> Result<&ValueType, CanonError> {
        Ok(self.graph.value_type(self.input(i)?))
    }

    /// Compile-time value of operand `i`; absent operands read as `None`.
    fn constant(&self, i: usize) -> Option<ConstValue> {
        match self.n().inputs().get(i) {
            Some(&v) => constant_value(self.graph, v),
            None => Some(ConstValue::None),
        }
    }

    fn const_int(&self, i: usize) -> Result<i64, CanonError> {
        self.opt_int(i)?
            .ok_or_else(|| self.error(format!("operand {i} must be a constant integer")))
    }

    fn opt_int(&self, i: usize) -> Result<Option<i64>, CanonError> {
        match self.constant(i) {
            Some(ConstValue::None) => Ok(None),
            Some(c) => c
                .as_int()
                .map(Some)
                .ok_or_else(|| self.error(format!("operand {i} must be a constant integer"))),
            None => Err(self.error(format!("operand {i} must be a constant integer"))),
        }
    }

    fn opt_float(&self, i: usize) -> Result<Option<f64>, CanonError> {
        match self.constant(i) {
            Some(ConstValue::None) => Ok(None),
            Some(c) => c
                .as_f64()
                .map(Some)
                .ok_or_else(|| self.error(format!("operand {i} must be a constant number"))),
            None => Err(self.error(format!("operand {i} must be a constant number"))),
        }
    }

    fn const_float(&self, i: usize) -> Result<f64, CanonError> {
        self.opt_float(i)?
            .ok_or_else(|| self.error(format!("operand {i} must be a constant number")))
    }

    /// A constant integer list. A lone integer counts as a one-element list.
    fn const_ints(&self, i: usize) -> Result<Vec<i64>, CanonError> {
        match self.constant(i) {
            Some(ConstValue::Ints(v)) => Ok(v),
            Some(ConstValue::Int(v)) => Ok(vec![v]),
            _ => Err(self.error(format!("operand {i} must be a constant integer list"))),
        }
    }

    fn dims(&self, i: usize) -> Result<Vec<usize>, CanonError> {
        self.input_type(i)?
            .dims()
            .map(<[usize]>::to_vec)
            .ok_or_else(|| self.error(format!("shape of operand {i} is not known")))
    }

    fn rank(&self, i: usize) -> Result<usize, CanonError> {
        self.dims(i).map(|d| d.len())
    }

    /// Type the trace recorded for the first output.
    fn output_type(&self) -> Result<&ValueType, CanonError> {
        let &out = self
            .n()
            .outputs()
            .first()
            .ok_or_else(|| self.error("traced node has no outputs"))?;
        Ok(self.graph.value_type(out))
    }

    fn output_elem(&self) -> Result<ElementType, CanonError> {
        self.output_type()?
            .elem()
            .ok_or_else(|| self.error("traced output has no element type"))
    }

    fn output_dims(&self) -> Result<Vec<usize>, CanonError> {
        self.output_type()?
            .dims()
            .map(<[usize]>::to_vec)
            .ok_or_else(|| self.error("traced output shape is not known"))
    }

    /// Element type of operand `i` if it is a tensor.
    fn tensor_elem(&self, i: usize) -> Option<ElementType> {
        let v = *self.n().inputs().get(i)?;
        match self.graph.value_type(v) {
            ValueType::Tensor { elem, .. } => Some(*elem),
            _ => None,
        }
    }

    /// Operand `i` as a tensor. Constant scalars become rank-0 constants
    /// typed after `reference`, the element type of the tensor they combine
    /// with: floats next to a float tensor stay `HalfOrFloat` until the
    /// precision is resolved.
    fn tensor(&mut self, i: usize, reference: Option<ElementType>) -> Result<Handle<Value>, CanonError> {
        let v = self.input(i)?;
        let ValueType::Scalar(scalar) = *self.graph.value_type(v) else {
            return Ok(v);
        };
        let value = self
            .constant(i)
            .and_then(|c| c.as_f64())
            .ok_or_else(|| self.error(format!("operand {i} is a runtime scalar")))?;
        self.scalar_like(value, scalar, reference)
    }

    /// A rank-0 constant holding `value`, typed after `reference`.
    fn scalar_like(
        &mut self,
        value: f64,
        scalar: ElementType,
        reference: Option<ElementType>,
    ) -> Result<Handle<Value>, CanonError> {
        let elem = match reference {
            Some(r) if r.is_float() => ElementType::HalfOrFloat,
            Some(r) if !scalar.is_float() => r,
            _ if scalar.is_float() => ElementType::Float32,
            _ if scalar == ElementType::Bool => ElementType::Bool,
            _ => ElementType::Int32,
        };
        let node = builder::create_constant(self.graph, elem, &[value], &[])?;
        Ok(self.graph.node(node).output())
    }

    /// Creates a target node with registered policies and returns its only
    /// output.
    fn op(&mut self, kind: NodeKind, inputs: &[Handle<Value>], attrs: Attrs) -> Result<Handle<Value>, CanonError> {
        let node = builder::create_op(self.graph, kind, inputs, attrs)?;
        Ok(self.graph.node(node).output())
    }

    /// `prim::ListConstruct` gathering `values`, for rules whose traced
    /// output is a tensor list.
    fn list_of(&mut self, values: Vec<Handle<Value>>) -> Handle<Value> {
        let list = self.graph.insert_node(
            kinds::source::LIST_CONSTRUCT,
            values,
            vec![ValueType::List(ListElem::Tensor)],
        );
        self.graph.node(list).output()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Helpers for rule tests: build a traced node, run its rule in place.

    use popcanon_ir::Attribute;

    use super::*;

    pub fn constant(graph: &mut Graph, attr: Attribute, ty: ValueType) -> Handle<Value> {
        let n = graph.insert_node(kinds::source::CONSTANT, vec![], vec![ty]);
        graph.node_mut(n).set_attr("value", attr);
        graph.node(n).output()
    }

    pub fn int(graph: &mut Graph, v: i64) -> Handle<Value> {
        constant(graph, Attribute::Int(v), ValueType::Scalar(ElementType::Int64))
    }

    pub fn float(graph: &mut Graph, v: f64) -> Handle<Value> {
        constant(graph, Attribute::Float(v), ValueType::Scalar(ElementType::Float32))
    }

    pub fn ints(graph: &mut Graph, v: &[i64]) -> Handle<Value> {
        constant(graph, Attribute::Ints(v.to_vec()), ValueType::List(ListElem::Int))
    }

    pub fn none(graph: &mut Graph) -> Handle<Value> {
        let n = graph.insert_node(kinds::source::CONSTANT, vec![], vec![ValueType::None]);
        graph.node(n).output()
    }

    /// Runs the rule for `node` the way early canonicalization does.
    pub fn lower(graph: &mut Graph, node: Handle<Node>) -> Option<Vec<Handle<Value>>> {
        let rule = rule_for(&graph.node(node).kind).expect("kind has a rule");
        let previous = graph.set_insertion_point(Some(node));
        let result = rule(&mut RuleContext::new(graph, node)).expect("rule succeeds");
        graph.set_insertion_point(previous);
        result
    }

    pub fn lower_one(graph: &mut Graph, node: Handle<Node>) -> Handle<Value> {
        let values = lower(graph, node).expect("rule applies");
        assert_eq!(values.len(), 1);
        values[0]
    }

    pub fn kind_of(graph: &Graph, value: Handle<Value>) -> NodeKind {
        let producer = graph.producer_node(value).expect("value has a producer");
        graph.node(producer).kind.clone()
    }

    pub fn node_of(graph: &Graph, value: Handle<Value>) -> &Node {
        graph.node(graph.producer_node(value).expect("value has a producer"))
    }

    pub fn aten(
        graph: &mut Graph,
        name: &'static str,
        inputs: Vec<Handle<Value>>,
        out: ValueType,
    ) -> Handle<Node> {
        graph.insert_node(NodeKind::aten(name), inputs, vec![out])
    }
}

#[cfg(test)]
mod tests {
    use popcanon_ir::Attribute;

    use super::testing::*;
    use super::*;

    #[test]
    fn rule_table_covers_the_common_operators() {
        let supported = supported_kinds();
        for name in ["add", "matmul", "reshape", "cat", "zeros", "detach", "softmax"] {
            assert!(supported.contains(&&NodeKind::aten(name)), "aten::{name} has no rule");
        }
        assert!(supported.contains(&&kinds::IDENTITY_LOSS));
        assert!(rule_for(&NodeKind::aten("frobnicate")).is_none());
    }

    #[test]
    fn scalar_operands_follow_the_reference_type() {
        let mut graph = Graph::new();
        let f = float(&mut graph, 0.5);
        let i = int(&mut graph, 3);
        let node = graph.insert_node(NodeKind::aten("mul"), vec![f, i], vec![ValueType::None]);
        let mut cx = RuleContext::new(&mut graph, node);

        let v = cx.tensor(0, Some(ElementType::Float16)).unwrap();
        assert_eq!(cx.graph.value_type(v), &ValueType::tensor(ElementType::HalfOrFloat, &[]));
        let v = cx.tensor(1, Some(ElementType::Int64)).unwrap();
        assert_eq!(cx.graph.value_type(v), &ValueType::tensor(ElementType::Int64, &[]));
        let v = cx.tensor(1, None).unwrap();
        assert_eq!(cx.graph.value_type(v), &ValueType::tensor(ElementType::Int32, &[]));
        let v = cx.tensor(0, Some(ElementType::Int32)).unwrap();
        assert_eq!(cx.graph.value_type(v), &ValueType::tensor(ElementType::Float32, &[]));
    }

    #[test]
    fn operand_accessors() {
        let mut graph = Graph::new();
        let x = graph.add_input(ValueType::tensor(ElementType::Float32, &[2, 3]), "x");
        let dims = ints(&mut graph, &[3, 2]);
        let n = none(&mut graph);
        let s = constant(&mut graph, Attribute::Str("mean".into()), ValueType::Scalar(ElementType::Int64));
        let node = graph.insert_node(
            NodeKind::aten("reshape"),
            vec![x, dims, n, s],
            vec![ValueType::List(ListElem::Int)],
        );
        let cx = RuleContext::new(&mut graph, node);
        assert_eq!(cx.dims(0).unwrap(), vec![2, 3]);
        assert_eq!(cx.const_ints(1).unwrap(), vec![3, 2]);
        assert_eq!(cx.opt_int(2).unwrap(), None);
        assert_eq!(cx.opt_int(7).unwrap(), None);
        assert!(cx.const_int(0).is_err());
        assert!(matches!(cx.constant(3), Some(ConstValue::Str(ref s)) if s == "mean"));
        assert!(matches!(cx.error("bad"), CanonError::Rule { ref kind, .. } if kind == "aten::reshape"));
    }

    #[test]
    fn torch_scalar_type_codes() {
        assert_eq!(scalar_type_from_code(5), Some(ElementType::Float16));
        assert_eq!(scalar_type_from_code(6), Some(ElementType::Float32));
        assert_eq!(scalar_type_from_code(4), Some(ElementType::Int64));
        assert_eq!(scalar_type_from_code(42), None);
    }
}
