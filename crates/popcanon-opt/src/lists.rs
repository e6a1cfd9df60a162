//! List operand normalization.
//!
//! The trace passes shapes, axes and tensor sequences as list values. The
//! target wants constant lists as attributes and tensor sequences as
//! individual inputs; the schema's list operand says which applies.

use std::collections::HashSet;

use popcanon_ir::{Attribute, Graph, Handle, Node, Shape, Value, ValueType};
use popcanon_ops::kinds::source::{LIST_CONSTRUCT, LIST_UNPACK};
use popcanon_ops::{ListOperand, OpRegistry, builder};

use crate::fold::{ConstValue, constant_value};
use crate::{CanonError, Pass, PassContext, prune_dead_nodes};

#[derive(Debug)]
pub struct CanonicalizeLists;

impl Pass for CanonicalizeLists {
    fn name(&self) -> &str {
        "canonicalize-lists"
    }

    fn run(&self, graph: &mut Graph, cx: &mut PassContext<'_>) -> Result<bool, CanonError> {
        canonicalize_lists(graph, cx.options.prune_dead_nodes)
    }
}

/// Resolves every pending list operand, forwards `ListUnpack` of
/// `ListConstruct` and flattens list-valued graph outputs.
pub fn canonicalize_lists(graph: &mut Graph, prune: bool) -> Result<bool, CanonError> {
    let mut changed = forward_unpacks(graph)?;
    let mut dirty = HashSet::new();

    for node in graph.node_order() {
        let Some(operand) = pending_operand(graph, node) else {
            continue;
        };
        normalize_operand(graph, node, operand)?;
        builder::insert_implicit_casts(graph, node)?;
        retype(graph, node, &mut dirty)?;
        changed = true;
    }
    if !dirty.is_empty() {
        retype_dependents(graph, dirty)?;
    }

    changed |= flatten_list_outputs(graph);
    if prune {
        changed |= prune_dead_nodes(graph)? > 0;
    }
    Ok(changed)
}

/// The schema's list operand of `node`, if that input still carries a list.
fn pending_operand(graph: &Graph, node: Handle<Node>) -> Option<ListOperand> {
    let n = graph.node(node);
    let operand = OpRegistry::global().get(&n.kind)?.list_operand?;
    let &value = n.inputs().get(operand.input)?;
    graph.value_type(value).is_list().then_some(operand)
}

fn normalize_operand(
    graph: &mut Graph,
    node: Handle<Node>,
    operand: ListOperand,
) -> Result<(), CanonError> {
    let mut inputs = graph.node(node).inputs().to_vec();
    let list = inputs[operand.input];
    match operand.attr {
        Some(name) => {
            let attr = constant_list(graph, list).ok_or_else(|| {
                CanonError::structural(graph, node, format!("list operand '{name}' must be constant"))
            })?;
            log::debug!("{}: list operand becomes attribute '{name}'", graph.node(node).kind);
            graph.node_mut(node).set_attr(name, attr);
            inputs.remove(operand.input);
        }
        None => {
            let elements = graph
                .producer_node(list)
                .map(|p| graph.node(p))
                .filter(|p| operand.runtime && p.kind == LIST_CONSTRUCT)
                .map(|p| p.inputs().to_vec())
                .ok_or_else(|| {
                    CanonError::structural(graph, node, "tensor list operand must be built by prim::ListConstruct")
                })?;
            log::debug!(
                "{}: splicing {} list element(s)",
                graph.node(node).kind,
                elements.len()
            );
            inputs.splice(operand.input..=operand.input, elements);
        }
    }
    graph.set_inputs(node, inputs);
    Ok(())
}

/// A list known at compile time, as an `Ints` or `Floats` attribute.
fn constant_list(graph: &Graph, list: Handle<Value>) -> Option<Attribute> {
    if let Some(value) = constant_value(graph, list) {
        return match value {
            ConstValue::Ints(v) => Some(Attribute::Ints(v)),
            ConstValue::Floats(v) => Some(Attribute::Floats(v)),
            _ => None,
        };
    }

    let producer = graph.node(graph.producer_node(list)?);
    if producer.kind != LIST_CONSTRUCT {
        return None;
    }
    let items = producer
        .inputs()
        .iter()
        .map(|&v| constant_value(graph, v))
        .collect::<Option<Vec<_>>>()?;
    if let Some(ints) = items.iter().map(ConstValue::as_int).collect::<Option<Vec<_>>>() {
        return Some(Attribute::Ints(ints));
    }
    items
        .iter()
        .map(ConstValue::as_f64)
        .collect::<Option<Vec<_>>>()
        .map(Attribute::Floats)
}

/// Re-derives the output types of `node`. A dimension list the trace
/// already knew survives when inference cannot tell more; outputs whose
/// type changed are added to `dirty`.
fn retype(
    graph: &mut Graph,
    node: Handle<Node>,
    dirty: &mut HashSet<Handle<Value>>,
) -> Result<(), CanonError> {
    let outputs = graph.node(node).outputs().to_vec();
    let before: Vec<ValueType> = outputs.iter().map(|&v| graph.value_type(v).clone()).collect();
    builder::retype_node(graph, node)?;

    for (value, old) in outputs.into_iter().zip(before) {
        if let (ValueType::Tensor { elem, shape: Shape::Unknown }, Some(dims)) =
            (graph.value_type(value), old.dims())
        {
            let ty = ValueType::tensor(*elem, dims);
            graph.set_value_type(value, ty);
        }
        if *graph.value_type(value) != old {
            dirty.insert(value);
        }
    }
    Ok(())
}

/// Propagates type changes to target consumers, in topological order.
fn retype_dependents(
    graph: &mut Graph,
    mut dirty: HashSet<Handle<Value>>,
) -> Result<(), CanonError> {
    for node in graph.topological_order()? {
        let n = graph.node(node);
        let affected = n.inputs().iter().any(|v| dirty.contains(v));
        if affected && OpRegistry::global().contains(&n.kind) {
            retype(graph, node, &mut dirty)?;
        }
    }
    Ok(())
}

fn forward_unpacks(graph: &mut Graph) -> Result<bool, CanonError> {
    let mut changed = false;
    for node in graph.nodes_of_kind(&LIST_UNPACK) {
        let n = graph.node(node);
        let Some(construct) = n.inputs().first().and_then(|&v| graph.producer_node(v)) else {
            continue;
        };
        if graph.node(construct).kind != LIST_CONSTRUCT {
            continue;
        }
        let elements = graph.node(construct).inputs().to_vec();
        let outputs = n.outputs().to_vec();
        if elements.len() != outputs.len() {
            return Err(CanonError::structural(
                graph,
                node,
                format!(
                    "unpacks {} value(s) from a list of {}",
                    outputs.len(),
                    elements.len()
                ),
            ));
        }
        for (old, new) in outputs.into_iter().zip(elements) {
            graph.replace_all_uses_with(old, new);
        }
        graph.destroy_node(node)?;
        changed = true;
    }
    Ok(changed)
}

fn flatten_list_outputs(graph: &mut Graph) -> bool {
    let mut flattened = false;
    let mut outputs = Vec::with_capacity(graph.outputs().len());
    for &value in graph.outputs() {
        match graph.producer_node(value).map(|p| graph.node(p)) {
            Some(p) if p.kind == LIST_CONSTRUCT => {
                outputs.extend_from_slice(p.inputs());
                flattened = true;
            }
            _ => outputs.push(value),
        }
    }
    if flattened {
        graph.set_outputs(outputs);
    }
    flattened
}

#[cfg(test)]
mod tests {
    use popcanon_ir::{ElementType, ListElem, NodeKind};
    use popcanon_ops::kinds;
    use popcanon_ops::kinds::source::CONSTANT;

    use super::*;

    fn f32(dims: &[usize]) -> ValueType {
        ValueType::tensor(ElementType::Float32, dims)
    }

    fn constant(graph: &mut Graph, attr: Attribute, ty: ValueType) -> Handle<Value> {
        let c = graph.insert_node(CONSTANT, vec![], vec![ty]);
        graph.node_mut(c).set_attr("value", attr);
        graph.node(c).output()
    }

    fn list(graph: &mut Graph, elems: Vec<Handle<Value>>, elem: ListElem) -> Handle<Value> {
        let n = graph.insert_node(LIST_CONSTRUCT, elems, vec![ValueType::List(elem)]);
        graph.node(n).output()
    }

    #[test]
    fn constant_shape_becomes_attribute() {
        let mut graph = Graph::new();
        let x = graph.add_input(f32(&[2, 3]), "x");
        let shape = constant(&mut graph, Attribute::Ints(vec![3, -1]), ValueType::List(ListElem::Int));
        let reshape = builder::create_op(&mut graph, kinds::RESHAPE, &[x, shape], Vec::new()).unwrap();
        let out = graph.node(reshape).output();
        assert_eq!(graph.value_type(out), &ValueType::tensor_unranked(ElementType::Float32));
        graph.register_output(out);

        assert!(canonicalize_lists(&mut graph, true).unwrap());
        let n = graph.node(reshape);
        assert_eq!(n.inputs(), &[x]);
        assert_eq!(n.is("shape"), Some(&[3, -1][..]));
        assert_eq!(graph.value_type(out), &f32(&[3, 2]));
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn constructed_scalar_list_becomes_attribute() {
        let mut graph = Graph::new();
        let x = graph.add_input(f32(&[2, 1, 3]), "x");
        let one = constant(&mut graph, Attribute::Int(1), ValueType::Scalar(ElementType::Int64));
        let axes = list(&mut graph, vec![one], ListElem::Int);
        let squeeze = builder::create_op(&mut graph, kinds::SQUEEZE, &[x, axes], Vec::new()).unwrap();
        graph.register_output(graph.node(squeeze).output());

        canonicalize_lists(&mut graph, true).unwrap();
        assert_eq!(graph.node(squeeze).is("axes"), Some(&[1][..]));
        assert_eq!(graph.value_type(graph.outputs()[0]), &f32(&[2, 3]));
    }

    #[test]
    fn tensor_list_is_spliced_and_promoted() {
        let mut graph = Graph::new();
        let a = graph.add_input(f32(&[2]), "a");
        let b = graph.add_input(ValueType::tensor(ElementType::Float16, &[3]), "b");
        let tensors = list(&mut graph, vec![a, b], ListElem::Tensor);
        let concat = builder::create_concat_typed_output(&mut graph, &[tensors], 0).unwrap();
        let joined = graph.node(concat).output();
        let relu = builder::create_op(&mut graph, kinds::RELU, &[joined], Vec::new()).unwrap();
        graph.register_output(graph.node(relu).output());

        canonicalize_lists(&mut graph, true).unwrap();
        let inputs = graph.node(concat).inputs().to_vec();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0], a);
        let cast = graph.node(graph.producer_node(inputs[1]).unwrap());
        assert_eq!(cast.kind, kinds::CAST);
        assert_eq!(cast.s("to"), Some("FLOAT"));
        assert_eq!(graph.value_type(graph.outputs()[0]), &f32(&[5]));
        assert!(graph.nodes_of_kind(&LIST_CONSTRUCT).is_empty());
        graph.verify().unwrap();
    }

    #[test]
    fn runtime_list_for_attribute_is_fatal() {
        let mut graph = Graph::new();
        let x = graph.add_input(f32(&[6]), "x");
        let shape = graph.add_input(ValueType::List(ListElem::Int), "shape");
        let reshape = builder::create_op(&mut graph, kinds::RESHAPE, &[x, shape], Vec::new()).unwrap();
        graph.register_output(graph.node(reshape).output());

        let err = canonicalize_lists(&mut graph, true).unwrap_err();
        assert!(matches!(
            err,
            CanonError::StructuralViolation { ref constraint, .. } if constraint.contains("'shape'")
        ));
    }

    #[test]
    fn unpack_is_forwarded_and_list_outputs_flattened() {
        let mut graph = Graph::new();
        let a = graph.add_input(f32(&[2]), "a");
        let b = graph.add_input(f32(&[2]), "b");
        let pair = list(&mut graph, vec![a, b], ListElem::Tensor);
        let unpack = graph.insert_node(LIST_UNPACK, vec![pair], vec![f32(&[2]), f32(&[2])]);
        let second = graph.node(unpack).outputs()[1];
        let relu = graph.insert_node(NodeKind::popart("relu"), vec![second], vec![f32(&[2])]);
        graph.register_output(graph.node(relu).output());
        graph.register_output(pair);

        assert!(canonicalize_lists(&mut graph, true).unwrap());
        assert_eq!(graph.node(relu).inputs(), &[b]);
        assert_eq!(graph.outputs(), &[graph.node(relu).output(), a, b]);
        assert_eq!(graph.node_order(), vec![relu]);
    }

    #[test]
    fn nothing_pending_is_a_noop() {
        let mut graph = Graph::new();
        let x = graph.add_input(f32(&[2]), "x");
        let relu = builder::create_op(&mut graph, kinds::RELU, &[x], Vec::new()).unwrap();
        graph.register_output(graph.node(relu).output());
        assert!(!canonicalize_lists(&mut graph, true).unwrap());
    }
}
