//! The canonical walkthroughs: one small traced program each, run through
//! the whole pipeline.

mod common;

use common::*;
use popcanon_ir::{Attribute, ElementType, Graph, ListElem, NodeKind, TensorConstant, ValueType};
use popcanon_ops::kinds;

fn f32(dims: &[usize]) -> ValueType {
    ValueType::tensor(ElementType::Float32, dims)
}

#[test]
fn mixed_precision_add_casts_the_half_operand() {
    let mut graph = Graph::new();
    let a = graph.add_input(f32(&[2]), "a");
    let b = graph.add_input(ValueType::tensor(ElementType::Float16, &[2]), "b");
    let one = int(&mut graph, 1);
    let sum = traced(&mut graph, NodeKind::aten("add"), vec![a, b, one], f32(&[2]));
    graph.register_output(sum);

    let diagnostics = canonicalize_declared(&mut graph);
    assert!(diagnostics.is_empty());

    assert_eq!(count_kind(&graph, &kinds::CAST), 1);
    let adds = graph.nodes_of_kind(&kinds::ADD);
    assert_eq!(adds.len(), 1);
    let add = graph.node(adds[0]);
    for &input in add.inputs() {
        assert_eq!(graph.value_type(input).elem(), Some(ElementType::Float32));
    }
    assert_eq!(add.inputs()[0], a);
    let cast = graph.node(graph.producer_node(add.inputs()[1]).unwrap());
    assert_eq!(cast.inputs(), &[b]);
    assert_eq!(cast.s("to"), Some("FLOAT"));
    assert_eq!(graph.value_type(graph.outputs()[0]), &f32(&[2]));
}

#[test]
fn constant_tensor_becomes_a_single_source_node() {
    let mut graph = Graph::new();
    let tensor = TensorConstant::from_i64(ElementType::Int64, vec![3], &[1, 2, 3]).unwrap();
    let c = constant(
        &mut graph,
        Attribute::Tensor(tensor),
        ValueType::tensor(ElementType::Int64, &[3]),
    );
    graph.register_output(c);

    let diagnostics = canonicalize_declared(&mut graph);
    assert!(diagnostics.is_empty());

    assert_eq!(graph.node_count(), 1);
    let (_, node) = graph.nodes().next().unwrap();
    assert_eq!(node.kind, kinds::TENSOR_CONSTANT);
    assert!(node.inputs().is_empty());
    assert_eq!(node.outputs().len(), 1);
    let ty = graph.value_type(node.output());
    assert!(ty.elem().unwrap().is_integral());
    assert_eq!(ty.dims(), Some(&[3][..]));
    assert_eq!(node.t("value").unwrap().data().to_i64_vec(), Some(vec![1, 2, 3]));
}

#[test]
fn reshape_keeps_element_type() {
    let mut graph = Graph::new();
    let x = graph.add_input(f32(&[2, 3]), "x");
    let three = int(&mut graph, 3);
    let two = int(&mut graph, 2);
    let shape = traced(
        &mut graph,
        NodeKind::prim("ListConstruct"),
        vec![three, two],
        ValueType::List(ListElem::Int),
    );
    let y = traced(&mut graph, NodeKind::aten("reshape"), vec![x, shape], f32(&[3, 2]));
    graph.register_output(y);

    let diagnostics = canonicalize_declared(&mut graph);
    assert!(diagnostics.is_empty());

    assert_eq!(graph.node_count(), 1);
    let (_, reshape) = graph.nodes().next().unwrap();
    assert_eq!(reshape.kind, kinds::RESHAPE);
    assert_eq!(reshape.inputs(), &[x]);
    assert_eq!(reshape.is("shape"), Some(&[3, 2][..]));
    assert_eq!(graph.value_type(graph.outputs()[0]), &f32(&[3, 2]));
}

#[test]
fn surplus_identity_loss_with_equal_types_disappears() {
    let mut graph = Graph::new();
    let x = graph.add_input(f32(&[4]), "x");
    let inner = graph.insert_node(kinds::IDENTITY_LOSS, vec![x], vec![f32(&[4])]);
    graph.node_mut(inner).set_attr("reduction", Attribute::Int(2));
    let inner_out = graph.node(inner).output();
    let outer = graph.insert_node(kinds::IDENTITY_LOSS, vec![inner_out], vec![f32(&[])]);
    graph.node_mut(outer).set_attr("reduction", Attribute::Int(1));
    graph.register_output(graph.node(outer).output());

    let diagnostics = canonicalize_declared(&mut graph);
    assert!(diagnostics.is_empty());

    assert_eq!(graph.node_order(), vec![outer]);
    assert_eq!(graph.node(outer).inputs(), &[x]);
    assert_eq!(count_kind(&graph, &kinds::CAST), 0);
}

#[test]
fn unsupported_operator_survives_with_one_diagnostic() {
    let mut trace = load_demo("unsupported");
    let diagnostics = canonicalize_trace(&mut trace);

    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].kind, "aten::frobnicate");
    assert_eq!(diagnostics[0].provenance.as_deref(), Some("model.py:3"));

    let graph = &trace.graph;
    assert_eq!(count_kind(graph, &NodeKind::aten("frobnicate")), 1);
    assert_eq!(count_kind(graph, &kinds::RELU), 1);
    assert_eq!(graph.node_count(), 2);
}
