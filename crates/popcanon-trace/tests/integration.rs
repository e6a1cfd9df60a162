//! Integration tests for the trace loader and writer.

use popcanon_ir::{Attribute, ElementType, NodeKind, TensorMeta, ValueType, dump_graph};
use popcanon_trace::{TraceError, parse, to_json};

#[test]
fn parse_linear_loss() {
    let source = include_str!("../../../demos/linear_loss.json");
    let trace = parse(source).expect("linear_loss.json should parse");
    let graph = &trace.graph;

    assert_eq!(graph.inputs().len(), 2);
    assert_eq!(graph.parameters().len(), 2);
    assert_eq!(graph.node_count(), 8);
    assert_eq!(graph.outputs().len(), 2);
    graph.verify().unwrap();

    let (_, matmul) = graph.nodes().next().unwrap();
    assert_eq!(matmul.kind, NodeKind::aten("matmul"));
    assert_eq!(matmul.provenance.as_deref(), Some("model.py:8"));
    assert_eq!(matmul.inputs(), &[graph.inputs()[0], graph.parameters()[0]]);

    let loss = graph.outputs()[1];
    assert_eq!(graph.value(loss).name.as_deref(), Some("loss"));
    assert_eq!(graph.value_type(loss), &ValueType::tensor(ElementType::Float32, &[]));
    let loss_node = graph.node(graph.producer_node(loss).unwrap());
    assert_eq!(loss_node.s("reduction"), Some("mean"));

    assert_eq!(
        trace.parameter_tensors,
        vec![
            TensorMeta::new(ElementType::Float32, &[10, 10]),
            TensorMeta::new(ElementType::Float32, &[10]),
        ]
    );

    let dump = dump_graph(graph);
    assert!(dump.contains("aten::matmul(%x, %weight)"), "{dump}");
    assert!(dump.contains("# model.py:11"), "{dump}");
}

#[test]
fn integer_and_float_attributes_keep_their_kind() {
    let trace = parse(include_str!("../../../demos/linear_loss.json")).unwrap();
    let values: Vec<&Attribute> = trace
        .graph
        .nodes()
        .filter(|(_, n)| n.kind == NodeKind::prim("Constant"))
        .filter_map(|(_, n)| n.attr("value"))
        .collect();
    assert_eq!(values, vec![&Attribute::Int(1), &Attribute::Float(5.0)]);
}

#[test]
fn written_trace_reads_back_identically() {
    let trace = parse(include_str!("../../../demos/linear_loss.json")).unwrap();
    let json = to_json(&trace).unwrap();
    let again = parse(&json).unwrap();
    assert_eq!(again.graph, trace.graph);
    assert_eq!(again.input_tensors, trace.input_tensors);
    assert_eq!(again.parameter_tensors, trace.parameter_tensors);
}

#[test]
fn tensor_attribute() {
    let source = r#"{
        "nodes": [{
            "kind": "prim::Constant",
            "outputs": [{ "name": "c", "type": "Long(3)" }],
            "attrs": { "value": { "dtype": "Long", "shape": [3], "values": [1, 2, 3] } }
        }],
        "outputs": ["c"]
    }"#;
    let trace = parse(source).unwrap();
    let (_, node) = trace.graph.nodes().next().unwrap();
    let t = node.t("value").unwrap();
    assert_eq!(t.elem(), ElementType::Int64);
    assert_eq!(t.shape(), &[3]);
    assert_eq!(t.data().to_i64_vec(), Some(vec![1, 2, 3]));
}

#[test]
fn forward_reference_is_rejected() {
    let source = r#"{
        "inputs": [{ "name": "x", "type": "Float(2)" }],
        "nodes": [
            { "kind": "aten::relu", "inputs": ["y"], "outputs": [{ "name": "z", "type": "Float(2)" }] },
            { "kind": "aten::relu", "inputs": ["x"], "outputs": [{ "name": "y", "type": "Float(2)" }] }
        ],
        "outputs": ["z"]
    }"#;
    assert!(matches!(parse(source), Err(TraceError::UnknownValue(name)) if name == "y"));
}

#[test]
fn duplicate_names_are_rejected() {
    let source = r#"{
        "inputs": [{ "name": "x", "type": "Float(2)" }],
        "nodes": [
            { "kind": "aten::relu", "inputs": ["x"], "outputs": [{ "name": "x", "type": "Float(2)" }] }
        ]
    }"#;
    assert!(matches!(parse(source), Err(TraceError::DuplicateValue(name)) if name == "x"));
}

#[test]
fn malformed_documents() {
    assert!(matches!(parse("{"), Err(TraceError::Json(_))));
    assert!(matches!(parse(r#"{"nodez": []}"#), Err(TraceError::Json(_))));
    assert!(matches!(
        parse(r#"{"nodes": [{"kind": "relu"}]}"#),
        Err(TraceError::Ir(_))
    ));
    assert!(matches!(
        parse(r#"{"input_tensors": [{"dtype": "Quad", "shape": []}]}"#),
        Err(TraceError::UnknownDtype(_))
    ));
    assert!(matches!(
        parse(r#"{"inputs": [{"name": "x", "type": "Float[2]"}]}"#),
        Err(TraceError::InvalidType(_))
    ));
}
