use popcanon_ir::{Attribute, ElementType, Graph, Handle, NodeKind, TensorMeta, Value, ValueType};
use popcanon_opt::{Diagnostic, PipelineOptions, canonicalize_graph};
use popcanon_trace::Trace;

/// Load a trace from the `demos/` directory by name (without extension).
#[allow(dead_code)]
pub fn load_demo(name: &str) -> Trace {
    let path = format!("{}/../../demos/{name}.json", env!("CARGO_MANIFEST_DIR"));
    let source =
        std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("failed to load {path}: {e}"));
    popcanon_trace::parse(&source).unwrap_or_else(|e| panic!("failed to parse {path}: {e}"))
}

/// Run the default pipeline on a loaded trace.
#[allow(dead_code)]
pub fn canonicalize_trace(trace: &mut Trace) -> Vec<Diagnostic> {
    canonicalize_graph(
        &mut trace.graph,
        &trace.input_tensors,
        &trace.parameter_tensors,
        &PipelineOptions::default(),
    )
    .expect("canonicalization failed")
}

/// Metadata matching the declared types of the graph inputs and
/// parameters, for graphs built in code.
#[allow(dead_code)]
pub fn declared_metas(graph: &Graph) -> (Vec<TensorMeta>, Vec<TensorMeta>) {
    let meta = |&v: &Handle<Value>| {
        let ty = graph.value_type(v);
        TensorMeta::new(
            ty.elem().expect("input has an element type"),
            ty.dims().unwrap_or(&[]),
        )
    };
    (
        graph.inputs().iter().map(meta).collect(),
        graph.parameters().iter().map(meta).collect(),
    )
}

/// Run the default pipeline with metadata taken from the declared types.
#[allow(dead_code)]
pub fn canonicalize_declared(graph: &mut Graph) -> Vec<Diagnostic> {
    let (inputs, parameters) = declared_metas(graph);
    canonicalize_graph(graph, &inputs, &parameters, &PipelineOptions::default())
        .expect("canonicalization failed")
}

/// Append a traced node with one output and return that output.
#[allow(dead_code)]
pub fn traced(
    graph: &mut Graph,
    kind: NodeKind,
    inputs: Vec<Handle<Value>>,
    ty: ValueType,
) -> Handle<Value> {
    let node = graph.insert_node(kind, inputs, vec![ty]);
    graph.node(node).output()
}

/// A traced `prim::Constant` holding `value`.
#[allow(dead_code)]
pub fn constant(graph: &mut Graph, value: Attribute, ty: ValueType) -> Handle<Value> {
    let node = graph.insert_node(NodeKind::prim("Constant"), vec![], vec![ty]);
    graph.node_mut(node).set_attr("value", value);
    graph.node(node).output()
}

#[allow(dead_code)]
pub fn int(graph: &mut Graph, v: i64) -> Handle<Value> {
    constant(graph, Attribute::Int(v), ValueType::Scalar(ElementType::Int64))
}

#[allow(dead_code)]
pub fn count_kind(graph: &Graph, kind: &NodeKind) -> usize {
    graph.nodes_of_kind(kind).len()
}

/// Every value reachable in the graph has a resolved element type.
#[allow(dead_code)]
pub fn assert_all_concrete(graph: &Graph) {
    for &v in graph.inputs().iter().chain(graph.parameters()) {
        assert!(graph.value_type(v).is_concrete(), "input {v:?} is ambiguous");
    }
    for (_, node) in graph.nodes() {
        for &v in node.outputs() {
            assert!(
                graph.value_type(v).is_concrete(),
                "{} produces an ambiguous value",
                node.kind
            );
        }
    }
}
