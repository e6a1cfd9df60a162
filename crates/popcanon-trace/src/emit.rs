//! Serialization of a [`Graph`] back into the trace format.

use std::collections::{HashMap, HashSet};

use popcanon_ir::{Attribute, Graph, Handle, TensorMeta, Value};

use crate::{AttrDecl, NodeDecl, TensorDecl, TensorLiteral, Trace, TraceError, TraceFile, ValueDecl};

/// Pretty-printed JSON for a trace.
pub fn to_json(trace: &Trace) -> Result<String, TraceError> {
    let file = to_trace_file(&trace.graph, &trace.input_tensors, &trace.parameter_tensors)?;
    Ok(serde_json::to_string_pretty(&file)?)
}

/// Builds the on-disk form of `graph`. Unnamed values are written as
/// `%<index>`; clashing names get the index appended.
pub fn to_trace_file(
    graph: &Graph,
    input_tensors: &[TensorMeta],
    parameter_tensors: &[TensorMeta],
) -> Result<TraceFile, TraceError> {
    let mut names = Names::default();
    let mut file = TraceFile {
        input_tensors: input_tensors.iter().map(tensor_decl).collect(),
        parameter_tensors: parameter_tensors.iter().map(tensor_decl).collect(),
        ..TraceFile::default()
    };

    for &v in graph.inputs() {
        file.inputs.push(names.declare(graph, v));
    }
    for &v in graph.parameters() {
        file.parameters.push(names.declare(graph, v));
    }
    for (_, node) in graph.nodes() {
        let attrs = node
            .attrs
            .iter()
            .map(|(name, attr)| Ok((name.clone(), attr_decl(name, attr)?)))
            .collect::<Result<_, TraceError>>()?;
        file.nodes.push(NodeDecl {
            kind: node.kind.to_string(),
            inputs: node.inputs().iter().map(|&v| names.get(graph, v)).collect(),
            outputs: node
                .outputs()
                .iter()
                .map(|&v| names.declare(graph, v))
                .collect(),
            attrs,
            provenance: node.provenance.clone(),
        });
    }
    file.outputs = graph.outputs().iter().map(|&v| names.get(graph, v)).collect();
    Ok(file)
}

#[derive(Default)]
struct Names {
    assigned: HashMap<Handle<Value>, String>,
    taken: HashSet<String>,
}

impl Names {
    fn declare(&mut self, graph: &Graph, v: Handle<Value>) -> ValueDecl {
        let mut name = match &graph.value(v).name {
            Some(name) => name.clone(),
            None => format!("%{}", v.index()),
        };
        if self.taken.contains(&name) {
            name = format!("{name}.{}", v.index());
        }
        self.taken.insert(name.clone());
        self.assigned.insert(v, name.clone());
        ValueDecl {
            name,
            ty: graph.value_type(v).to_string(),
        }
    }

    fn get(&mut self, graph: &Graph, v: Handle<Value>) -> String {
        match self.assigned.get(&v) {
            Some(name) => name.clone(),
            None => self.declare(graph, v).name,
        }
    }
}

fn tensor_decl(meta: &TensorMeta) -> TensorDecl {
    TensorDecl {
        dtype: meta.elem.trace_name().into(),
        shape: meta.shape.clone(),
    }
}

fn attr_decl(name: &str, attr: &Attribute) -> Result<AttrDecl, TraceError> {
    Ok(match attr {
        Attribute::Int(v) => AttrDecl::Int(*v),
        Attribute::Float(v) => AttrDecl::Float(*v),
        Attribute::Ints(v) => AttrDecl::Ints(v.clone()),
        Attribute::Floats(v) => AttrDecl::Floats(v.clone()),
        Attribute::Str(v) => AttrDecl::Str(v.clone()),
        Attribute::Tensor(t) => AttrDecl::Tensor(TensorLiteral {
            dtype: t.elem().trace_name().into(),
            shape: t.shape().to_vec(),
            values: t.data().to_f64_vec(),
        }),
        Attribute::Graph(_) => {
            return Err(TraceError::Unsupported(format!(
                "subgraph attribute '{name}'"
            )));
        }
    })
}
