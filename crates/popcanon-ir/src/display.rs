//! Display implementations and text dump for debugging.

use std::fmt::{self, Write as _};

use crate::arena::Handle;
use crate::graph::{Attribute, Graph, Value};
use crate::tensor::{TensorConstant, TensorData};
use crate::types::{ElementType, ListElem, Shape, ValueType};

/// Tensor payloads longer than this are elided in dumps.
const MAX_PRINTED_ELEMENTS: usize = 8;

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.trace_name())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(dims) => {
                let dims: Vec<String> = dims.iter().map(ToString::to_string).collect();
                write!(f, "({})", dims.join(", "))
            }
            Self::Unknown => write!(f, "(*)"),
        }
    }
}

impl fmt::Display for ListElem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::Bool => write!(f, "bool"),
            Self::Tensor => write!(f, "Tensor"),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tensor { elem, shape } => write!(f, "{elem}{shape}"),
            Self::Scalar(ElementType::Int64) => write!(f, "int"),
            Self::Scalar(ElementType::Float32) => write!(f, "float"),
            Self::Scalar(ElementType::Bool) => write!(f, "bool"),
            Self::Scalar(elem) => write!(f, "scalar<{elem}>"),
            Self::List(elem) => write!(f, "{elem}[]"),
            Self::None => write!(f, "None"),
        }
    }
}

impl fmt::Display for TensorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = self.to_f64_vec();
        let shown: Vec<String> = values
            .iter()
            .take(MAX_PRINTED_ELEMENTS)
            .map(|v| format!("{v}"))
            .collect();
        write!(f, "{{{}", shown.join(", "))?;
        if values.len() > MAX_PRINTED_ELEMENTS {
            write!(f, ", ...")?;
        }
        write!(f, "}}")
    }
}

impl fmt::Display for TensorConstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.elem(),
            Shape::Known(self.shape().to_vec()),
            self.data()
        )
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:?}"),
            Self::Ints(v) => write!(f, "{v:?}"),
            Self::Floats(v) => write!(f, "{v:?}"),
            Self::Str(v) => write!(f, "{v:?}"),
            Self::Tensor(t) => write!(f, "{t}"),
            Self::Graph(g) => write!(f, "<graph: {} node(s)>", g.node_count()),
        }
    }
}

/// Name used for a value in dumps: its debug name, or its arena index.
pub fn value_label(graph: &Graph, value: Handle<Value>) -> String {
    match &graph.value(value).name {
        Some(name) => format!("%{name}"),
        None => format!("%{}", value.index()),
    }
}

/// Dump a graph as human-readable text.
///
/// ```text
/// graph(%x : Float(2, 3), param %w : Float(3)):
///   %4 : Float(2, 3) = popart::add(%x, %w)  # model.py:12
///   return (%4)
/// ```
pub fn dump_graph(graph: &Graph) -> String {
    let mut out = String::new();

    let mut params: Vec<String> = graph
        .inputs()
        .iter()
        .map(|&v| format!("{} : {}", value_label(graph, v), graph.value_type(v)))
        .collect();
    params.extend(
        graph
            .parameters()
            .iter()
            .map(|&v| format!("param {} : {}", value_label(graph, v), graph.value_type(v))),
    );
    let _ = writeln!(out, "graph({}):", params.join(", "));

    for (_, node) in graph.nodes() {
        let outputs: Vec<String> = node
            .outputs()
            .iter()
            .map(|&v| format!("{} : {}", value_label(graph, v), graph.value_type(v)))
            .collect();
        let inputs: Vec<String> = node
            .inputs()
            .iter()
            .map(|&v| value_label(graph, v))
            .collect();

        out.push_str("  ");
        if !outputs.is_empty() {
            let _ = write!(out, "{} = ", outputs.join(", "));
        }
        let _ = write!(out, "{}", node.kind);
        if !node.attrs.is_empty() {
            let attrs: Vec<String> = node
                .attrs
                .iter()
                .map(|(name, attr)| format!("{name}={attr}"))
                .collect();
            let _ = write!(out, "[{}]", attrs.join(", "));
        }
        let _ = write!(out, "({})", inputs.join(", "));
        if let Some(provenance) = &node.provenance {
            let _ = write!(out, "  # {provenance}");
        }
        out.push('\n');
    }

    let outputs: Vec<String> = graph
        .outputs()
        .iter()
        .map(|&v| value_label(graph, v))
        .collect();
    let _ = writeln!(out, "  return ({})", outputs.join(", "));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeKind;

    #[test]
    fn value_type_display() {
        assert_eq!(ValueType::tensor(ElementType::Float32, &[2, 3]).to_string(), "Float(2, 3)");
        assert_eq!(ValueType::tensor_unranked(ElementType::Float16).to_string(), "Half(*)");
        assert_eq!(ValueType::tensor(ElementType::Int64, &[]).to_string(), "Long()");
        assert_eq!(ValueType::Scalar(ElementType::Int64).to_string(), "int");
        assert_eq!(ValueType::List(ListElem::Tensor).to_string(), "Tensor[]");
        assert_eq!(ValueType::None.to_string(), "None");
    }

    #[test]
    fn attribute_display() {
        assert_eq!(Attribute::Float(1.0).to_string(), "1.0");
        assert_eq!(Attribute::Ints(vec![1, -1]).to_string(), "[1, -1]");
        assert_eq!(Attribute::Str("FLOAT".into()).to_string(), "\"FLOAT\"");
        let t = TensorConstant::from_i64(ElementType::Int32, vec![3], &[1, 2, 3]).unwrap();
        assert_eq!(Attribute::Tensor(t).to_string(), "Int(3){1, 2, 3}");
    }

    #[test]
    fn long_payloads_are_elided() {
        let t = TensorConstant::filled(ElementType::Float32, vec![10], 0.5);
        assert!(t.to_string().ends_with(", ...}"));
    }

    #[test]
    fn dump_simple_graph() {
        let mut graph = Graph::new();
        let x = graph.add_input(ValueType::tensor(ElementType::Float32, &[2]), "x");
        let w = graph.add_parameter(ValueType::tensor(ElementType::Float32, &[2]), "w");
        let add = graph.insert_node(
            NodeKind::popart("add"),
            vec![x, w],
            vec![ValueType::tensor(ElementType::Float32, &[2])],
        );
        graph.node_mut(add).provenance = Some("model.py:3".into());
        let out = graph.node(add).output();
        graph.set_value_name(out, "y");
        graph.register_output(out);

        let text = dump_graph(&graph);
        assert_eq!(
            text,
            "graph(%x : Float(2), param %w : Float(2)):\n  %y : Float(2) = popart::add(%x, %w)  # model.py:3\n  return (%y)\n"
        );
    }
}
