use popcanon_ir::Graph;

use crate::{CanonError, Diagnostic, DiagnosticLevel, Pass, PassContext};

/// Reports every source-dialect node left in the graph.
#[derive(Debug)]
pub struct WarnOnUnsupportedAten;

impl Pass for WarnOnUnsupportedAten {
    fn name(&self) -> &str {
        "warn-on-unsupported-aten"
    }

    fn run(&self, graph: &mut Graph, cx: &mut PassContext<'_>) -> Result<bool, CanonError> {
        cx.diagnostics.extend(warn_on_unsupported_aten(graph));
        Ok(false)
    }
}

/// One warning per remaining `aten::`/`prim::` node, in program order.
pub fn warn_on_unsupported_aten(graph: &Graph) -> Vec<Diagnostic> {
    graph
        .nodes()
        .filter(|(_, n)| n.kind.is_source())
        .map(|(_, n)| {
            let diagnostic = Diagnostic {
                level: DiagnosticLevel::Warning,
                kind: n.kind.to_string(),
                provenance: n.provenance.clone(),
                message: format!("unsupported operator {}", n.kind),
            };
            log::warn!("{diagnostic}");
            diagnostic
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use popcanon_ir::{ElementType, NodeKind, ValueType};

    use super::*;

    #[test]
    fn one_diagnostic_per_source_node() {
        let mut graph = Graph::new();
        let ty = ValueType::tensor(ElementType::Float32, &[2]);
        let x = graph.add_input(ty.clone(), "x");
        let odd = graph.insert_node(NodeKind::aten("frobnicate"), vec![x], vec![ty.clone()]);
        graph.node_mut(odd).provenance = Some("model.py:12".into());
        let odd_out = graph.node(odd).output();
        let relu = graph.insert_node(NodeKind::popart("relu"), vec![odd_out], vec![ty]);
        graph.register_output(graph.node(relu).output());

        let before = graph.clone();
        let diagnostics = warn_on_unsupported_aten(&graph);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, "aten::frobnicate");
        assert_eq!(diagnostics[0].provenance.as_deref(), Some("model.py:12"));
        assert_eq!(diagnostics[0].message, "unsupported operator aten::frobnicate");
        assert_eq!(graph, before);
    }

    #[test]
    fn clean_graph_is_silent() {
        let mut graph = Graph::new();
        let x = graph.add_input(ValueType::tensor(ElementType::Float32, &[2]), "x");
        graph.register_output(x);
        assert!(warn_on_unsupported_aten(&graph).is_empty());
    }
}
