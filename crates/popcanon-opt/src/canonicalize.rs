//! Early canonicalization: fold or rewrite every source node once.

use popcanon_ir::{Graph, Handle, Node, Shape, Value, ValueType};
use popcanon_ops::OpRegistry;

use crate::fold::{fold_node, materialize};
use crate::late::check_arity;
use crate::rules::{RuleContext, rule_for};
use crate::{CanonError, Pass, PassContext, prune_dead_nodes};

/// Lowers `aten::`/`prim::` nodes into the target dialect.
#[derive(Debug)]
pub struct EarlyCanonicalization;

impl Pass for EarlyCanonicalization {
    fn name(&self) -> &str {
        "canonicalize"
    }

    fn run(&self, graph: &mut Graph, cx: &mut PassContext<'_>) -> Result<bool, CanonError> {
        canonicalize(graph, cx.options.prune_dead_nodes)
    }
}

/// Visits every node once in topological order. Foldable source nodes are
/// replaced by constants; nodes with a rule are rewritten; everything else
/// is left for the diagnostics pass. Returns `true` if anything changed.
///
/// Target nodes already present in the input must match their schema's
/// arity; later passes rely on it.
pub fn canonicalize(graph: &mut Graph, prune: bool) -> Result<bool, CanonError> {
    let registry = OpRegistry::global();
    for node in graph.node_order() {
        if let Some(schema) = registry.get(&graph.node(node).kind) {
            check_arity(graph, node, schema)?;
        }
    }

    let mut changed = false;
    for node in graph.topological_order()? {
        if !graph.node(node).is_alive() {
            continue;
        }
        changed |= lower_node(graph, node)?;
    }
    if prune {
        let removed = prune_dead_nodes(graph)?;
        log::debug!("pruned {removed} dead node(s)");
        changed |= removed > 0;
    }
    Ok(changed)
}

fn lower_node(graph: &mut Graph, node: Handle<Node>) -> Result<bool, CanonError> {
    let n = graph.node(node);
    let kind = n.kind.clone();
    let provenance = n.provenance.clone();
    let old_outputs = n.outputs().to_vec();
    let folded = if kind.is_source() && kind != popcanon_ops::kinds::source::CONSTANT {
        fold_node(graph, node)
    } else {
        None
    };
    let rule = rule_for(&kind);
    if folded.is_none() && rule.is_none() {
        return Ok(false);
    }

    let mark = graph.node_mark();
    let previous = graph.set_insertion_point(Some(node));
    let result = match (folded, rule) {
        (Some(value), _) => {
            let ty = graph.value_type(old_outputs[0]).clone();
            log::debug!("folding {kind}");
            materialize(graph, value, &ty).map(|v| Some(vec![v]))
        }
        (None, Some(rule)) => rule(&mut RuleContext::new(graph, node)),
        (None, None) => Ok(None),
    };
    graph.set_insertion_point(previous);

    let created = graph.nodes_since(mark);
    for &h in &created {
        let n = graph.node_mut(h);
        if n.provenance.is_none() {
            n.provenance.clone_from(&provenance);
        }
    }

    let Some(replacements) = result? else {
        log::trace!("{kind} declined");
        return Ok(!created.is_empty());
    };
    if replacements.len() != old_outputs.len() {
        return Err(CanonError::Rule {
            kind: kind.to_string(),
            message: format!(
                "rule produced {} value(s) for {} output(s)",
                replacements.len(),
                old_outputs.len()
            ),
        });
    }

    for (&old, &new) in old_outputs.iter().zip(&replacements) {
        let is_new = graph.producer_node(new).is_some_and(|p| created.contains(&p));
        if is_new {
            adopt_traced_type(graph, old, new);
        }
        graph.replace_all_uses_with(old, new);
    }
    graph.destroy_node(node)?;
    log::debug!("lowered {kind} into {} node(s)", created.len());
    Ok(true)
}

/// Carries the trace's knowledge over to a fresh replacement value: a known
/// shape where the builder could not derive one, and the debug name.
fn adopt_traced_type(graph: &mut Graph, old: Handle<Value>, new: Handle<Value>) {
    if let (ValueType::Tensor { shape: Shape::Unknown, elem }, Some(dims)) =
        (graph.value_type(new), graph.value_type(old).dims())
    {
        let ty = ValueType::tensor(*elem, dims);
        graph.set_value_type(new, ty);
    }
    if graph.value(new).name.is_none()
        && let Some(name) = graph.value(old).name.clone()
    {
        graph.set_value_name(new, name);
    }
}
