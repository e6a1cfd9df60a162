//! Late canonicalization: schema checks and structural tightening.
//!
//! Negative axes are rewritten to `axis + rank`. Everything else is only
//! checked, so a second run changes nothing.

use std::collections::HashSet;

use popcanon_ir::{Attribute, ElementType, Graph, Handle, Node};
use popcanon_ops::{OpRegistry, OpSchema, kinds};

use crate::{CanonError, Pass, PassContext};

#[derive(Debug)]
pub struct LateCanonicalization;

impl Pass for LateCanonicalization {
    fn name(&self) -> &str {
        "canonicalize-late"
    }

    fn run(&self, graph: &mut Graph, cx: &mut PassContext<'_>) -> Result<bool, CanonError> {
        canonicalize_late(graph, cx.options.max_rank)
    }
}

/// Verifies every target node against its schema and normalizes axis
/// attributes. `max_rank` bounds the rank of every tensor output.
pub fn canonicalize_late(graph: &mut Graph, max_rank: Option<usize>) -> Result<bool, CanonError> {
    let registry = OpRegistry::global();
    let mut changed = false;
    for node in graph.node_order() {
        let Some(schema) = registry.get(&graph.node(node).kind) else {
            continue;
        };
        check_signature(graph, node, schema)?;
        changed |= normalize_axes(graph, node)?;
        check_rank(graph, node, max_rank)?;
    }
    Ok(changed)
}

/// Input and output counts of `node` against its schema. A pending list
/// operand counts as one input.
pub(crate) fn check_arity(graph: &Graph, node: Handle<Node>, schema: &OpSchema) -> Result<(), CanonError> {
    let n = graph.node(node);
    let violation = |constraint: String| CanonError::structural(graph, node, constraint);

    if !schema.inputs.accepts(n.inputs().len()) {
        return Err(violation(format!(
            "expects {} input(s), got {}",
            schema.inputs,
            n.inputs().len()
        )));
    }
    if !schema.outputs.accepts(n.outputs().len()) {
        return Err(violation(format!(
            "expects {} output(s), got {}",
            schema.outputs,
            n.outputs().len()
        )));
    }
    Ok(())
}

fn check_signature(graph: &Graph, node: Handle<Node>, schema: &OpSchema) -> Result<(), CanonError> {
    check_arity(graph, node, schema)?;
    let n = graph.node(node);
    let violation = |constraint: String| CanonError::structural(graph, node, constraint);

    if n.inputs().iter().any(|&v| graph.value_type(v).is_list()) {
        return Err(violation("list operand was not resolved".into()));
    }

    for spec in schema.attrs {
        match n.attr(spec.name) {
            None if spec.required => {
                return Err(violation(format!("missing attribute '{}'", spec.name)));
            }
            Some(attr) if !spec.kind.accepts(attr) => {
                return Err(violation(format!(
                    "attribute '{}' has the wrong kind ({})",
                    spec.name,
                    attr.kind_name()
                )));
            }
            _ => {}
        }
    }
    if let Some(name) = n.attrs.keys().find(|name| schema.attr_spec(name).is_none()) {
        return Err(violation(format!("unexpected attribute '{name}'")));
    }

    for name in ["to", "dtype"] {
        if let Some(spelled) = n.s(name)
            && !ElementType::from_target_name(spelled).is_some_and(|e| !e.is_ambiguous())
        {
            return Err(violation(format!(
                "attribute '{name}' does not name a concrete element type: {spelled}"
            )));
        }
    }
    if n.kind == kinds::CUSTOM_OPERATION && n.i("num_outputs") != Some(n.outputs().len() as i64) {
        return Err(violation("num_outputs must match the output count".into()));
    }
    if let Some(reduction) = n.i("reduction")
        && !(0..=2).contains(&reduction)
    {
        return Err(violation(format!("unknown reduction {reduction}")));
    }
    Ok(())
}

/// `axis` as a non-negative index. `inclusive` also admits `rank` itself.
fn normalized(axis: i64, rank: usize, inclusive: bool) -> Option<i64> {
    let rank = rank as i64;
    let axis = if axis < 0 { axis + rank } else { axis };
    (axis >= 0 && (axis < rank || (inclusive && axis == rank))).then_some(axis)
}

fn normalize_axes(graph: &mut Graph, node: Handle<Node>) -> Result<bool, CanonError> {
    let n = graph.node(node);
    let Some(dims) = n.inputs().first().and_then(|&v| graph.value_type(v).dims()) else {
        return Ok(false);
    };
    let dims = dims.to_vec();
    let rank = dims.len();
    let violation = |constraint: String| CanonError::structural(graph, node, constraint);
    let mut updates: Vec<(&'static str, Attribute)> = Vec::new();

    if let Some(axis) = n.i("axis") {
        let fixed = normalized(axis, rank, n.kind == kinds::FLATTEN)
            .ok_or_else(|| violation(format!("axis {axis} out of range for rank {rank}")))?;
        if fixed != axis {
            updates.push(("axis", Attribute::Int(fixed)));
        }
        if let Some(split) = n.is("split") {
            let total: i64 = split.iter().sum();
            let length = dims[fixed as usize] as i64;
            if split.iter().any(|&s| s < 0) || total != length {
                return Err(violation(format!(
                    "split sizes {split:?} do not add up to dimension {fixed} of size {length}"
                )));
            }
        }
    }

    if let Some(axes) = n.is("axes") {
        let bound = if n.kind == kinds::UNSQUEEZE { rank + axes.len() } else { rank };
        let fixed = axes
            .iter()
            .map(|&a| normalized(a, bound, false))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| violation(format!("axes {axes:?} out of range for rank {bound}")))?;
        if fixed.iter().collect::<HashSet<_>>().len() != fixed.len() {
            return Err(violation(format!("axes {axes:?} repeat an axis")));
        }
        if fixed != axes {
            updates.push(("axes", Attribute::Ints(fixed)));
        }
    }

    if let Some(perm) = n.is("perm")
        && !perm.is_empty()
    {
        let fixed = perm
            .iter()
            .map(|&p| normalized(p, rank, false))
            .collect::<Option<Vec<_>>>()
            .filter(|f| f.len() == rank && f.iter().collect::<HashSet<_>>().len() == rank)
            .ok_or_else(|| {
                violation(format!("perm {perm:?} is not a permutation of {rank} axes"))
            })?;
        if fixed != perm {
            updates.push(("perm", Attribute::Ints(fixed)));
        }
    }

    let changed = !updates.is_empty();
    if changed {
        log::debug!("{}: normalized {} attribute(s)", graph.node(node).kind, updates.len());
    }
    let n = graph.node_mut(node);
    for (name, attr) in updates {
        n.set_attr(name, attr);
    }
    Ok(changed)
}

fn check_rank(graph: &Graph, node: Handle<Node>, max_rank: Option<usize>) -> Result<(), CanonError> {
    let Some(max) = max_rank else {
        return Ok(());
    };
    for &out in graph.node(node).outputs() {
        if let Some(rank) = graph.value_type(out).shape().and_then(|s| s.rank())
            && rank > max
        {
            return Err(CanonError::structural(
                graph,
                node,
                format!("rank {rank} exceeds the maximum of {max}"),
            ));
        }
    }
    Ok(())
}
