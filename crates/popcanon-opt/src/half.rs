//! Half/float precision resolution and surplus loss removal.

use std::collections::HashSet;

use popcanon_ir::{Attribute, ElementType, Graph, Handle, Node, TensorMeta, Value, ValueType};
use popcanon_ops::cast::promote;
use popcanon_ops::registry::TypeRule;
use popcanon_ops::{ImplicitCast, ImplicitCastOutput, OpRegistry, builder, kinds};

use crate::{CanonError, Pass, PassContext};

#[derive(Debug)]
pub struct CanonicaliseHalfInputs;

impl Pass for CanonicaliseHalfInputs {
    fn name(&self) -> &str {
        "canonicalise-half-inputs"
    }

    fn run(&self, graph: &mut Graph, cx: &mut PassContext<'_>) -> Result<bool, CanonError> {
        canonicalise_half_inputs(graph, cx.input_tensors, cx.parameter_tensors)
    }
}

#[derive(Debug)]
pub struct ResolveHalfOrFloat;

impl Pass for ResolveHalfOrFloat {
    fn name(&self) -> &str {
        "resolve-half-or-float"
    }

    fn run(&self, graph: &mut Graph, _cx: &mut PassContext<'_>) -> Result<bool, CanonError> {
        resolve_half_or_float(graph)
    }
}

#[derive(Debug)]
pub struct RemoveSurplusIdentityLosses;

impl Pass for RemoveSurplusIdentityLosses {
    fn name(&self) -> &str {
        "remove-surplus-identity-losses"
    }

    fn run(&self, graph: &mut Graph, _cx: &mut PassContext<'_>) -> Result<bool, CanonError> {
        remove_surplus_identity_losses(graph)
    }
}

fn float_elem(graph: &Graph, value: Handle<Value>) -> Option<ElementType> {
    graph.value_type(value).elem().filter(|e| e.is_float())
}

/// Types float graph inputs and parameters after the tensors the graph
/// will actually run with.
///
/// When any of them is half precision, single-precision intermediates the
/// trace derived from its operands become `HalfOrFloat` again, so that
/// resolution re-derives them.
pub fn canonicalise_half_inputs(
    graph: &mut Graph,
    input_tensors: &[TensorMeta],
    parameter_tensors: &[TensorMeta],
) -> Result<bool, CanonError> {
    let inputs = graph.inputs().to_vec();
    let parameters = graph.parameters().to_vec();
    for (category, values, metas) in [
        ("input", &inputs, input_tensors),
        ("parameter", &parameters, parameter_tensors),
    ] {
        if values.len() != metas.len() {
            return Err(CanonError::InputMismatch {
                category,
                expected: values.len(),
                found: metas.len(),
            });
        }
    }

    let mut changed = false;
    let mut any_half = false;
    let metas = input_tensors.iter().chain(parameter_tensors);
    for (&value, meta) in inputs.iter().chain(&parameters).zip(metas) {
        if float_elem(graph, value).is_none() {
            continue;
        }
        any_half |= meta.elem == ElementType::Float16;
        let ty = graph.value_type(value).with_elem(meta.elem);
        if *graph.value_type(value) != ty {
            log::debug!(
                "input {} is {}",
                graph.value(value).name.as_deref().unwrap_or("?"),
                meta.elem.target_name()
            );
            graph.set_value_type(value, ty);
            changed = true;
        }
    }
    if !any_half {
        return Ok(changed);
    }

    // A float result of integer operands (true division) is not derived
    // from any precision and stays as traced.
    let registry = OpRegistry::global();
    let reopen: Vec<Handle<Value>> = graph
        .nodes()
        .filter(|(_, n)| {
            registry.get(&n.kind).is_some_and(|s| {
                s.type_rule == TypeRule::SameAsFirst && s.cast_output != ImplicitCastOutput::AlwaysBool
            })
        })
        .filter(|(_, n)| n.inputs().iter().any(|&v| float_elem(graph, v).is_some()))
        .flat_map(|(_, n)| n.outputs().iter().copied())
        .filter(|&v| graph.value_type(v).elem() == Some(ElementType::Float32))
        .collect();
    for &value in &reopen {
        let ty = graph.value_type(value).with_elem(ElementType::HalfOrFloat);
        graph.set_value_type(value, ty);
    }
    Ok(changed || !reopen.is_empty())
}

/// Highest float precision among `elems`.
fn highest(elems: impl IntoIterator<Item = ElementType>) -> Option<ElementType> {
    elems
        .into_iter()
        .try_fold(None, |acc: Option<ElementType>, e| match acc {
            None => Ok(Some(e)),
            Some(a) => promote(a, e).map(Some),
        })
        .ok()
        .flatten()
}

fn is_ambiguous(graph: &Graph, value: Handle<Value>) -> bool {
    !graph.value_type(value).is_concrete()
}

/// Whether the output precision of `node` follows its operands.
fn follows_inputs(node: &Node) -> bool {
    if node.kind == kinds::CAST {
        return true;
    }
    match OpRegistry::global().get(&node.kind) {
        Some(schema) => schema.type_rule == TypeRule::SameAsFirst,
        None => true,
    }
}

/// Settles every ambiguous output of `node` on `elem` and updates the
/// attributes that spell out the precision.
fn settle(graph: &mut Graph, node: Handle<Node>, elem: ElementType) {
    log::debug!("{} resolves to {}", graph.node(node).kind, elem.target_name());
    let outputs = graph.node(node).outputs().to_vec();
    for value in outputs {
        if is_ambiguous(graph, value) {
            let ty = graph.value_type(value).with_elem(elem);
            graph.set_value_type(value, ty);
        }
    }

    let n = graph.node_mut(node);
    let tensor = n.t("value").filter(|t| t.elem().is_ambiguous()).map(|t| t.retype(elem));
    if let Some(t) = tensor {
        n.set_attr("value", Attribute::Tensor(t));
    }
    for name in ["to", "dtype"] {
        if n.s(name) == Some(ElementType::HalfOrFloat.target_name()) {
            n.set_attr(name, Attribute::Str(elem.target_name().into()));
        }
    }
}

/// Forward step: all float operands are concrete.
fn forward_evidence(graph: &Graph, node: Handle<Node>) -> Option<ElementType> {
    let n = graph.node(node);
    if !follows_inputs(n) {
        return None;
    }
    let floats: Vec<Handle<Value>> = n
        .inputs()
        .iter()
        .copied()
        .filter(|&v| float_elem(graph, v).is_some())
        .collect();
    if floats.iter().any(|&v| is_ambiguous(graph, v)) {
        return None;
    }
    highest(floats.iter().filter_map(|&v| float_elem(graph, v)))
}

/// Backward step for nodes without float operands: the concrete float
/// operands that sit next to its outputs in their consumers.
fn backward_evidence(graph: &Graph, node: Handle<Node>) -> Option<ElementType> {
    let n = graph.node(node);
    if n.inputs().iter().any(|&v| float_elem(graph, v).is_some()) {
        return None;
    }
    let mut elems = Vec::new();
    for &out in n.outputs() {
        for u in graph.uses(out) {
            let consumer = graph.node(u.node);
            elems.extend(
                consumer
                    .inputs()
                    .iter()
                    .enumerate()
                    .filter(|&(i, &v)| i != u.index && v != out && !is_ambiguous(graph, v))
                    .filter_map(|(_, &v)| float_elem(graph, v)),
            );
        }
    }
    highest(elems)
}

/// Resolves every `HalfOrFloat` value to `Float16` or `Float32`.
///
/// Alternates forward and backward propagation until nothing changes, then
/// casts inputs that still disagree under their node's promotion policy.
/// Fails on the first value that stays ambiguous.
pub fn resolve_half_or_float(graph: &mut Graph) -> Result<bool, CanonError> {
    let mut changed = false;
    loop {
        let mut progress = false;
        let order = graph.topological_order()?;
        for &node in &order {
            let pending = graph.node(node).outputs().iter().any(|&v| is_ambiguous(graph, v));
            if pending && let Some(elem) = forward_evidence(graph, node) {
                settle(graph, node, elem);
                progress = true;
            }
        }
        for &node in order.iter().rev() {
            let pending = graph.node(node).outputs().iter().any(|&v| is_ambiguous(graph, v));
            if pending && let Some(elem) = backward_evidence(graph, node) {
                settle(graph, node, elem);
                progress = true;
            }
        }
        if !progress {
            break;
        }
        changed = true;
    }

    for node in graph.node_order() {
        let policy = OpRegistry::global()
            .get(&graph.node(node).kind)
            .map_or(ImplicitCast::None, |s| s.implicit_cast);
        if policy != ImplicitCast::None && builder::insert_implicit_casts(graph, node)? {
            changed = true;
        }
    }

    for (node, n) in graph.nodes() {
        if n.outputs().iter().any(|&v| is_ambiguous(graph, v)) {
            return Err(CanonError::ambiguous(graph, node));
        }
    }
    Ok(changed)
}

/// Nodes whose results flow into a graph output.
fn feeding_outputs(graph: &Graph) -> HashSet<Handle<Node>> {
    let mut seen: HashSet<Handle<Node>> = HashSet::new();
    let mut worklist: Vec<Handle<Node>> = graph
        .outputs()
        .iter()
        .filter_map(|&v| graph.producer_node(v))
        .collect();
    while let Some(node) = worklist.pop() {
        if !seen.insert(node) {
            continue;
        }
        worklist.extend(graph.node(node).inputs().iter().filter_map(|&v| graph.producer_node(v)));
    }
    seen
}

/// Keeps a single `poptorch::identity_loss`: the last one that reaches a
/// graph output, or the last one if none does. The others become plain
/// reductions, casts, or disappear.
pub fn remove_surplus_identity_losses(graph: &mut Graph) -> Result<bool, CanonError> {
    let losses = graph.nodes_of_kind(&kinds::IDENTITY_LOSS);
    let feeding = feeding_outputs(graph);
    let Some(&last) = losses
        .iter()
        .rev()
        .find(|h| feeding.contains(*h))
        .or_else(|| losses.last())
    else {
        return Ok(false);
    };

    for &loss in losses.iter().filter(|&&h| h != last) {
        let n = graph.node(loss);
        let (&[input], &[output]) = (n.inputs(), n.outputs()) else {
            return Err(CanonError::structural(graph, loss, "expects one input and one output"));
        };
        let reduction = n.i("reduction").unwrap_or(1);
        let out_elem = graph.value_type(output).elem();

        let replacement = graph.insert_before(loss, |g| -> Result<Handle<Value>, CanonError> {
            let kind = match reduction {
                0 => kinds::REDUCESUM,
                1 => kinds::REDUCEMEAN,
                _ => {
                    return Ok(match out_elem {
                        Some(elem) => builder::cast_to_type(g, input, elem)?,
                        None => input,
                    });
                }
            };
            let node = builder::create_op(
                g,
                kind,
                &[input],
                vec![
                    ("axes", Attribute::Ints(Vec::new())),
                    ("keepdims", Attribute::Int(0)),
                ],
            )?;
            Ok(g.node(node).output())
        })?;
        if replacement != input {
            let provenance = graph.node(loss).provenance.clone();
            if let Some(p) = graph.producer_node(replacement) {
                graph.node_mut(p).provenance = provenance;
            }
        }
        log::debug!("removing surplus identity loss (reduction {reduction})");
        graph.replace_all_uses_with(output, replacement);
        graph.destroy_node(loss)?;
    }
    Ok(losses.len() > 1)
}
