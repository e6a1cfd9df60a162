//! Bookkeeping operators that lower to no target node at all.

use popcanon_ops::builder;
use popcanon_ops::kinds;

use super::{RuleContext, RuleResult, RuleSet, register_aten, replace};
use crate::fold::{ConstValue, constant_value};

pub(super) fn register(rules: &mut RuleSet) {
    register_aten(rules, &["detach", "detach_", "contiguous", "clone", "alias"], forward);
    register_aten(rules, &["dropout", "dropout_", "feature_dropout"], dropout);
    register_aten(rules, &["Int", "Float"], forward_tensor);
    rules.insert(kinds::source::NUM_TO_TENSOR, forward_tensor);
    rules.insert(kinds::source::CONSTANT, tensor_constant);
}

fn forward(cx: &mut RuleContext<'_>) -> RuleResult {
    replace(cx.input(0)?)
}

/// Dropout is the identity outside training.
fn dropout(cx: &mut RuleContext<'_>) -> RuleResult {
    match cx.constant(2) {
        Some(ConstValue::Bool(false)) | Some(ConstValue::Int(0)) => forward(cx),
        _ => Ok(None),
    }
}

/// Scalar conversions that wrap a tensor produced earlier. A runtime host
/// scalar has no target representation.
fn forward_tensor(cx: &mut RuleContext<'_>) -> RuleResult {
    if cx.tensor_elem(0).is_none() {
        return Ok(None);
    }
    forward(cx)
}

/// `prim::Constant` holding a tensor. Scalar and list constants stay for
/// the rules and passes that read them.
fn tensor_constant(cx: &mut RuleContext<'_>) -> RuleResult {
    let Some(&out) = cx.n().outputs().first() else {
        return Ok(None);
    };
    let Some(ConstValue::Tensor(t)) = constant_value(cx.graph, out) else {
        return Ok(None);
    };
    let node = builder::tensor_to_constant(cx.graph, t)?;
    replace(cx.graph.node(node).output())
}
