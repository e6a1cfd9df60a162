//! Losses, loss markers and user operators.
//!
//! Target reduction codes: `0 = sum`, `1 = mean`, `2 = none`. Torch numbers
//! them the other way round (`0 = none`, `1 = mean`, `2 = sum`).

use popcanon_ir::{Attribute, ValueType};
use popcanon_ops::builder;
use popcanon_ops::kinds;

use super::{RuleContext, RuleResult, RuleSet, register_aten, replace};
use crate::CanonError;
use crate::fold::ConstValue;

pub(super) fn register(rules: &mut RuleSet) {
    rules.insert(kinds::IDENTITY_LOSS, identity_loss);
    rules.insert(kinds::CUSTOM_OPERATION, custom_operation);
    register_aten(rules, &["l1_loss"], l1_loss);
    register_aten(rules, &["mse_loss"], mse_loss);
}

fn reduction_from_name(name: &str) -> Option<i64> {
    match name {
        "sum" => Some(0),
        "mean" => Some(1),
        "none" => Some(2),
        _ => None,
    }
}

fn from_torch_reduction(cx: &RuleContext<'_>, code: i64) -> Result<i64, CanonError> {
    match code {
        0 => Ok(2),
        1 => Ok(1),
        2 => Ok(0),
        other => Err(cx.error(format!("unknown reduction code {other}"))),
    }
}

/// Brings a traced `poptorch::identity_loss` into canonical form: one tensor
/// input and an integer `reduction` attribute. The trace may carry the
/// reduction as a second constant operand or as a string attribute.
fn identity_loss(cx: &mut RuleContext<'_>) -> RuleResult {
    let n = cx.n();
    if n.inputs().len() == 1 && matches!(n.attr("reduction"), Some(Attribute::Int(_))) {
        return Ok(None);
    }
    let reduction = match (n.s("reduction"), cx.constant(1)) {
        (Some(name), _) => reduction_from_name(name),
        (None, Some(ConstValue::Str(name))) => reduction_from_name(&name),
        (None, Some(ConstValue::Int(code))) => Some(code),
        _ => None,
    }
    .filter(|code| (0..=2).contains(code))
    .ok_or_else(|| cx.error("reduction must be sum, mean or none"))?;

    let x = cx.input(0)?;
    replace(cx.op(
        kinds::IDENTITY_LOSS,
        &[x],
        vec![("reduction", Attribute::Int(reduction))],
    )?)
}

fn l1_loss(cx: &mut RuleContext<'_>) -> RuleResult {
    let (x, target) = (cx.input(0)?, cx.input(1)?);
    let reduction = from_torch_reduction(cx, cx.opt_int(2)?.unwrap_or(1))?;
    let diff = cx.op(kinds::SUB, &[x, target], Vec::new())?;
    replace(cx.op(
        kinds::L1_LOSS,
        &[diff],
        vec![
            ("lambda", Attribute::Float(1.0)),
            ("reduction", Attribute::Int(reduction)),
        ],
    )?)
}

fn mse_loss(cx: &mut RuleContext<'_>) -> RuleResult {
    let (x, target) = (cx.input(0)?, cx.input(1)?);
    let reduction = from_torch_reduction(cx, cx.opt_int(2)?.unwrap_or(1))?;
    let diff = cx.op(kinds::SUB, &[x, target], Vec::new())?;
    let squared = cx.op(kinds::MUL, &[diff, diff], Vec::new())?;
    let kind = match reduction {
        0 => kinds::REDUCESUM,
        1 => kinds::REDUCEMEAN,
        _ => return replace(squared),
    };
    replace(cx.op(
        kind,
        &[squared],
        vec![
            ("axes", Attribute::Ints(Vec::new())),
            ("keepdims", Attribute::Int(0)),
        ],
    )?)
}

/// Completes a traced custom operation: `version` defaults to 1 and
/// `num_outputs` follows the traced outputs. Inputs, including a pending
/// tensor list, are kept as they are.
fn custom_operation(cx: &mut RuleContext<'_>) -> RuleResult {
    let n = cx.n();
    if n.i("version").is_some() && n.i("num_outputs") == Some(n.outputs().len() as i64) {
        return Ok(None);
    }
    let (Some(name), Some(domain)) = (n.s("name"), n.s("domain")) else {
        return Err(cx.error("custom operation needs a name and a domain"));
    };
    let (name, domain) = (name.to_owned(), domain.to_owned());
    let version = n.i("version").unwrap_or(1);
    let inputs = n.inputs().to_vec();
    let outputs = n.outputs().to_vec();
    let output_types: Vec<ValueType> = outputs
        .iter()
        .map(|&v| cx.graph.value_type(v).clone())
        .collect();

    let node = builder::create_custom_operation(cx.graph, &inputs, &name, &domain, version, output_types)?;
    Ok(Some(cx.graph.node(node).outputs().to_vec()))
}
