use popcanon_ir::{ElementType, Handle, NodeKind, Value};
use popcanon_ops::builder;
use popcanon_ops::kinds;

use super::{RuleContext, RuleResult, RuleSet, register_aten, replace};
use crate::CanonError;
use crate::fold::ConstValue;

pub(super) fn register(rules: &mut RuleSet) {
    register_aten(rules, &["add", "add_"], add);
    register_aten(rules, &["sub", "sub_"], sub);
    register_aten(rules, &["mul", "mul_"], |cx| binary(cx, kinds::MUL));
    register_aten(rules, &["div", "div_"], div);
    register_aten(rules, &["pow"], |cx| binary(cx, kinds::POW));
    register_aten(rules, &["eq"], |cx| binary(cx, kinds::EQUAL));
    register_aten(rules, &["lt"], |cx| binary(cx, kinds::LESS));
    register_aten(rules, &["gt"], |cx| binary(cx, kinds::GREATER));
    register_aten(rules, &["where"], where_);

    register_aten(rules, &["neg", "neg_"], |cx| unary(cx, kinds::NEG));
    register_aten(rules, &["relu", "relu_"], |cx| unary(cx, kinds::RELU));
    register_aten(rules, &["sigmoid", "sigmoid_"], |cx| unary(cx, kinds::SIGMOID));
    register_aten(rules, &["tanh", "tanh_"], |cx| unary(cx, kinds::TANH));
    register_aten(rules, &["exp", "exp_"], |cx| unary(cx, kinds::EXP));
    register_aten(rules, &["log", "log_"], |cx| unary(cx, kinds::LOG));
    register_aten(rules, &["sqrt", "sqrt_"], |cx| unary(cx, kinds::SQRT));
    register_aten(rules, &["abs", "abs_"], |cx| unary(cx, kinds::ABS));
}

/// Element type scalar operands of a binary op are matched against.
fn reference(cx: &RuleContext<'_>) -> Option<ElementType> {
    cx.tensor_elem(0).or_else(|| cx.tensor_elem(1))
}

fn binary(cx: &mut RuleContext<'_>, kind: NodeKind) -> RuleResult {
    let reference = reference(cx);
    let a = cx.tensor(0, reference)?;
    let b = cx.tensor(1, reference)?;
    replace(cx.op(kind, &[a, b], Vec::new())?)
}

/// `other` scaled by the `alpha` operand, if there is one.
fn scaled_other(cx: &mut RuleContext<'_>) -> Result<Handle<Value>, CanonError> {
    let reference = reference(cx);
    let other = cx.tensor(1, reference)?;
    match cx.opt_float(2)? {
        None => Ok(other),
        Some(alpha) if alpha == 1.0 => Ok(other),
        Some(alpha) => {
            let scalar = if alpha.fract() == 0.0 {
                ElementType::Int64
            } else {
                ElementType::Float32
            };
            let alpha = cx.scalar_like(alpha, scalar, reference)?;
            cx.op(kinds::MUL, &[other, alpha], Vec::new())
        }
    }
}

fn add(cx: &mut RuleContext<'_>) -> RuleResult {
    let reference = reference(cx);
    let a = cx.tensor(0, reference)?;
    let b = scaled_other(cx)?;
    let node = builder::create_add_not_in_place(cx.graph, a, b)?;
    replace(cx.graph.node(node).output())
}

fn sub(cx: &mut RuleContext<'_>) -> RuleResult {
    let reference = reference(cx);
    let a = cx.tensor(0, reference)?;
    let b = scaled_other(cx)?;
    replace(cx.op(kinds::SUB, &[a, b], Vec::new())?)
}

fn div(cx: &mut RuleContext<'_>) -> RuleResult {
    // Floor and trunc division have no target counterpart.
    if !matches!(cx.constant(2), Some(ConstValue::None)) {
        return Ok(None);
    }
    binary(cx, kinds::DIV)
}

fn where_(cx: &mut RuleContext<'_>) -> RuleResult {
    let condition = cx.tensor(0, Some(ElementType::Bool))?;
    let reference = cx.tensor_elem(1).or_else(|| cx.tensor_elem(2));
    let x = cx.tensor(1, reference)?;
    let y = cx.tensor(2, reference)?;
    replace(cx.op(kinds::WHERE, &[condition, x, y], Vec::new())?)
}

fn unary(cx: &mut RuleContext<'_>, kind: NodeKind) -> RuleResult {
    let x = cx.tensor(0, None)?;
    let node = builder::create_unary_same_typed_output(cx.graph, kind, &[x])?;
    replace(cx.graph.node(node).output())
}
