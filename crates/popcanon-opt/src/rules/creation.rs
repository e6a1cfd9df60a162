//! Tensor factories and random generators.
//!
//! Shapes and element types come from the traced output: the factory's own
//! `dtype`/`layout`/`device` operands are already reflected there.

use popcanon_ops::builder;

use super::{RuleContext, RuleResult, RuleSet, register_aten, replace};
use crate::CanonError;

pub(super) fn register(rules: &mut RuleSet) {
    register_aten(rules, &["zeros", "zeros_like"], |cx| filled(cx, Fill::Value(0.0)));
    register_aten(rules, &["ones", "ones_like"], |cx| filled(cx, Fill::Value(1.0)));
    register_aten(rules, &["full", "full_like"], |cx| filled(cx, Fill::Operand(1)));
    register_aten(rules, &["rand"], rand);
    register_aten(rules, &["randn"], randn);
    register_aten(rules, &["uniform_"], uniform_);
    register_aten(rules, &["normal_"], normal_);
    register_aten(rules, &["normal"], normal);
}

#[derive(Clone, Copy)]
enum Fill {
    Value(f64),
    Operand(usize),
}

fn filled(cx: &mut RuleContext<'_>, fill: Fill) -> RuleResult {
    let value = match fill {
        Fill::Value(v) => v,
        Fill::Operand(i) => cx.const_float(i)?,
    };
    let elem = cx.output_elem()?;
    let dims = cx.output_dims()?;
    let numel: usize = dims.iter().product();
    let node = builder::create_constant(cx.graph, elem, &vec![value; numel], &dims)?;
    replace(cx.graph.node(node).output())
}

fn output_shape(cx: &RuleContext<'_>) -> Result<Vec<i64>, CanonError> {
    Ok(cx.output_dims()?.iter().map(|&d| d as i64).collect())
}

fn uniform(cx: &mut RuleContext<'_>, low: f64, high: f64) -> RuleResult {
    let shape = output_shape(cx)?;
    let dtype = cx.output_elem()?;
    let node = builder::create_random_uniform(cx.graph, &shape, high, low, dtype)?;
    replace(cx.graph.node(node).output())
}

fn gaussian(cx: &mut RuleContext<'_>, mean: f64, scale: f64) -> RuleResult {
    let shape = output_shape(cx)?;
    let dtype = cx.output_elem()?;
    let node = builder::create_random_normal(cx.graph, &shape, mean, scale, dtype)?;
    replace(cx.graph.node(node).output())
}

fn rand(cx: &mut RuleContext<'_>) -> RuleResult {
    uniform(cx, 0.0, 1.0)
}

fn randn(cx: &mut RuleContext<'_>) -> RuleResult {
    gaussian(cx, 0.0, 1.0)
}

/// `uniform_(self, from, to, generator)`: the result replaces `self`.
fn uniform_(cx: &mut RuleContext<'_>) -> RuleResult {
    let low = cx.opt_float(1)?.unwrap_or(0.0);
    let high = cx.opt_float(2)?.unwrap_or(1.0);
    uniform(cx, low, high)
}

fn normal_(cx: &mut RuleContext<'_>) -> RuleResult {
    let mean = cx.opt_float(1)?.unwrap_or(0.0);
    let std = cx.opt_float(2)?.unwrap_or(1.0);
    gaussian(cx, mean, std)
}

/// Only the `normal(float mean, float std, size)` overload; tensor-valued
/// moments are declined.
fn normal(cx: &mut RuleContext<'_>) -> RuleResult {
    if cx.tensor_elem(0).is_some() || cx.tensor_elem(1).is_some() {
        return Ok(None);
    }
    let mean = cx.const_float(0)?;
    let std = cx.const_float(1)?;
    gaussian(cx, mean, std)
}
