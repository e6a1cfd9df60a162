//! View, layout and padding operators.

use popcanon_ir::Attribute;
use popcanon_ops::builder;
use popcanon_ops::kinds;
use popcanon_ops::shape::normalize_axis;

use super::{RuleContext, RuleResult, RuleSet, register_aten, replace};
use crate::CanonError;

pub(super) fn register(rules: &mut RuleSet) {
    register_aten(rules, &["reshape", "view"], reshape);
    register_aten(rules, &["flatten"], flatten);
    register_aten(rules, &["transpose", "transpose_"], transpose);
    register_aten(rules, &["t", "t_"], t);
    register_aten(rules, &["permute"], permute);
    register_aten(rules, &["squeeze", "squeeze_"], squeeze);
    register_aten(rules, &["unsqueeze", "unsqueeze_"], unsqueeze);
    register_aten(rules, &["expand"], expand);
    register_aten(rules, &["expand_as"], expand_as);
    register_aten(rules, &["cat"], cat);
    register_aten(rules, &["split", "split_with_sizes"], split);
    register_aten(rules, &["chunk"], chunk);
    register_aten(rules, &["slice"], slice);
    register_aten(rules, &["constant_pad_nd"], constant_pad_nd);
    register_aten(rules, &["reflection_pad1d", "reflection_pad2d"], |cx| pad(cx, Padding::Reflect));
    register_aten(
        rules,
        &["replication_pad1d", "replication_pad2d", "replication_pad3d"],
        |cx| pad(cx, Padding::Edge),
    );
}

fn axis(cx: &RuleContext<'_>, axis: i64, rank: usize) -> Result<usize, CanonError> {
    normalize_axis(axis, rank)
        .ok_or_else(|| cx.error(format!("dimension {axis} out of range for rank {rank}")))
}

/// The shape operand goes through unchanged; list canonicalization turns a
/// constant list into the `shape` attribute.
fn reshape(cx: &mut RuleContext<'_>) -> RuleResult {
    let x = cx.input(0)?;
    let shape = cx.input(1)?;
    replace(cx.op(kinds::RESHAPE, &[x, shape], Vec::new())?)
}

fn flatten(cx: &mut RuleContext<'_>) -> RuleResult {
    let x = cx.input(0)?;
    let start = cx.opt_int(1)?.unwrap_or(0);
    let end = cx.opt_int(2)?.unwrap_or(-1);

    let Ok(dims) = cx.dims(0) else {
        if start == 0 && end == -1 {
            let node = builder::create_reshape(cx.graph, x, &[-1])?;
            return replace(cx.graph.node(node).output());
        }
        return Err(cx.error("flattening a tensor of unknown rank"));
    };
    let rank = dims.len().max(1);
    let (start, end) = (axis(cx, start, rank)?, axis(cx, end, rank)?);
    if start > end {
        return Err(cx.error(format!("flatten start {start} is after end {end}")));
    }
    if start == 1 && end + 1 == dims.len() {
        let node = builder::create_flatten_typed_output(cx.graph, &[x], 1)?;
        return replace(cx.graph.node(node).output());
    }
    let mut shape: Vec<i64> = dims[..start.min(dims.len())].iter().map(|&d| d as i64).collect();
    if !dims.is_empty() {
        shape.push(dims[start..=end].iter().product::<usize>() as i64);
        shape.extend(dims[end + 1..].iter().map(|&d| d as i64));
    } else {
        shape.push(1);
    }
    let node = builder::create_reshape(cx.graph, x, &shape)?;
    replace(cx.graph.node(node).output())
}

fn transpose(cx: &mut RuleContext<'_>) -> RuleResult {
    let x = cx.input(0)?;
    let rank = cx.rank(0)?;
    let a = axis(cx, cx.const_int(1)?, rank)?;
    let b = axis(cx, cx.const_int(2)?, rank)?;
    let mut perm: Vec<i64> = (0..rank as i64).collect();
    perm.swap(a, b);
    let node = builder::create_transpose_typed_output(cx.graph, &[x], &perm)?;
    replace(cx.graph.node(node).output())
}

fn t(cx: &mut RuleContext<'_>) -> RuleResult {
    let x = cx.input(0)?;
    if cx.rank(0)? < 2 {
        return replace(x);
    }
    let node = builder::create_transpose_typed_output(cx.graph, &[x], &[1, 0])?;
    replace(cx.graph.node(node).output())
}

fn permute(cx: &mut RuleContext<'_>) -> RuleResult {
    let x = cx.input(0)?;
    let dims = cx.input(1)?;
    replace(cx.op(kinds::TRANSPOSE, &[x, dims], Vec::new())?)
}

fn squeeze(cx: &mut RuleContext<'_>) -> RuleResult {
    let x = cx.input(0)?;
    let axes = match cx.opt_int(1) {
        Ok(Some(dim)) => vec![dim],
        Ok(None) => Vec::new(),
        Err(_) => cx.const_ints(1)?,
    };
    replace(cx.op(kinds::SQUEEZE, &[x], vec![("axes", Attribute::Ints(axes))])?)
}

fn unsqueeze(cx: &mut RuleContext<'_>) -> RuleResult {
    let x = cx.input(0)?;
    let dim = cx.const_int(1)?;
    replace(cx.op(kinds::UNSQUEEZE, &[x], vec![("axes", Attribute::Ints(vec![dim]))])?)
}

/// Target sizes with torch's `-1` ("keep this dimension") resolved against
/// the input.
fn expand_shape(cx: &RuleContext<'_>, input: &[usize], sizes: &[i64]) -> Result<Vec<i64>, CanonError> {
    let offset = sizes.len().checked_sub(input.len()).ok_or_else(|| {
        cx.error(format!("cannot expand rank {} to {} dimension(s)", input.len(), sizes.len()))
    })?;
    sizes
        .iter()
        .enumerate()
        .map(|(i, &s)| match s {
            -1 if i >= offset => Ok(input[i - offset] as i64),
            -1 => Err(cx.error("-1 is not allowed in a leading expanded dimension")),
            s => Ok(s),
        })
        .collect()
}

fn expand(cx: &mut RuleContext<'_>) -> RuleResult {
    let x = cx.input(0)?;
    let Ok(sizes) = cx.const_ints(1) else {
        let sizes = cx.input(1)?;
        return replace(cx.op(kinds::EXPAND, &[x, sizes], Vec::new())?);
    };
    let shape = expand_shape(cx, &cx.dims(0)?, &sizes)?;
    replace(cx.op(kinds::EXPAND, &[x], vec![("shape", Attribute::Ints(shape))])?)
}

fn expand_as(cx: &mut RuleContext<'_>) -> RuleResult {
    let x = cx.input(0)?;
    let shape: Vec<i64> = cx.dims(1)?.iter().map(|&d| d as i64).collect();
    replace(cx.op(kinds::EXPAND, &[x], vec![("shape", Attribute::Ints(shape))])?)
}

fn cat(cx: &mut RuleContext<'_>) -> RuleResult {
    let tensors = cx.input(0)?;
    let dim = cx.opt_int(1)?.unwrap_or(0);
    let node = builder::create_concat_typed_output(cx.graph, &[tensors], dim)?;
    replace(cx.graph.node(node).output())
}

/// Emits a `popart::split` of operand 0 into `sizes` along `dim` and
/// gathers the pieces into the tensor list the trace expects.
fn split_into(cx: &mut RuleContext<'_>, dim: i64, sizes: Vec<i64>) -> RuleResult {
    let x = cx.input(0)?;
    let node = builder::create_split_typed_output(cx.graph, &[x], sizes.len(), dim, &sizes)?;
    let pieces = cx.graph.node(node).outputs().to_vec();
    let list = cx.list_of(pieces);
    replace(list)
}

fn split(cx: &mut RuleContext<'_>) -> RuleResult {
    let dims = cx.dims(0)?;
    let dim = cx.opt_int(2)?.unwrap_or(0);
    let length = dims[axis(cx, dim, dims.len())?] as i64;
    let sizes = match cx.opt_int(1) {
        Ok(Some(size)) if size > 0 => {
            let mut sizes = vec![size; (length / size) as usize];
            if length % size != 0 {
                sizes.push(length % size);
            }
            sizes
        }
        Ok(_) => return Err(cx.error("split size must be positive")),
        Err(_) => cx.const_ints(1)?,
    };
    split_into(cx, dim, sizes)
}

fn chunk(cx: &mut RuleContext<'_>) -> RuleResult {
    let dims = cx.dims(0)?;
    let chunks = cx.const_int(1)?;
    let dim = cx.opt_int(2)?.unwrap_or(0);
    let length = dims[axis(cx, dim, dims.len())?] as i64;
    if chunks <= 0 {
        return Err(cx.error("chunk count must be positive"));
    }
    let size = ((length + chunks - 1) / chunks).max(1);
    let mut sizes = Vec::new();
    let mut left = length;
    while left > 0 {
        sizes.push(size.min(left));
        left -= size;
    }
    split_into(cx, dim, sizes)
}

fn slice(cx: &mut RuleContext<'_>) -> RuleResult {
    let x = cx.input(0)?;
    if cx.opt_int(4)?.unwrap_or(1) != 1 {
        return Ok(None);
    }
    let dim = cx.opt_int(1)?.unwrap_or(0);
    let start = cx.opt_int(2)?.unwrap_or(0);
    let end = cx.opt_int(3)?.unwrap_or(i64::MAX);
    replace(cx.op(
        kinds::SLICE,
        &[x],
        vec![
            ("starts", Attribute::Ints(vec![start])),
            ("ends", Attribute::Ints(vec![end])),
            ("axes", Attribute::Ints(vec![dim])),
        ],
    )?)
}

/// Torch pads list `(begin, end)` pairs starting from the last dimension;
/// the target wants all begins, then all ends, in dimension order.
fn onnx_pads(cx: &RuleContext<'_>, torch: &[i64], rank: usize) -> Result<Vec<i64>, CanonError> {
    if torch.len() % 2 != 0 || torch.len() / 2 > rank {
        return Err(cx.error(format!("{} pad value(s) for rank {rank}", torch.len())));
    }
    let mut pads = vec![0; 2 * rank];
    for (i, pair) in torch.chunks(2).enumerate() {
        let axis = rank - 1 - i;
        pads[axis] = pair[0];
        pads[axis + rank] = pair[1];
    }
    Ok(pads)
}

fn constant_pad_nd(cx: &mut RuleContext<'_>) -> RuleResult {
    let x = cx.input(0)?;
    let pads = onnx_pads(cx, &cx.const_ints(1)?, cx.rank(0)?)?;
    let value = cx.opt_float(2)?.unwrap_or(0.0);
    let node = builder::create_constant_pad(cx.graph, x, &pads, value)?;
    replace(cx.graph.node(node).output())
}

#[derive(Clone, Copy)]
enum Padding {
    Reflect,
    Edge,
}

fn pad(cx: &mut RuleContext<'_>, mode: Padding) -> RuleResult {
    let x = cx.input(0)?;
    let pads = onnx_pads(cx, &cx.const_ints(1)?, cx.rank(0)?)?;
    let node = match mode {
        Padding::Reflect => builder::create_reflection_pad(cx.graph, x, &pads)?,
        Padding::Edge => builder::create_edge_pad(cx.graph, x, &pads)?,
    };
    replace(cx.graph.node(node).output())
}

#[cfg(test)]
mod tests {
    use popcanon_ir::{ElementType, Graph, ListElem, NodeKind, ValueType};

    use super::super::testing::*;
    use super::*;

    fn f32(dims: &[usize]) -> ValueType {
        ValueType::tensor(ElementType::Float32, dims)
    }

    #[test]
    fn reshape_keeps_the_list_operand_for_later() {
        let mut graph = Graph::new();
        let x = graph.add_input(f32(&[2, 3]), "x");
        let shape = ints(&mut graph, &[3, 2]);
        let node = aten(&mut graph, "view", vec![x, shape], f32(&[3, 2]));
        let out = lower_one(&mut graph, node);
        let reshape = node_of(&graph, out);
        assert_eq!(reshape.kind, kinds::RESHAPE);
        assert_eq!(reshape.inputs(), &[x, shape]);
        assert_eq!(graph.value_type(out).elem(), Some(ElementType::Float32));
    }

    #[test]
    fn flatten_from_one_is_a_target_flatten() {
        let mut graph = Graph::new();
        let x = graph.add_input(f32(&[2, 3, 4]), "x");
        let start = int(&mut graph, 1);
        let end = int(&mut graph, -1);
        let node = aten(&mut graph, "flatten", vec![x, start, end], f32(&[2, 12]));
        let out = lower_one(&mut graph, node);
        assert_eq!(kind_of(&graph, out), kinds::FLATTEN);
        assert_eq!(graph.value_type(out), &f32(&[2, 12]));

        let start = int(&mut graph, 0);
        let end = int(&mut graph, 1);
        let node = aten(&mut graph, "flatten", vec![x, start, end], f32(&[6, 4]));
        let out = lower_one(&mut graph, node);
        assert_eq!(node_of(&graph, out).is("shape"), Some(&[6, 4][..]));
        assert_eq!(graph.value_type(out), &f32(&[6, 4]));
    }

    #[test]
    fn transpose_swaps_two_axes() {
        let mut graph = Graph::new();
        let x = graph.add_input(f32(&[2, 3, 4]), "x");
        let a = int(&mut graph, 0);
        let b = int(&mut graph, -1);
        let node = aten(&mut graph, "transpose", vec![x, a, b], f32(&[4, 3, 2]));
        let out = lower_one(&mut graph, node);
        assert_eq!(node_of(&graph, out).is("perm"), Some(&[2, 1, 0][..]));
        assert_eq!(graph.value_type(out), &f32(&[4, 3, 2]));
    }

    #[test]
    fn expand_resolves_keep_markers() {
        let mut graph = Graph::new();
        let x = graph.add_input(f32(&[3, 1]), "x");
        let sizes = ints(&mut graph, &[2, -1, 4]);
        let node = aten(&mut graph, "expand", vec![x, sizes], f32(&[2, 3, 4]));
        let out = lower_one(&mut graph, node);
        assert_eq!(node_of(&graph, out).is("shape"), Some(&[2, 3, 4][..]));
        assert_eq!(graph.value_type(out), &f32(&[2, 3, 4]));
    }

    #[test]
    fn chunk_produces_a_list_of_split_outputs() {
        let mut graph = Graph::new();
        let x = graph.add_input(f32(&[5, 2]), "x");
        let chunks = int(&mut graph, 2);
        let dim = int(&mut graph, 0);
        let node = graph.insert_node(
            NodeKind::aten("chunk"),
            vec![x, chunks, dim],
            vec![ValueType::List(ListElem::Tensor)],
        );
        let list = lower_one(&mut graph, node);
        let gather = node_of(&graph, list);
        assert_eq!(gather.kind, kinds::source::LIST_CONSTRUCT);
        let pieces = gather.inputs().to_vec();
        assert_eq!(pieces.len(), 2);
        let split = node_of(&graph, pieces[0]);
        assert_eq!(split.kind, kinds::SPLIT);
        assert_eq!(split.is("split"), Some(&[3, 2][..]));
        assert_eq!(graph.value_type(pieces[1]), &f32(&[2, 2]));
    }

    #[test]
    fn constant_pad_reorders_pairs() {
        let mut graph = Graph::new();
        let x = graph.add_input(f32(&[2, 3]), "x");
        let pads = ints(&mut graph, &[1, 2]);
        let value = float(&mut graph, 0.5);
        let node = aten(&mut graph, "constant_pad_nd", vec![x, pads, value], f32(&[2, 6]));
        let out = lower_one(&mut graph, node);
        let pad = node_of(&graph, out);
        assert_eq!(pad.is("pads"), Some(&[0, 1, 0, 2][..]));
        assert_eq!(pad.s("mode"), Some("constant"));
        assert_eq!(graph.value_type(out), &f32(&[2, 6]));
    }

    #[test]
    fn strided_slice_is_declined() {
        let mut graph = Graph::new();
        let x = graph.add_input(f32(&[6]), "x");
        let dim = int(&mut graph, 0);
        let start = int(&mut graph, 1);
        let end = int(&mut graph, 5);
        let step = int(&mut graph, 2);
        let node = aten(&mut graph, "slice", vec![x, dim, start, end, step], f32(&[2]));
        assert!(lower(&mut graph, node).is_none());

        let one = int(&mut graph, 1);
        let node = aten(&mut graph, "slice", vec![x, dim, start, end, one], f32(&[4]));
        let out = lower_one(&mut graph, node);
        assert_eq!(graph.value_type(out), &f32(&[4]));
    }

    #[test]
    fn cat_takes_the_tensor_list() {
        let mut graph = Graph::new();
        let a = graph.add_input(f32(&[2, 2]), "a");
        let b = graph.add_input(f32(&[1, 2]), "b");
        let list = graph.insert_node(
            kinds::source::LIST_CONSTRUCT,
            vec![a, b],
            vec![ValueType::List(ListElem::Tensor)],
        );
        let list = graph.node(list).output();
        let dim = int(&mut graph, 0);
        let node = aten(&mut graph, "cat", vec![list, dim], f32(&[3, 2]));
        let out = lower_one(&mut graph, node);
        let concat = node_of(&graph, out);
        assert_eq!(concat.kind, kinds::CONCAT);
        assert_eq!(concat.inputs(), &[list]);
        assert_eq!(concat.i("axis"), Some(0));
    }
}
