//! Output shape inference.
//!
//! Unknown input ranks propagate as [`Shape::Unknown`]; a contradiction
//! between known shapes and attributes is an error.

use popcanon_ir::{Node, Shape};

use crate::error::BuildError;
use crate::registry::ShapeRule;

/// Normalizes `axis` against `rank`, accepting `-rank..rank`.
pub fn normalize_axis(axis: i64, rank: usize) -> Option<usize> {
    let rank = rank as i64;
    let axis = if axis < 0 { axis + rank } else { axis };
    (0..rank).contains(&axis).then_some(axis as usize)
}

/// Numpy-style broadcast of two known shapes.
pub fn broadcast(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(out)
}

fn shape_error(node: &Node, message: impl Into<String>) -> BuildError {
    BuildError::Shape {
        kind: node.kind.to_string(),
        message: message.into(),
    }
}

fn ints_attr<'a>(node: &'a Node, name: &str) -> Result<&'a [i64], BuildError> {
    node.is(name).ok_or_else(|| BuildError::Attribute {
        kind: node.kind.to_string(),
        name: name.into(),
        problem: "is missing or not an int list".into(),
    })
}

fn int_attr(node: &Node, name: &str) -> Result<i64, BuildError> {
    node.i(name).ok_or_else(|| BuildError::Attribute {
        kind: node.kind.to_string(),
        name: name.into(),
        problem: "is missing or not an int".into(),
    })
}

fn axis_of(node: &Node, axis: i64, rank: usize) -> Result<usize, BuildError> {
    normalize_axis(axis, rank)
        .ok_or_else(|| shape_error(node, format!("axis {axis} out of range for rank {rank}")))
}

fn non_negative(node: &Node, dims: &[i64]) -> Result<Vec<usize>, BuildError> {
    dims.iter()
        .map(|&d| usize::try_from(d).map_err(|_| shape_error(node, format!("negative dimension {d}"))))
        .collect()
}

/// Known dimensions of every input, or `None` if any rank is unknown.
fn all_known(inputs: &[Shape]) -> Option<Vec<&[usize]>> {
    inputs.iter().map(Shape::dims).collect()
}

/// Infers `num_outputs` output shapes for `node` under `rule`.
pub fn infer_shapes(
    rule: ShapeRule,
    node: &Node,
    inputs: &[Shape],
    num_outputs: usize,
) -> Result<Vec<Shape>, BuildError> {
    let first = inputs.first().cloned().unwrap_or(Shape::Unknown);
    let one = |shape: Shape| Ok(vec![shape; num_outputs]);

    let Some(dims) = all_known(inputs) else {
        return match rule {
            ShapeRule::SameAsFirst if first != Shape::Unknown => one(first),
            ShapeRule::FromShapeAttr | ShapeRule::FromTensorAttr | ShapeRule::Split => {
                infer_known(rule, node, &[], num_outputs).or_else(|_| one(Shape::Unknown))
            }
            _ => one(Shape::Unknown),
        };
    };
    infer_known(rule, node, &dims, num_outputs)
}

fn infer_known(
    rule: ShapeRule,
    node: &Node,
    inputs: &[&[usize]],
    num_outputs: usize,
) -> Result<Vec<Shape>, BuildError> {
    let one = |dims: Vec<usize>| Ok(vec![Shape::Known(dims); num_outputs]);
    let first = || {
        inputs
            .first()
            .map(|d| d.to_vec())
            .ok_or_else(|| shape_error(node, "expected at least one input"))
    };

    match rule {
        ShapeRule::SameAsFirst => one(first()?),
        ShapeRule::Broadcast => {
            let mut out: Vec<usize> = Vec::new();
            for dims in inputs {
                out = broadcast(&out, dims).ok_or_else(|| {
                    shape_error(node, format!("cannot broadcast {out:?} with {dims:?}"))
                })?;
            }
            one(out)
        }
        ShapeRule::MatMul => {
            let [a, b] = inputs else {
                return Err(shape_error(node, "expected two inputs"));
            };
            one(matmul_shape(node, a, b)?)
        }
        ShapeRule::Reshape => {
            let input = first()?;
            let target = ints_attr(node, "shape")?;
            one(reshape_shape(node, &input, target)?)
        }
        ShapeRule::Transpose => {
            let input = first()?;
            let perm = ints_attr(node, "perm")?;
            let perm: Vec<i64> = if perm.is_empty() {
                (0..input.len() as i64).rev().collect()
            } else {
                perm.to_vec()
            };
            if perm.len() != input.len() {
                return Err(shape_error(node, format!("perm {perm:?} does not match rank {}", input.len())));
            }
            let mut seen = vec![false; input.len()];
            let mut out = Vec::with_capacity(input.len());
            for &p in &perm {
                let axis = axis_of(node, p, input.len())?;
                if std::mem::replace(&mut seen[axis], true) {
                    return Err(shape_error(node, format!("perm {perm:?} repeats axis {axis}")));
                }
                out.push(input[axis]);
            }
            one(out)
        }
        ShapeRule::Concat => {
            let mut out = first()?;
            let axis = axis_of(node, int_attr(node, "axis")?, out.len())?;
            for dims in &inputs[1..] {
                let compatible = dims.len() == out.len()
                    && dims.iter().zip(&out).enumerate().all(|(i, (a, b))| i == axis || a == b);
                if !compatible {
                    return Err(shape_error(node, format!("cannot concatenate {out:?} with {dims:?}")));
                }
                out[axis] += dims[axis];
            }
            one(out)
        }
        ShapeRule::Split => {
            let split = non_negative(node, ints_attr(node, "split")?)?;
            if split.len() != num_outputs {
                return Err(shape_error(
                    node,
                    format!("{} split size(s) for {num_outputs} output(s)", split.len()),
                ));
            }
            let Some(input) = inputs.first() else {
                return Ok(vec![Shape::Unknown; num_outputs]);
            };
            let axis = axis_of(node, int_attr(node, "axis")?, input.len())?;
            Ok(split
                .into_iter()
                .map(|size| {
                    let mut dims = input.to_vec();
                    dims[axis] = size;
                    Shape::Known(dims)
                })
                .collect())
        }
        ShapeRule::Flatten => {
            let input = first()?;
            let axis = int_attr(node, "axis")?;
            let rank = input.len() as i64;
            let axis = if axis < 0 { axis + rank } else { axis };
            if !(0..=rank).contains(&axis) {
                return Err(shape_error(node, format!("flatten axis out of range for rank {rank}")));
            }
            let (outer, inner) = input.split_at(axis as usize);
            one(vec![outer.iter().product(), inner.iter().product()])
        }
        ShapeRule::Squeeze => {
            let input = first()?;
            let axes = ints_attr(node, "axes")?;
            let mut drop = vec![false; input.len()];
            if axes.is_empty() {
                for (i, &d) in input.iter().enumerate() {
                    drop[i] = d == 1;
                }
            }
            for &a in axes {
                let axis = axis_of(node, a, input.len())?;
                if input[axis] != 1 {
                    return Err(shape_error(node, format!("cannot squeeze axis {axis} of size {}", input[axis])));
                }
                drop[axis] = true;
            }
            one(input
                .iter()
                .zip(&drop)
                .filter(|(_, drop)| !**drop)
                .map(|(&d, _)| d)
                .collect())
        }
        ShapeRule::Unsqueeze => {
            let input = first()?;
            let axes = ints_attr(node, "axes")?;
            let rank = input.len() + axes.len();
            let mut positions = axes
                .iter()
                .map(|&a| axis_of(node, a, rank))
                .collect::<Result<Vec<_>, _>>()?;
            positions.sort_unstable();
            let mut out = input;
            for p in positions {
                out.insert(p, 1);
            }
            one(out)
        }
        ShapeRule::Expand => {
            let input = first()?;
            let target = non_negative(node, ints_attr(node, "shape")?)?;
            let out = broadcast(&input, &target).ok_or_else(|| {
                shape_error(node, format!("cannot expand {input:?} to {target:?}"))
            })?;
            one(out)
        }
        ShapeRule::Slice => {
            let mut out = first()?;
            let starts = ints_attr(node, "starts")?;
            let ends = ints_attr(node, "ends")?;
            let axes = ints_attr(node, "axes")?;
            if starts.len() != ends.len() || starts.len() != axes.len() {
                return Err(shape_error(node, "starts, ends and axes differ in length"));
            }
            for ((&s, &e), &a) in starts.iter().zip(ends).zip(axes) {
                let axis = axis_of(node, a, out.len())?;
                let dim = out[axis] as i64;
                let clamp = |v: i64| (if v < 0 { v + dim } else { v }).clamp(0, dim);
                out[axis] = (clamp(e) - clamp(s)).max(0) as usize;
            }
            one(out)
        }
        ShapeRule::Pad => {
            let input = first()?;
            let pads = ints_attr(node, "pads")?;
            let rank = input.len();
            if pads.len() != 2 * rank {
                return Err(shape_error(node, format!("expected {} pad values, got {}", 2 * rank, pads.len())));
            }
            let out = input
                .iter()
                .enumerate()
                .map(|(i, &d)| (d as i64).saturating_add(pads[i]).saturating_add(pads[i + rank]))
                .collect::<Vec<_>>();
            one(non_negative(node, &out)?)
        }
        ShapeRule::Reduce => {
            let input = first()?;
            let axes = ints_attr(node, "axes")?;
            let keepdims = int_attr(node, "keepdims")? != 0;
            let mut reduced = vec![axes.is_empty(); input.len()];
            for &a in axes {
                reduced[axis_of(node, a, input.len())?] = true;
            }
            let out = input
                .iter()
                .zip(&reduced)
                .filter_map(|(&d, &r)| match (r, keepdims) {
                    (false, _) => Some(d),
                    (true, true) => Some(1),
                    (true, false) => None,
                })
                .collect();
            one(out)
        }
        ShapeRule::Loss => {
            if int_attr(node, "reduction")? == 2 {
                one(first()?)
            } else {
                one(Vec::new())
            }
        }
        ShapeRule::FromShapeAttr => one(non_negative(node, ints_attr(node, "shape")?)?),
        ShapeRule::FromTensorAttr => {
            let value = node.t("value").ok_or_else(|| BuildError::Attribute {
                kind: node.kind.to_string(),
                name: "value".into(),
                problem: "is missing or not a tensor".into(),
            })?;
            one(value.shape().to_vec())
        }
        ShapeRule::Explicit => Ok(vec![Shape::Unknown; num_outputs]),
    }
}

fn matmul_shape(node: &Node, a: &[usize], b: &[usize]) -> Result<Vec<usize>, BuildError> {
    let mismatch = || shape_error(node, format!("cannot multiply {a:?} by {b:?}"));
    match (a.len(), b.len()) {
        (0, _) | (_, 0) => Err(mismatch()),
        (1, 1) if a == b => Ok(Vec::new()),
        (1, 1) => Err(mismatch()),
        (1, _) => {
            let (k, m) = (b[b.len() - 2], b[b.len() - 1]);
            if a[0] != k {
                return Err(mismatch());
            }
            let mut out = b[..b.len() - 2].to_vec();
            out.push(m);
            Ok(out)
        }
        (_, 1) => {
            let (n, k) = (a[a.len() - 2], a[a.len() - 1]);
            if b[0] != k {
                return Err(mismatch());
            }
            let mut out = a[..a.len() - 2].to_vec();
            out.push(n);
            Ok(out)
        }
        (ra, rb) => {
            let (n, k) = (a[ra - 2], a[ra - 1]);
            let (k2, m) = (b[rb - 2], b[rb - 1]);
            if k != k2 {
                return Err(mismatch());
            }
            let mut out = broadcast(&a[..ra - 2], &b[..rb - 2]).ok_or_else(mismatch)?;
            out.extend([n, m]);
            Ok(out)
        }
    }
}

/// Resolves a target shape with `0` (copy input dim) and one `-1` (infer).
fn reshape_shape(node: &Node, input: &[usize], target: &[i64]) -> Result<Vec<usize>, BuildError> {
    let mut out = Vec::with_capacity(target.len());
    let mut infer = None;
    for (i, &d) in target.iter().enumerate() {
        match d {
            -1 if infer.is_none() => {
                infer = Some(i);
                out.push(1);
            }
            0 => out.push(
                *input
                    .get(i)
                    .ok_or_else(|| shape_error(node, format!("cannot copy dimension {i}")))?,
            ),
            d if d > 0 => out.push(d as usize),
            _ => return Err(shape_error(node, format!("invalid target shape {target:?}"))),
        }
    }

    let numel: usize = input.iter().product();
    let known: usize = out.iter().product();
    match infer {
        Some(i) => {
            if known == 0 || numel % known != 0 {
                return Err(shape_error(node, format!("cannot reshape {input:?} to {target:?}")));
            }
            out[i] = numel / known;
        }
        None if known != numel => {
            return Err(shape_error(node, format!("cannot reshape {input:?} to {target:?}")));
        }
        None => {}
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use popcanon_ir::{Attribute, Graph, NodeKind};

    use super::*;

    fn node_with(kind: &'static str, attrs: &[(&str, Attribute)]) -> Node {
        let mut graph = Graph::new();
        let h = graph.insert_node(NodeKind::popart(kind), vec![], vec![]);
        for (name, attr) in attrs {
            graph.node_mut(h).set_attr(*name, attr.clone());
        }
        graph.node(h).clone()
    }

    fn known(dims: &[usize]) -> Shape {
        Shape::Known(dims.to_vec())
    }

    #[test]
    fn normalize_axes() {
        assert_eq!(normalize_axis(-1, 3), Some(2));
        assert_eq!(normalize_axis(2, 3), Some(2));
        assert_eq!(normalize_axis(3, 3), None);
        assert_eq!(normalize_axis(-4, 3), None);
    }

    #[test]
    fn broadcast_shapes() {
        assert_eq!(broadcast(&[4, 1], &[3]), Some(vec![4, 3]));
        assert_eq!(broadcast(&[], &[2, 2]), Some(vec![2, 2]));
        assert_eq!(broadcast(&[2], &[3]), None);
    }

    #[test]
    fn reshape_infers_minus_one() {
        let node = node_with("reshape", &[("shape", Attribute::Ints(vec![3, -1]))]);
        let out = infer_shapes(ShapeRule::Reshape, &node, &[known(&[2, 3])], 1).unwrap();
        assert_eq!(out, vec![known(&[3, 2])]);
    }

    #[test]
    fn reshape_rejects_wrong_element_count() {
        let node = node_with("reshape", &[("shape", Attribute::Ints(vec![4]))]);
        assert!(infer_shapes(ShapeRule::Reshape, &node, &[known(&[2, 3])], 1).is_err());
    }

    #[test]
    fn matmul_batches_broadcast() {
        let node = node_with("matmul", &[]);
        let out = infer_shapes(ShapeRule::MatMul, &node, &[known(&[2, 4, 8]), known(&[8, 3])], 1).unwrap();
        assert_eq!(out, vec![known(&[2, 4, 3])]);
        let vec = infer_shapes(ShapeRule::MatMul, &node, &[known(&[8]), known(&[8, 3])], 1).unwrap();
        assert_eq!(vec, vec![known(&[3])]);
    }

    #[test]
    fn split_and_concat() {
        let split = node_with(
            "split",
            &[("axis", Attribute::Int(-1)), ("split", Attribute::Ints(vec![1, 3]))],
        );
        let out = infer_shapes(ShapeRule::Split, &split, &[known(&[2, 4])], 2).unwrap();
        assert_eq!(out, vec![known(&[2, 1]), known(&[2, 3])]);

        let concat = node_with("concat", &[("axis", Attribute::Int(0))]);
        let out = infer_shapes(ShapeRule::Concat, &concat, &[known(&[2, 4]), known(&[1, 4])], 1).unwrap();
        assert_eq!(out, vec![known(&[3, 4])]);
    }

    #[test]
    fn reduce_and_squeeze() {
        let reduce = node_with(
            "reducesum",
            &[("axes", Attribute::Ints(vec![])), ("keepdims", Attribute::Int(0))],
        );
        let out = infer_shapes(ShapeRule::Reduce, &reduce, &[known(&[2, 3])], 1).unwrap();
        assert_eq!(out, vec![Shape::scalar()]);

        let squeeze = node_with("squeeze", &[("axes", Attribute::Ints(vec![1]))]);
        let out = infer_shapes(ShapeRule::Squeeze, &squeeze, &[known(&[2, 1, 3])], 1).unwrap();
        assert_eq!(out, vec![known(&[2, 3])]);
    }

    #[test]
    fn pad_and_slice() {
        let pad = node_with(
            "pad",
            &[("pads", Attribute::Ints(vec![1, 0, 1, 2])), ("mode", Attribute::Str("constant".into()))],
        );
        let out = infer_shapes(ShapeRule::Pad, &pad, &[known(&[2, 3])], 1).unwrap();
        assert_eq!(out, vec![known(&[4, 5])]);

        let slice = node_with(
            "slice",
            &[
                ("starts", Attribute::Ints(vec![1])),
                ("ends", Attribute::Ints(vec![i64::MAX])),
                ("axes", Attribute::Ints(vec![0])),
            ],
        );
        let out = infer_shapes(ShapeRule::Slice, &slice, &[known(&[5, 2])], 1).unwrap();
        assert_eq!(out, vec![known(&[4, 2])]);
    }

    #[test]
    fn unknown_rank_propagates() {
        let node = node_with("add", &[]);
        let out = infer_shapes(ShapeRule::Broadcast, &node, &[Shape::Unknown, known(&[2])], 1).unwrap();
        assert_eq!(out, vec![Shape::Unknown]);
    }
}
