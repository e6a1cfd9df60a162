//! Compile-time evaluation of source nodes.
//!
//! A node folds when its kind is foldable and every input is a known
//! constant. Tensor results keep the element type and shape the trace
//! declared for the node's output.

use popcanon_ir::{
    Attribute, Dialect, ElementType, Graph, Handle, ListElem, Node, TensorConstant, Value,
    ValueType,
};
use popcanon_ops::builder::tensor_to_constant;
use popcanon_ops::kinds;
use popcanon_ops::shape::{broadcast, normalize_axis};

use crate::CanonError;

/// A value known at compile time.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Str(String),
    Tensor(TensorConstant),
    None,
}

impl ConstValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Numeric scalar view. Single-element tensors count as scalars.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            Self::Tensor(t) if t.numel() == 1 => t.data().to_f64_vec().first().copied(),
            _ => None,
        }
    }

    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            Self::Ints(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// The compile-time value of `value`, if its producer is a constant.
pub fn constant_value(graph: &Graph, value: Handle<Value>) -> Option<ConstValue> {
    let node = graph.node(graph.producer_node(value)?);
    if node.kind == kinds::TENSOR_CONSTANT {
        return node.t("value").cloned().map(ConstValue::Tensor);
    }
    if node.kind != kinds::source::CONSTANT {
        return None;
    }
    let is_bool = matches!(graph.value_type(value), ValueType::Scalar(ElementType::Bool));
    match node.attr("value") {
        None if *graph.value_type(value) == ValueType::None => Some(ConstValue::None),
        Some(Attribute::Int(v)) if is_bool => Some(ConstValue::Bool(*v != 0)),
        Some(Attribute::Int(v)) => Some(ConstValue::Int(*v)),
        Some(Attribute::Float(v)) => Some(ConstValue::Float(*v)),
        Some(Attribute::Ints(v)) => Some(ConstValue::Ints(v.clone())),
        Some(Attribute::Floats(v)) => Some(ConstValue::Floats(v.clone())),
        Some(Attribute::Str(s)) => Some(ConstValue::Str(s.clone())),
        Some(Attribute::Tensor(t)) => Some(ConstValue::Tensor(t.clone())),
        _ => None,
    }
}

/// Evaluates `node` if it is foldable and all of its inputs are constant.
pub fn fold_node(graph: &Graph, node: Handle<Node>) -> Option<ConstValue> {
    let n = graph.node(node);
    if n.kind.dialect != Dialect::Aten && n.kind.dialect != Dialect::Prim {
        return None;
    }
    if n.outputs().len() != 1 || n.kind == kinds::source::CONSTANT {
        return None;
    }
    let out_ty = graph.value_type(n.output());

    // Depends only on the static shape of its first input.
    if n.kind.name() == "size" && n.kind.dialect == Dialect::Aten {
        return fold_size(graph, n);
    }

    let args = n
        .inputs()
        .iter()
        .map(|&v| constant_value(graph, v))
        .collect::<Option<Vec<_>>>()?;

    match (n.kind.dialect, n.kind.name()) {
        (Dialect::Prim, "ListConstruct") => fold_list(&args, out_ty),
        (Dialect::Prim, "NumToTensor") => {
            let elem = out_ty.elem()?;
            let v = args.first()?.as_f64()?;
            Some(ConstValue::Tensor(TensorConstant::scalar(elem, v)))
        }
        (Dialect::Aten, "Int") => args.first()?.as_f64().map(|v| ConstValue::Int(v.trunc() as i64)),
        (Dialect::Aten, "Float") => args.first()?.as_f64().map(ConstValue::Float),
        (Dialect::Aten, "neg") => unary_neg(args.first()?, out_ty),
        (Dialect::Aten, "add" | "sub") => {
            let alpha = args.get(2).map_or(Some(1.0), ConstValue::as_f64)?;
            let rhs = scale(args.get(1)?, alpha)?;
            let op = if n.kind.name() == "add" { BinOp::Add } else { BinOp::Sub };
            binary(op, args.first()?, &rhs, out_ty)
        }
        (Dialect::Aten, "mul") => binary(BinOp::Mul, args.first()?, args.get(1)?, out_ty),
        (Dialect::Aten, "div") if args.len() == 2 => {
            binary(BinOp::Div, args.first()?, args.get(1)?, out_ty)
        }
        (Dialect::Aten, "reshape" | "view") => {
            let ConstValue::Tensor(t) = args.first()? else {
                return None;
            };
            let dims = resolve_shape(args.get(1)?.as_ints()?, t.numel())?;
            t.reshaped(dims).ok().map(ConstValue::Tensor)
        }
        (Dialect::Aten, "zeros" | "ones") => {
            let fill = if n.kind.name() == "zeros" { 0.0 } else { 1.0 };
            filled(args.first()?, fill, out_ty)
        }
        (Dialect::Aten, "full") => filled(args.first()?, args.get(1)?.as_f64()?, out_ty),
        _ => None,
    }
}

fn fold_size(graph: &Graph, n: &Node) -> Option<ConstValue> {
    let dims = graph.value_type(*n.inputs().first()?).dims()?.to_vec();
    match n.inputs().get(1) {
        None => Some(ConstValue::Ints(dims.iter().map(|&d| d as i64).collect())),
        Some(&dim) => {
            let axis = normalize_axis(constant_value(graph, dim)?.as_int()?, dims.len())?;
            Some(ConstValue::Int(dims[axis] as i64))
        }
    }
}

fn fold_list(args: &[ConstValue], out_ty: &ValueType) -> Option<ConstValue> {
    let floats = matches!(out_ty, ValueType::List(ListElem::Float))
        || args.iter().any(|a| matches!(a, ConstValue::Float(_)));
    if floats {
        return args
            .iter()
            .map(|a| match a {
                ConstValue::Tensor(_) => None,
                other => other.as_f64(),
            })
            .collect::<Option<Vec<_>>>()
            .map(ConstValue::Floats);
    }
    args.iter()
        .map(ConstValue::as_int)
        .collect::<Option<Vec<_>>>()
        .map(ConstValue::Ints)
}

/// Resolves one `-1` entry against `numel`.
fn resolve_shape(shape: &[i64], numel: usize) -> Option<Vec<usize>> {
    let known: i64 = shape.iter().filter(|&&d| d != -1).product();
    let mut inferred = false;
    shape
        .iter()
        .map(|&d| match d {
            -1 if !inferred && known > 0 => {
                inferred = true;
                usize::try_from(numel as i64 / known).ok()
            }
            d => usize::try_from(d).ok(),
        })
        .collect()
}

fn filled(size: &ConstValue, value: f64, out_ty: &ValueType) -> Option<ConstValue> {
    let dims = size
        .as_ints()?
        .iter()
        .map(|&d| usize::try_from(d).ok())
        .collect::<Option<Vec<_>>>()?;
    Some(ConstValue::Tensor(TensorConstant::filled(out_ty.elem()?, dims, value)))
}

#[derive(Clone, Copy, Debug)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Self::Add => a + b,
            Self::Sub => a - b,
            Self::Mul => a * b,
            Self::Div => a / b,
        }
    }

    fn apply_int(self, a: i64, b: i64) -> Option<i64> {
        match self {
            Self::Add => a.checked_add(b),
            Self::Sub => a.checked_sub(b),
            Self::Mul => a.checked_mul(b),
            Self::Div => None,
        }
    }
}

fn scale(value: &ConstValue, alpha: f64) -> Option<ConstValue> {
    if alpha == 1.0 {
        return Some(value.clone());
    }
    match value {
        ConstValue::Int(v) if alpha.fract() == 0.0 => Some(ConstValue::Int(v.checked_mul(alpha as i64)?)),
        ConstValue::Tensor(t) if alpha.fract() == 0.0 && t.elem().is_integral() => {
            let factor = alpha as i64;
            let values = t
                .data()
                .to_i64_vec()?
                .into_iter()
                .map(|v| v.checked_mul(factor))
                .collect::<Option<Vec<_>>>()?;
            TensorConstant::from_i64(t.elem(), t.shape().to_vec(), &values)
                .ok()
                .map(ConstValue::Tensor)
        }
        ConstValue::Tensor(t) => {
            let values: Vec<f64> = t.data().to_f64_vec().iter().map(|v| v * alpha).collect();
            TensorConstant::from_f64(t.elem(), t.shape().to_vec(), &values)
                .ok()
                .map(ConstValue::Tensor)
        }
        other => other.as_f64().map(|v| ConstValue::Float(v * alpha)),
    }
}

fn unary_neg(value: &ConstValue, out_ty: &ValueType) -> Option<ConstValue> {
    match value {
        ConstValue::Int(v) => v.checked_neg().map(ConstValue::Int),
        ConstValue::Float(v) => Some(ConstValue::Float(-v)),
        ConstValue::Tensor(t) => {
            let elem = out_ty.elem().unwrap_or(t.elem());
            if elem.is_integral() {
                let values = t
                    .data()
                    .to_i64_vec()?
                    .into_iter()
                    .map(i64::checked_neg)
                    .collect::<Option<Vec<_>>>()?;
                return TensorConstant::from_i64(elem, t.shape().to_vec(), &values)
                    .ok()
                    .map(ConstValue::Tensor);
            }
            let values: Vec<f64> = t.data().to_f64_vec().iter().map(|v| -v).collect();
            TensorConstant::from_f64(elem, t.shape().to_vec(), &values)
                .ok()
                .map(ConstValue::Tensor)
        }
        _ => None,
    }
}

/// Flat index into `dims` for output position `flat` of a broadcast of
/// `dims` to `out`.
fn broadcast_index(out: &[usize], dims: &[usize], mut flat: usize) -> usize {
    let offset = out.len() - dims.len();
    let mut index = 0;
    let mut stride = 1;
    for axis in (0..out.len()).rev() {
        let coord = flat % out[axis];
        flat /= out[axis];
        if axis >= offset {
            let d = dims[axis - offset];
            if d != 1 {
                index += coord * stride;
            }
            stride *= d;
        }
    }
    index
}

fn binary(op: BinOp, a: &ConstValue, b: &ConstValue, out_ty: &ValueType) -> Option<ConstValue> {
    match (a, b) {
        (ConstValue::Int(x), ConstValue::Int(y)) => match op {
            BinOp::Div => Some(ConstValue::Float(*x as f64 / *y as f64)),
            _ => op.apply_int(*x, *y).map(ConstValue::Int),
        },
        (ConstValue::Tensor(_), _) | (_, ConstValue::Tensor(_)) => {
            let elem = out_ty.elem()?;
            // Integer results are computed on the integer payloads so that
            // 64-bit values survive unchanged.
            if elem.is_integral()
                && let (Some(a), Some(b)) = (int_view(a), int_view(b))
            {
                let (dims, values) = elementwise(a, b, out_ty, |x, y| op.apply_int(x, y))?;
                return TensorConstant::from_i64(elem, dims, &values)
                    .ok()
                    .map(ConstValue::Tensor);
            }
            let (a, b) = (float_view(a)?, float_view(b)?);
            let (dims, values) = elementwise(a, b, out_ty, |x, y| Some(op.apply(x, y)))?;
            TensorConstant::from_f64(elem, dims, &values)
                .ok()
                .map(ConstValue::Tensor)
        }
        _ => Some(ConstValue::Float(op.apply(a.as_f64()?, b.as_f64()?))),
    }
}

/// Dimensions and flat payload of a constant operand.
type View<T> = (Vec<usize>, Vec<T>);

/// Broadcasts `a` against `b` and applies `f` per element. `None` when
/// the shapes disagree with each other or with the declared output, or
/// when `f` fails.
fn elementwise<T: Copy>(
    (a_dims, a_vals): View<T>,
    (b_dims, b_vals): View<T>,
    out_ty: &ValueType,
    f: impl Fn(T, T) -> Option<T>,
) -> Option<View<T>> {
    let dims = broadcast(&a_dims, &b_dims)?;
    if out_ty.dims().is_some_and(|declared| declared != dims.as_slice()) {
        return None;
    }
    let numel: usize = dims.iter().product();
    let values = (0..numel)
        .map(|i| {
            f(
                a_vals[broadcast_index(&dims, &a_dims, i)],
                b_vals[broadcast_index(&dims, &b_dims, i)],
            )
        })
        .collect::<Option<Vec<_>>>()?;
    Some((dims, values))
}

fn float_view(value: &ConstValue) -> Option<View<f64>> {
    match value {
        ConstValue::Tensor(t) => Some((t.shape().to_vec(), t.data().to_f64_vec())),
        other => Some((Vec::new(), vec![other.as_f64()?])),
    }
}

fn int_view(value: &ConstValue) -> Option<View<i64>> {
    match value {
        ConstValue::Tensor(t) => Some((t.shape().to_vec(), t.data().to_i64_vec()?)),
        other => Some((Vec::new(), vec![other.as_int()?])),
    }
}

/// Inserts a node producing `value` with type `ty` at the insertion point.
///
/// Tensors become `poptorch::tensor_constant`; scalars, lists and `None`
/// become `prim::Constant` for the rules that consume them.
pub(crate) fn materialize(
    graph: &mut Graph,
    value: ConstValue,
    ty: &ValueType,
) -> Result<Handle<Value>, CanonError> {
    let attr = match value {
        ConstValue::Tensor(t) => {
            let node = tensor_to_constant(graph, t)?;
            return Ok(graph.node(node).output());
        }
        ConstValue::Int(v) => Some(Attribute::Int(v)),
        ConstValue::Bool(b) => Some(Attribute::Int(i64::from(b))),
        ConstValue::Float(v) => Some(Attribute::Float(v)),
        ConstValue::Ints(v) => Some(Attribute::Ints(v)),
        ConstValue::Floats(v) => Some(Attribute::Floats(v)),
        ConstValue::Str(s) => Some(Attribute::Str(s)),
        ConstValue::None => None,
    };
    let node = graph.insert_node(kinds::source::CONSTANT, Vec::new(), vec![ty.clone()]);
    if let Some(attr) = attr {
        graph.node_mut(node).set_attr("value", attr);
    }
    Ok(graph.node(node).output())
}
