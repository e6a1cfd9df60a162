//! Typed node construction.
//!
//! Every constructor inserts at the graph's insertion point, applies the
//! implicit-cast policy by inserting `popart::cast` nodes ahead of the new
//! node, and types the outputs from the registry's typing and shape rules.

use popcanon_ir::{
    Attribute, ElementType, Graph, Handle, Node, NodeKind, Shape, TensorConstant, Value, ValueType,
};

use crate::cast::{
    ImplicitCast, ImplicitCastOutput, forced_output, needs_cast, resolve_implicit_cast,
};
use crate::error::BuildError;
use crate::kinds;
use crate::registry::{OpRegistry, OpSchema, TypeRule};
use crate::shape::infer_shapes;

/// Attributes supplied at construction.
pub type Attrs = Vec<(&'static str, Attribute)>;

/// A host literal in a variadic literal sequence.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
}

fn schema(kind: &NodeKind) -> Result<&'static OpSchema, BuildError> {
    OpRegistry::global()
        .get(kind)
        .ok_or_else(|| BuildError::UnknownOp(kind.to_string()))
}

/// Creates a node of `kind` with explicit cast policies and output count.
pub fn create_and_insert_node(
    graph: &mut Graph,
    kind: NodeKind,
    inputs: &[Handle<Value>],
    implicit_cast: ImplicitCast,
    implicit_cast_output: ImplicitCastOutput,
    num_outputs: usize,
) -> Result<Handle<Node>, BuildError> {
    create_node(
        graph,
        kind,
        inputs,
        Vec::new(),
        implicit_cast,
        implicit_cast_output,
        num_outputs,
    )
}

/// Creates a node of `kind` using the registered cast policies and output
/// arity.
pub fn create_op(
    graph: &mut Graph,
    kind: NodeKind,
    inputs: &[Handle<Value>],
    attrs: Attrs,
) -> Result<Handle<Node>, BuildError> {
    let schema = schema(&kind)?;
    let (cast_in, cast_out, outputs) = (
        schema.implicit_cast,
        schema.cast_output,
        schema.default_outputs(),
    );
    create_node(graph, kind, inputs, attrs, cast_in, cast_out, outputs)
}

/// Builds the node and its operand casts. On failure every node created
/// on the way is removed again; none of them has a user yet.
fn create_node(
    graph: &mut Graph,
    kind: NodeKind,
    inputs: &[Handle<Value>],
    attrs: Attrs,
    implicit_cast: ImplicitCast,
    cast_output: ImplicitCastOutput,
    num_outputs: usize,
) -> Result<Handle<Node>, BuildError> {
    let mark = graph.node_mark();
    let result = build_node(graph, kind, inputs, attrs, implicit_cast, cast_output, num_outputs);
    if result.is_err() {
        for node in graph.nodes_since(mark).into_iter().rev() {
            let _ = graph.destroy_node(node);
        }
    }
    result
}

fn build_node(
    graph: &mut Graph,
    kind: NodeKind,
    inputs: &[Handle<Value>],
    attrs: Attrs,
    implicit_cast: ImplicitCast,
    cast_output: ImplicitCastOutput,
    num_outputs: usize,
) -> Result<Handle<Node>, BuildError> {
    let schema = schema(&kind)?;
    if !schema.inputs.accepts(inputs.len()) {
        return Err(BuildError::InputArity {
            kind: kind.to_string(),
            expected: schema.inputs.to_string(),
            found: inputs.len(),
        });
    }

    let input_types = element_types(graph, inputs);
    let mut operands = inputs.to_vec();
    if let Some(target) = resolve_implicit_cast(implicit_cast, &input_types)? {
        for (i, ty) in input_types.iter().enumerate() {
            if implicit_cast.participates(i)
                && let Some(ty) = *ty
                && needs_cast(ty, target)
            {
                operands[i] = cast_to_type(graph, operands[i], target)?;
            }
        }
    }

    log::trace!("creating {kind} with {} input(s)", operands.len());
    let node = graph.insert_node(kind, operands, vec![ValueType::None; num_outputs]);
    for (name, attr) in attrs {
        graph.node_mut(node).set_attr(name, attr);
    }
    type_outputs(graph, node, implicit_cast, cast_output)?;
    Ok(node)
}

fn element_types(graph: &Graph, values: &[Handle<Value>]) -> Vec<Option<ElementType>> {
    values.iter().map(|&v| graph.value_type(v).elem()).collect()
}

/// Re-derives the output types of a target node from its current inputs and
/// attributes, using the registered policies.
pub fn retype_node(graph: &mut Graph, node: Handle<Node>) -> Result<(), BuildError> {
    let schema = schema(&graph.node(node).kind)?;
    type_outputs(graph, node, schema.implicit_cast, schema.cast_output)
}

fn type_outputs(
    graph: &mut Graph,
    node: Handle<Node>,
    implicit_cast: ImplicitCast,
    cast_output: ImplicitCastOutput,
) -> Result<(), BuildError> {
    let n = graph.node(node);
    let schema = schema(&n.kind)?;
    let typing_error = |message: &str| BuildError::Typing {
        kind: n.kind.to_string(),
        message: message.into(),
    };

    let input_types = element_types(graph, n.inputs());
    let promoted = resolve_implicit_cast(implicit_cast, &input_types)?;
    let first = input_types
        .iter()
        .enumerate()
        .filter(|(i, _)| implicit_cast == ImplicitCast::None || implicit_cast.participates(*i))
        .find_map(|(_, ty)| *ty);

    let elem = match forced_output(cast_output, promoted, first) {
        Some(ty) => ty,
        None => match schema.type_rule {
            TypeRule::SameAsFirst => promoted
                .or(first)
                .or_else(|| list_element_type(graph, n))
                .ok_or_else(|| typing_error("no typed input"))?,
            TypeRule::FromAttr(name) => n
                .s(name)
                .and_then(ElementType::from_target_name)
                .ok_or_else(|| BuildError::Attribute {
                    kind: n.kind.to_string(),
                    name: name.into(),
                    problem: "does not name an element type".into(),
                })?,
            TypeRule::FromTensorAttr => n
                .t("value")
                .map(TensorConstant::elem)
                .ok_or_else(|| typing_error("missing tensor attribute 'value'"))?,
            TypeRule::Fixed(ty) => ty,
            TypeRule::Explicit => return Ok(()),
        },
    };

    // A list operand is folded into attributes or spliced into the inputs
    // later; until then only the element type is known.
    let outputs = n.outputs().to_vec();
    if n.inputs().iter().any(|&v| graph.value_type(v).is_list()) {
        for value in outputs {
            graph.set_value_type(value, ValueType::tensor_unranked(elem));
        }
        return Ok(());
    }

    let shapes: Vec<Shape> = n
        .inputs()
        .iter()
        .filter_map(|&v| match graph.value_type(v) {
            ValueType::Tensor { shape, .. } => Some(shape.clone()),
            ValueType::Scalar(_) => Some(Shape::scalar()),
            ValueType::List(_) | ValueType::None => None,
        })
        .collect();
    let shapes = infer_shapes(schema.shape_rule, n, &shapes, outputs.len())?;
    for (value, shape) in outputs.into_iter().zip(shapes) {
        graph.set_value_type(value, ValueType::Tensor { elem, shape });
    }
    Ok(())
}

/// Element type of the tensors gathered by a pending `prim::ListConstruct`
/// operand.
fn list_element_type(graph: &Graph, node: &Node) -> Option<ElementType> {
    node.inputs()
        .iter()
        .filter(|&&v| graph.value_type(v).is_list())
        .filter_map(|&v| graph.producer_node(v))
        .map(|p| graph.node(p))
        .filter(|p| p.kind == kinds::source::LIST_CONSTRUCT)
        .flat_map(|p| p.inputs().iter().filter_map(|&v| graph.value_type(v).elem()))
        .next()
}

/// Applies the registered implicit-cast policy to an existing node,
/// inserting casts directly before it. Returns `true` if any input changed.
pub fn insert_implicit_casts(graph: &mut Graph, node: Handle<Node>) -> Result<bool, BuildError> {
    let policy = schema(&graph.node(node).kind)?.implicit_cast;
    let inputs = graph.node(node).inputs().to_vec();
    let input_types = element_types(graph, &inputs);
    let Some(target) = resolve_implicit_cast(policy, &input_types)? else {
        return Ok(false);
    };

    let mut changed = false;
    for (i, ty) in input_types.into_iter().enumerate() {
        if policy.participates(i)
            && let Some(ty) = ty
            && needs_cast(ty, target)
        {
            let cast = graph.insert_before(node, |g| cast_to_type(g, inputs[i], target))?;
            graph.replace_input(node, i, cast);
            changed = true;
        }
    }
    Ok(changed)
}

/// `popart::cast` of `value` to `to`.
pub fn create_cast(
    graph: &mut Graph,
    value: Handle<Value>,
    to: ElementType,
) -> Result<Handle<Node>, BuildError> {
    create_op(
        graph,
        kinds::CAST,
        &[value],
        vec![("to", Attribute::Str(to.target_name().into()))],
    )
}

/// `value` as `to`, inserting a cast only when the element type differs.
pub fn cast_to_type(
    graph: &mut Graph,
    value: Handle<Value>,
    to: ElementType,
) -> Result<Handle<Value>, BuildError> {
    if graph.value_type(value).elem() == Some(to) {
        return Ok(value);
    }
    let cast = create_cast(graph, value, to)?;
    Ok(graph.node(cast).output())
}

/// Materializes a compile-time tensor as a `poptorch::tensor_constant`.
pub fn tensor_to_constant(
    graph: &mut Graph,
    tensor: TensorConstant,
) -> Result<Handle<Node>, BuildError> {
    create_op(
        graph,
        kinds::TENSOR_CONSTANT,
        &[],
        vec![("value", Attribute::Tensor(tensor))],
    )
}

pub fn create_constant_int(
    graph: &mut Graph,
    data: &[i64],
    shape: &[usize],
) -> Result<Handle<Node>, BuildError> {
    let tensor = TensorConstant::from_i64(ElementType::Int32, shape.to_vec(), data)?;
    tensor_to_constant(graph, tensor)
}

pub fn create_constant_float(
    graph: &mut Graph,
    data: &[f64],
    shape: &[usize],
) -> Result<Handle<Node>, BuildError> {
    let tensor = TensorConstant::from_f64(ElementType::Float32, shape.to_vec(), data)?;
    tensor_to_constant(graph, tensor)
}

pub fn create_constant_float16(
    graph: &mut Graph,
    data: &[f64],
    shape: &[usize],
) -> Result<Handle<Node>, BuildError> {
    let tensor = TensorConstant::from_f64(ElementType::Float16, shape.to_vec(), data)?;
    tensor_to_constant(graph, tensor)
}

/// A float constant whose precision follows its consumers.
pub fn create_constant_half_or_float(
    graph: &mut Graph,
    data: &[f64],
    shape: &[usize],
) -> Result<Handle<Node>, BuildError> {
    let tensor = TensorConstant::from_f64(ElementType::HalfOrFloat, shape.to_vec(), data)?;
    tensor_to_constant(graph, tensor)
}

/// Constant of any element type; dispatches to the typed constructors.
pub fn create_constant(
    graph: &mut Graph,
    elem: ElementType,
    data: &[f64],
    shape: &[usize],
) -> Result<Handle<Node>, BuildError> {
    match elem {
        ElementType::Float32 => create_constant_float(graph, data, shape),
        ElementType::Float16 => create_constant_float16(graph, data, shape),
        ElementType::HalfOrFloat => create_constant_half_or_float(graph, data, shape),
        ElementType::Int32 => {
            let ints: Vec<i64> = data.iter().map(|&v| v as i64).collect();
            create_constant_int(graph, &ints, shape)
        }
        ElementType::Bool | ElementType::Uint8 | ElementType::Int8 | ElementType::Int64 => {
            let tensor = TensorConstant::from_f64(elem, shape.to_vec(), data)?;
            tensor_to_constant(graph, tensor)
        }
    }
}

/// 1-D constant from a homogeneous literal sequence. The first literal
/// decides between an integer and a float constant.
pub fn wrap_in_constant_1d(
    graph: &mut Graph,
    values: &[Literal],
) -> Result<Handle<Value>, BuildError> {
    let mixed = || BuildError::MalformedLiteral("mixed integer and float literals".into());
    let node = match values.first() {
        None => return Err(BuildError::MalformedLiteral("empty literal sequence".into())),
        Some(Literal::Int(_)) => {
            let ints = values
                .iter()
                .map(|l| match l {
                    Literal::Int(v) => Some(*v),
                    Literal::Float(_) => None,
                })
                .collect::<Option<Vec<_>>>()
                .ok_or_else(mixed)?;
            create_constant_int(graph, &ints, &[ints.len()])?
        }
        Some(Literal::Float(_)) => {
            let floats = values
                .iter()
                .map(|l| match l {
                    Literal::Float(v) => Some(*v),
                    Literal::Int(_) => None,
                })
                .collect::<Option<Vec<_>>>()
                .ok_or_else(mixed)?;
            create_constant_float(graph, &floats, &[floats.len()])?
        }
    };
    Ok(graph.node(node).output())
}

pub fn create_reshape(
    graph: &mut Graph,
    value: Handle<Value>,
    shape: &[i64],
) -> Result<Handle<Node>, BuildError> {
    create_op(
        graph,
        kinds::RESHAPE,
        &[value],
        vec![("shape", Attribute::Ints(shape.to_vec()))],
    )
}

pub fn create_concat_typed_output(
    graph: &mut Graph,
    args: &[Handle<Value>],
    axis: i64,
) -> Result<Handle<Node>, BuildError> {
    create_op(graph, kinds::CONCAT, args, vec![("axis", Attribute::Int(axis))])
}

pub fn create_flatten_typed_output(
    graph: &mut Graph,
    args: &[Handle<Value>],
    axis: i64,
) -> Result<Handle<Node>, BuildError> {
    create_op(graph, kinds::FLATTEN, args, vec![("axis", Attribute::Int(axis))])
}

pub fn create_split_typed_output(
    graph: &mut Graph,
    args: &[Handle<Value>],
    num_outputs: usize,
    axis: i64,
    split: &[i64],
) -> Result<Handle<Node>, BuildError> {
    create_node(
        graph,
        kinds::SPLIT,
        args,
        vec![
            ("axis", Attribute::Int(axis)),
            ("split", Attribute::Ints(split.to_vec())),
        ],
        ImplicitCast::None,
        ImplicitCastOutput::None,
        num_outputs,
    )
}

pub fn create_transpose_typed_output(
    graph: &mut Graph,
    args: &[Handle<Value>],
    perm: &[i64],
) -> Result<Handle<Node>, BuildError> {
    create_op(
        graph,
        kinds::TRANSPOSE,
        args,
        vec![("perm", Attribute::Ints(perm.to_vec()))],
    )
}

/// Unary operator whose output has the type and shape of its input.
pub fn create_unary_same_typed_output(
    graph: &mut Graph,
    kind: NodeKind,
    args: &[Handle<Value>],
) -> Result<Handle<Node>, BuildError> {
    create_op(graph, kind, args, Vec::new())
}

fn create_pad(
    graph: &mut Graph,
    value: Handle<Value>,
    pads: &[i64],
    mode: &str,
    constant: Option<f64>,
) -> Result<Handle<Node>, BuildError> {
    let mut attrs: Attrs = vec![
        ("pads", Attribute::Ints(pads.to_vec())),
        ("mode", Attribute::Str(mode.into())),
    ];
    if let Some(c) = constant {
        attrs.push(("value", Attribute::Float(c)));
    }
    create_op(graph, kinds::PAD, &[value], attrs)
}

pub fn create_constant_pad(
    graph: &mut Graph,
    value: Handle<Value>,
    pads: &[i64],
    constant: f64,
) -> Result<Handle<Node>, BuildError> {
    create_pad(graph, value, pads, "constant", Some(constant))
}

pub fn create_reflection_pad(
    graph: &mut Graph,
    value: Handle<Value>,
    pads: &[i64],
) -> Result<Handle<Node>, BuildError> {
    create_pad(graph, value, pads, "reflect", None)
}

pub fn create_edge_pad(
    graph: &mut Graph,
    value: Handle<Value>,
    pads: &[i64],
) -> Result<Handle<Node>, BuildError> {
    create_pad(graph, value, pads, "edge", None)
}

/// Out-of-place addition, even where the traced op updated in place.
pub fn create_add_not_in_place(
    graph: &mut Graph,
    a: Handle<Value>,
    b: Handle<Value>,
) -> Result<Handle<Node>, BuildError> {
    create_op(graph, kinds::ADD, &[a, b], Vec::new())
}

pub fn create_random_normal(
    graph: &mut Graph,
    shape: &[i64],
    mean: f64,
    scale: f64,
    dtype: ElementType,
) -> Result<Handle<Node>, BuildError> {
    create_op(
        graph,
        kinds::RANDOM_NORMAL,
        &[],
        vec![
            ("shape", Attribute::Ints(shape.to_vec())),
            ("dtype", Attribute::Str(dtype.target_name().into())),
            ("mean", Attribute::Float(mean)),
            ("scale", Attribute::Float(scale)),
        ],
    )
}

pub fn create_random_uniform(
    graph: &mut Graph,
    shape: &[i64],
    high: f64,
    low: f64,
    dtype: ElementType,
) -> Result<Handle<Node>, BuildError> {
    create_op(
        graph,
        kinds::RANDOM_UNIFORM,
        &[],
        vec![
            ("shape", Attribute::Ints(shape.to_vec())),
            ("dtype", Attribute::Str(dtype.target_name().into())),
            ("high", Attribute::Float(high)),
            ("low", Attribute::Float(low)),
        ],
    )
}

pub fn create_set_available_memory(
    graph: &mut Graph,
    value: Handle<Value>,
    proportion: f64,
) -> Result<Handle<Node>, BuildError> {
    create_op(
        graph,
        kinds::SET_AVAILABLE_MEMORY,
        &[value],
        vec![("availableMemoryProportion", Attribute::Float(proportion))],
    )
}

/// A user-defined operator. Output types are supplied by the caller since
/// nothing about the operator is known to the registry.
pub fn create_custom_operation(
    graph: &mut Graph,
    inputs: &[Handle<Value>],
    name: &str,
    domain: &str,
    domain_version: i64,
    output_types: Vec<ValueType>,
) -> Result<Handle<Node>, BuildError> {
    let node = create_node(
        graph,
        kinds::CUSTOM_OPERATION,
        inputs,
        vec![
            ("name", Attribute::Str(name.into())),
            ("domain", Attribute::Str(domain.into())),
            ("version", Attribute::Int(domain_version)),
            ("num_outputs", Attribute::Int(output_types.len() as i64)),
        ],
        ImplicitCast::None,
        ImplicitCastOutput::None,
        output_types.len(),
    )?;
    let outputs = graph.node(node).outputs().to_vec();
    for (value, ty) in outputs.into_iter().zip(output_types) {
        graph.set_value_type(value, ty);
    }
    Ok(node)
}
