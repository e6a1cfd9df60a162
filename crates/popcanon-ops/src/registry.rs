//! Operator schemas for the target dialect.
//!
//! One [`OpSchema`] per target kind describes arity, attributes, how output
//! types are derived, the implicit-cast policy and which input may carry a
//! list. The builder, the list pass and the late pass all consult the same
//! global [`OpRegistry`].

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use popcanon_ir::{Attribute, ElementType, NodeKind};

use crate::cast::{ImplicitCast, ImplicitCastOutput};
use crate::kinds;

/// Number of inputs or outputs accepted by an operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
    /// Inclusive range.
    Between(usize, usize),
}

impl Arity {
    pub fn accepts(self, n: usize) -> bool {
        match self {
            Self::Exactly(k) => n == k,
            Self::AtLeast(k) => n >= k,
            Self::Between(lo, hi) => (lo..=hi).contains(&n),
        }
    }

    /// Smallest accepted count.
    pub fn min(self) -> usize {
        match self {
            Self::Exactly(k) | Self::AtLeast(k) | Self::Between(k, _) => k,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exactly(k) => write!(f, "{k}"),
            Self::AtLeast(k) => write!(f, "at least {k}"),
            Self::Between(lo, hi) => write!(f, "{lo} to {hi}"),
        }
    }
}

/// Expected kind of an attribute value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttrKind {
    Int,
    Float,
    Ints,
    Floats,
    Str,
    Tensor,
}

impl AttrKind {
    /// Whether `attr` is acceptable for this kind. Integer values are
    /// accepted where a float is expected.
    pub fn accepts(self, attr: &Attribute) -> bool {
        matches!(
            (self, attr),
            (Self::Int, Attribute::Int(_))
                | (Self::Float, Attribute::Float(_) | Attribute::Int(_))
                | (Self::Ints, Attribute::Ints(_))
                | (Self::Floats, Attribute::Floats(_))
                | (Self::Str, Attribute::Str(_))
                | (Self::Tensor, Attribute::Tensor(_))
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttrSpec {
    pub name: &'static str,
    pub kind: AttrKind,
    pub required: bool,
}

const fn required(name: &'static str, kind: AttrKind) -> AttrSpec {
    AttrSpec {
        name,
        kind,
        required: true,
    }
}

const fn optional(name: &'static str, kind: AttrKind) -> AttrSpec {
    AttrSpec {
        name,
        kind,
        required: false,
    }
}

/// How the element type of the outputs is derived when no forced output
/// policy applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeRule {
    /// Promoted input type, or the first input's type.
    SameAsFirst,
    /// Parsed from a string attribute holding a target type name.
    FromAttr(&'static str),
    /// Element type of the `value` tensor attribute.
    FromTensorAttr,
    Fixed(ElementType),
    /// Supplied by whoever creates the node.
    Explicit,
}

/// How output shapes are derived from input shapes and attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShapeRule {
    SameAsFirst,
    /// Numpy-style broadcast of every input.
    Broadcast,
    MatMul,
    Reshape,
    Transpose,
    Concat,
    Split,
    Flatten,
    Squeeze,
    Unsqueeze,
    Expand,
    Slice,
    Pad,
    Reduce,
    /// Scalar unless the `reduction` attribute is `none`.
    Loss,
    FromShapeAttr,
    FromTensorAttr,
    Explicit,
}

/// An input position that may carry a list in the traced graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListOperand {
    pub input: usize,
    /// Attribute that receives a constant list. `None` for variadic inputs.
    pub attr: Option<&'static str>,
    /// Whether a runtime tensor list is spliced into variadic inputs.
    pub runtime: bool,
}

/// Static description of one target operator.
#[derive(Clone, Debug, PartialEq)]
pub struct OpSchema {
    pub kind: NodeKind,
    pub inputs: Arity,
    pub outputs: Arity,
    pub attrs: &'static [AttrSpec],
    pub type_rule: TypeRule,
    pub shape_rule: ShapeRule,
    pub implicit_cast: ImplicitCast,
    pub cast_output: ImplicitCastOutput,
    pub list_operand: Option<ListOperand>,
    /// Kept even when its outputs are unused.
    pub side_effects: bool,
}

impl OpSchema {
    fn new(kind: NodeKind, inputs: Arity) -> Self {
        Self {
            kind,
            inputs,
            outputs: Arity::Exactly(1),
            attrs: &[],
            type_rule: TypeRule::SameAsFirst,
            shape_rule: ShapeRule::SameAsFirst,
            implicit_cast: ImplicitCast::None,
            cast_output: ImplicitCastOutput::None,
            list_operand: None,
            side_effects: false,
        }
    }

    fn outputs(mut self, outputs: Arity) -> Self {
        self.outputs = outputs;
        self
    }

    fn attrs(mut self, attrs: &'static [AttrSpec]) -> Self {
        self.attrs = attrs;
        self
    }

    fn typed(mut self, rule: TypeRule) -> Self {
        self.type_rule = rule;
        self
    }

    fn shaped(mut self, rule: ShapeRule) -> Self {
        self.shape_rule = rule;
        self
    }

    fn cast(mut self, inputs: ImplicitCast, output: ImplicitCastOutput) -> Self {
        self.implicit_cast = inputs;
        self.cast_output = output;
        self
    }

    fn list_attr(mut self, input: usize, attr: &'static str) -> Self {
        self.list_operand = Some(ListOperand {
            input,
            attr: Some(attr),
            runtime: false,
        });
        self
    }

    fn variadic_list(mut self, input: usize) -> Self {
        self.list_operand = Some(ListOperand {
            input,
            attr: None,
            runtime: true,
        });
        self
    }

    fn side_effects(mut self) -> Self {
        self.side_effects = true;
        self
    }

    pub fn attr_spec(&self, name: &str) -> Option<&AttrSpec> {
        self.attrs.iter().find(|a| a.name == name)
    }

    /// Output count used when the caller does not choose one.
    pub fn default_outputs(&self) -> usize {
        self.outputs.min().max(usize::from(matches!(self.outputs, Arity::AtLeast(_))))
    }
}

/// Lookup table from target kind to schema.
#[derive(Debug)]
pub struct OpRegistry {
    schemas: HashMap<NodeKind, OpSchema>,
}

static REGISTRY: Lazy<OpRegistry> = Lazy::new(OpRegistry::with_builtins);

impl OpRegistry {
    /// The process-wide registry of built-in target operators.
    pub fn global() -> &'static OpRegistry {
        &REGISTRY
    }

    pub fn get(&self, kind: &NodeKind) -> Option<&OpSchema> {
        self.schemas.get(kind)
    }

    pub fn contains(&self, kind: &NodeKind) -> bool {
        self.schemas.contains_key(kind)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Every registered kind, sorted.
    pub fn kinds(&self) -> Vec<&NodeKind> {
        let mut kinds: Vec<&NodeKind> = self.schemas.keys().collect();
        kinds.sort();
        kinds
    }

    fn register(&mut self, schema: OpSchema) {
        self.schemas.insert(schema.kind.clone(), schema);
    }

    fn with_builtins() -> Self {
        use AttrKind::*;
        use ImplicitCast as In;
        use ImplicitCastOutput as Out;

        let mut reg = Self {
            schemas: HashMap::new(),
        };

        for kind in [kinds::ADD, kinds::SUB, kinds::MUL, kinds::POW] {
            reg.register(
                OpSchema::new(kind, Arity::Exactly(2))
                    .shaped(ShapeRule::Broadcast)
                    .cast(In::All, Out::None),
            );
        }
        reg.register(
            OpSchema::new(kinds::DIV, Arity::Exactly(2))
                .shaped(ShapeRule::Broadcast)
                .cast(In::All, Out::AlwaysFloat),
        );
        for kind in [kinds::EQUAL, kinds::LESS, kinds::GREATER] {
            reg.register(
                OpSchema::new(kind, Arity::Exactly(2))
                    .shaped(ShapeRule::Broadcast)
                    .cast(In::All, Out::AlwaysBool),
            );
        }
        reg.register(
            OpSchema::new(kinds::WHERE, Arity::Exactly(3))
                .shaped(ShapeRule::Broadcast)
                .cast(In::ExceptFirst, Out::AsPromoted),
        );
        for kind in [
            kinds::NEG,
            kinds::RELU,
            kinds::SIGMOID,
            kinds::TANH,
            kinds::EXP,
            kinds::LOG,
            kinds::SQRT,
            kinds::ABS,
            kinds::IDENTITY,
        ] {
            reg.register(OpSchema::new(kind, Arity::Exactly(1)));
        }

        reg.register(
            OpSchema::new(kinds::MATMUL, Arity::Exactly(2))
                .shaped(ShapeRule::MatMul)
                .cast(In::All, Out::None),
        );
        reg.register(
            OpSchema::new(kinds::SOFTMAX, Arity::Exactly(1)).attrs(&const { [required("axis", Int)] }),
        );
        reg.register(
            OpSchema::new(kinds::CAST, Arity::Exactly(1))
                .attrs(&const { [required("to", Str)] })
                .typed(TypeRule::FromAttr("to")),
        );

        reg.register(
            OpSchema::new(kinds::RESHAPE, Arity::Between(1, 2))
                .attrs(&const { [required("shape", Ints)] })
                .shaped(ShapeRule::Reshape)
                .list_attr(1, "shape"),
        );
        reg.register(
            OpSchema::new(kinds::TRANSPOSE, Arity::Between(1, 2))
                .attrs(&const { [required("perm", Ints)] })
                .shaped(ShapeRule::Transpose)
                .list_attr(1, "perm"),
        );
        reg.register(
            OpSchema::new(kinds::CONCAT, Arity::AtLeast(1))
                .attrs(&const { [required("axis", Int)] })
                .shaped(ShapeRule::Concat)
                .cast(In::All, Out::None)
                .variadic_list(0),
        );
        reg.register(
            OpSchema::new(kinds::SPLIT, Arity::Between(1, 2))
                .outputs(Arity::AtLeast(1))
                .attrs(&const { [required("axis", Int), required("split", Ints)] })
                .shaped(ShapeRule::Split)
                .list_attr(1, "split"),
        );
        reg.register(
            OpSchema::new(kinds::FLATTEN, Arity::Exactly(1))
                .attrs(&const { [required("axis", Int)] })
                .shaped(ShapeRule::Flatten),
        );
        reg.register(
            OpSchema::new(kinds::SQUEEZE, Arity::Between(1, 2))
                .attrs(&const { [required("axes", Ints)] })
                .shaped(ShapeRule::Squeeze)
                .list_attr(1, "axes"),
        );
        reg.register(
            OpSchema::new(kinds::UNSQUEEZE, Arity::Between(1, 2))
                .attrs(&const { [required("axes", Ints)] })
                .shaped(ShapeRule::Unsqueeze)
                .list_attr(1, "axes"),
        );
        reg.register(
            OpSchema::new(kinds::EXPAND, Arity::Between(1, 2))
                .attrs(&const { [required("shape", Ints)] })
                .shaped(ShapeRule::Expand)
                .list_attr(1, "shape"),
        );
        reg.register(
            OpSchema::new(kinds::SLICE, Arity::Exactly(1))
                .attrs(&const { [required("starts", Ints), required("ends", Ints), required("axes", Ints)] })
                .shaped(ShapeRule::Slice),
        );
        reg.register(
            OpSchema::new(kinds::PAD, Arity::Exactly(1))
                .attrs(&const { [
                    required("pads", Ints),
                    required("mode", Str),
                    optional("value", Float),
                ] })
                .shaped(ShapeRule::Pad),
        );
        for kind in [kinds::REDUCESUM, kinds::REDUCEMEAN] {
            reg.register(
                OpSchema::new(kind, Arity::Between(1, 2))
                    .attrs(&const { [required("axes", Ints), required("keepdims", Int)] })
                    .shaped(ShapeRule::Reduce)
                    .list_attr(1, "axes"),
            );
        }

        reg.register(
            OpSchema::new(kinds::RANDOM_NORMAL, Arity::Exactly(0))
                .attrs(&const { [
                    required("shape", Ints),
                    required("dtype", Str),
                    required("mean", Float),
                    required("scale", Float),
                ] })
                .typed(TypeRule::FromAttr("dtype"))
                .shaped(ShapeRule::FromShapeAttr),
        );
        reg.register(
            OpSchema::new(kinds::RANDOM_UNIFORM, Arity::Exactly(0))
                .attrs(&const { [
                    required("shape", Ints),
                    required("dtype", Str),
                    required("high", Float),
                    required("low", Float),
                ] })
                .typed(TypeRule::FromAttr("dtype"))
                .shaped(ShapeRule::FromShapeAttr),
        );
        reg.register(
            OpSchema::new(kinds::L1_LOSS, Arity::Exactly(1))
                .attrs(&const { [required("lambda", Float), required("reduction", Int)] })
                .shaped(ShapeRule::Loss),
        );

        reg.register(
            OpSchema::new(kinds::TENSOR_CONSTANT, Arity::Exactly(0))
                .attrs(&const { [required("value", Tensor)] })
                .typed(TypeRule::FromTensorAttr)
                .shaped(ShapeRule::FromTensorAttr),
        );
        reg.register(
            OpSchema::new(kinds::IDENTITY_LOSS, Arity::Exactly(1))
                .attrs(&const { [required("reduction", Int)] })
                .shaped(ShapeRule::Loss)
                .side_effects(),
        );
        reg.register(
            OpSchema::new(kinds::SET_AVAILABLE_MEMORY, Arity::Exactly(1))
                .attrs(&const { [required("availableMemoryProportion", Float)] }),
        );
        reg.register(
            OpSchema::new(kinds::CUSTOM_OPERATION, Arity::AtLeast(0))
                .outputs(Arity::AtLeast(0))
                .attrs(&const { [
                    required("name", Str),
                    required("domain", Str),
                    required("version", Int),
                    required("num_outputs", Int),
                ] })
                .typed(TypeRule::Explicit)
                .shaped(ShapeRule::Explicit)
                .variadic_list(0),
        );
        reg.register(OpSchema::new(kinds::IPU_PRINT_TENSOR, Arity::Exactly(1)).side_effects());
        reg.register(
            OpSchema::new(kinds::BEGIN_IPU_BLOCK, Arity::Exactly(0))
                .outputs(Arity::Exactly(0))
                .attrs(&const { [required("ipu", Int)] })
                .side_effects(),
        );
        reg.register(
            OpSchema::new(kinds::END_IPU_BLOCK, Arity::Exactly(0))
                .outputs(Arity::Exactly(0))
                .side_effects(),
        );

        reg
    }
}
