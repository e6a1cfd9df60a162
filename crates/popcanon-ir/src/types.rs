//! Type system for the popcanon IR.

/// The kind of an element type.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum ScalarKind {
    /// Boolean.
    Bool,
    /// Signed integer.
    Sint,
    /// Unsigned integer.
    Uint,
    /// Floating point.
    Float,
}

/// Element type of a tensor or scalar value.
///
/// `HalfOrFloat` is the ambiguous precision emitted by the tracer; it must
/// be resolved to `Float16` or `Float32` before the graph leaves the
/// pipeline.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum ElementType {
    Bool,
    Uint8,
    Int8,
    Int32,
    Int64,
    Float16,
    Float32,
    HalfOrFloat,
}

impl ElementType {
    /// Every element type, ambiguous one last.
    pub const ALL: [ElementType; 8] = [
        Self::Bool,
        Self::Uint8,
        Self::Int8,
        Self::Int32,
        Self::Int64,
        Self::Float16,
        Self::Float32,
        Self::HalfOrFloat,
    ];

    pub fn kind(self) -> ScalarKind {
        match self {
            Self::Bool => ScalarKind::Bool,
            Self::Uint8 => ScalarKind::Uint,
            Self::Int8 | Self::Int32 | Self::Int64 => ScalarKind::Sint,
            Self::Float16 | Self::Float32 | Self::HalfOrFloat => ScalarKind::Float,
        }
    }

    /// Width in bytes, `None` while the precision is ambiguous.
    pub fn width(self) -> Option<u8> {
        match self {
            Self::Bool | Self::Uint8 | Self::Int8 => Some(1),
            Self::Float16 => Some(2),
            Self::Int32 | Self::Float32 => Some(4),
            Self::Int64 => Some(8),
            Self::HalfOrFloat => None,
        }
    }

    pub fn is_float(self) -> bool {
        self.kind() == ScalarKind::Float
    }

    pub fn is_integral(self) -> bool {
        matches!(self.kind(), ScalarKind::Sint | ScalarKind::Uint)
    }

    pub fn is_ambiguous(self) -> bool {
        self == Self::HalfOrFloat
    }

    /// The spelling the target compiler uses in `to`/`dtype` attributes.
    ///
    /// The ambiguous type has no target spelling; it is rendered with a
    /// marker that the target rejects.
    pub fn target_name(self) -> &'static str {
        match self {
            Self::Bool => "BOOL",
            Self::Uint8 => "UINT8",
            Self::Int8 => "INT8",
            Self::Int32 => "INT32",
            Self::Int64 => "INT64",
            Self::Float16 => "FLOAT16",
            Self::Float32 => "FLOAT",
            Self::HalfOrFloat => "HALF_OR_FLOAT",
        }
    }

    /// Inverse of [`target_name`](Self::target_name).
    pub fn from_target_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.target_name() == name)
    }

    /// The trace spelling (`Float`, `Half`, `Long`, ...).
    pub fn trace_name(self) -> &'static str {
        match self {
            Self::Bool => "Bool",
            Self::Uint8 => "Byte",
            Self::Int8 => "Char",
            Self::Int32 => "Int",
            Self::Int64 => "Long",
            Self::Float16 => "Half",
            Self::Float32 => "Float",
            Self::HalfOrFloat => "HalfOrFloat",
        }
    }

    /// Inverse of [`trace_name`](Self::trace_name).
    pub fn from_trace_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.trace_name() == name)
    }
}

/// Shape of a tensor value.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum Shape {
    /// Known rank and dimensions.
    Known(Vec<usize>),
    /// Rank not known at trace time.
    Unknown,
}

impl Shape {
    pub fn scalar() -> Self {
        Self::Known(Vec::new())
    }

    /// Number of dimensions, if known.
    pub fn rank(&self) -> Option<usize> {
        self.dims().map(<[usize]>::len)
    }

    pub fn dims(&self) -> Option<&[usize]> {
        match self {
            Self::Known(dims) => Some(dims),
            Self::Unknown => None,
        }
    }

    /// Total element count, if known.
    pub fn numel(&self) -> Option<usize> {
        self.dims().map(|d| d.iter().product())
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self::Known(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self::Known(dims.to_vec())
    }
}

/// Element kind of a list value.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum ListElem {
    Int,
    Float,
    Bool,
    Tensor,
}

/// Type of an SSA value.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum ValueType {
    /// A tensor with an element type and shape.
    Tensor { elem: ElementType, shape: Shape },
    /// A host scalar (`int`, `float`, `bool`).
    Scalar(ElementType),
    /// A host list.
    List(ListElem),
    /// The `None` value.
    None,
}

impl ValueType {
    /// Convenience constructor for a tensor of known shape.
    pub fn tensor(elem: ElementType, dims: &[usize]) -> Self {
        Self::Tensor {
            elem,
            shape: Shape::Known(dims.to_vec()),
        }
    }

    pub fn tensor_unranked(elem: ElementType) -> Self {
        Self::Tensor {
            elem,
            shape: Shape::Unknown,
        }
    }

    /// Element type of a tensor or scalar.
    pub fn elem(&self) -> Option<ElementType> {
        match self {
            Self::Tensor { elem, .. } | Self::Scalar(elem) => Some(*elem),
            Self::List(_) | Self::None => None,
        }
    }

    pub fn shape(&self) -> Option<&Shape> {
        match self {
            Self::Tensor { shape, .. } => Some(shape),
            _ => None,
        }
    }

    /// Known dimensions of a tensor.
    pub fn dims(&self) -> Option<&[usize]> {
        self.shape().and_then(Shape::dims)
    }

    pub fn is_tensor(&self) -> bool {
        matches!(self, Self::Tensor { .. })
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    /// Same type with the element type replaced. Lists and `None` are unchanged.
    pub fn with_elem(&self, elem: ElementType) -> Self {
        match self {
            Self::Tensor { shape, .. } => Self::Tensor {
                elem,
                shape: shape.clone(),
            },
            Self::Scalar(_) => Self::Scalar(elem),
            other => other.clone(),
        }
    }

    /// `false` while the element type is still ambiguous.
    pub fn is_concrete(&self) -> bool {
        !self.elem().is_some_and(ElementType::is_ambiguous)
    }
}
