//! Implicit cast resolution.
//!
//! Pure decisions only: which element type the participating inputs of a
//! node must agree on, and whether the node's output is forced to a specific
//! type. The node builder acts on the answers.

use popcanon_ir::ElementType;

/// Which inputs take part in type promotion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ImplicitCast {
    #[default]
    None,
    All,
    ExceptFirst,
    ExceptSecond,
    ExceptThird,
    ExceptFirstAndSecond,
}

impl ImplicitCast {
    /// Whether input `index` participates under this policy.
    pub fn participates(self, index: usize) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::ExceptFirst => index != 0,
            Self::ExceptSecond => index != 1,
            Self::ExceptThird => index != 2,
            Self::ExceptFirstAndSecond => index > 1,
        }
    }
}

/// Forced output type, independent of input promotion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ImplicitCastOutput {
    #[default]
    None,
    /// Output takes the promoted input type.
    AsPromoted,
    /// Output is always boolean (comparisons, logical ops).
    AlwaysBool,
    /// Output is a float: the promoted type if it is one, `Float32` otherwise.
    AlwaysFloat,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CastError {
    #[error("cannot promote between incomparable element types {0} and {1}")]
    Incomparable(ElementType, ElementType),
}

/// Promotion rank: `(class, precision)`. Higher wins; equal ranks on
/// distinct types are incomparable.
fn promotion_rank(ty: ElementType) -> (u8, u8) {
    match ty {
        ElementType::Bool => (0, 0),
        ElementType::Uint8 | ElementType::Int8 => (1, 1),
        ElementType::Int32 => (1, 4),
        ElementType::Int64 => (1, 8),
        ElementType::Float16 => (2, 2),
        ElementType::HalfOrFloat => (2, 3),
        ElementType::Float32 => (2, 4),
    }
}

/// The type with strictly greater range/precision.
pub fn promote(a: ElementType, b: ElementType) -> Result<ElementType, CastError> {
    if a == b {
        return Ok(a);
    }
    let (ra, rb) = (promotion_rank(a), promotion_rank(b));
    match ra.cmp(&rb) {
        std::cmp::Ordering::Greater => Ok(a),
        std::cmp::Ordering::Less => Ok(b),
        std::cmp::Ordering::Equal => Err(CastError::Incomparable(a, b)),
    }
}

/// Promotion target for the participating inputs, or `None` when they
/// already agree. Inputs without an element type (lists, `None`) are skipped.
pub fn resolve_implicit_cast(
    policy: ImplicitCast,
    input_types: &[Option<ElementType>],
) -> Result<Option<ElementType>, CastError> {
    let mut participating = input_types
        .iter()
        .enumerate()
        .filter(|(i, _)| policy.participates(*i))
        .filter_map(|(_, ty)| *ty);

    let Some(first) = participating.next() else {
        return Ok(None);
    };
    let mut target = first;
    let mut agree = true;
    for ty in participating {
        agree &= ty == first;
        target = promote(target, ty)?;
    }
    Ok(if agree { None } else { Some(target) })
}

/// Output type forced by `policy`, given the promotion target and the type
/// of the first participating input.
pub fn forced_output(
    policy: ImplicitCastOutput,
    promoted: Option<ElementType>,
    first: Option<ElementType>,
) -> Option<ElementType> {
    match policy {
        ImplicitCastOutput::None => None,
        ImplicitCastOutput::AsPromoted => promoted.or(first),
        ImplicitCastOutput::AlwaysBool => Some(ElementType::Bool),
        ImplicitCastOutput::AlwaysFloat => match promoted.or(first) {
            Some(ty) if ty.is_float() => Some(ty),
            _ => Some(ElementType::Float32),
        },
    }
}

/// Whether a value of type `from` needs an explicit cast to reach `to`.
///
/// Float pairs where either side is still `HalfOrFloat` need none: the
/// half/float resolution pass settles the final precision and inserts
/// whatever casts remain necessary.
pub fn needs_cast(from: ElementType, to: ElementType) -> bool {
    if from == to {
        return false;
    }
    let deferred = from.is_float() && to.is_float() && (from.is_ambiguous() || to.is_ambiguous());
    !deferred
}

#[cfg(test)]
mod tests {
    use super::*;
    use ElementType::*;

    #[test]
    fn higher_precision_wins() {
        assert_eq!(promote(Float32, Float16), Ok(Float32));
        assert_eq!(promote(Float16, Float32), Ok(Float32));
        assert_eq!(promote(Int32, Int64), Ok(Int64));
        assert_eq!(promote(Int64, Float16), Ok(Float16));
        assert_eq!(promote(Bool, Int8), Ok(Int8));
        assert_eq!(promote(Uint8, Int32), Ok(Int32));
    }

    #[test]
    fn half_or_float_sits_between_half_and_float() {
        assert_eq!(promote(Float16, HalfOrFloat), Ok(HalfOrFloat));
        assert_eq!(promote(HalfOrFloat, Float32), Ok(Float32));
        assert_eq!(promote(Int64, HalfOrFloat), Ok(HalfOrFloat));
    }

    #[test]
    fn same_width_signedness_is_incomparable() {
        assert_eq!(promote(Uint8, Int8), Err(CastError::Incomparable(Uint8, Int8)));
    }

    #[test]
    fn resolve_returns_none_when_inputs_agree() {
        let types = [Some(Float32), Some(Float32)];
        assert_eq!(resolve_implicit_cast(ImplicitCast::All, &types), Ok(None));
        assert_eq!(resolve_implicit_cast(ImplicitCast::None, &[Some(Float32), Some(Float16)]), Ok(None));
    }

    #[test]
    fn resolve_respects_participation() {
        let types = [Some(Bool), Some(Float16), Some(Float32)];
        assert_eq!(resolve_implicit_cast(ImplicitCast::All, &types), Ok(Some(Float32)));
        assert_eq!(resolve_implicit_cast(ImplicitCast::ExceptFirst, &types), Ok(Some(Float32)));
        assert_eq!(resolve_implicit_cast(ImplicitCast::ExceptThird, &types), Ok(Some(Float16)));
        assert_eq!(resolve_implicit_cast(ImplicitCast::ExceptFirstAndSecond, &types), Ok(None));
    }

    #[test]
    fn resolve_skips_untyped_inputs() {
        let types = [Some(Int32), None, Some(Int64)];
        assert_eq!(resolve_implicit_cast(ImplicitCast::All, &types), Ok(Some(Int64)));
    }

    #[test]
    fn output_policies_are_independent() {
        assert_eq!(forced_output(ImplicitCastOutput::None, Some(Float32), Some(Float16)), None);
        assert_eq!(forced_output(ImplicitCastOutput::AsPromoted, None, Some(Int32)), Some(Int32));
        assert_eq!(forced_output(ImplicitCastOutput::AlwaysBool, Some(Float32), None), Some(Bool));
        assert_eq!(forced_output(ImplicitCastOutput::AlwaysFloat, Some(Int64), None), Some(Float32));
        assert_eq!(forced_output(ImplicitCastOutput::AlwaysFloat, None, Some(Float16)), Some(Float16));
    }

    #[test]
    fn half_input_needs_no_cast_to_ambiguous_target() {
        assert!(!needs_cast(Float16, HalfOrFloat));
        assert!(!needs_cast(HalfOrFloat, Float32));
        assert!(needs_cast(Int32, HalfOrFloat));
        assert!(needs_cast(Float16, Float32));
        assert!(!needs_cast(Float32, Float32));
    }
}
