//! Target-dialect operator layer.
//!
//! The registry describes every target operator, the cast resolver decides
//! implicit promotions, and the builder creates typed nodes using both.

pub mod builder;
pub mod cast;
mod error;
pub mod kinds;
pub mod registry;
pub mod shape;

pub use builder::{Attrs, Literal};
pub use cast::{CastError, ImplicitCast, ImplicitCastOutput};
pub use error::BuildError;
pub use registry::{Arity, AttrKind, AttrSpec, ListOperand, OpRegistry, OpSchema, ShapeRule, TypeRule};
