use popcanon_ir::IrError;

use crate::cast::CastError;

/// Errors raised while constructing target nodes.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("malformed literal sequence: {0}")]
    MalformedLiteral(String),
    #[error("no schema registered for {0}")]
    UnknownOp(String),
    #[error("{kind} expects {expected} input(s), got {found}")]
    InputArity {
        kind: String,
        expected: String,
        found: usize,
    },
    #[error("{kind}: attribute '{name}' {problem}")]
    Attribute {
        kind: String,
        name: String,
        problem: String,
    },
    #[error("{kind}: {message}")]
    Shape { kind: String, message: String },
    #[error("{kind}: cannot derive output type: {message}")]
    Typing { kind: String, message: String },
    #[error(transparent)]
    Cast(#[from] CastError),
    #[error(transparent)]
    Ir(#[from] IrError),
}
