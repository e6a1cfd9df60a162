use popcanon_ir::{Graph, Handle, IrError, Node};
use popcanon_ops::{BuildError, CastError};

use crate::Diagnostic;

fn at(provenance: &Option<String>) -> String {
    provenance
        .as_deref()
        .map(|p| format!(" at {p}"))
        .unwrap_or_default()
}

/// Fatal canonicalization errors. The graph is unusable after any of them.
#[derive(Debug, thiserror::Error)]
pub enum CanonError {
    #[error("malformed literal")]
    MalformedLiteral(#[source] BuildError),
    #[error("{kind} (node {node}){} still has an ambiguous half/float type", at(.provenance))]
    TypeAmbiguityUnresolved {
        node: usize,
        kind: String,
        provenance: Option<String>,
    },
    #[error("{kind} (node {node}){} violates: {constraint}", at(.provenance))]
    StructuralViolation {
        node: usize,
        kind: String,
        provenance: Option<String>,
        constraint: String,
    },
    #[error("expected {expected} {category} tensor(s), got {found}")]
    InputMismatch {
        category: &'static str,
        expected: usize,
        found: usize,
    },
    #[error(transparent)]
    IncomparableTypes(#[from] CastError),
    #[error("cannot lower {kind}: {message}")]
    Rule { kind: String, message: String },
    #[error("{} unsupported operator(s) remain", .0.len())]
    UnsupportedOperators(Vec<Diagnostic>),
    #[error(transparent)]
    Build(BuildError),
    #[error(transparent)]
    Ir(#[from] IrError),
}

impl CanonError {
    /// A structural constraint broken by `node`.
    pub(crate) fn structural(
        graph: &Graph,
        node: Handle<Node>,
        constraint: impl Into<String>,
    ) -> Self {
        let n = graph.node(node);
        Self::StructuralViolation {
            node: node.index(),
            kind: n.kind.to_string(),
            provenance: n.provenance.clone(),
            constraint: constraint.into(),
        }
    }

    pub(crate) fn ambiguous(graph: &Graph, node: Handle<Node>) -> Self {
        let n = graph.node(node);
        Self::TypeAmbiguityUnresolved {
            node: node.index(),
            kind: n.kind.to_string(),
            provenance: n.provenance.clone(),
        }
    }
}

impl From<BuildError> for CanonError {
    fn from(e: BuildError) -> Self {
        match e {
            BuildError::MalformedLiteral(_) => Self::MalformedLiteral(e),
            BuildError::Cast(c) => Self::IncomparableTypes(c),
            other => Self::Build(other),
        }
    }
}
