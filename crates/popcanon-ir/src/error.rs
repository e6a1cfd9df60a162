//! Error types for the popcanon IR.

/// Errors that can occur when constructing or mutating the graph.
#[derive(Debug, thiserror::Error)]
pub enum IrError {
    /// A handle index is out of bounds for its arena.
    #[error("handle index {index} out of bounds (arena size: {size})")]
    BadHandle { index: usize, size: usize },

    /// A node was removed while one of its outputs was still in use.
    #[error("cannot destroy node {node} ({kind}): output still has {uses} use(s)")]
    LiveUses {
        node: usize,
        kind: String,
        uses: usize,
    },

    /// A node was referenced after being destroyed.
    #[error("node {0} has been destroyed")]
    DeadNode(usize),

    /// The use-def graph contains a cycle.
    #[error("graph contains a cycle ({visited} of {total} nodes visited)")]
    Cycle { visited: usize, total: usize },

    /// A use-def back-reference is inconsistent.
    #[error("inconsistent use-def links: {0}")]
    Inconsistent(String),

    /// A node kind string could not be parsed.
    #[error("invalid node kind '{0}' (expected '<dialect>::<name>')")]
    InvalidKind(String),

    /// A tensor payload is encoded differently from its declared type.
    #[error("tensor payload mismatch: expected {expected}, found {found}")]
    PayloadMismatch { expected: String, found: String },

    /// A tensor payload's length disagrees with its shape.
    #[error("tensor payload of {len} element(s) does not fit shape {shape:?}")]
    PayloadLength { shape: Vec<usize>, len: usize },
}
