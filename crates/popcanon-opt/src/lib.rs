//! Canonicalization passes for traced graphs.
//!
//! Provides a [`Pass`] trait, a [`PassManager`] that runs passes strictly in
//! order, and the built-in pipeline that lowers `aten::`/`prim::` nodes into
//! the `popart::`/`poptorch::` target dialect.

mod canonicalize;
mod dce;
mod error;
pub mod fold;
mod half;
mod late;
mod lists;
mod rules;
mod unsupported;

pub use canonicalize::{EarlyCanonicalization, canonicalize};
pub use dce::prune_dead_nodes;
pub use error::CanonError;
pub use half::{
    CanonicaliseHalfInputs, RemoveSurplusIdentityLosses, ResolveHalfOrFloat,
    canonicalise_half_inputs, remove_surplus_identity_losses, resolve_half_or_float,
};
pub use late::{LateCanonicalization, canonicalize_late};
pub use lists::{CanonicalizeLists, canonicalize_lists};
pub use rules::supported_kinds;
pub use unsupported::{WarnOnUnsupportedAten, warn_on_unsupported_aten};

use std::fmt::{self, Debug};

use popcanon_ir::{Graph, TensorMeta, dump_graph};

/// A canonicalization pass over a whole graph.
pub trait Pass: Debug {
    /// Human-readable name of the pass.
    fn name(&self) -> &str;

    /// Run the pass on a graph. Returns `true` if anything was modified.
    fn run(&self, graph: &mut Graph, cx: &mut PassContext<'_>) -> Result<bool, CanonError>;
}

/// Pipeline configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Fail with [`CanonError::UnsupportedOperators`] instead of returning
    /// diagnostics.
    pub warnings_as_errors: bool,
    /// Largest tensor rank the target accepts. `None` disables the check.
    pub max_rank: Option<usize>,
    /// Remove nodes whose outputs are never used.
    pub prune_dead_nodes: bool,
    /// Log the graph after every pass at debug level.
    pub dump_after_each_pass: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            warnings_as_errors: false,
            max_rank: None,
            prune_dead_nodes: true,
            dump_after_each_pass: false,
        }
    }
}

/// Severity level for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagnosticLevel {
    /// The graph is usable but contains something the target cannot run.
    Warning,
    /// An informational note.
    Info,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Warning => "warning",
            Self::Info => "info",
        })
    }
}

/// A non-fatal finding about the graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    /// Operator kind the diagnostic is about, e.g. `aten::frobnicate`.
    pub kind: String,
    pub provenance: Option<String>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.level, self.message)?;
        if let Some(provenance) = &self.provenance {
            write!(f, " ({provenance})")?;
        }
        Ok(())
    }
}

/// State shared by the passes of one pipeline run.
#[derive(Debug)]
pub struct PassContext<'a> {
    pub options: &'a PipelineOptions,
    /// Concrete tensors bound to the graph inputs, in order.
    pub input_tensors: &'a [TensorMeta],
    /// Concrete tensors bound to the graph parameters, in order.
    pub parameter_tensors: &'a [TensorMeta],
    pub diagnostics: Vec<Diagnostic>,
}

impl<'a> PassContext<'a> {
    pub fn new(
        options: &'a PipelineOptions,
        input_tensors: &'a [TensorMeta],
        parameter_tensors: &'a [TensorMeta],
    ) -> Self {
        Self {
            options,
            input_tensors,
            parameter_tensors,
            diagnostics: Vec::new(),
        }
    }
}

/// Runs passes once each, in sequence. Every pass sees the whole graph as
/// left by the previous one.
#[derive(Debug)]
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PassManager {
    /// Creates an empty pass manager with no passes.
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// The canonicalization pipeline in its required order.
    pub fn canonical() -> Self {
        let mut pm = Self::new();
        pm.add_pass(Box::new(EarlyCanonicalization));
        pm.add_pass(Box::new(CanonicalizeLists));
        pm.add_pass(Box::new(CanonicaliseHalfInputs));
        pm.add_pass(Box::new(ResolveHalfOrFloat));
        pm.add_pass(Box::new(RemoveSurplusIdentityLosses));
        pm.add_pass(Box::new(LateCanonicalization));
        pm.add_pass(Box::new(WarnOnUnsupportedAten));
        pm
    }

    /// Adds a pass to the end of the pipeline.
    pub fn add_pass(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    /// Names of the passes in run order.
    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Runs every pass once. Stops at the first fatal error.
    pub fn run(&self, graph: &mut Graph, cx: &mut PassContext<'_>) -> Result<(), CanonError> {
        for pass in &self.passes {
            log::debug!("running {}", pass.name());
            let changed = pass.run(graph, cx)?;
            log::debug!(
                "{} finished (changed: {changed}, {} node(s))",
                pass.name(),
                graph.node_count()
            );
            if cx.options.dump_after_each_pass {
                log::debug!("after {}:\n{}", pass.name(), dump_graph(graph));
            }
            if cfg!(debug_assertions) {
                graph.verify()?;
            }
        }
        Ok(())
    }
}

/// Runs the full canonicalization pipeline on `graph`.
///
/// Returns the advisory diagnostics on success. On error the graph is left
/// in an unspecified state.
pub fn canonicalize_graph(
    graph: &mut Graph,
    input_tensors: &[TensorMeta],
    parameter_tensors: &[TensorMeta],
    options: &PipelineOptions,
) -> Result<Vec<Diagnostic>, CanonError> {
    let mut cx = PassContext::new(options, input_tensors, parameter_tensors);
    PassManager::canonical().run(graph, &mut cx)?;
    if options.warnings_as_errors && !cx.diagnostics.is_empty() {
        return Err(CanonError::UnsupportedOperators(cx.diagnostics));
    }
    Ok(cx.diagnostics)
}
