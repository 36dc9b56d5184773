//! Module-level compilation driver.
//!
//! Methods compile independently, so the driver fans a module's methods out
//! across a thread pool and collects per-method outcomes. A method that
//! fails never aborts its siblings: the outcome records the failure and the
//! rest of the module still compiles.

use rayon::prelude::*;

use crate::{
    builder::{build_circuit, BuildResult},
    bytecode::MethodInfo,
    Error,
};

/// Knobs for a compilation run.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Skip methods with more instructions than this. Oversized methods
    /// (machine-generated initializers, mostly) are rarely worth the
    /// quadratic dominator pass.
    pub max_method_size: Option<usize>,
}

/// Per-method result of a module compilation.
#[derive(Debug)]
pub enum CompileOutcome {
    /// The method lowered and verified.
    Compiled(BuildResult),
    /// The method was skipped before lowering (size budget).
    Skipped {
        /// Human-readable reason for the skip.
        reason: String,
    },
    /// Lowering failed; the input was malformed.
    Failed(Error),
}

impl CompileOutcome {
    /// True for a successful compilation.
    #[must_use]
    pub fn is_compiled(&self) -> bool {
        matches!(self, CompileOutcome::Compiled(_))
    }
}

/// Compiles one method under the given options.
#[must_use]
pub fn compile_method(method: &MethodInfo, options: &BuildOptions) -> CompileOutcome {
    if let Some(budget) = options.max_method_size {
        let size = method.pc_info.len();
        if size > budget {
            return CompileOutcome::Skipped {
                reason: format!("method has {size} instructions, budget is {budget}"),
            };
        }
    }
    match build_circuit(method) {
        Ok(result) => CompileOutcome::Compiled(result),
        Err(err) => CompileOutcome::Failed(err),
    }
}

/// Compiles every method of a module in parallel.
///
/// Outcomes are returned in input order regardless of completion order.
#[must_use]
pub fn compile_module(methods: &[MethodInfo], options: &BuildOptions) -> Vec<CompileOutcome> {
    methods
        .par_iter()
        .map(|method| compile_method(method, options))
        .collect()
}
