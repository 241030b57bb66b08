//! Optimization passes for lumen IR.
//!
//! Provides a [`Pass`] trait, a [`PassManager`] with fixed-point iteration,
//! the [`optimize`] driver that runs the full pipeline in its fixed order,
//! [`LowerInstructions`] and [`LowerPrecision`].

mod aos;
mod algebraic;
mod cond_discard;
mod const_fold;
mod const_prop;
mod copy_prop;
mod dce;
mod driver;
mod if_simplify;
mod inline;
mod invariance;
mod jumps;
pub mod loop_unroll;
pub mod lower_instructions;
pub mod lower_precision;
mod minmax;
mod options;
mod swizzle;
mod tree_grafting;
mod util;
mod validation;

pub use aos::{MatrixFlipping, Vectorization};
pub use algebraic::{AlgebraicSimplification, Rebalance};
pub use cond_discard::CondDiscard;
pub use const_fold::ConstantFolding;
pub use const_prop::{ConstantPropagation, ConstantVariableMarking};
pub use copy_prop::CopyPropagation;
pub use dce::{DeadCodeElimination, LocalDeadCode};
pub use driver::optimize;
pub use if_simplify::{IfSimplification, NestedIfFlattening};
pub use inline::{DeadFunctions, FunctionInlining, StructureSplitting};
pub use invariance::InvariancePropagation;
pub use jumps::{JumpLowering, RedundantJumps};
pub use loop_unroll::LoopUnrolling;
pub use lower_instructions::{LowerInstructions, LoweringRules};
pub use lower_precision::LowerPrecision;
pub use minmax::MinMaxPrune;
pub use options::{CompilerOptions, DriverMode, LowerPrecisionOptions};
pub use swizzle::{SwizzleSimplification, VectorIndexToSwizzle};
pub use tree_grafting::TreeGrafting;
pub use validation::IrValidation;

use std::fmt::Debug;

use log::debug;
use lumen_ir::Shader;

/// An optimization pass that rewrites a shader in place.
pub trait Pass: Debug {
    /// Human-readable name of the pass.
    fn name(&self) -> &str;

    /// Run the pass on a shader. Returns `true` if anything was modified.
    fn run(&self, shader: &mut Shader) -> bool;
}

/// Maximum number of fixed-point iterations before giving up.
const MAX_ITERATIONS: usize = 10;

/// Runs one pass, logging progress. Debug builds check the IR afterwards.
pub(crate) fn run_pass(pass: &dyn Pass, shader: &mut Shader) -> bool {
    let changed = pass.run(shader);
    if changed {
        debug!("{} made progress", pass.name());
    }
    if cfg!(debug_assertions) {
        validation::assert_valid(shader, pass.name());
    }
    changed
}

/// Runs passes in sequence with fixed-point iteration.
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
    max_iterations: usize,
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PassManager {
    /// Creates an empty pass manager with no passes.
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            max_iterations: MAX_ITERATIONS,
        }
    }

    /// Caps the number of sweeps made by [`PassManager::run`].
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Adds a pass to the pipeline.
    pub fn add_pass(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Runs every pass once, in order.
    pub fn run_once(&self, shader: &mut Shader) -> bool {
        let mut changed = false;
        for pass in &self.passes {
            changed |= run_pass(pass.as_ref(), shader);
        }
        changed
    }

    /// Runs all passes until a fixed point is reached or the iteration limit.
    pub fn run(&self, shader: &mut Shader) -> bool {
        let mut changed = false;
        for iteration in 0..self.max_iterations {
            if !self.run_once(shader) {
                break;
            }
            debug!("pass manager sweep {iteration} made progress");
            changed = true;
        }
        changed
    }
}
