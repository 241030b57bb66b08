//! Configuration consumed by the driver.

use crate::LoweringRules;

/// How many times the driver repeats its pass list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DriverMode {
    /// One sweep over the pass list.
    SingleSweep,
    /// Repeat sweeps until one reports no progress.
    #[default]
    Fixpoint,
}

/// Which kinds of values precision lowering may narrow to 16 bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LowerPrecisionOptions {
    pub lower_float16: bool,
    pub lower_int16: bool,
    /// Redirect qualifying built-in calls to half-precision clones.
    pub lower_builtins: bool,
}

impl LowerPrecisionOptions {
    /// Floats, integers and built-ins.
    pub fn all() -> Self {
        Self {
            lower_float16: true,
            lower_int16: true,
            lower_builtins: true,
        }
    }
}

/// Capabilities of the target and switches for the optional passes.
#[derive(Clone, Debug)]
pub struct CompilerOptions {
    /// The target executes integer operations natively. Without it integer
    /// division is lowered through floats.
    pub native_integers: bool,
    /// Loops with at most this many iterations are unrolled.
    pub max_unroll_iterations: u32,
    /// Run matrix flipping and vectorization.
    pub optimize_for_aos: bool,
    pub emit_no_main_return: bool,
    pub emit_no_cont: bool,
    /// Every loop must be unrolled; a survivor is reported as an error.
    pub emit_no_loops: bool,
    /// Rules for the final instruction-lowering run.
    pub lowering: LoweringRules,
    pub lower_precision: Option<LowerPrecisionOptions>,
    /// The shader is fully linked: inlining, dead-function removal and
    /// global pruning are allowed.
    pub linked: bool,
    /// Uniform locations are fixed, so unused uniforms must be kept.
    pub uniform_locations_assigned: bool,
    /// Keep rewrites that would change NaN or infinity results disabled.
    pub preserve_nan: bool,
    pub mode: DriverMode,
    pub max_fixpoint_sweeps: usize,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            native_integers: true,
            max_unroll_iterations: 32,
            optimize_for_aos: false,
            emit_no_main_return: false,
            emit_no_cont: false,
            emit_no_loops: false,
            lowering: LoweringRules::empty(),
            lower_precision: None,
            linked: false,
            uniform_locations_assigned: false,
            preserve_nan: false,
            mode: DriverMode::Fixpoint,
            max_fixpoint_sweeps: 32,
        }
    }
}

impl CompilerOptions {
    /// The rule set for the final lowering run.
    pub fn final_lowering(&self) -> LoweringRules {
        let mut rules = self.lowering;
        if !self.native_integers {
            rules |= LoweringRules::INT_DIV_TO_MUL_RCP;
        }
        // Expansions emit subtractions, which every sweep rewrites anyway.
        if !rules.is_empty() {
            rules |= LoweringRules::SUB_TO_ADD_NEG;
        }
        rules
    }

    /// Loop unrolling runs at all.
    pub fn unrolls_loops(&self) -> bool {
        self.max_unroll_iterations > 0 || self.emit_no_loops
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = CompilerOptions::default();
        assert_eq!(options.mode, DriverMode::Fixpoint);
        assert!(options.final_lowering().is_empty());
        assert!(options.unrolls_loops());
        assert!(options.lower_precision.is_none());
    }

    #[test]
    fn integer_division_lowered_without_native_integers() {
        let options = CompilerOptions {
            native_integers: false,
            lowering: LoweringRules::SAT_TO_CLAMP,
            ..Default::default()
        };
        assert_eq!(
            options.final_lowering(),
            LoweringRules::SAT_TO_CLAMP
                | LoweringRules::INT_DIV_TO_MUL_RCP
                | LoweringRules::SUB_TO_ADD_NEG
        );
    }

    #[test]
    fn no_loops_forces_unrolling() {
        let options = CompilerOptions {
            max_unroll_iterations: 0,
            emit_no_loops: true,
            ..Default::default()
        };
        assert!(options.unrolls_loops());
    }
}
