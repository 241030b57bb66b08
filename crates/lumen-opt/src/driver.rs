//! The optimization driver.
//!
//! [`optimize`] runs the fixed pass order once or until a sweep makes no
//! progress, then applies the final instruction lowering and precision
//! lowering requested by the [`CompilerOptions`].

use log::{debug, info, warn};
use lumen_ir::visit::block_contains;
use lumen_ir::{Diagnostic, DiagnosticSink, Severity, Shader, Statement};

use crate::{
    AlgebraicSimplification, CompilerOptions, CondDiscard, ConstantFolding, ConstantPropagation,
    ConstantVariableMarking, CopyPropagation, DeadCodeElimination, DeadFunctions, DriverMode,
    FunctionInlining, IfSimplification, InvariancePropagation, JumpLowering, LocalDeadCode,
    LoopUnrolling, LowerInstructions, LowerPrecision, LoweringRules, MatrixFlipping, MinMaxPrune,
    NestedIfFlattening, PassManager, Rebalance, RedundantJumps, StructureSplitting,
    SwizzleSimplification, TreeGrafting, Vectorization, VectorIndexToSwizzle, run_pass,
};

/// The passes of one sweep, built once per [`optimize`] call.
struct Pipeline {
    sweep: PassManager,
    unroll: Option<LoopUnrolling>,
    restabilize: PassManager,
}

impl Pipeline {
    fn new(options: &CompilerOptions) -> Self {
        let mut sweep = PassManager::new();
        sweep.add_pass(Box::new(LowerInstructions::new(LoweringRules::SUB_TO_ADD_NEG)));
        if options.linked {
            sweep.add_pass(Box::new(FunctionInlining));
            sweep.add_pass(Box::new(DeadFunctions));
            sweep.add_pass(Box::new(StructureSplitting));
        }
        sweep.add_pass(Box::new(InvariancePropagation));
        sweep.add_pass(Box::new(IfSimplification));
        sweep.add_pass(Box::new(NestedIfFlattening));
        sweep.add_pass(Box::new(CondDiscard));
        sweep.add_pass(Box::new(CopyPropagation));
        if options.optimize_for_aos {
            sweep.add_pass(Box::new(MatrixFlipping));
            sweep.add_pass(Box::new(Vectorization));
        }
        sweep.add_pass(Box::new(DeadCodeElimination {
            linked: options.linked,
            uniform_locations_assigned: options.uniform_locations_assigned,
        }));
        sweep.add_pass(Box::new(LocalDeadCode));
        sweep.add_pass(Box::new(TreeGrafting));
        sweep.add_pass(Box::new(ConstantPropagation));
        sweep.add_pass(Box::new(ConstantVariableMarking));
        sweep.add_pass(Box::new(ConstantFolding));
        sweep.add_pass(Box::new(MinMaxPrune));
        sweep.add_pass(Box::new(Rebalance));
        sweep.add_pass(Box::new(AlgebraicSimplification {
            preserve_nan: options.preserve_nan,
        }));
        sweep.add_pass(Box::new(jump_lowering(options)));
        sweep.add_pass(Box::new(VectorIndexToSwizzle));
        sweep.add_pass(Box::new(SwizzleSimplification));
        sweep.add_pass(Box::new(RedundantJumps));

        let unroll = options.unrolls_loops().then(|| LoopUnrolling {
            max_iterations: options.max_unroll_iterations,
            emit_no_loops: options.emit_no_loops,
        });

        let mut restabilize = PassManager::new();
        restabilize.add_pass(Box::new(ConstantPropagation));
        restabilize.add_pass(Box::new(IfSimplification));
        restabilize.add_pass(Box::new(jump_lowering(options)));

        Self {
            sweep,
            unroll,
            restabilize,
        }
    }

    /// Sweeps once, or until a sweep makes no progress in fixpoint mode.
    fn run_sweeps(
        &self,
        shader: &mut Shader,
        options: &CompilerOptions,
        sweeps: &mut usize,
    ) -> bool {
        let mut progress = false;
        let mut round = 0;
        loop {
            round += 1;
            *sweeps += 1;
            let changed = self.run_sweep(shader);
            debug!("sweep {sweeps}: progress = {changed}");
            progress |= changed;
            let done = match options.mode {
                DriverMode::SingleSweep => true,
                DriverMode::Fixpoint => !changed || round >= options.max_fixpoint_sweeps,
            };
            if done {
                return progress;
            }
        }
    }

    fn run_sweep(&self, shader: &mut Shader) -> bool {
        let mut changed = self.sweep.run_once(shader);
        if let Some(unroll) = &self.unroll
            && run_pass(unroll, shader)
        {
            changed = true;
            // Unrolled bodies expose constant induction values.
            self.restabilize.run(shader);
        }
        changed
    }
}

fn jump_lowering(options: &CompilerOptions) -> JumpLowering {
    JumpLowering {
        no_main_return: options.emit_no_main_return,
        no_continue: options.emit_no_cont,
    }
}

/// Rounds of sweeping and final lowering before the driver stops waiting
/// for the lowered shader to settle.
const MAX_LOWERING_ROUNDS: usize = 4;

/// Optimizes `shader` in place. Returns `true` if any pass changed it.
///
/// In fixpoint mode the output of the final lowering goes back through the
/// sweeps until neither changes it, so optimizing the result again reports
/// no progress.
///
/// Problems the caller must act on, such as a loop that could not be
/// unrolled when `emit_no_loops` is set, are reported to `diagnostics`.
pub fn optimize(
    shader: &mut Shader,
    options: &CompilerOptions,
    diagnostics: &mut dyn DiagnosticSink,
) -> bool {
    let pipeline = Pipeline::new(options);
    let lowering = LowerInstructions::new(options.final_lowering());
    let precision = options.lower_precision.map(LowerPrecision::new);
    let mut progress = false;
    let mut sweeps = 0;
    let mut rounds = 0;
    loop {
        rounds += 1;
        progress |= pipeline.run_sweeps(shader, options, &mut sweeps);

        let mut lowered = run_pass(&lowering, shader);
        if let Some(precision) = &precision {
            lowered |= run_pass(precision, shader);
        }
        progress |= lowered;
        if !lowered || options.mode == DriverMode::SingleSweep {
            break;
        }
        if rounds >= MAX_LOWERING_ROUNDS {
            warn!("lowered shader still changing after {rounds} rounds");
            break;
        }
    }

    if options.emit_no_loops {
        report_surviving_loops(shader, diagnostics);
    }

    info!(
        "optimized {:?} shader in {sweeps} sweep(s), progress = {progress}",
        shader.stage
    );
    progress
}

fn report_surviving_loops(shader: &Shader, diagnostics: &mut dyn DiagnosticSink) {
    for id in shader.user_signature_ids() {
        let signature = shader.signature(id);
        if block_contains(&signature.body, &mut |s| matches!(s, Statement::Loop { .. })) {
            diagnostics.report(Diagnostic {
                severity: Severity::Error,
                location: signature.location,
                message: format!(
                    "loop in `{}` could not be unrolled",
                    shader.functions[id.function].name
                ),
            });
        }
    }
}
