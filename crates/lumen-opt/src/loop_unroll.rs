//! Loop analysis and unrolling.
//!
//! A loop is unrollable when it opens with `if (cond) break;`, leaves by no
//! other jump, and `cond` depends only on constants and a single induction
//! variable. The induction variable must be a scalar local with a constant
//! value just before the loop, written exactly once per iteration by a
//! top-level assignment that reads nothing but itself. The trip count is
//! found by stepping that assignment through the constant evaluator.

use std::collections::HashMap;

use log::trace;
use lumen_ir::const_eval::{EvalContext, constant_value};
use lumen_ir::visit::{block_contains, for_each_statement, statement_writes};
use lumen_ir::{Block, Constant, Handle, Jump, Rvalue, Shader, Statement, Variable};

use crate::Pass;
use crate::util::rewrite_bodies;

/// Trip-count ceiling used when loops must not survive at all.
const NO_LOOPS_LIMIT: u32 = 256;

/// Replaces loops with a known, small trip count by copies of their body.
#[derive(Debug)]
pub struct LoopUnrolling {
    /// Loops running at most this many times are unrolled.
    pub max_iterations: u32,
    /// Raise the limit so that every analysable loop goes away.
    pub emit_no_loops: bool,
}

impl Pass for LoopUnrolling {
    fn name(&self) -> &str {
        "unroll-loops"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        let limit = self.limit();
        rewrite_bodies(shader, |shader, _, body| unroll_block(shader, body, limit))
    }
}

impl LoopUnrolling {
    fn limit(&self) -> u32 {
        if self.emit_no_loops {
            self.max_iterations.max(NO_LOOPS_LIMIT)
        } else {
            self.max_iterations
        }
    }
}

fn unroll_block(shader: &Shader, block: &mut Block, limit: u32) -> bool {
    let mut changed = false;
    for stmt in block.iter_mut() {
        for nested in stmt.blocks_mut() {
            changed |= unroll_block(shader, nested, limit);
        }
    }
    let mut i = 0;
    while i < block.len() {
        let count = match &block[i] {
            Statement::Loop { body } => analyze(shader, &block[..i], body)
                .and_then(|analysis| analysis.trip_count(shader, limit)),
            _ => None,
        };
        let Some(count) = count else {
            i += 1;
            continue;
        };
        let Statement::Loop { body } = block.remove(i) else {
            unreachable!("analysed statement is a loop");
        };
        trace!("unrolling loop {count} time(s)");
        let iteration = &body[1..];
        let copies: Vec<Statement> = (0..count).flat_map(|_| iteration.iter().cloned()).collect();
        let len = copies.len();
        block.splice(i..i, copies);
        i += len;
        changed = true;
    }
    changed
}

/// What the analysis learned about one loop.
#[derive(Debug)]
struct LoopAnalysis<'a> {
    induction: Handle<Variable>,
    initial: Constant,
    step: &'a Rvalue,
    exit: &'a Rvalue,
}

impl LoopAnalysis<'_> {
    /// Number of iterations before `exit` first holds, if at most `limit`.
    fn trip_count(&self, shader: &Shader, limit: u32) -> Option<u32> {
        let mut bindings = HashMap::from([(self.induction, self.initial.clone())]);
        for count in 0..=limit {
            let ctx = EvalContext::for_shader(shader).with_bindings(&bindings);
            if constant_value(self.exit, &ctx)?.get_bool(0) {
                return Some(count);
            }
            let next = constant_value(self.step, &ctx)?;
            bindings.insert(self.induction, next);
        }
        None
    }
}

/// The `cond` of a leading `if (cond) break;`.
fn exit_condition(body: &Block) -> Option<&Rvalue> {
    match body.first()? {
        Statement::If {
            condition,
            then_block,
            else_block,
        } if else_block.is_empty() && matches!(then_block.as_slice(), [Statement::Jump(Jump::Break)]) => {
            Some(condition)
        }
        _ => None,
    }
}

fn analyze<'a>(shader: &Shader, preceding: &[Statement], body: &'a Block) -> Option<LoopAnalysis<'a>> {
    let exit = exit_condition(body)?;
    if block_contains(&body[1..], &mut |s| matches!(s, Statement::Jump(_))) {
        return None;
    }
    let mut read = Vec::new();
    exit.variables_read(&mut read);
    let induction = *read.first()?;
    if read.iter().any(|&v| v != induction) {
        return None;
    }
    let var = &shader.variables[induction];
    if !var.mode.is_local() || !var.ty.is_scalar() {
        return None;
    }
    let step = induction_step(shader, body, induction)?;
    let initial = initial_value(shader, preceding, induction)?;
    Some(LoopAnalysis {
        induction,
        initial,
        step,
        exit,
    })
}

/// The right-hand side of the single update of `var` in `body`.
fn induction_step<'a>(shader: &Shader, body: &'a Block, var: Handle<Variable>) -> Option<&'a Rvalue> {
    let mut writes = 0;
    for_each_statement(body, &mut |s| {
        if statement_writes(shader, s).contains(&var) {
            writes += 1;
        }
    });
    if writes != 1 {
        return None;
    }
    body.iter().find_map(|s| match s {
        Statement::Assign(a) if a.whole_variable() == Some(var) => {
            let mut reads = Vec::new();
            a.rhs.variables_read(&mut reads);
            reads.iter().all(|&r| r == var).then_some(&a.rhs)
        }
        _ => None,
    })
}

/// The constant held by `var` when the loop is entered.
fn initial_value(shader: &Shader, preceding: &[Statement], var: Handle<Variable>) -> Option<Constant> {
    let ctx = EvalContext::for_shader(shader);
    for stmt in preceding.iter().rev() {
        match stmt {
            Statement::Declare(v) if *v == var => return None,
            Statement::Assign(a) if a.whole_variable() == Some(var) => {
                return constant_value(&a.rhs, &ctx);
            }
            other => {
                let mut touches = false;
                for_each_statement(std::slice::from_ref(other), &mut |s| {
                    touches |= statement_writes(shader, s).contains(&var);
                });
                if touches {
                    return None;
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_ir::builder::{add, gequal, less, mul};
    use lumen_ir::{Deref, ShaderStage, Type, VariableMode};

    struct Fixture {
        shader: Shader,
        i: Handle<Variable>,
        out: Handle<Variable>,
    }

    fn fixture() -> Fixture {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let out = shader.add_global(Variable::new("o", Type::int(), VariableMode::Out));
        let i = shader.add_local(Variable::new("i", Type::int(), VariableMode::Auto));
        Fixture { shader, i, out }
    }

    fn int(v: i32) -> Rvalue {
        Constant::int(v).into()
    }

    impl Fixture {
        fn counting_loop(&self, exit: Rvalue, step: i32) -> Vec<Statement> {
            let i = Deref::variable(self.i, Type::int());
            vec![
                Statement::Declare(self.i),
                Statement::assign(i.clone(), int(0)),
                Statement::Loop {
                    body: vec![
                        Statement::if_then(exit, vec![Statement::Jump(Jump::Break)]),
                        Statement::assign(
                            self.shader.deref(self.out),
                            add(self.shader.read(self.out), self.shader.read(self.i)),
                        ),
                        Statement::assign(i, add(self.shader.read(self.i), int(step))),
                    ],
                },
            ]
        }
    }

    fn unroller(max_iterations: u32) -> LoopUnrolling {
        LoopUnrolling {
            max_iterations,
            emit_no_loops: false,
        }
    }

    #[test]
    fn short_counted_loop_is_unrolled() {
        let mut f = fixture();
        let exit = gequal(f.shader.read(f.i), int(3));
        let body = f.counting_loop(exit, 1);
        let main = f.shader.add_main(body);
        assert!(unroller(8).run(&mut f.shader));
        let body = &f.shader.signature(main).body;
        assert!(!body.iter().any(|s| matches!(s, Statement::Loop { .. })));
        // declare, init, then three copies of the two-statement iteration
        assert_eq!(body.len(), 2 + 3 * 2);
        assert!(!unroller(8).run(&mut f.shader));
    }

    #[test]
    fn loop_that_never_runs_is_removed() {
        let mut f = fixture();
        let exit = gequal(f.shader.read(f.i), int(0));
        let body = f.counting_loop(exit, 1);
        let main = f.shader.add_main(body);
        assert!(unroller(8).run(&mut f.shader));
        assert_eq!(f.shader.signature(main).body.len(), 2);
    }

    #[test]
    fn long_loops_stay_unless_loops_are_forbidden() {
        let mut f = fixture();
        let exit = gequal(f.shader.read(f.i), int(100));
        let body = f.counting_loop(exit, 1);
        let main = f.shader.add_main(body);
        assert!(!unroller(32).run(&mut f.shader));
        let no_loops = LoopUnrolling {
            max_iterations: 32,
            emit_no_loops: true,
        };
        assert!(no_loops.run(&mut f.shader));
        assert_eq!(f.shader.signature(main).body.len(), 2 + 100 * 2);
    }

    #[test]
    fn nonterminating_loop_is_kept() {
        let mut f = fixture();
        let exit = less(f.shader.read(f.i), int(0));
        let body = f.counting_loop(exit, 1);
        f.shader.add_main(body);
        assert!(!unroller(64).run(&mut f.shader));
    }

    #[test]
    fn non_additive_steps_are_simulated() {
        let mut f = fixture();
        let i = Deref::variable(f.i, Type::int());
        let main = f.shader.add_main(vec![
            Statement::Declare(f.i),
            Statement::assign(i.clone(), int(1)),
            Statement::Loop {
                body: vec![
                    Statement::if_then(gequal(f.shader.read(f.i), int(16)), vec![Statement::Jump(Jump::Break)]),
                    Statement::assign(i, mul(f.shader.read(f.i), int(2))),
                ],
            },
        ]);
        assert!(unroller(8).run(&mut f.shader));
        // 1, 2, 4, 8 run; 16 exits
        assert_eq!(f.shader.signature(main).body.len(), 2 + 4);
    }

    #[test]
    fn unknown_initial_value_blocks_unrolling() {
        let mut f = fixture();
        let u = f.shader.add_global(Variable::new("u", Type::int(), VariableMode::Uniform));
        let mut body = f.counting_loop(gequal(f.shader.read(f.i), int(3)), 1);
        body[1] = Statement::assign(Deref::variable(f.i, Type::int()), f.shader.read(u));
        f.shader.add_main(body);
        assert!(!unroller(8).run(&mut f.shader));
    }

    #[test]
    fn extra_exits_block_unrolling() {
        let mut f = fixture();
        let mut body = f.counting_loop(gequal(f.shader.read(f.i), int(3)), 1);
        if let Statement::Loop { body } = &mut body[2] {
            body.push(Statement::if_then(
                less(f.shader.read(f.out), int(0)),
                vec![Statement::Jump(Jump::Break)],
            ));
        }
        f.shader.add_main(body);
        assert!(!unroller(8).run(&mut f.shader));
    }
}
