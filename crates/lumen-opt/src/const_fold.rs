//! Constant folding pass.
//!
//! Replaces every rvalue tree that has a compile-time value with the
//! resulting constant, resolves discards whose condition is constant, and
//! evaluates calls to built-in functions whose arguments are all constant.

use log::trace;
use lumen_ir::const_eval::{EvalContext, call_value, constant_value};
use lumen_ir::{Assign, Block, Rvalue, Shader, Statement, VariableMode};

use crate::Pass;
use crate::util::rewrite_bodies;

/// Folds constant rvalues at compile time.
#[derive(Debug)]
pub struct ConstantFolding;

impl Pass for ConstantFolding {
    fn name(&self) -> &str {
        "const-fold"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        rewrite_bodies(shader, |shader, _, body| run_on_block(shader, body))
    }
}

fn run_on_block(shader: &Shader, block: &mut Block) -> bool {
    let mut changed = false;
    let ctx = EvalContext::for_shader(shader);

    for stmt in block.iter_mut() {
        for nested in stmt.blocks_mut() {
            changed |= run_on_block(shader, nested);
        }
        for slot in stmt.rvalues_mut() {
            changed |= fold_tree(slot, &ctx);
        }
        if let Some(replacement) = fold_builtin_call(shader, stmt, &ctx) {
            *stmt = replacement;
            changed = true;
        }
    }

    block.retain_mut(|stmt| {
        let Statement::Discard(Some(cond)) = stmt else {
            return true;
        };
        let Some(always) = cond.as_constant().map(|c| c.get_bool(0)) else {
            return true;
        };
        changed = true;
        if always {
            *stmt = Statement::Discard(None);
        }
        always
    });
    changed
}

/// Folds bottom-up so a partially constant tree still has its constant
/// subtrees replaced.
fn fold_tree(slot: &mut Rvalue, ctx: &EvalContext<'_>) -> bool {
    let mut changed = false;
    slot.rewrite_post_order(&mut |node| {
        if node.is_constant() || matches!(node, Rvalue::Texture(_)) {
            return;
        }
        if let Some(value) = constant_value(node, ctx) {
            trace!("folded {}", value);
            *node = value.into();
            changed = true;
        }
    });
    changed
}

/// Turns a call to a built-in with constant arguments and no output
/// parameters into an assignment of its value.
fn fold_builtin_call(shader: &Shader, stmt: &Statement, ctx: &EvalContext<'_>) -> Option<Statement> {
    let Statement::Call {
        callee,
        args,
        return_deref: Some(ret),
    } = stmt
    else {
        return None;
    };
    let signature = shader.try_signature(*callee)?;
    if !signature.is_builtin {
        return None;
    }
    let writes_outputs = signature.parameters.iter().any(|&p| {
        matches!(
            shader.variables[p].mode,
            VariableMode::FunctionOut | VariableMode::FunctionInOut
        )
    });
    if writes_outputs {
        return None;
    }
    let args = args
        .iter()
        .map(|a| a.as_constant().cloned())
        .collect::<Option<Vec<_>>>()?;
    let value = call_value(signature, &args, ctx)?;
    if value.ty != *ret.ty() {
        return None;
    }
    Some(Statement::Assign(Assign::new(ret.clone(), value.into())))
}
