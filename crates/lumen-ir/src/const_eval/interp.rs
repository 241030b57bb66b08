//! Interpreter for built-in function bodies with constant arguments.

use std::collections::HashMap;

use log::trace;

use super::{EvalContext, constant_value};
use crate::arena::Handle;
use crate::constant::Constant;
use crate::func::Signature;
use crate::rvalue::{Deref, Rvalue};
use crate::stmt::{Assign, Jump, Statement};
use crate::var::Variable;

/// Nested built-in calls deeper than this are not evaluated.
const MAX_CALL_DEPTH: usize = 16;

enum Flow {
    Next,
    Return(Option<Constant>),
}

struct Interpreter<'a> {
    ctx: EvalContext<'a>,
    values: HashMap<Handle<Variable>, Constant>,
    depth: usize,
}

/// Evaluates a call to a built-in signature whose arguments are all
/// constants. User-defined signatures, bodies using loops or other
/// unsupported statements, and paths depending on non-constant values
/// yield `None`.
pub fn call_value(
    signature: &Signature,
    args: &[Constant],
    ctx: &EvalContext<'_>,
) -> Option<Constant> {
    call_at_depth(signature, args, ctx, 0)
}

fn call_at_depth(
    signature: &Signature,
    args: &[Constant],
    ctx: &EvalContext<'_>,
    depth: usize,
) -> Option<Constant> {
    if !signature.is_builtin || !signature.is_defined || depth > MAX_CALL_DEPTH {
        return None;
    }
    if signature.parameters.len() != args.len() || signature.return_type.is_void() {
        return None;
    }
    let values = signature
        .parameters
        .iter()
        .copied()
        .zip(args.iter().cloned())
        .collect();
    let mut interp = Interpreter {
        ctx: EvalContext {
            bindings: None,
            ..*ctx
        },
        values,
        depth,
    };
    match interp.run(&signature.body)? {
        Flow::Return(Some(value)) => {
            debug_assert_eq!(value.ty, signature.return_type);
            Some(value)
        }
        Flow::Return(None) | Flow::Next => None,
    }
}

impl Interpreter<'_> {
    fn eval(&self, rv: &Rvalue) -> Option<Constant> {
        let ctx = EvalContext {
            bindings: Some(&self.values),
            ..self.ctx
        };
        constant_value(rv, &ctx)
    }

    fn run(&mut self, block: &[Statement]) -> Option<Flow> {
        for stmt in block {
            match stmt {
                Statement::Declare(var) => {
                    self.values.remove(var);
                }
                Statement::Assign(assign) => self.assign(assign)?,
                Statement::Call {
                    callee,
                    args,
                    return_deref,
                } => {
                    let signature = self.ctx.signature(*callee)?;
                    let args = args
                        .iter()
                        .map(|a| self.eval(a))
                        .collect::<Option<Vec<_>>>()?;
                    let value = call_at_depth(signature, &args, &self.ctx, self.depth + 1)?;
                    let var = return_deref.as_ref()?.as_variable()?;
                    self.values.insert(var, value);
                }
                Statement::If {
                    condition,
                    then_block,
                    else_block,
                } => {
                    let taken = if self.eval(condition)?.get_bool(0) {
                        then_block
                    } else {
                        else_block
                    };
                    if let Flow::Return(value) = self.run(taken)? {
                        return Some(Flow::Return(value));
                    }
                }
                Statement::Jump(Jump::Return(value)) => {
                    let value = match value {
                        Some(rv) => Some(self.eval(rv)?),
                        None => None,
                    };
                    return Some(Flow::Return(value));
                }
                other => {
                    trace!("built-in evaluation stops at {other:?}");
                    return None;
                }
            }
        }
        Some(Flow::Next)
    }

    /// Stores into a whole variable, honouring the write mask. Partial
    /// writes to a variable with no value start from zero.
    fn assign(&mut self, assign: &Assign) -> Option<()> {
        let rhs = self.eval(&assign.rhs)?;
        let Deref::Variable { var, ty } = &assign.lhs else {
            return None;
        };
        if assign.writes_whole() {
            self.values.insert(*var, rhs);
            return Some(());
        }
        let mut current = self
            .values
            .remove(var)
            .unwrap_or_else(|| Constant::zero(ty.clone()));
        let mut components = current.components().to_vec();
        let mut next = 0;
        for (channel, slot) in components.iter_mut().enumerate() {
            if assign.write_mask & (1 << channel) != 0 {
                *slot = rhs.component(next);
                next += 1;
            }
        }
        current = Constant::new(ty.clone(), components);
        self.values.insert(*var, current);
        Some(())
    }
}
