//! Constant propagation and constant-variable marking.
//!
//! [`ConstantPropagation`] tracks, per channel, which variables hold a
//! constant and substitutes those channels at reads.
//! [`ConstantVariableMarking`] records the value of locals that are written
//! exactly once with a constant, so the evaluator can fold their reads.

use std::collections::HashMap;

use log::trace;
use lumen_ir::visit::{for_each_statement, statement_writes, variables_written};
use lumen_ir::{
    Block, Constant, Deref, Handle, Rvalue, Scalar, Shader, Statement, Variable, VariableMode,
};

use crate::Pass;
use crate::util::rewrite_bodies;

/// Substitutes constant channels of variables at their reads.
#[derive(Debug)]
pub struct ConstantPropagation;

impl Pass for ConstantPropagation {
    fn name(&self) -> &str {
        "const-prop"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        rewrite_bodies(shader, |shader, _, body| {
            run_on_block(shader, body, &mut Known::default())
        })
    }
}

/// Known channel values of tracked variables.
#[derive(Clone, Default)]
struct Known {
    channels: HashMap<Handle<Variable>, [Option<Scalar>; 4]>,
}

impl Known {
    fn value(&self, shader: &Shader, var: Handle<Variable>) -> Option<Constant> {
        let channels = self.channels.get(&var)?;
        let ty = &shader.variables[var].ty;
        let components = channels[..ty.components()]
            .iter()
            .copied()
            .collect::<Option<Vec<_>>>()?;
        Some(Constant::new(ty.clone(), components))
    }

    fn swizzled(&self, var: Handle<Variable>, mask: &[u8], ty: &lumen_ir::Type) -> Option<Constant> {
        let channels = self.channels.get(&var)?;
        let components = mask
            .iter()
            .map(|&c| channels[c as usize])
            .collect::<Option<Vec<_>>>()?;
        Some(Constant::new(ty.clone(), components))
    }

    fn kill(&mut self, var: Handle<Variable>) {
        self.channels.remove(&var);
    }

    fn kill_all(&mut self, vars: &[Handle<Variable>]) {
        for var in vars {
            self.kill(*var);
        }
    }

    /// Records a write of `value` (or of something unknown) to the channels
    /// in `write_mask`.
    fn write(&mut self, var: Handle<Variable>, write_mask: u8, value: Option<&Constant>) {
        let channels = self.channels.entry(var).or_insert([None; 4]);
        let mut next = 0;
        for (channel, slot) in channels.iter_mut().enumerate() {
            if write_mask & (1 << channel) != 0 {
                *slot = value.map(|c| c.component(next));
                next += 1;
            }
        }
        if channels.iter().all(Option::is_none) {
            self.channels.remove(&var);
        }
    }
}

/// Numeric scalars and vectors whose storage only this invocation writes.
fn is_tracked(shader: &Shader, var: Handle<Variable>) -> bool {
    let v = &shader.variables[var];
    let local = !shader.is_global(var) && v.mode.is_local();
    let private_global = shader.is_global(var) && matches!(v.mode, VariableMode::Auto | VariableMode::Out);
    (local || private_global) && (v.ty.is_scalar() || v.ty.is_vector())
}

fn substitute(shader: &Shader, rv: &mut Rvalue, known: &Known) -> bool {
    let mut changed = false;
    rv.rewrite_post_order(&mut |node| {
        let value = match node {
            Rvalue::Deref(Deref::Variable { var, .. }) => known.value(shader, *var),
            Rvalue::Swizzle(s) => match s.val.as_variable() {
                Some(var) => known.swizzled(var, s.mask.as_slice(), &s.ty),
                None => None,
            },
            _ => None,
        };
        if let Some(value) = value {
            trace!("propagated {value}");
            *node = value.into();
            changed = true;
        }
    });
    changed
}

fn run_on_block(shader: &Shader, block: &mut Block, known: &mut Known) -> bool {
    let mut changed = false;
    for stmt in block.iter_mut() {
        match stmt {
            Statement::Declare(var) => known.kill(*var),
            Statement::Assign(a) => {
                for slot in a.lhs.index_slots_mut() {
                    changed |= substitute(shader, slot, known);
                }
                changed |= substitute(shader, &mut a.rhs, known);
                match a.whole_variable() {
                    Some(var) if is_tracked(shader, var) => {
                        known.write(var, a.write_mask, a.rhs.as_constant());
                    }
                    _ => {
                        if let Some(root) = a.lhs.variable_referenced() {
                            known.kill(root);
                        }
                    }
                }
            }
            Statement::Call { callee, args, .. } => {
                let params = shader
                    .try_signature(*callee)
                    .map(|s| s.parameters.clone())
                    .unwrap_or_default();
                for (arg, param) in args.iter_mut().zip(params) {
                    if !shader.variables[param].mode.is_externally_visible() {
                        changed |= substitute(shader, arg, known);
                    }
                }
                // The callee may write any global.
                *known = Known::default();
            }
            Statement::If {
                condition,
                then_block,
                else_block,
            } => {
                changed |= substitute(shader, condition, known);
                changed |= run_on_block(shader, then_block, &mut known.clone());
                changed |= run_on_block(shader, else_block, &mut known.clone());
                known.kill_all(&variables_written(shader, then_block));
                known.kill_all(&variables_written(shader, else_block));
                if calls_anything(then_block) || calls_anything(else_block) {
                    *known = Known::default();
                }
            }
            Statement::Loop { body } => {
                changed |= run_on_block(shader, body, &mut Known::default());
                known.kill_all(&variables_written(shader, body));
                if calls_anything(body) {
                    *known = Known::default();
                }
            }
            other => {
                for slot in other.rvalues_mut() {
                    changed |= substitute(shader, slot, known);
                }
            }
        }
    }
    changed
}

fn calls_anything(block: &[Statement]) -> bool {
    lumen_ir::visit::block_contains(block, &mut |s| matches!(s, Statement::Call { .. }))
}

/// Records the value of locals assigned a constant exactly once at the top
/// level of their function.
#[derive(Debug)]
pub struct ConstantVariableMarking;

impl Pass for ConstantVariableMarking {
    fn name(&self) -> &str {
        "const-var-marking"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        let mut found: Vec<(Handle<Variable>, Constant)> = Vec::new();
        for id in shader.user_signature_ids() {
            let body = &shader.signature(id).body;
            let mut writes: HashMap<Handle<Variable>, usize> = HashMap::new();
            for_each_statement(body, &mut |stmt| {
                for var in statement_writes(shader, stmt) {
                    *writes.entry(var).or_insert(0) += 1;
                }
            });
            for stmt in body {
                let Some(a) = stmt.as_assign() else {
                    continue;
                };
                let (Some(var), Some(value)) = (a.whole_variable(), a.rhs.as_constant()) else {
                    continue;
                };
                let v = &shader.variables[var];
                if shader.is_global(var)
                    || !v.mode.is_local()
                    || v.constant_value.is_some()
                    || !a.writes_whole()
                    || writes.get(&var) != Some(&1)
                {
                    continue;
                }
                found.push((var, value.clone()));
            }
        }
        for (var, value) in &found {
            trace!("{} is constant {value}", shader.variables[*var].name);
            shader.variables[*var].constant_value = Some(value.clone());
        }
        !found.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_ir::builder::{add, channel, less, swizzle};
    use lumen_ir::{Assign, Jump, ShaderStage, SignatureId, Type};

    fn c(v: f32) -> Rvalue {
        Constant::float(v).into()
    }

    fn rhs_at(shader: &Shader, main: SignatureId, index: usize) -> Rvalue {
        match &shader.signature(main).body[index] {
            Statement::Assign(a) => a.rhs.clone(),
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn whole_and_swizzled_reads() {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let v = shader.add_local(Variable::new("v", Type::vec(3), VariableMode::Auto));
        let out = shader.add_global(Variable::new("o", Type::vec(2), VariableMode::Out));
        let main = shader.add_main(vec![
            Statement::Declare(v),
            Statement::Assign(Assign::masked(shader.deref(v), Constant::vec(&[1.0, 2.0]).into(), 0b011)),
            Statement::assign(shader.deref(out), swizzle(shader.read(v), &[1, 0])),
            Statement::assign(shader.deref(out), swizzle(shader.read(v), &[2, 0])),
        ]);
        assert!(ConstantPropagation.run(&mut shader));
        assert_eq!(rhs_at(&shader, main, 2), Constant::vec(&[2.0, 1.0]).into());
        // Channel z was never written.
        assert_eq!(rhs_at(&shader, main, 3), swizzle(shader.read(v), &[2, 0]));
        assert!(!ConstantPropagation.run(&mut shader));
    }

    #[test]
    fn branches_inherit_and_kill() {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let u = shader.add_global(Variable::new("u", Type::float(), VariableMode::Uniform));
        let x = shader.new_temporary("x", Type::float());
        let out = shader.add_global(Variable::new("o", Type::float(), VariableMode::Out));
        let main = shader.add_main(vec![
            Statement::assign(shader.deref(x), c(1.0)),
            Statement::if_then(
                less(shader.read(u), c(0.0)),
                vec![
                    Statement::assign(shader.deref(out), shader.read(x)),
                    Statement::assign(shader.deref(x), shader.read(u)),
                ],
            ),
            Statement::assign(shader.deref(out), shader.read(x)),
        ]);
        assert!(ConstantPropagation.run(&mut shader));
        let body = &shader.signature(main).body;
        let Statement::If { then_block, .. } = &body[1] else {
            panic!("expected if");
        };
        assert_eq!(then_block[0].as_assign().map(|a| a.rhs.clone()), Some(c(1.0)));
        assert_eq!(rhs_at(&shader, main, 2), shader.read(x));
    }

    #[test]
    fn loops_start_fresh() {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let i = shader.new_temporary("i", Type::float());
        let out = shader.add_global(Variable::new("o", Type::float(), VariableMode::Out));
        let main = shader.add_main(vec![
            Statement::assign(shader.deref(i), c(0.0)),
            Statement::Loop {
                body: vec![
                    Statement::assign(shader.deref(out), shader.read(i)),
                    Statement::assign(shader.deref(i), add(shader.read(i), c(1.0))),
                    Statement::Jump(Jump::Break),
                ],
            },
        ]);
        assert!(!ConstantPropagation.run(&mut shader));
        let Statement::Loop { body } = &shader.signature(main).body[1] else {
            panic!("expected loop");
        };
        assert_eq!(body[0].as_assign().map(|a| a.rhs.clone()), Some(shader.read(i)));
    }

    #[test]
    fn uniforms_are_not_tracked() {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let u = shader.add_global(Variable::new("u", Type::vec(2), VariableMode::Uniform));
        let out = shader.add_global(Variable::new("o", Type::float(), VariableMode::Out));
        shader.add_main(vec![Statement::assign(shader.deref(out), channel(shader.read(u), 0))]);
        assert!(!ConstantPropagation.run(&mut shader));
    }

    #[test]
    fn marks_single_constant_writes() {
        let mut shader = Shader::new(ShaderStage::Vertex);
        let k = shader.add_local(Variable::new("k", Type::float(), VariableMode::Auto));
        let twice = shader.add_local(Variable::new("twice", Type::float(), VariableMode::Auto));
        let out = shader.add_global(Variable::new("o", Type::float(), VariableMode::Out));
        shader.add_main(vec![
            Statement::Declare(k),
            Statement::Declare(twice),
            Statement::assign(shader.deref(k), c(3.0)),
            Statement::assign(shader.deref(twice), c(1.0)),
            Statement::assign(shader.deref(twice), c(2.0)),
            Statement::assign(shader.deref(out), c(2.0)),
        ]);
        assert!(ConstantVariableMarking.run(&mut shader));
        assert_eq!(shader.variables[k].constant_value, Some(Constant::float(3.0)));
        assert!(shader.variables[twice].constant_value.is_none());
        // Outputs are never marked.
        assert!(shader.variables[out].constant_value.is_none());
        assert!(!ConstantVariableMarking.run(&mut shader));
    }
}
