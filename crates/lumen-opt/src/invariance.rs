//! Invariance propagation.
//!
//! Variables that feed an `invariant` or `precise` variable must be computed
//! the same way, so they inherit the qualifier. Iterates to a fixpoint.

use log::trace;
use lumen_ir::visit::for_each_statement;
use lumen_ir::{Handle, Shader, Statement, Variable};

use crate::Pass;

#[derive(Debug)]
pub struct InvariancePropagation;

impl Pass for InvariancePropagation {
    fn name(&self) -> &str {
        "invariance-prop"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        let mut changed = false;
        loop {
            let updates = collect_updates(shader);
            if updates.is_empty() {
                return changed;
            }
            for (var, invariant, precise) in updates {
                let v = &mut shader.variables[var];
                trace!("{} inherits invariant={invariant} precise={precise}", v.name);
                v.invariant |= invariant;
                v.precise |= precise;
            }
            changed = true;
        }
    }
}

/// Variables that must gain a qualifier they do not have yet.
fn collect_updates(shader: &Shader) -> Vec<(Handle<Variable>, bool, bool)> {
    let mut updates: Vec<(Handle<Variable>, bool, bool)> = Vec::new();
    for id in shader.user_signature_ids() {
        for_each_statement(&shader.signature(id).body, &mut |stmt| {
            let (target, sources) = match stmt {
                Statement::Assign(a) => (a.lhs.variable_referenced(), stmt.rvalues()),
                Statement::Call {
                    args,
                    return_deref: Some(ret),
                    ..
                } => (ret.variable_referenced(), args.iter().collect()),
                _ => return,
            };
            let Some(target) = target else {
                return;
            };
            let (invariant, precise) = {
                let t = &shader.variables[target];
                (t.invariant, t.precise)
            };
            if !invariant && !precise {
                return;
            }
            let mut read = Vec::new();
            for rv in sources {
                rv.variables_read(&mut read);
            }
            for var in read {
                let v = &shader.variables[var];
                let gains_invariant = invariant && !v.invariant;
                let gains_precise = precise && !v.precise;
                if (gains_invariant || gains_precise) && !updates.iter().any(|u| u.0 == var) {
                    updates.push((var, gains_invariant, gains_precise));
                }
            }
        });
    }
    updates
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_ir::builder::{add, mul};
    use lumen_ir::{ShaderStage, Type, VariableMode};

    #[test]
    fn qualifiers_flow_backwards_through_assignments() {
        let mut shader = Shader::new(ShaderStage::Vertex);
        let pos = shader.add_global(Variable::new("pos", Type::vec(4), VariableMode::In));
        let scale = shader.add_global(Variable::new("scale", Type::float(), VariableMode::Uniform));
        let unrelated = shader.add_global(Variable::new("uv", Type::vec(4), VariableMode::In));
        let mut out = Variable::new("gl_Position", Type::vec(4), VariableMode::Out);
        out.invariant = true;
        let out = shader.add_global(out);
        let side = shader.add_global(Variable::new("o_uv", Type::vec(4), VariableMode::Out));
        let t = shader.new_temporary("t", Type::vec(4));
        shader.add_main(vec![
            Statement::assign(shader.deref(t), mul(shader.read(pos), shader.read(scale))),
            Statement::assign(shader.deref(out), add(shader.read(t), shader.read(t))),
            Statement::assign(shader.deref(side), shader.read(unrelated)),
        ]);

        assert!(InvariancePropagation.run(&mut shader));
        for var in [t, pos, scale] {
            assert!(shader.variables[var].invariant, "{}", shader.variables[var].name);
            assert!(!shader.variables[var].precise);
        }
        assert!(!shader.variables[unrelated].invariant);
        assert!(!InvariancePropagation.run(&mut shader));
    }

    #[test]
    fn precise_is_tracked_separately() {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let a = shader.add_global(Variable::new("a", Type::float(), VariableMode::In));
        let mut out = Variable::new("o", Type::float(), VariableMode::Out);
        out.precise = true;
        let out = shader.add_global(out);
        shader.add_main(vec![Statement::assign(shader.deref(out), shader.read(a))]);
        assert!(InvariancePropagation.run(&mut shader));
        assert!(shader.variables[a].precise);
        assert!(!shader.variables[a].invariant);
    }
}
