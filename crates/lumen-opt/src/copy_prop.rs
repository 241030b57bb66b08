//! Copy propagation pass.
//!
//! Within a basic block, after `a = b;` reads of `a` are replaced by reads of
//! `b` until either variable is written again.

use log::trace;
use lumen_ir::visit::statement_writes;
use lumen_ir::{Block, Deref, Handle, MemoryAccess, Rvalue, Shader, Statement, Variable, VariableMode};

use crate::Pass;
use crate::util::rewrite_bodies;

/// Replaces reads of copied variables by reads of their source.
#[derive(Debug)]
pub struct CopyPropagation;

impl Pass for CopyPropagation {
    fn name(&self) -> &str {
        "copy-prop"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        rewrite_bodies(shader, |shader, _, body| run_on_block(shader, body))
    }
}

/// `dst` currently holds the same value as `src`.
#[derive(Clone, Copy)]
struct CopyPair {
    dst: Handle<Variable>,
    src: Handle<Variable>,
}

fn propagate(rv: &mut Rvalue, copies: &[CopyPair]) -> bool {
    let mut changed = false;
    rv.rewrite_post_order(&mut |node| {
        let Rvalue::Deref(Deref::Variable { var, .. }) = node else {
            return;
        };
        if let Some(copy) = copies.iter().find(|c| c.dst == *var) {
            *var = copy.src;
            changed = true;
        }
    });
    changed
}

/// A source whose value may change behind the shader's back.
fn is_unstable_source(v: &Variable) -> bool {
    matches!(v.mode, VariableMode::ShaderStorage | VariableMode::ShaderShared)
        || v.memory.contains(MemoryAccess::VOLATILE)
}

fn run_on_block(shader: &Shader, block: &mut Block) -> bool {
    let mut changed = false;
    let mut copies: Vec<CopyPair> = Vec::new();

    for stmt in block.iter_mut() {
        match stmt {
            Statement::Call { callee, args, .. } => {
                let params = shader
                    .try_signature(*callee)
                    .map(|s| s.parameters.clone())
                    .unwrap_or_default();
                for (arg, param) in args.iter_mut().zip(params) {
                    // Out and inout arguments are storage, not values.
                    if !shader.variables[param].mode.is_externally_visible() {
                        changed |= propagate(arg, &copies);
                    }
                }
                copies.clear();
                continue;
            }
            Statement::Loop { .. } => copies.clear(),
            _ => {
                for slot in stmt.rvalues_mut() {
                    changed |= propagate(slot, &copies);
                }
            }
        }

        for nested in stmt.blocks_mut() {
            changed |= run_on_block(shader, nested);
        }
        if !stmt.blocks().is_empty() {
            copies.clear();
            continue;
        }

        if let Statement::Declare(var) = stmt {
            let var = *var;
            copies.retain(|c| c.dst != var && c.src != var);
            continue;
        }
        let written = statement_writes(shader, stmt);
        copies.retain(|c| !written.contains(&c.dst) && !written.contains(&c.src));

        if let Statement::Assign(a) = stmt
            && a.writes_whole()
            && let (Some(dst), Some(src)) = (a.whole_variable(), a.rhs.as_variable())
            && dst != src
            && !is_unstable_source(&shader.variables[src])
        {
            trace!(
                "copy {} = {}",
                shader.variables[dst].name, shader.variables[src].name
            );
            copies.push(CopyPair { dst, src });
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_ir::builder::add;
    use lumen_ir::{Constant, ShaderStage, Signature, Type};

    fn setup() -> (Shader, Handle<Variable>, Handle<Variable>, Handle<Variable>) {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let b = shader.add_global(Variable::new("b", Type::float(), VariableMode::In));
        let out = shader.add_global(Variable::new("o", Type::float(), VariableMode::Out));
        let a = shader.new_temporary("a", Type::float());
        (shader, a, b, out)
    }

    fn rhs(shader: &Shader, main: lumen_ir::SignatureId, index: usize) -> Rvalue {
        match &shader.signature(main).body[index] {
            Statement::Assign(a) => a.rhs.clone(),
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn reads_use_the_source() {
        let (mut shader, a, b, out) = setup();
        let main = shader.add_main(vec![
            Statement::Declare(a),
            Statement::assign(shader.deref(a), shader.read(b)),
            Statement::assign(shader.deref(out), add(shader.read(a), shader.read(a))),
        ]);
        assert!(CopyPropagation.run(&mut shader));
        assert_eq!(rhs(&shader, main, 2), add(shader.read(b), shader.read(b)));
        assert!(!CopyPropagation.run(&mut shader));
    }

    #[test]
    fn writes_end_the_copy() {
        let (mut shader, a, b, out) = setup();
        let main = shader.add_main(vec![
            Statement::assign(shader.deref(a), shader.read(b)),
            Statement::assign(shader.deref(a), Constant::float(1.0).into()),
            Statement::assign(shader.deref(out), shader.read(a)),
        ]);
        assert!(!CopyPropagation.run(&mut shader));
        assert_eq!(rhs(&shader, main, 2), shader.read(a));
    }

    #[test]
    fn nested_blocks_start_fresh() {
        let (mut shader, a, b, out) = setup();
        let main = shader.add_main(vec![
            Statement::assign(shader.deref(a), shader.read(b)),
            Statement::if_then(
                Constant::bool(true).into(),
                vec![Statement::assign(shader.deref(out), shader.read(a))],
            ),
            Statement::assign(shader.deref(out), shader.read(a)),
        ]);
        assert!(!CopyPropagation.run(&mut shader));
        assert_eq!(rhs(&shader, main, 2), shader.read(a));
    }

    #[test]
    fn out_arguments_are_left_alone() {
        let (mut shader, a, b, _) = setup();
        let p = shader.add_local(Variable::new("p", Type::float(), VariableMode::FunctionOut));
        let f = shader.add_signature("f", Signature::new(Type::void(), vec![p], Vec::new()));
        let main = shader.add_main(vec![
            Statement::assign(shader.deref(a), shader.read(b)),
            Statement::Call {
                callee: f,
                args: vec![shader.read(a)],
                return_deref: None,
            },
        ]);
        assert!(!CopyPropagation.run(&mut shader));
        match &shader.signature(main).body[1] {
            Statement::Call { args, .. } => assert_eq!(args[0], shader.read(a)),
            other => panic!("expected call, got {other:?}"),
        }
    }

    #[test]
    fn buffers_are_not_copy_sources() {
        let (mut shader, a, _, out) = setup();
        let ssbo = shader.add_global(Variable::new("buf", Type::float(), VariableMode::ShaderStorage));
        shader.add_main(vec![
            Statement::assign(shader.deref(a), shader.read(ssbo)),
            Statement::assign(shader.deref(out), shader.read(a)),
        ]);
        assert!(!CopyPropagation.run(&mut shader));
    }
}
