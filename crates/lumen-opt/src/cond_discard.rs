//! Conditional-discard folding.
//!
//! Rewrites `if (c) { discard; }` as a conditional discard `discard c`, so
//! targets with a predicated kill instruction need no branch. A discard that
//! already carries a condition `d` becomes `discard c && d`.

use log::trace;
use lumen_ir::builder::logic_and;
use lumen_ir::{Block, Shader, Statement};

use crate::Pass;
use crate::util::rewrite_bodies;

#[derive(Debug)]
pub struct CondDiscard;

impl Pass for CondDiscard {
    fn name(&self) -> &str {
        "cond-discard"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        rewrite_bodies(shader, |_, _, body| run_on_block(body))
    }
}

fn run_on_block(block: &mut Block) -> bool {
    let mut changed = false;
    for stmt in block.iter_mut() {
        for nested in stmt.blocks_mut() {
            changed |= run_on_block(nested);
        }
        let Statement::If {
            condition,
            then_block,
            else_block,
        } = stmt
        else {
            continue;
        };
        if !else_block.is_empty() || then_block.len() != 1 {
            continue;
        }
        let Statement::Discard(inner) = &mut then_block[0] else {
            continue;
        };
        let condition = match inner.take() {
            Some(d) => logic_and(condition.take(), d),
            None => condition.take(),
        };
        trace!("folded if around discard");
        *stmt = Statement::Discard(Some(condition));
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_ir::builder::less;
    use lumen_ir::{Constant, Rvalue, ShaderStage, Type, Variable, VariableMode};

    fn c(v: f32) -> Rvalue {
        Constant::float(v).into()
    }

    #[test]
    fn plain_discard() {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let u = shader.add_global(Variable::new("u", Type::float(), VariableMode::Uniform));
        let cond = less(shader.read(u), c(0.5));
        let main = shader.add_main(vec![Statement::if_then(
            cond.clone(),
            vec![Statement::Discard(None)],
        )]);
        assert!(CondDiscard.run(&mut shader));
        assert_eq!(shader.signature(main).body, vec![Statement::Discard(Some(cond))]);
        assert!(!CondDiscard.run(&mut shader));
    }

    #[test]
    fn existing_condition_is_anded() {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let u = shader.add_global(Variable::new("u", Type::float(), VariableMode::Uniform));
        let a = less(shader.read(u), c(0.5));
        let b = less(c(0.1), shader.read(u));
        let main = shader.add_main(vec![Statement::if_then(
            a.clone(),
            vec![Statement::Discard(Some(b.clone()))],
        )]);
        assert!(CondDiscard.run(&mut shader));
        assert_eq!(
            shader.signature(main).body,
            vec![Statement::Discard(Some(logic_and(a, b)))]
        );
    }

    #[test]
    fn other_statements_keep_the_branch() {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let u = shader.add_global(Variable::new("u", Type::float(), VariableMode::Uniform));
        let out = shader.add_global(Variable::new("o", Type::float(), VariableMode::Out));
        shader.add_main(vec![Statement::if_then(
            less(shader.read(u), c(0.5)),
            vec![
                Statement::assign(shader.deref(out), c(1.0)),
                Statement::Discard(None),
            ],
        )]);
        assert!(!CondDiscard.run(&mut shader));
    }
}
