//! If-statement simplification.
//!
//! [`IfSimplification`] splices in the branch selected by a constant
//! condition, removes ifs with two empty branches and turns an empty `then`
//! into a negated condition. [`NestedIfFlattening`] merges an if whose only
//! statement is another else-less if.

use log::trace;
use lumen_ir::builder::{logic_and, logic_not};
use lumen_ir::{Block, Shader, Statement};

use crate::Pass;
use crate::util::rewrite_bodies;

/// Removes statically decided and empty ifs.
#[derive(Debug)]
pub struct IfSimplification;

impl Pass for IfSimplification {
    fn name(&self) -> &str {
        "if-simplify"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        rewrite_bodies(shader, |_, _, body| simplify_block(body))
    }
}

fn simplify_block(block: &mut Block) -> bool {
    let mut changed = false;
    let mut out = Vec::with_capacity(block.len());
    for mut stmt in std::mem::take(block) {
        for nested in stmt.blocks_mut() {
            changed |= simplify_block(nested);
        }
        let Statement::If {
            condition,
            then_block,
            else_block,
        } = stmt
        else {
            out.push(stmt);
            continue;
        };
        if let Some(value) = condition.as_constant() {
            let taken = value.get_bool(0);
            trace!("if with constant condition {taken}");
            out.extend(if taken { then_block } else { else_block });
            changed = true;
        } else if then_block.is_empty() && else_block.is_empty() {
            trace!("removing empty if");
            changed = true;
        } else if then_block.is_empty() {
            out.push(Statement::if_then(logic_not(condition), else_block));
            changed = true;
        } else {
            out.push(Statement::If {
                condition,
                then_block,
                else_block,
            });
        }
    }
    *block = out;
    changed
}

/// Merges `if (a) { if (b) { X } }` into `if (a && b) { X }`.
#[derive(Debug)]
pub struct NestedIfFlattening;

impl Pass for NestedIfFlattening {
    fn name(&self) -> &str {
        "nested-if-flatten"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        rewrite_bodies(shader, |_, _, body| flatten_block(body))
    }
}

fn is_plain_if(stmt: &Statement) -> bool {
    matches!(stmt, Statement::If { else_block, .. } if else_block.is_empty())
}

fn flatten_block(block: &mut Block) -> bool {
    let mut changed = false;
    for stmt in block.iter_mut() {
        for nested in stmt.blocks_mut() {
            changed |= flatten_block(nested);
        }
        let Statement::If {
            condition,
            then_block,
            else_block,
        } = stmt
        else {
            continue;
        };
        if !else_block.is_empty() || then_block.len() != 1 || !is_plain_if(&then_block[0]) {
            continue;
        }
        let Some(Statement::If {
            condition: inner,
            then_block: body,
            ..
        }) = then_block.pop()
        else {
            continue;
        };
        *condition = logic_and(condition.take(), inner);
        *then_block = body;
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_ir::builder::less;
    use lumen_ir::{Constant, Handle, Rvalue, ShaderStage, Type, Variable, VariableMode};

    fn setup() -> (Shader, Handle<Variable>, Handle<Variable>) {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let u = shader.add_global(Variable::new("u", Type::float(), VariableMode::Uniform));
        let out = shader.add_global(Variable::new("o", Type::float(), VariableMode::Out));
        (shader, u, out)
    }

    fn c(v: f32) -> Rvalue {
        Constant::float(v).into()
    }

    #[test]
    fn constant_condition_selects_branch() {
        let (mut shader, _, out) = setup();
        let write = Statement::assign(shader.deref(out), c(1.0));
        let other = Statement::assign(shader.deref(out), c(2.0));
        let main = shader.add_main(vec![Statement::If {
            condition: Constant::bool(false).into(),
            then_block: vec![write],
            else_block: vec![other.clone()],
        }]);
        assert!(IfSimplification.run(&mut shader));
        assert_eq!(shader.signature(main).body, vec![other]);
    }

    #[test]
    fn empty_if_is_removed() {
        let (mut shader, u, _) = setup();
        let main = shader.add_main(vec![Statement::if_then(less(shader.read(u), c(0.0)), Vec::new())]);
        assert!(IfSimplification.run(&mut shader));
        assert!(shader.signature(main).body.is_empty());
    }

    #[test]
    fn empty_then_inverts_condition() {
        let (mut shader, u, out) = setup();
        let cond = less(shader.read(u), c(0.0));
        let write = Statement::assign(shader.deref(out), c(1.0));
        let main = shader.add_main(vec![Statement::If {
            condition: cond.clone(),
            then_block: Vec::new(),
            else_block: vec![write.clone()],
        }]);
        assert!(IfSimplification.run(&mut shader));
        assert_eq!(
            shader.signature(main).body,
            vec![Statement::if_then(logic_not(cond), vec![write])]
        );
        assert!(!IfSimplification.run(&mut shader));
    }

    #[test]
    fn nested_ifs_merge() {
        let (mut shader, u, out) = setup();
        let a = less(shader.read(u), c(1.0));
        let b = less(c(0.0), shader.read(u));
        let write = Statement::assign(shader.deref(out), c(1.0));
        let main = shader.add_main(vec![Statement::if_then(
            a.clone(),
            vec![Statement::if_then(b.clone(), vec![write.clone()])],
        )]);
        assert!(NestedIfFlattening.run(&mut shader));
        assert_eq!(
            shader.signature(main).body,
            vec![Statement::if_then(logic_and(a, b), vec![write])]
        );
        assert!(!NestedIfFlattening.run(&mut shader));
    }

    #[test]
    fn else_branches_prevent_merging() {
        let (mut shader, u, out) = setup();
        let write = Statement::assign(shader.deref(out), c(1.0));
        shader.add_main(vec![Statement::if_then(
            less(shader.read(u), c(1.0)),
            vec![Statement::If {
                condition: less(c(0.0), shader.read(u)),
                then_block: vec![write.clone()],
                else_block: vec![write],
            }],
        )]);
        assert!(!NestedIfFlattening.run(&mut shader));
    }
}
