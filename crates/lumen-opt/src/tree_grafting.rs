//! Tree grafting pass.
//!
//! Moves the right-hand side of `t = expr;` into the single later statement
//! that reads `t`, turning chains of single-use temporaries back into one
//! expression tree.

use std::collections::HashMap;

use log::trace;
use lumen_ir::visit::{for_each_statement, read_counts, replace_reads, statement_writes};
use lumen_ir::{Block, Handle, Shader, Statement, Variable};

use crate::Pass;
use crate::util::rewrite_bodies;

/// Sinks single-use temporaries into their use site.
#[derive(Debug)]
pub struct TreeGrafting;

impl Pass for TreeGrafting {
    fn name(&self) -> &str {
        "tree-grafting"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        rewrite_bodies(shader, |shader, _, body| {
            let reads = read_counts(body);
            let mut writes: HashMap<Handle<Variable>, usize> = HashMap::new();
            for_each_statement(body, &mut |stmt| {
                for var in statement_writes(shader, stmt) {
                    *writes.entry(var).or_insert(0) += 1;
                }
            });
            let counts = UseCounts { reads, writes };
            run_on_block(shader, body, &counts)
        })
    }
}

struct UseCounts {
    reads: HashMap<Handle<Variable>, usize>,
    writes: HashMap<Handle<Variable>, usize>,
}

impl UseCounts {
    fn single_use(&self, var: Handle<Variable>) -> bool {
        self.reads.get(&var) == Some(&1) && self.writes.get(&var) == Some(&1)
    }
}

/// The variable a statement may be grafted from.
fn graft_candidate(shader: &Shader, stmt: &Statement, counts: &UseCounts) -> Option<Handle<Variable>> {
    let assign = stmt.as_assign()?;
    let var = assign.whole_variable()?;
    let v = &shader.variables[var];
    if shader.is_global(var) || !v.mode.is_local() || !assign.writes_whole() {
        return None;
    }
    if !v.ty.is_numeric_or_bool() || !counts.single_use(var) {
        return None;
    }
    Some(var)
}

fn reads_var(stmt: &Statement, var: Handle<Variable>) -> bool {
    stmt.rvalues().into_iter().any(|rv| rv.references(var))
}

/// Finds the statement that reads `var`, provided nothing between `from` and
/// it could change the value of `expr_reads` or `var`.
fn find_use(
    shader: &Shader,
    block: &Block,
    removed: &[bool],
    from: usize,
    var: Handle<Variable>,
    expr_reads: &[Handle<Variable>],
) -> Option<usize> {
    for (k, stmt) in block.iter().enumerate().skip(from + 1) {
        if removed[k] {
            continue;
        }
        if reads_var(stmt, var) {
            return Some(k);
        }
        match stmt {
            Statement::Declare(_) => {}
            Statement::Assign(_) => {
                let written = statement_writes(shader, stmt);
                if written.iter().any(|w| *w == var || expr_reads.contains(w)) {
                    return None;
                }
            }
            _ => return None,
        }
    }
    None
}

fn run_on_block(shader: &Shader, block: &mut Block, counts: &UseCounts) -> bool {
    let mut changed = false;
    for stmt in block.iter_mut() {
        for nested in stmt.blocks_mut() {
            changed |= run_on_block(shader, nested, counts);
        }
    }

    let mut removed = vec![false; block.len()];
    for i in 0..block.len() {
        let Some(var) = graft_candidate(shader, &block[i], counts) else {
            continue;
        };
        let mut expr_reads = Vec::new();
        if let Statement::Assign(a) = &block[i] {
            a.rhs.variables_read(&mut expr_reads);
        }
        let Some(k) = find_use(shader, block, &removed, i, var, &expr_reads) else {
            continue;
        };
        let Statement::Assign(a) = &mut block[i] else {
            continue;
        };
        let rhs = a.rhs.take();
        for slot in block[k].rvalues_mut() {
            if replace_reads(slot, var, &rhs) > 0 {
                break;
            }
        }
        trace!("grafted {} into statement {k}", shader.variables[var].name);
        removed[i] = true;
        changed = true;
    }

    if changed {
        let mut index = 0;
        block.retain(|_| {
            let keep = !removed[index];
            index += 1;
            keep
        });
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_ir::builder::{add, mul};
    use lumen_ir::{Constant, Rvalue, ShaderStage, Signature, Type, VariableMode, dump_shader};

    fn c(v: f32) -> Rvalue {
        Constant::float(v).into()
    }

    fn setup() -> (Shader, Handle<Variable>, Handle<Variable>, Handle<Variable>) {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let u = shader.add_global(Variable::new("u", Type::float(), VariableMode::Uniform));
        let out = shader.add_global(Variable::new("o", Type::float(), VariableMode::Out));
        let t = shader.new_temporary("t", Type::float());
        (shader, u, out, t)
    }

    #[test]
    fn grafts_single_use_temporary() {
        let (mut shader, u, out, t) = setup();
        let main = shader.add_main(vec![
            Statement::Declare(t),
            Statement::assign(shader.deref(t), mul(shader.read(u), c(2.0))),
            Statement::assign(shader.deref(out), add(shader.read(t), c(1.0))),
        ]);
        assert!(TreeGrafting.run(&mut shader));
        assert_eq!(shader.signature(main).body.len(), 2);
        assert!(dump_shader(&shader).contains(
            "(assign (x) (var_ref o) (expression float + (expression float * (var_ref u) (constant float (2.0))) (constant float (1.0))))"
        ));
        assert!(!TreeGrafting.run(&mut shader));
    }

    #[test]
    fn intervening_write_to_operand_blocks() {
        let (mut shader, _, out, t) = setup();
        let x = shader.new_temporary("x", Type::float());
        shader.add_main(vec![
            Statement::Declare(x),
            Statement::Declare(t),
            Statement::assign(shader.deref(x), c(1.0)),
            Statement::assign(shader.deref(t), add(shader.read(x), shader.read(x))),
            Statement::assign(shader.deref(x), c(5.0)),
            Statement::assign(shader.deref(out), add(shader.read(t), shader.read(x))),
        ]);
        assert!(!TreeGrafting.run(&mut shader));
    }

    #[test]
    fn calls_block_grafting() {
        let (mut shader, u, out, t) = setup();
        let f = shader.add_signature("f", Signature::new(Type::void(), Vec::new(), Vec::new()));
        shader.add_main(vec![
            Statement::Declare(t),
            Statement::assign(shader.deref(t), shader.read(u)),
            Statement::Call {
                callee: f,
                args: Vec::new(),
                return_deref: None,
            },
            Statement::assign(shader.deref(out), shader.read(t)),
        ]);
        assert!(!TreeGrafting.run(&mut shader));
    }

    #[test]
    fn multiple_reads_block_grafting() {
        let (mut shader, u, out, t) = setup();
        shader.add_main(vec![
            Statement::Declare(t),
            Statement::assign(shader.deref(t), shader.read(u)),
            Statement::assign(shader.deref(out), mul(shader.read(t), shader.read(t))),
        ]);
        assert!(!TreeGrafting.run(&mut shader));
    }

    #[test]
    fn chains_graft_in_one_run() {
        let (mut shader, u, out, t) = setup();
        let s = shader.new_temporary("s", Type::float());
        let main = shader.add_main(vec![
            Statement::assign(shader.deref(t), add(shader.read(u), c(1.0))),
            Statement::assign(shader.deref(s), mul(shader.read(t), c(3.0))),
            Statement::assign(shader.deref(out), shader.read(s)),
        ]);
        assert!(TreeGrafting.run(&mut shader));
        assert_eq!(shader.signature(main).body.len(), 1);
    }
}
