//! Dead code elimination passes.
//!
//! [`DeadCodeElimination`] removes assignments to variables that are never
//! read and declarations of variables that are never used. In linked mode it
//! also prunes unused globals. [`LocalDeadCode`] removes assignments whose
//! channels are all overwritten later in the same block before any read.

use std::collections::HashMap;

use log::trace;
use lumen_ir::visit::{read_counts, variables_written};
use lumen_ir::{Block, Handle, Shader, Statement, Variable, VariableMode};

use crate::Pass;
use crate::util::rewrite_bodies;

/// Removes unused assignments, declarations and (when linked) globals.
#[derive(Debug, Default)]
pub struct DeadCodeElimination {
    /// Every stage and function is visible, so unused globals can go.
    pub linked: bool,
    /// Unused uniforms keep their assigned locations.
    pub uniform_locations_assigned: bool,
}

impl Pass for DeadCodeElimination {
    fn name(&self) -> &str {
        "dce"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        // 1. Count reads across every defined body, built-ins included.
        let mut reads: HashMap<Handle<Variable>, usize> = HashMap::new();
        for id in shader.signature_ids() {
            for (var, n) in read_counts(&shader.signature(id).body) {
                *reads.entry(var).or_insert(0) += n;
            }
        }

        // 2. Drop writes to unread storage, then unused declarations.
        let mut changed = rewrite_bodies(shader, |shader, _, body| {
            let mut changed = remove_dead_assignments(shader, body, &reads, self.linked);
            let written = variables_written(shader, body);
            changed |= remove_unused_declarations(body, &reads, &written);
            changed
        });

        // 3. Prune globals nothing references any more.
        if self.linked {
            changed |= self.prune_globals(shader, &reads);
        }
        changed
    }
}

impl DeadCodeElimination {
    fn prune_globals(&self, shader: &mut Shader, reads: &HashMap<Handle<Variable>, usize>) -> bool {
        let mut written = Vec::new();
        for id in shader.signature_ids() {
            written.extend(variables_written(shader, &shader.signature(id).body));
        }
        let removable: Vec<Handle<Variable>> = shader
            .globals
            .iter()
            .copied()
            .filter(|var| !reads.contains_key(var) && !written.contains(var))
            .filter(|&var| match shader.variables[var].mode {
                VariableMode::Uniform => !self.uniform_locations_assigned,
                VariableMode::In | VariableMode::Auto => true,
                _ => false,
            })
            .collect();
        for &var in &removable {
            trace!("removing unused global {}", shader.variables[var].name);
            shader.globals.retain(|&g| g != var);
            shader.variables.remove(var);
        }
        !removable.is_empty()
    }
}

/// Storage whose assignments may be dropped when nothing reads it.
fn is_removable_target(shader: &Shader, var: Handle<Variable>, linked: bool) -> bool {
    let mode = shader.variables[var].mode;
    if shader.is_global(var) {
        linked && mode == VariableMode::Auto
    } else {
        mode.is_local()
    }
}

fn remove_dead_assignments(
    shader: &Shader,
    block: &mut Block,
    reads: &HashMap<Handle<Variable>, usize>,
    linked: bool,
) -> bool {
    let mut changed = false;
    block.retain_mut(|stmt| {
        for nested in stmt.blocks_mut() {
            changed |= remove_dead_assignments(shader, nested, reads, linked);
        }
        let Statement::Assign(a) = stmt else {
            return true;
        };
        let Some(var) = a.lhs.variable_referenced() else {
            return true;
        };
        if reads.contains_key(&var) || !is_removable_target(shader, var, linked) {
            return true;
        }
        trace!("removing write to unread {}", shader.variables[var].name);
        changed = true;
        false
    });
    changed
}

fn remove_unused_declarations(
    block: &mut Block,
    reads: &HashMap<Handle<Variable>, usize>,
    written: &[Handle<Variable>],
) -> bool {
    let mut changed = false;
    block.retain_mut(|stmt| {
        for nested in stmt.blocks_mut() {
            changed |= remove_unused_declarations(nested, reads, written);
        }
        match stmt {
            Statement::Declare(var) if !reads.contains_key(var) && !written.contains(var) => {
                changed = true;
                false
            }
            _ => true,
        }
    });
    changed
}

/// Removes assignments that are completely overwritten before being read.
#[derive(Debug)]
pub struct LocalDeadCode;

impl Pass for LocalDeadCode {
    fn name(&self) -> &str {
        "local-dce"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        rewrite_bodies(shader, |shader, _, body| run_on_block(shader, body))
    }
}

/// A write whose channels in `mask` have not been read or overwritten yet.
struct PendingWrite {
    index: usize,
    var: Handle<Variable>,
    mask: u8,
}

fn run_on_block(shader: &Shader, block: &mut Block) -> bool {
    let mut changed = false;
    for stmt in block.iter_mut() {
        for nested in stmt.blocks_mut() {
            changed |= run_on_block(shader, nested);
        }
    }

    let mut dead = vec![false; block.len()];
    let mut pending: Vec<PendingWrite> = Vec::new();
    for (index, stmt) in block.iter().enumerate() {
        match stmt {
            Statement::Declare(_) => {}
            Statement::Assign(a) => {
                for slot in stmt.rvalues() {
                    let mut read = Vec::new();
                    slot.variables_read(&mut read);
                    pending.retain(|p| !read.contains(&p.var));
                }
                let Some(root) = a.lhs.variable_referenced() else {
                    continue;
                };
                match a.whole_variable() {
                    Some(var) if !shader.is_global(var) && shader.variables[var].mode.is_local() => {
                        for p in pending.iter_mut().filter(|p| p.var == var) {
                            p.mask &= !a.write_mask;
                            if p.mask == 0 {
                                dead[p.index] = true;
                            }
                        }
                        pending.retain(|p| p.mask != 0);
                        pending.push(PendingWrite {
                            index,
                            var,
                            mask: a.write_mask,
                        });
                    }
                    _ => pending.retain(|p| p.var != root),
                }
            }
            // Control flow, calls and side effects end the window.
            _ => pending.clear(),
        }
    }

    if dead.iter().any(|&d| d) {
        let mut index = 0;
        block.retain(|_| {
            let keep = !dead[index];
            index += 1;
            keep
        });
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_ir::builder::{add, channel};
    use lumen_ir::{Assign, Constant, Rvalue, ShaderStage, Type};

    fn c(v: f32) -> Rvalue {
        Constant::float(v).into()
    }

    #[test]
    fn removes_writes_to_unread_locals() {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let out = shader.add_global(Variable::new("o", Type::float(), VariableMode::Out));
        let t = shader.new_temporary("t", Type::float());
        let main = shader.add_main(vec![
            Statement::Declare(t),
            Statement::assign(shader.deref(t), c(1.0)),
            Statement::assign(shader.deref(out), c(2.0)),
        ]);
        let dce = DeadCodeElimination::default();
        assert!(dce.run(&mut shader));
        assert_eq!(shader.signature(main).body.len(), 1);
        assert!(!dce.run(&mut shader));
    }

    #[test]
    fn keeps_read_locals_and_outputs() {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let out = shader.add_global(Variable::new("o", Type::float(), VariableMode::Out));
        let t = shader.new_temporary("t", Type::float());
        shader.add_main(vec![
            Statement::Declare(t),
            Statement::assign(shader.deref(t), c(1.0)),
            Statement::assign(shader.deref(out), shader.read(t)),
        ]);
        assert!(!DeadCodeElimination::default().run(&mut shader));
    }

    #[test]
    fn unlinked_keeps_globals() {
        let mut shader = Shader::new(ShaderStage::Vertex);
        shader.add_global(Variable::new("u", Type::float(), VariableMode::Uniform));
        let g = shader.add_global(Variable::new("g", Type::float(), VariableMode::Auto));
        shader.add_main(vec![Statement::assign(shader.deref(g), c(1.0))]);
        assert!(!DeadCodeElimination::default().run(&mut shader));
        assert_eq!(shader.globals.len(), 2);
    }

    #[test]
    fn linked_prunes_unused_globals() {
        let mut shader = Shader::new(ShaderStage::Vertex);
        let u = shader.add_global(Variable::new("u", Type::float(), VariableMode::Uniform));
        let used = shader.add_global(Variable::new("used", Type::float(), VariableMode::Uniform));
        let input = shader.add_global(Variable::new("pos", Type::vec(4), VariableMode::In));
        let g = shader.add_global(Variable::new("g", Type::float(), VariableMode::Auto));
        let out = shader.add_global(Variable::new("o", Type::float(), VariableMode::Out));
        let main = shader.add_main(vec![
            Statement::assign(shader.deref(g), c(1.0)),
            Statement::assign(shader.deref(out), shader.read(used)),
        ]);
        let dce = DeadCodeElimination {
            linked: true,
            uniform_locations_assigned: false,
        };
        assert!(dce.run(&mut shader));
        assert_eq!(shader.globals, vec![used, out]);
        assert!(!shader.variables.contains(u));
        assert!(!shader.variables.contains(input));
        assert_eq!(shader.signature(main).body.len(), 1);
    }

    #[test]
    fn assigned_locations_keep_uniforms() {
        let mut shader = Shader::new(ShaderStage::Vertex);
        let u = shader.add_global(Variable::new("u", Type::float(), VariableMode::Uniform));
        shader.add_main(Vec::new());
        let dce = DeadCodeElimination {
            linked: true,
            uniform_locations_assigned: true,
        };
        assert!(!dce.run(&mut shader));
        assert_eq!(shader.globals, vec![u]);
    }

    #[test]
    fn overwritten_channels_are_dead() {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let out = shader.add_global(Variable::new("o", Type::vec(2), VariableMode::Out));
        let v = shader.add_local(Variable::new("v", Type::vec(2), VariableMode::Auto));
        let lhs = shader.deref(v);
        let main = shader.add_main(vec![
            Statement::Declare(v),
            // Fully covered by the two masked writes below.
            Statement::assign(lhs.clone(), Constant::vec(&[1.0, 2.0]).into()),
            Statement::Assign(Assign::masked(lhs.clone(), c(3.0), 0b01)),
            Statement::Assign(Assign::masked(lhs.clone(), c(4.0), 0b10)),
            Statement::assign(shader.deref(out), shader.read(v)),
        ]);
        assert!(LocalDeadCode.run(&mut shader));
        let body = &shader.signature(main).body;
        assert_eq!(body.len(), 4);
        assert!(matches!(&body[1], Statement::Assign(a) if a.write_mask == 0b01));
        assert!(!LocalDeadCode.run(&mut shader));
    }

    #[test]
    fn reads_keep_earlier_writes() {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let out = shader.add_global(Variable::new("o", Type::float(), VariableMode::Out));
        let v = shader.add_local(Variable::new("v", Type::vec(2), VariableMode::Auto));
        let lhs = shader.deref(v);
        shader.add_main(vec![
            Statement::Declare(v),
            Statement::assign(lhs.clone(), Constant::vec(&[1.0, 2.0]).into()),
            Statement::Assign(Assign::masked(lhs.clone(), channel(shader.read(v), 1), 0b01)),
            Statement::Assign(Assign::masked(lhs, c(4.0), 0b10)),
            Statement::assign(
                shader.deref(out),
                add(channel(shader.read(v), 0), channel(shader.read(v), 1)),
            ),
        ]);
        assert!(!LocalDeadCode.run(&mut shader));
    }

    #[test]
    fn control_flow_ends_the_window() {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let t = shader.new_temporary("t", Type::float());
        let out = shader.add_global(Variable::new("o", Type::float(), VariableMode::Out));
        shader.add_main(vec![
            Statement::Declare(t),
            Statement::assign(shader.deref(t), c(1.0)),
            Statement::if_then(
                Constant::bool(true).into(),
                vec![Statement::assign(shader.deref(out), shader.read(t))],
            ),
            Statement::assign(shader.deref(t), c(2.0)),
            Statement::assign(shader.deref(out), shader.read(t)),
        ]);
        assert!(!LocalDeadCode.run(&mut shader));
    }
}
