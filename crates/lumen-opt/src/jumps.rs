//! Jump normalization.
//!
//! [`JumpLowering`] removes unreachable statements and jumps that only
//! restate the fall-through, and on request lowers `return` in `main` and
//! `continue` in loops into if/else structure. [`RedundantJumps`] hoists
//! identical jumps out of both arms of an if.

use log::trace;
use lumen_ir::{Block, Jump, Shader, Statement};

use crate::Pass;
use crate::util::{is_main, rewrite_bodies};

/// Normalizes the placement of `return`, `break` and `continue`.
#[derive(Debug, Default)]
pub struct JumpLowering {
    /// Remove every `return` from `main`.
    pub no_main_return: bool,
    /// Remove every `continue`.
    pub no_continue: bool,
}

/// Where falling off the end of a block is equivalent to a jump.
#[derive(Clone, Copy)]
struct Tail {
    /// Falling through leaves the function.
    returns: bool,
    /// Falling through starts the next loop iteration.
    continues: bool,
}

impl Pass for JumpLowering {
    fn name(&self) -> &str {
        "lower-jumps"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        rewrite_bodies(shader, |shader, id, body| {
            let lower_return = self.no_main_return && is_main(shader, id);
            let tail = Tail {
                returns: true,
                continues: false,
            };
            self.lower_block(body, tail, lower_return)
        })
    }
}

fn is_void_return(stmt: &Statement) -> bool {
    matches!(stmt, Statement::Jump(Jump::Return(None)))
}

fn ends_in_terminator(block: &[Statement]) -> bool {
    block.last().is_some_and(Statement::is_terminator)
}

/// Drops everything after the first statement that cannot fall through.
fn truncate_unreachable(block: &mut Block) -> bool {
    let end = block.iter().position(|s| {
        s.is_terminator()
            || matches!(s, Statement::If { then_block, else_block, .. }
                if ends_in_terminator(then_block) && ends_in_terminator(else_block))
    });
    match end {
        Some(end) if end + 1 < block.len() => {
            trace!("removing {} unreachable statement(s)", block.len() - end - 1);
            block.truncate(end + 1);
            true
        }
        _ => false,
    }
}

impl JumpLowering {
    fn lowerable(&self, stmt: &Statement, tail: Tail, lower_return: bool) -> bool {
        match stmt {
            Statement::Jump(Jump::Return(None)) => tail.returns && lower_return,
            Statement::Jump(Jump::Continue) => tail.continues && self.no_continue,
            _ => false,
        }
    }

    /// Rewrites `if (c) { A; jump } B` as `if (c) { A } else { B }`, and the
    /// mirror image with the jump in the else arm.
    fn lower_into_else(&self, block: &mut Block, tail: Tail, lower_return: bool) -> bool {
        for i in 0..block.len() {
            let Statement::If {
                then_block,
                else_block,
                ..
            } = &block[i]
            else {
                continue;
            };
            let then_jumps = then_block
                .last()
                .is_some_and(|s| self.lowerable(s, tail, lower_return));
            let else_jumps = else_block
                .last()
                .is_some_and(|s| self.lowerable(s, tail, lower_return));
            if !then_jumps && !else_jumps {
                continue;
            }
            let rest: Block = block.drain(i + 1..).collect();
            let Statement::If {
                then_block,
                else_block,
                ..
            } = &mut block[i]
            else {
                unreachable!()
            };
            if then_jumps {
                then_block.pop();
            }
            if else_jumps {
                else_block.pop();
            }
            if then_jumps && !else_jumps {
                else_block.extend(rest);
            } else if else_jumps && !then_jumps {
                then_block.extend(rest);
            }
            trace!("lowered jump into if/else");
            return true;
        }
        false
    }

    fn lower_block(&self, block: &mut Block, tail: Tail, lower_return: bool) -> bool {
        let mut changed = truncate_unreachable(block);
        changed |= self.lower_into_else(block, tail, lower_return);

        let trailing = block.last().is_some_and(|s| {
            (tail.returns && is_void_return(s))
                || (tail.continues && matches!(s, Statement::Jump(Jump::Continue)))
        });
        if trailing {
            block.pop();
            changed = true;
        }

        let last = block.len().saturating_sub(1);
        for (i, stmt) in block.iter_mut().enumerate() {
            match stmt {
                Statement::If {
                    then_block,
                    else_block,
                    ..
                } => {
                    let inner = Tail {
                        returns: tail.returns && i == last,
                        continues: tail.continues && i == last,
                    };
                    changed |= self.lower_block(then_block, inner, lower_return);
                    changed |= self.lower_block(else_block, inner, lower_return);
                }
                Statement::Loop { body } => {
                    let inner = Tail {
                        returns: false,
                        continues: true,
                    };
                    changed |= self.lower_block(body, inner, lower_return);
                }
                _ => {}
            }
        }
        changed
    }
}

/// Hoists a jump that ends both arms of an if and removes jumps and ifs
/// that do nothing.
#[derive(Debug)]
pub struct RedundantJumps;

impl Pass for RedundantJumps {
    fn name(&self) -> &str {
        "redundant-jumps"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        rewrite_bodies(shader, |_, _, body| remove_redundant(body, false))
    }
}

fn hoistable(jump: &Jump) -> bool {
    match jump {
        Jump::Break | Jump::Continue | Jump::Return(None) => true,
        Jump::Return(Some(value)) => value.is_constant(),
    }
}

fn remove_redundant(block: &mut Block, loop_body: bool) -> bool {
    let mut changed = false;
    let mut out = Vec::with_capacity(block.len());
    for mut stmt in std::mem::take(block) {
        match &mut stmt {
            Statement::If {
                then_block,
                else_block,
                ..
            } => {
                changed |= remove_redundant(then_block, false);
                changed |= remove_redundant(else_block, false);
                if then_block.is_empty() && else_block.is_empty() {
                    changed = true;
                    continue;
                }
                let shared = match (then_block.last(), else_block.last()) {
                    (Some(Statement::Jump(a)), Some(Statement::Jump(b))) if a.same_as(b) && hoistable(a) => {
                        Some(a.clone())
                    }
                    _ => None,
                };
                if let Some(jump) = shared {
                    then_block.pop();
                    else_block.pop();
                    out.push(stmt);
                    out.push(Statement::Jump(jump));
                    changed = true;
                    continue;
                }
            }
            Statement::Loop { body } => changed |= remove_redundant(body, true),
            _ => {}
        }
        out.push(stmt);
    }
    if loop_body && matches!(out.last(), Some(Statement::Jump(Jump::Continue))) {
        out.pop();
        changed = true;
    }
    *block = out;
    changed
}
