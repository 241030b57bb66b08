//! Traversal helpers over statement blocks.

use std::collections::HashMap;

use crate::Shader;
use crate::arena::Handle;
use crate::func::SignatureId;
use crate::rvalue::Rvalue;
use crate::stmt::{Block, Statement};
use crate::var::{Variable, VariableMode};

/// Calls `f` on every statement, parents before nested blocks.
pub fn for_each_statement<'a>(block: &'a [Statement], f: &mut impl FnMut(&'a Statement)) {
    for stmt in block {
        f(stmt);
        for nested in stmt.blocks() {
            for_each_statement(nested, f);
        }
    }
}

/// Calls `f` on every top-level rvalue slot of every statement, recursing
/// into nested blocks.
pub fn for_each_rvalue_slot(block: &mut Block, f: &mut impl FnMut(&mut Rvalue)) {
    for stmt in block.iter_mut() {
        for slot in stmt.rvalues_mut() {
            f(slot);
        }
        for nested in stmt.blocks_mut() {
            for_each_rvalue_slot(nested, f);
        }
    }
}

/// Rewrites every rvalue node of the block bottom-up.
pub fn rewrite_rvalues(block: &mut Block, f: &mut impl FnMut(&mut Rvalue)) {
    for_each_rvalue_slot(block, &mut |slot| slot.rewrite_post_order(f));
}

/// Calls `f` on every rvalue node of the block, pre-order.
pub fn for_each_rvalue<'a>(block: &'a [Statement], f: &mut impl FnMut(&'a Rvalue)) {
    for_each_statement(block, &mut |stmt| {
        for slot in stmt.rvalues() {
            slot.for_each_pre_order(f);
        }
    });
}

/// Returns `true` if any statement (at any depth) satisfies `pred`.
pub fn block_contains(block: &[Statement], pred: &mut impl FnMut(&Statement) -> bool) -> bool {
    block
        .iter()
        .any(|s| pred(s) || s.blocks().into_iter().any(|b| block_contains(b, pred)))
}

/// Number of whole-variable reads of each variable, including reads that
/// address array elements or fields.
pub fn read_counts(block: &[Statement]) -> HashMap<Handle<Variable>, usize> {
    let mut counts = HashMap::new();
    for_each_rvalue(block, &mut |rv| {
        if let Some(var) = rv.as_variable() {
            *counts.entry(var).or_insert(0) += 1;
        }
    });
    counts
}

/// Variables whose storage is written by `stmt`, not counting nested blocks.
pub fn statement_writes(shader: &Shader, stmt: &Statement) -> Vec<Handle<Variable>> {
    match stmt {
        Statement::Assign(a) => a.lhs.variable_referenced().into_iter().collect(),
        Statement::Call {
            callee,
            args,
            return_deref,
        } => {
            let mut out = call_output_variables(shader, *callee, args);
            if let Some(ret) = return_deref.as_ref().and_then(|d| d.variable_referenced()) {
                out.push(ret);
            }
            out
        }
        _ => Vec::new(),
    }
}

/// Variables bound to `out`/`inout` parameters of a call.
pub fn call_output_variables(
    shader: &Shader,
    callee: SignatureId,
    args: &[Rvalue],
) -> Vec<Handle<Variable>> {
    let Some(sig) = shader.try_signature(callee) else {
        return Vec::new();
    };
    sig.parameters
        .iter()
        .zip(args)
        .filter(|&(&param, _)| {
            matches!(
                shader.variables[param].mode,
                VariableMode::FunctionOut | VariableMode::FunctionInOut
            )
        })
        .filter_map(|(_, arg)| arg.variable_referenced())
        .collect()
}

/// Every variable written anywhere in the block.
pub fn variables_written(shader: &Shader, block: &[Statement]) -> Vec<Handle<Variable>> {
    let mut out = Vec::new();
    for_each_statement(block, &mut |stmt| {
        for var in statement_writes(shader, stmt) {
            if !out.contains(&var) {
                out.push(var);
            }
        }
    });
    out
}

/// Every variable read anywhere in the block.
pub fn variables_read(block: &[Statement]) -> Vec<Handle<Variable>> {
    let mut out = Vec::new();
    for_each_statement(block, &mut |stmt| {
        for slot in stmt.rvalues() {
            slot.variables_read(&mut out);
        }
    });
    out
}

/// Replaces every whole-variable read of `var` inside `rv` with `value`.
/// Returns the number of replacements.
pub fn replace_reads(rv: &mut Rvalue, var: Handle<Variable>, value: &Rvalue) -> usize {
    let mut replaced = 0;
    rv.rewrite_post_order(&mut |node| {
        if node.as_variable() == Some(var) {
            *node = value.clone();
            replaced += 1;
        }
    });
    replaced
}

/// Renames variables throughout a block according to `map`, in both reads and
/// assignment targets. Used when cloning bodies.
pub fn remap_variables(block: &mut Block, map: &HashMap<Handle<Variable>, Handle<Variable>>) {
    fn remap_rvalue(rv: &mut Rvalue, map: &HashMap<Handle<Variable>, Handle<Variable>>) {
        rv.rewrite_post_order(&mut |node| {
            if let Rvalue::Deref(crate::Deref::Variable { var, .. }) = node
                && let Some(&to) = map.get(var)
            {
                *var = to;
            }
        });
    }
    fn remap_deref(d: &mut crate::Deref, map: &HashMap<Handle<Variable>, Handle<Variable>>) {
        match d {
            crate::Deref::Variable { var, .. } => {
                if let Some(&to) = map.get(var) {
                    *var = to;
                }
            }
            crate::Deref::Array { array, index, .. } => {
                remap_rvalue(array, map);
                remap_rvalue(index, map);
            }
            crate::Deref::Record { record, .. } => remap_rvalue(record, map),
        }
    }
    for stmt in block.iter_mut() {
        match stmt {
            Statement::Declare(var) => {
                if let Some(&to) = map.get(var) {
                    *var = to;
                }
            }
            Statement::Assign(a) => {
                remap_deref(&mut a.lhs, map);
                remap_rvalue(&mut a.rhs, map);
            }
            Statement::Call {
                args, return_deref, ..
            } => {
                for arg in args.iter_mut() {
                    remap_rvalue(arg, map);
                }
                if let Some(ret) = return_deref {
                    remap_deref(ret, map);
                }
            }
            _ => {
                for slot in stmt.rvalues_mut() {
                    remap_rvalue(slot, map);
                }
            }
        }
        for nested in stmt.blocks_mut() {
            remap_variables(nested, map);
        }
    }
}
