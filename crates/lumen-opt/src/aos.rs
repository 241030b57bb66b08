//! Rewrites for array-of-structures targets, where one instruction operates
//! on a whole vector.

use std::collections::HashMap;

use log::trace;
use lumen_ir::builder::{expr, mul, splat};
use lumen_ir::visit::rewrite_rvalues;
use lumen_ir::{
    Assign, Block, Deref, ExprOp, Handle, Rvalue, Shader, Statement, Swizzle, SwizzleMask, Variable,
};

use crate::Pass;
use crate::util::{for_each_block_mut, rewrite_bodies};

/// Replaces `M * v` by `v * Mt` and `v * M` by `Mt * v` when the shader
/// declares `Mt`, a global named after `M` with a `Transpose` suffix that
/// holds the transposed matrix. Row-vector products map better onto dot
/// product instructions.
#[derive(Debug)]
pub struct MatrixFlipping;

impl Pass for MatrixFlipping {
    fn name(&self) -> &str {
        "flip-matrices"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        let pairs = transpose_pairs(shader);
        if pairs.is_empty() {
            return false;
        }
        rewrite_bodies(shader, |shader, _, body| {
            let mut changed = false;
            rewrite_rvalues(body, &mut |rv| {
                if let Some(flipped) = flip(shader, &pairs, rv) {
                    *rv = flipped;
                    changed = true;
                }
            });
            changed
        })
    }
}

/// Matrix globals (or arrays of them) paired with their transposed twin.
fn transpose_pairs(shader: &Shader) -> HashMap<Handle<Variable>, Handle<Variable>> {
    let mut pairs = HashMap::new();
    for &g in &shader.globals {
        let var = &shader.variables[g];
        let expected = match var.ty.element_type() {
            Some(elem) if elem.is_matrix() => {
                lumen_ir::Type::array(elem.transposed(), var.ty.array_length().unwrap_or(0))
            }
            None if var.ty.is_matrix() => var.ty.transposed(),
            _ => continue,
        };
        let name = format!("{}Transpose", var.name);
        let twin = shader.globals.iter().copied().find(|&t| {
            let tv = &shader.variables[t];
            tv.name == name && tv.ty == expected && tv.mode == var.mode
        });
        if let Some(twin) = twin {
            pairs.insert(g, twin);
        }
    }
    pairs
}

/// The transposed counterpart of a read of a paired matrix.
fn transposed_read(
    shader: &Shader,
    pairs: &HashMap<Handle<Variable>, Handle<Variable>>,
    rv: &Rvalue,
) -> Option<Rvalue> {
    match rv.as_deref()? {
        Deref::Variable { var, .. } => pairs.get(var).map(|&t| shader.read(t)),
        Deref::Array { array, index, .. } => {
            let t = pairs.get(&array.as_variable()?)?;
            Some(Deref::array(shader.read(*t), index.as_ref().clone()).into())
        }
        Deref::Record { .. } => None,
    }
}

fn flip(shader: &Shader, pairs: &HashMap<Handle<Variable>, Handle<Variable>>, rv: &Rvalue) -> Option<Rvalue> {
    let e = rv.as_expression().filter(|e| e.op == ExprOp::Mul)?;
    let (a, b) = (&e.operands[0], &e.operands[1]);
    let flipped = if a.ty().is_matrix() && b.ty().is_vector() {
        mul(b.clone(), transposed_read(shader, pairs, a)?)
    } else if a.ty().is_vector() && b.ty().is_matrix() {
        mul(transposed_read(shader, pairs, b)?, a.clone())
    } else {
        return None;
    };
    trace!("flipped matrix product");
    debug_assert_eq!(flipped.ty(), &e.ty);
    Some(flipped)
}

/// Merges consecutive single-channel writes to one vector into a single
/// masked write when their right-hand sides compute the same thing on
/// different channels.
#[derive(Debug)]
pub struct Vectorization;

impl Pass for Vectorization {
    fn name(&self) -> &str {
        "vectorize"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        rewrite_bodies(shader, |_, _, body| for_each_block_mut(body, &mut vectorize_block))
    }
}

fn componentwise(op: ExprOp) -> bool {
    use ExprOp::*;
    matches!(
        op,
        Add | Sub | Mul | Div | Min | Max | Neg | Abs | Rcp | Rsq | Sqrt | Floor | Ceil | Fract | Exp2
            | Log2 | Saturate | Sin | Cos
    )
}

/// Returns `true` if `a` and `b` apply the same scalar operations to
/// operands that differ only in which channel they select.
fn same_shape(a: &Rvalue, b: &Rvalue) -> bool {
    if !a.ty().is_scalar() || a.ty() != b.ty() {
        return false;
    }
    match (a, b) {
        (Rvalue::Expression(x), Rvalue::Expression(y)) => {
            x.op == y.op
                && componentwise(x.op)
                && x.operands.len() == y.operands.len()
                && x.operands.iter().zip(&y.operands).all(|(p, q)| same_shape(p, q))
        }
        (Rvalue::Swizzle(x), Rvalue::Swizzle(y)) => {
            x.val.ty().is_vector() && x.val.as_deref().is_some() && x.val.equals(&y.val)
        }
        (Rvalue::Constant(_), _) | (Rvalue::Deref(Deref::Variable { .. }), _) => a.equals(b),
        _ => false,
    }
}

/// Builds the vector form of `trees`, which all have the same shape. Tree
/// `i` supplies component `i`.
fn merge(trees: &[&Rvalue]) -> Rvalue {
    match trees[0] {
        Rvalue::Expression(first) => {
            let operands = (0..first.operands.len())
                .map(|i| {
                    let column: Vec<&Rvalue> = trees
                        .iter()
                        .filter_map(|t| t.as_expression().map(|e| &e.operands[i]))
                        .collect();
                    merge(&column)
                })
                .collect();
            expr(first.op, operands)
        }
        Rvalue::Swizzle(first) => {
            let channels: Vec<u8> = trees
                .iter()
                .map(|t| match t {
                    Rvalue::Swizzle(s) => s.mask.get(0),
                    _ => unreachable!("merged trees differ in shape"),
                })
                .collect();
            Swizzle::new(first.val.as_ref().clone(), SwizzleMask::new(&channels)).into()
        }
        invariant => invariant.clone(),
    }
}

/// A single-channel write to a whole vector variable.
fn channel_write(stmt: &Statement) -> Option<(Handle<Variable>, u8, &Rvalue)> {
    let Statement::Assign(a) = stmt else {
        return None;
    };
    let var = a.lhs.as_variable()?;
    if !a.lhs.ty().is_vector() || a.write_mask.count_ones() != 1 || a.rhs.references(var) {
        return None;
    }
    Some((var, a.write_mask.trailing_zeros() as u8, &a.rhs))
}

fn vectorize_block(block: &mut Block) -> bool {
    let mut changed = false;
    let mut i = 0;
    while i < block.len() {
        let Some((var, channel, first)) = channel_write(&block[i]) else {
            i += 1;
            continue;
        };
        let mut group = vec![(channel, first)];
        let mut mask = 1u8 << channel;
        for stmt in &block[i + 1..] {
            match channel_write(stmt) {
                Some((v, c, rhs)) if v == var && mask & (1 << c) == 0 && same_shape(first, rhs) => {
                    group.push((c, rhs));
                    mask |= 1 << c;
                }
                _ => break,
            }
        }
        let len = group.len();
        if len < 2 {
            i += 1;
            continue;
        }
        group.sort_by_key(|&(c, _)| c);
        let trees: Vec<&Rvalue> = group.iter().map(|&(_, rhs)| rhs).collect();
        let mut rhs = merge(&trees);
        if rhs.ty().is_scalar() {
            rhs = splat(rhs, len as u8);
        }
        let Statement::Assign(head) = &block[i] else {
            unreachable!("group starts with an assignment");
        };
        let lhs = head.lhs.clone();
        trace!("vectorized {len} channel writes");
        block.drain(i + 1..i + len);
        block[i] = Statement::Assign(Assign::masked(lhs, rhs, mask));
        changed = true;
        i += 1;
    }
    changed
}
