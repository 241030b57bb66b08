//! Swizzle cleanups.

use log::trace;
use lumen_ir::visit::rewrite_rvalues;
use lumen_ir::{Assign, Block, Deref, Rvalue, Shader, Statement, Swizzle, SwizzleMask};

use crate::Pass;
use crate::util::{for_each_block_mut, rewrite_bodies};

/// Turns constant-index vector accesses into swizzles and write masks.
#[derive(Debug)]
pub struct VectorIndexToSwizzle;

impl Pass for VectorIndexToSwizzle {
    fn name(&self) -> &str {
        "vector-index-to-swizzle"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        rewrite_bodies(shader, |_, _, body| {
            let mut changed = lower_targets(body);
            rewrite_rvalues(body, &mut |rv| {
                if let Some(swizzled) = index_to_swizzle(rv) {
                    *rv = swizzled;
                    changed = true;
                }
            });
            changed
        })
    }
}

/// The channel selected by a constant index into a vector, clamped to the
/// vector's width.
fn constant_channel(array: &Rvalue, index: &Rvalue) -> Option<u8> {
    if !array.ty().is_vector() {
        return None;
    }
    let index = index.as_constant()?.get_i64(0);
    let last = i64::from(array.ty().vector_elements()) - 1;
    Some(index.clamp(0, last) as u8)
}

fn index_to_swizzle(rv: &mut Rvalue) -> Option<Rvalue> {
    let Rvalue::Deref(Deref::Array { array, index, .. }) = rv else {
        return None;
    };
    let c = constant_channel(array, index)?;
    trace!("vector index {c} becomes a swizzle");
    Some(Swizzle::new(array.take(), SwizzleMask::channel(c)).into())
}

fn lower_targets(body: &mut Block) -> bool {
    for_each_block_mut(body, &mut |block| {
        let mut changed = false;
        for stmt in block.iter_mut() {
            let Statement::Assign(a) = stmt else {
                continue;
            };
            let Deref::Array { array, index, .. } = &mut a.lhs else {
                continue;
            };
            let Some(c) = constant_channel(array, index) else {
                continue;
            };
            let Rvalue::Deref(target) = array.take() else {
                unreachable!("vector write through a non-dereference");
            };
            *stmt = Statement::Assign(Assign::masked(target, a.rhs.take(), 1 << c));
            changed = true;
        }
        changed
    })
}

/// Composes nested swizzles and drops identity swizzles.
#[derive(Debug)]
pub struct SwizzleSimplification;

impl Pass for SwizzleSimplification {
    fn name(&self) -> &str {
        "swizzle-simplify"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        rewrite_bodies(shader, |_, _, body| {
            let mut changed = false;
            rewrite_rvalues(body, &mut |rv| changed |= simplify(rv));
            changed
        })
    }
}

fn simplify(rv: &mut Rvalue) -> bool {
    let Rvalue::Swizzle(outer) = rv else {
        return false;
    };
    if let Rvalue::Swizzle(inner) = outer.val.as_mut() {
        let mask = outer.mask.compose(&inner.mask);
        let val = inner.val.take();
        trace!("composed swizzle .{mask}");
        *rv = Swizzle::new(val, mask).into();
        simplify(rv);
        return true;
    }
    let width = outer.val.ty().vector_elements();
    if outer.mask.is_identity(width) {
        trace!("dropping identity swizzle");
        *rv = outer.val.take();
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_ir::builder::{add, channel, swizzle};
    use lumen_ir::{Constant, ShaderStage, Type, Variable, VariableMode};

    #[test]
    fn constant_vector_index_reads() {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let v = shader.add_global(Variable::new("v", Type::vec(4), VariableMode::Uniform));
        let out = shader.add_global(Variable::new("o", Type::float(), VariableMode::Out));
        let element = Deref::array(shader.read(v), Constant::int(2).into());
        let past_end = Deref::array(shader.read(v), Constant::int(9).into());
        let main = shader.add_main(vec![Statement::assign(
            shader.deref(out),
            add(element.into(), past_end.into()),
        )]);
        assert!(VectorIndexToSwizzle.run(&mut shader));
        let expected = add(channel(shader.read(v), 2), channel(shader.read(v), 3));
        assert_eq!(
            shader.signature(main).body,
            vec![Statement::assign(shader.deref(out), expected)]
        );
        assert!(!VectorIndexToSwizzle.run(&mut shader));
    }

    #[test]
    fn constant_vector_index_writes() {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let out = shader.add_global(Variable::new("o", Type::vec(4), VariableMode::Out));
        let target = Deref::array(shader.read(out), Constant::int(1).into());
        let main = shader.add_main(vec![Statement::assign(target, Constant::float(2.0).into())]);
        assert!(VectorIndexToSwizzle.run(&mut shader));
        assert_eq!(
            shader.signature(main).body,
            vec![Statement::Assign(Assign::masked(
                shader.deref(out),
                Constant::float(2.0).into(),
                0b0010,
            ))]
        );
    }

    #[test]
    fn array_indices_are_left_alone() {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let a = shader.add_global(Variable::new("a", Type::array(Type::float(), 4), VariableMode::Uniform));
        let out = shader.add_global(Variable::new("o", Type::float(), VariableMode::Out));
        let element = Deref::array(shader.read(a), Constant::int(2).into());
        shader.add_main(vec![Statement::assign(shader.deref(out), element.into())]);
        assert!(!VectorIndexToSwizzle.run(&mut shader));
    }

    #[test]
    fn nested_swizzles_compose() {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let v = shader.add_global(Variable::new("v", Type::vec(4), VariableMode::Uniform));
        let out = shader.add_global(Variable::new("o", Type::vec(2), VariableMode::Out));
        let nested = swizzle(swizzle(shader.read(v), &[3, 2, 1]), &[2, 0]);
        let main = shader.add_main(vec![Statement::assign(shader.deref(out), nested)]);
        assert!(SwizzleSimplification.run(&mut shader));
        assert_eq!(
            shader.signature(main).body,
            vec![Statement::assign(shader.deref(out), swizzle(shader.read(v), &[1, 3]))]
        );
        assert!(!SwizzleSimplification.run(&mut shader));
    }

    #[test]
    fn identity_swizzles_vanish() {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let v = shader.add_global(Variable::new("v", Type::vec(3), VariableMode::Uniform));
        let out = shader.add_global(Variable::new("o", Type::vec(3), VariableMode::Out));
        let roundabout = swizzle(swizzle(shader.read(v), &[2, 1, 0]), &[2, 1, 0]);
        let main = shader.add_main(vec![Statement::assign(shader.deref(out), roundabout)]);
        assert!(SwizzleSimplification.run(&mut shader));
        assert_eq!(
            shader.signature(main).body,
            vec![Statement::assign(shader.deref(out), shader.read(v))]
        );
    }

    #[test]
    fn narrowing_swizzles_stay() {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let v = shader.add_global(Variable::new("v", Type::vec(4), VariableMode::Uniform));
        let out = shader.add_global(Variable::new("o", Type::vec(2), VariableMode::Out));
        shader.add_main(vec![Statement::assign(shader.deref(out), swizzle(shader.read(v), &[0, 1]))]);
        assert!(!SwizzleSimplification.run(&mut shader));
    }
}
