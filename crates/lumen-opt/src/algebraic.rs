//! Algebraic identities and expression rebalancing.
//!
//! [`AlgebraicSimplification`] removes identity operations and folds
//! annihilators. Every rewrite keeps the node's type: a scalar that replaces
//! a vector-typed node is splatted to the node's width.
//!
//! [`Rebalance`] rebuilds long chains of one associative operator as balanced
//! trees so the critical path is logarithmic in the number of operands.

use log::trace;
use lumen_ir::builder::{abs, binop, constant_like, mul, neg, splat};
use lumen_ir::visit::{for_each_rvalue_slot, rewrite_rvalues};
use lumen_ir::{Constant, ExprOp, Expression, Rvalue, Shader, Type};

use crate::Pass;
use crate::util::rewrite_bodies;

/// Identity and annihilator removal.
#[derive(Debug, Default)]
pub struct AlgebraicSimplification {
    /// Keep rewrites that would turn a NaN or infinity into a finite value
    /// (`x * 0`) disabled for floating-point operands.
    pub preserve_nan: bool,
}

impl Pass for AlgebraicSimplification {
    fn name(&self) -> &str {
        "algebraic"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        rewrite_bodies(shader, |_, _, body| {
            let mut changed = false;
            rewrite_rvalues(body, &mut |rv| {
                let Rvalue::Expression(e) = rv else {
                    return;
                };
                let ty = e.ty.clone();
                if let Some(simpler) = self.simplify(e) {
                    debug_assert_eq!(simpler.ty(), &ty, "algebraic rewrite changed the type");
                    trace!("simplified {} node", ty);
                    *rv = simpler;
                    changed = true;
                }
            });
            changed
        })
    }
}

/// Returns `true` if a value of type `from` can stand in for a node of type
/// `to`, possibly after splatting.
fn fits(from: &Type, to: &Type) -> bool {
    from == to || (from.is_scalar() && to.is_vector() && from.base_type() == to.base_type())
}

fn fit(value: Rvalue, ty: &Type) -> Rvalue {
    if value.ty() == ty {
        value
    } else {
        splat(value, ty.vector_elements())
    }
}

/// The single operand of a unary expression.
fn operand_of(rv: Rvalue) -> Rvalue {
    match rv {
        Rvalue::Expression(mut e) => e.operands.swap_remove(0),
        other => other,
    }
}

fn inverse_comparison(op: ExprOp) -> Option<ExprOp> {
    Some(match op {
        ExprOp::Less => ExprOp::Gequal,
        ExprOp::Gequal => ExprOp::Less,
        ExprOp::Equal => ExprOp::Nequal,
        ExprOp::Nequal => ExprOp::Equal,
        ExprOp::AllEqual => ExprOp::AnyNequal,
        ExprOp::AnyNequal => ExprOp::AllEqual,
        _ => return None,
    })
}

impl AlgebraicSimplification {
    fn simplify(&self, e: &mut Expression) -> Option<Rvalue> {
        let ty = e.ty.clone();
        let ops = &mut e.operands;
        let keep = |ops: &mut Vec<Rvalue>, i: usize| fit(ops[i].take(), &ty);
        let can_keep = |ops: &[Rvalue], i: usize| fits(ops[i].ty(), &ty);
        let inner_op = |ops: &[Rvalue]| ops[0].op();

        match e.op {
            ExprOp::Add | ExprOp::BitOr | ExprOp::BitXor => {
                if ops[1].is_zero() && can_keep(ops, 0) {
                    return Some(keep(ops, 0));
                }
                if ops[0].is_zero() && can_keep(ops, 1) {
                    return Some(keep(ops, 1));
                }
            }
            ExprOp::Sub => {
                if ops[1].is_zero() && can_keep(ops, 0) {
                    return Some(keep(ops, 0));
                }
                if ty.is_integer() && ops[0].equals(&ops[1]) {
                    return Some(Constant::zero(ty.clone()).into());
                }
            }
            ExprOp::Mul if !ops[0].ty().is_matrix() && !ops[1].ty().is_matrix() => {
                for (x, k) in [(0, 1), (1, 0)] {
                    if ops[k].is_one() && can_keep(ops, x) {
                        return Some(keep(ops, x));
                    }
                    if ops[k].is_zero() && (!ty.is_floating() || !self.preserve_nan) {
                        return Some(Constant::zero(ty.clone()).into());
                    }
                    if ops[k].is_negative_one() && can_keep(ops, x) {
                        return Some(neg(keep(ops, x)));
                    }
                }
            }
            ExprOp::Div => {
                if ops[1].is_one() && can_keep(ops, 0) {
                    return Some(keep(ops, 0));
                }
                if ops[0].is_one() && ops[1].op() == Some(ExprOp::Rcp) && fits(ops[1].ty(), &ty) {
                    return Some(fit(operand_of(ops[1].take()), &ty));
                }
            }
            ExprOp::BitAnd => {
                if ops[0].is_zero() || ops[1].is_zero() {
                    return Some(Constant::zero(ty.clone()).into());
                }
            }
            ExprOp::LogicAnd | ExprOp::LogicOr => {
                // `absorb` decides the result on its own, `identity` drops out.
                let (identity, absorb) = if e.op == ExprOp::LogicAnd {
                    (1.0, 0.0)
                } else {
                    (0.0, 1.0)
                };
                for (x, k) in [(0, 1), (1, 0)] {
                    let Some(c) = ops[k].as_constant() else {
                        continue;
                    };
                    if c.has_value(absorb) {
                        return Some(constant_like(&ty, absorb));
                    }
                    if c.has_value(identity) && can_keep(ops, x) {
                        return Some(keep(ops, x));
                    }
                }
            }
            ExprOp::Neg | ExprOp::BitNot | ExprOp::Rcp if inner_op(ops) == Some(e.op) => {
                return Some(operand_of(ops[0].take()));
            }
            ExprOp::LogicNot => {
                if inner_op(ops) == Some(ExprOp::LogicNot) {
                    return Some(operand_of(ops[0].take()));
                }
                let inverse = inner_op(ops).and_then(inverse_comparison)?;
                let Rvalue::Expression(cmp) = &mut ops[0] else {
                    return None;
                };
                if !cmp.operands[0].ty().is_integer() {
                    return None;
                }
                let (a, b) = (cmp.operands[0].take(), cmp.operands[1].take());
                return Some(binop(inverse, a, b));
            }
            ExprOp::Abs => match inner_op(ops) {
                Some(ExprOp::Neg) => return Some(abs(operand_of(ops[0].take()))),
                Some(ExprOp::Abs) => return Some(ops[0].take()),
                _ => {}
            },
            ExprOp::Saturate if inner_op(ops) == Some(ExprOp::Saturate) => {
                return Some(ops[0].take());
            }
            ExprOp::Exp2 if inner_op(ops) == Some(ExprOp::Log2) => {
                return Some(operand_of(ops[0].take()));
            }
            ExprOp::Log2 if inner_op(ops) == Some(ExprOp::Exp2) => {
                return Some(operand_of(ops[0].take()));
            }
            ExprOp::Pow => {
                if ops[1].is_one() && can_keep(ops, 0) {
                    return Some(keep(ops, 0));
                }
                let squared = ops[1].as_constant().is_some_and(|c| c.has_value(2.0));
                if squared && can_keep(ops, 0) {
                    let x = ops[0].take();
                    return Some(fit(mul(x.clone(), x), &ty));
                }
            }
            ExprOp::Lrp => {
                if ops[2].is_zero() && can_keep(ops, 0) {
                    return Some(keep(ops, 0));
                }
                if ops[2].is_one() && can_keep(ops, 1) {
                    return Some(keep(ops, 1));
                }
            }
            ExprOp::Csel => {
                let c = ops[0].as_constant()?;
                let (all_true, all_false) = (c.has_value(1.0), c.has_value(0.0));
                if all_true {
                    return Some(ops[1].take());
                }
                if all_false {
                    return Some(ops[2].take());
                }
            }
            ExprOp::Min | ExprOp::Max if ops[0].equals(&ops[1]) && can_keep(ops, 0) => {
                return Some(keep(ops, 0));
            }
            _ => {}
        }
        None
    }
}

/// Rebuilds unbalanced chains of one associative operator.
#[derive(Debug)]
pub struct Rebalance;

impl Pass for Rebalance {
    fn name(&self) -> &str {
        "rebalance"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        rewrite_bodies(shader, |_, _, body| {
            let mut changed = false;
            for_each_rvalue_slot(body, &mut |slot| changed |= rebalance(slot));
            changed
        })
    }
}

/// Leaf count and depth of the chain rooted at `rv`, or `None` if some leaf
/// has a type other than the chain's.
fn chain_shape(rv: &Rvalue, op: ExprOp, ty: &Type) -> Option<(usize, usize)> {
    if rv.op() == Some(op) && rv.ty() == ty {
        let mut leaves = 0;
        let mut depth = 0;
        for child in rv.children() {
            let (l, d) = chain_shape(child, op, ty)?;
            leaves += l;
            depth = depth.max(d);
        }
        Some((leaves, depth + 1))
    } else if rv.ty() == ty {
        Some((1, 0))
    } else {
        None
    }
}

fn take_leaves(rv: Rvalue, op: ExprOp, out: &mut Vec<Rvalue>) {
    match rv {
        Rvalue::Expression(e) if e.op == op => {
            for child in e.operands {
                take_leaves(child, op, out);
            }
        }
        leaf => out.push(leaf),
    }
}

fn build_balanced(op: ExprOp, mut leaves: Vec<Rvalue>) -> Rvalue {
    if leaves.len() == 1 {
        return leaves.swap_remove(0);
    }
    let right = leaves.split_off(leaves.len() / 2);
    binop(op, build_balanced(op, leaves), build_balanced(op, right))
}

fn ceil_log2(n: usize) -> usize {
    if n <= 1 {
        0
    } else {
        (usize::BITS - (n - 1).leading_zeros()) as usize
    }
}

fn rebalance(rv: &mut Rvalue) -> bool {
    let mut changed = false;
    if let Some(op) = rv.op().filter(|op| op.is_associative())
        && !rv.ty().is_matrix()
    {
        let ty = rv.ty().clone();
        if let Some((leaves, depth)) = chain_shape(rv, op, &ty)
            && depth > ceil_log2(leaves)
        {
            trace!("rebalancing {} chain of {leaves} operands", op.name());
            let mut flat = Vec::with_capacity(leaves);
            take_leaves(rv.take(), op, &mut flat);
            *rv = build_balanced(op, flat);
            changed = true;
        }
    }
    for child in rv.children_mut() {
        changed |= rebalance(child);
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_ir::builder::{add, csel, exp2, less, log2, logic_not, lrp, pow, rcp};
    use lumen_ir::{Handle, ShaderStage, SignatureId, Statement, Variable, VariableMode};

    struct Fixture {
        shader: Shader,
        main: SignatureId,
    }

    fn run_on(value: impl FnOnce(&Shader) -> Rvalue, ty: Type, pass: &dyn Pass) -> (bool, Rvalue, Fixture) {
        let mut shader = Shader::new(ShaderStage::Fragment);
        shader.add_global(Variable::new("x", Type::float(), VariableMode::Uniform));
        shader.add_global(Variable::new("v", Type::vec(3), VariableMode::Uniform));
        shader.add_global(Variable::new("i", Type::int(), VariableMode::Uniform));
        let out = shader.add_global(Variable::new("o", ty, VariableMode::Out));
        let rv = value(&shader);
        let main = shader.add_main(vec![Statement::assign(shader.deref(out), rv)]);
        let changed = pass.run(&mut shader);
        let result = match &shader.signature(main).body[0] {
            Statement::Assign(a) => a.rhs.clone(),
            other => panic!("expected an assignment, got {other:?}"),
        };
        (changed, result, Fixture { shader, main })
    }

    fn var(shader: &Shader, name: &str) -> Handle<Variable> {
        shader
            .globals
            .iter()
            .copied()
            .find(|&g| shader.variables[g].name == name)
            .unwrap_or_else(|| panic!("no global {name}"))
    }

    fn read(shader: &Shader, name: &str) -> Rvalue {
        shader.read(var(shader, name))
    }

    fn c(v: f32) -> Rvalue {
        Constant::float(v).into()
    }

    const NAN_SAFE: AlgebraicSimplification = AlgebraicSimplification { preserve_nan: true };
    const FAST: AlgebraicSimplification = AlgebraicSimplification { preserve_nan: false };

    #[test]
    fn additive_identity() {
        let (changed, rv, f) = run_on(|s| add(read(s, "x"), c(0.0)), Type::float(), &NAN_SAFE);
        assert!(changed);
        assert_eq!(rv, read(&f.shader, "x"));
    }

    #[test]
    fn scalar_replacing_vector_is_splatted() {
        let zero: Rvalue = Constant::vec(&[0.0, 0.0, 0.0]).into();
        let (changed, rv, f) = run_on(|s| add(read(s, "x"), zero), Type::vec(3), &FAST);
        assert!(changed);
        assert_eq!(rv, splat(read(&f.shader, "x"), 3));
    }

    #[test]
    fn multiply_by_zero_respects_nan_safety() {
        let (changed, _, _) = run_on(|s| mul(read(s, "x"), c(0.0)), Type::float(), &NAN_SAFE);
        assert!(!changed);
        let (changed, rv, _) = run_on(|s| mul(read(s, "x"), c(0.0)), Type::float(), &FAST);
        assert!(changed);
        assert_eq!(rv, c(0.0));
        let (changed, rv, _) = run_on(
            |s| mul(read(s, "i"), Constant::int(0).into()),
            Type::int(),
            &NAN_SAFE,
        );
        assert!(changed);
        assert_eq!(rv, Constant::int(0).into());
    }

    #[test]
    fn double_negation() {
        let (changed, rv, f) = run_on(|s| neg(neg(read(s, "v"))), Type::vec(3), &NAN_SAFE);
        assert!(changed);
        assert_eq!(rv, read(&f.shader, "v"));
    }

    #[test]
    fn integer_comparison_inverts() {
        let (changed, rv, f) = run_on(
            |s| logic_not(less(read(s, "i"), Constant::int(3).into())),
            Type::bool(),
            &NAN_SAFE,
        );
        assert!(changed);
        assert_eq!(
            rv,
            binop(ExprOp::Gequal, read(&f.shader, "i"), Constant::int(3).into())
        );
    }

    #[test]
    fn float_comparison_is_not_inverted() {
        let (changed, _, _) = run_on(|s| logic_not(less(read(s, "x"), c(3.0))), Type::bool(), &FAST);
        assert!(!changed);
    }

    #[test]
    fn power_identities() {
        let (_, rv, f) = run_on(|s| pow(read(s, "x"), c(2.0)), Type::float(), &NAN_SAFE);
        let x = read(&f.shader, "x");
        assert_eq!(rv, mul(x.clone(), x));
        let (_, rv, f) = run_on(|s| exp2(log2(read(s, "x"))), Type::float(), &NAN_SAFE);
        assert_eq!(rv, read(&f.shader, "x"));
    }

    #[test]
    fn select_and_interpolate() {
        let (_, rv, f) = run_on(
            |s| lrp(read(s, "x"), c(4.0), c(1.0)),
            Type::float(),
            &NAN_SAFE,
        );
        assert_eq!(rv, c(4.0));
        assert_eq!(f.shader.signature(f.main).body.len(), 1);
        let (_, rv, f) = run_on(
            |s| csel(Constant::bool(false).into(), read(s, "x"), neg(read(s, "x"))),
            Type::float(),
            &NAN_SAFE,
        );
        assert_eq!(rv, neg(read(&f.shader, "x")));
        let (_, rv, f) = run_on(|s| lumen_ir::builder::div(c(1.0), rcp(read(s, "x"))), Type::float(), &NAN_SAFE);
        assert_eq!(rv, read(&f.shader, "x"));
    }

    #[test]
    fn left_leaning_chain_is_balanced() {
        let (changed, rv, f) = run_on(
            |s| {
                let x = read(s, "x");
                add(add(add(x.clone(), c(1.0)), c(2.0)), c(3.0))
            },
            Type::float(),
            &Rebalance,
        );
        assert!(changed);
        let x = read(&f.shader, "x");
        assert_eq!(rv, add(add(x, c(1.0)), add(c(2.0), c(3.0))));
    }

    #[test]
    fn balanced_and_mixed_chains_stay() {
        let (changed, _, _) = run_on(
            |s| add(add(read(s, "x"), c(1.0)), add(c(2.0), c(3.0))),
            Type::float(),
            &Rebalance,
        );
        assert!(!changed);
        let (changed, _, _) = run_on(
            |s| add(add(add(read(s, "v"), read(s, "x")), c(2.0)), c(3.0)),
            Type::vec(3),
            &Rebalance,
        );
        assert!(!changed);
    }
}
