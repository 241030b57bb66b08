//! Min/max pruning.
//!
//! Removes operands of `min`/`max` trees that can never decide the result.
//! Each subtree gets a conservative interval from its constant leaves, and
//! the interval the enclosing tree cares about (`baserange`) is threaded
//! down. For example, with `a` clamped to `[5, 10]`, `min(3, a)` is `3`.
//!
//! Vector constants are compared component by component. When one vector is
//! neither entirely below nor entirely above the other, the bound is the
//! component-wise min or max of the two.

use std::cmp::Ordering;

use log::trace;
use lumen_ir::builder::splat;
use lumen_ir::visit::for_each_rvalue_slot;
use lumen_ir::{Constant, ExprOp, Rvalue, Scalar, Shader, Type};

use crate::Pass;
use crate::util::rewrite_bodies;

#[derive(Debug)]
pub struct MinMaxPrune;

impl Pass for MinMaxPrune {
    fn name(&self) -> &str {
        "minmax-prune"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        rewrite_bodies(shader, |_, _, body| {
            let mut changed = false;
            for_each_rvalue_slot(body, &mut |slot| changed |= prune(slot, &Range::default()));
            changed
        })
    }
}

/// How every component of one constant compares with another.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Comparison {
    Less,
    LessOrEqual,
    Equal,
    GreaterOrEqual,
    Greater,
    Mixed,
}

fn order(a: Scalar, b: Scalar) -> Option<Ordering> {
    let base = a.base_type();
    if base.is_floating() {
        a.as_f64().partial_cmp(&b.as_f64())
    } else if base.is_unsigned_integer() {
        Some(a.as_u64().cmp(&b.as_u64()))
    } else {
        Some(a.as_i64().cmp(&b.as_i64()))
    }
}

/// Component `i`, broadcasting scalars.
fn lane(c: &Constant, i: usize) -> Scalar {
    let components = c.components();
    components[if components.len() == 1 { 0 } else { i }]
}

fn lanes(a: &Constant, b: &Constant) -> usize {
    a.components().len().max(b.components().len())
}

fn compare_components(a: &Constant, b: &Constant) -> Option<Comparison> {
    let (mut less, mut greater, mut equal) = (false, false, false);
    for i in 0..lanes(a, b) {
        match order(lane(a, i), lane(b, i))? {
            Ordering::Less => less = true,
            Ordering::Greater => greater = true,
            Ordering::Equal => equal = true,
        }
    }
    Some(match (less, equal, greater) {
        (true, _, true) => Comparison::Mixed,
        (true, true, false) => Comparison::LessOrEqual,
        (false, true, true) => Comparison::GreaterOrEqual,
        (false, true, false) => Comparison::Equal,
        (true, false, false) => Comparison::Less,
        _ => Comparison::Greater,
    })
}

/// Component-wise min (`smaller`) or max of two constants.
fn combine_constant(smaller: bool, a: &Constant, b: &Constant) -> Constant {
    let ty = if a.components().len() >= b.components().len() {
        a.ty.clone()
    } else {
        b.ty.clone()
    };
    let components = (0..lanes(a, b))
        .map(|i| {
            let (x, y) = (lane(a, i), lane(b, i));
            let take_y = match order(x, y) {
                Some(Ordering::Greater) => smaller,
                Some(Ordering::Less) => !smaller,
                _ => false,
            };
            if take_y { y } else { x }
        })
        .collect();
    Constant::new(ty, components)
}

fn pick(smaller: bool, a: &Constant, b: &Constant) -> Constant {
    match compare_components(a, b) {
        Some(Comparison::Mixed) | None => combine_constant(smaller, a, b),
        Some(c) if (c <= Comparison::Equal) == smaller => a.clone(),
        Some(_) => b.clone(),
    }
}

/// A conservative interval; a missing bound is unlimited.
#[derive(Clone, Debug, Default)]
struct Range {
    low: Option<Constant>,
    high: Option<Constant>,
}

impl Range {
    fn exact(c: &Constant) -> Self {
        let usable = (c.ty.is_scalar() || c.ty.is_vector())
            && !c.ty.is_boolean()
            && c.components().iter().all(|s| !s.as_f64().is_nan());
        if usable {
            Self {
                low: Some(c.clone()),
                high: Some(c.clone()),
            }
        } else {
            Self::default()
        }
    }

    /// The range of `min(r0, r1)` (`is_min`) or `max(r0, r1)`.
    fn combine(r0: &Range, r1: &Range, is_min: bool) -> Range {
        let low = match (&r0.low, &r1.low) {
            (Some(a), Some(b)) => Some(pick(is_min, a, b)),
            (None, other) | (other, None) if !is_min => other.clone(),
            _ => None,
        };
        let high = match (&r0.high, &r1.high) {
            (Some(a), Some(b)) => Some(pick(is_min, a, b)),
            (None, other) | (other, None) if is_min => other.clone(),
            _ => None,
        };
        Range { low, high }
    }

    fn intersect(&self, other: &Range) -> Range {
        let low = match (&self.low, &other.low) {
            (Some(a), Some(b)) => Some(pick(false, a, b)),
            (a, b) => a.clone().or_else(|| b.clone()),
        };
        let high = match (&self.high, &other.high) {
            (Some(a), Some(b)) => Some(pick(true, a, b)),
            (a, b) => a.clone().or_else(|| b.clone()),
        };
        Range { low, high }
    }
}

fn minmax_kind(rv: &Rvalue) -> Option<bool> {
    match rv.op()? {
        ExprOp::Min => Some(true),
        ExprOp::Max => Some(false),
        _ => None,
    }
}

fn get_range(rv: &Rvalue) -> Range {
    if let Some(is_min) = minmax_kind(rv) {
        let children = rv.children();
        return Range::combine(&get_range(children[0]), &get_range(children[1]), is_min);
    }
    rv.as_constant().map(Range::exact).unwrap_or_default()
}

enum Decision {
    /// Replace the node with this operand.
    Keep(usize),
    Fold(Constant),
    Descend,
}

fn decide(operands: &[Rvalue], limits: &[Range; 2], base: &Range, is_min: bool) -> Decision {
    for i in 0..2 {
        let other = 1 - i;
        let mut result = None;
        let mut redundant = false;
        // An operand is redundant when it always loses against the other
        // operand or against the enclosing bound.
        let (mine, theirs, outer) = if is_min {
            (&limits[i].low, &limits[other].high, &base.high)
        } else {
            (&limits[i].high, &limits[other].low, &base.low)
        };
        if let (Some(mine), Some(theirs)) = (mine, theirs) {
            result = compare_components(mine, theirs);
            redundant = match result {
                Some(c) if is_min => c >= Comparison::Equal && c != Comparison::Mixed,
                Some(c) => c <= Comparison::Equal,
                None => false,
            };
        }
        if !redundant && let (Some(mine), Some(outer)) = (mine, outer) {
            result = compare_components(mine, outer);
            redundant = match result {
                Some(c) if is_min => c > Comparison::Equal && c != Comparison::Mixed,
                Some(c) => c < Comparison::Equal,
                None => false,
            };
        }
        if redundant {
            return Decision::Keep(other);
        }
        if result == Some(Comparison::Mixed)
            && let (Some(a), Some(b)) = (operands[0].as_constant(), operands[1].as_constant())
        {
            return Decision::Fold(combine_constant(is_min, a, b));
        }
    }
    Decision::Descend
}

fn prune_children(rv: &mut Rvalue) -> bool {
    let mut changed = false;
    for child in rv.children_mut() {
        changed |= prune(child, &Range::default());
    }
    changed
}

fn prune(rv: &mut Rvalue, base: &Range) -> bool {
    let Some(is_min) = minmax_kind(rv) else {
        return prune_children(rv);
    };
    let ty: Type = rv.ty().clone();
    let Some(e) = rv.as_expression_mut() else {
        return false;
    };
    let limits = [get_range(&e.operands[0]), get_range(&e.operands[1])];
    match decide(&e.operands, &limits, base, is_min) {
        Decision::Keep(i) => {
            trace!("pruned redundant operand of {}", e.op.name());
            let kept = e.operands[i].take();
            *rv = if kept.ty() == &ty {
                kept
            } else {
                splat(kept, ty.vector_elements())
            };
            prune(rv, base);
            true
        }
        Decision::Fold(value) => {
            trace!("folded mixed {} to {value}", e.op.name());
            *rv = value.into();
            true
        }
        Decision::Descend => {
            let mut changed = false;
            for i in 0..2 {
                let other = &limits[1 - i];
                let bound = if is_min {
                    Range {
                        low: None,
                        high: other.high.clone(),
                    }
                } else {
                    Range {
                        low: other.low.clone(),
                        high: None,
                    }
                };
                changed |= prune(&mut e.operands[i], &base.intersect(&bound));
            }
            changed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_ir::builder::{max, min};
    use lumen_ir::{Handle, ShaderStage, SignatureId, Statement, Variable, VariableMode};

    struct Fixture {
        shader: Shader,
        a: Handle<Variable>,
        b: Handle<Variable>,
        out: Handle<Variable>,
    }

    fn fixture(ty: Type) -> Fixture {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let a = shader.add_global(Variable::new("a", ty.clone(), VariableMode::Uniform));
        let b = shader.add_global(Variable::new("b", ty.clone(), VariableMode::Uniform));
        let out = shader.add_global(Variable::new("o", ty, VariableMode::Out));
        Fixture { shader, a, b, out }
    }

    fn c(v: f32) -> Rvalue {
        Constant::float(v).into()
    }

    fn install(f: &mut Fixture, rv: Rvalue) -> SignatureId {
        let stmt = Statement::assign(f.shader.deref(f.out), rv);
        f.shader.add_main(vec![stmt])
    }

    fn result(f: &Fixture, main: SignatureId) -> &Rvalue {
        match &f.shader.signature(main).body[0] {
            Statement::Assign(a) => &a.rhs,
            other => panic!("expected an assignment, got {other:?}"),
        }
    }

    #[test]
    fn clamped_operand_loses_to_smaller_constant() {
        let mut f = fixture(Type::float());
        let a = max(min(f.shader.read(f.a), c(10.0)), c(5.0));
        let tree = min(min(c(3.0), a), min(f.shader.read(f.b), c(2.0)));
        let main = install(&mut f, tree);
        assert!(MinMaxPrune.run(&mut f.shader));
        // min(3, a) is 3, which in turn never undercuts min(b, 2).
        assert_eq!(result(&f, main), &min(f.shader.read(f.b), c(2.0)));
        assert!(!MinMaxPrune.run(&mut f.shader));
    }

    #[test]
    fn max_floor_above_min_ceiling() {
        let mut f = fixture(Type::float());
        let tree = min(max(f.shader.read(f.a), c(7.0)), c(5.0));
        let main = install(&mut f, tree);
        assert!(MinMaxPrune.run(&mut f.shader));
        assert_eq!(result(&f, main), &c(5.0));
    }

    #[test]
    fn nested_max_drops_weaker_bound() {
        let mut f = fixture(Type::float());
        let tree = max(max(f.shader.read(f.a), c(2.0)), c(1.0));
        let main = install(&mut f, tree);
        assert!(MinMaxPrune.run(&mut f.shader));
        assert_eq!(result(&f, main), &max(f.shader.read(f.a), c(2.0)));
    }

    #[test]
    fn enclosing_bound_prunes_inner_operand() {
        let mut f = fixture(Type::float());
        // The inner max(b, 4) can only matter above 4, which the outer
        // min(_, 3) never lets through.
        let tree = min(min(f.shader.read(f.a), max(f.shader.read(f.b), c(4.0))), c(3.0));
        let main = install(&mut f, tree);
        assert!(MinMaxPrune.run(&mut f.shader));
        assert_eq!(result(&f, main), &min(f.shader.read(f.a), c(3.0)));
    }

    #[test]
    fn mixed_vectors_combine_per_component() {
        let mut f = fixture(Type::vec(2));
        let lhs: Rvalue = Constant::vec(&[1.0, 3.0]).into();
        let rhs: Rvalue = Constant::vec(&[3.0, 1.0]).into();
        let tree = min(min(lhs, rhs), f.shader.read(f.a));
        let main = install(&mut f, tree);
        assert!(MinMaxPrune.run(&mut f.shader));
        let folded: Rvalue = Constant::vec(&[1.0, 1.0]).into();
        assert_eq!(result(&f, main), &min(folded, f.shader.read(f.a)));
    }

    #[test]
    fn scalar_survivor_is_splatted() {
        let mut f = fixture(Type::vec(3));
        let tree = min(max(f.shader.read(f.a), c(7.0)), c(5.0));
        let main = install(&mut f, tree);
        assert!(MinMaxPrune.run(&mut f.shader));
        assert_eq!(result(&f, main), &splat(c(5.0), 3));
    }

    #[test]
    fn undecided_trees_stay() {
        let mut f = fixture(Type::float());
        let tree = min(max(f.shader.read(f.a), c(1.0)), c(5.0));
        install(&mut f, tree);
        assert!(!MinMaxPrune.run(&mut f.shader));
    }

    #[test]
    fn nan_bounds_are_ignored() {
        let mut f = fixture(Type::float());
        let tree = min(max(f.shader.read(f.a), c(f32::NAN)), c(5.0));
        install(&mut f, tree);
        assert!(!MinMaxPrune.run(&mut f.shader));
    }
}
