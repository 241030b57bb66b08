//! Precision lowering.
//!
//! Each rvalue tree is handled in two phases. The first walks the tree with
//! an explicit stack and classifies every node from the declared precision
//! of the variables it reads. Ordinary arithmetic combines the verdicts of
//! its operands; dereference chains and texture lookups are boundaries whose
//! operands are judged on their own. The topmost lowerable node under each
//! boundary is a root. The second phase rebuilds every root at 16 bits:
//! variable reads are converted down, literals are narrowed, and the root's
//! value is converted back up so its surroundings keep their types.
//!
//! Before that, compiler temporaries without a declared precision take one
//! from their writers, and calls to qualifying built-ins are redirected to a
//! clone whose parameters are `mediump`.

use std::collections::HashMap;

use log::{debug, trace};
use lumen_ir::builder::{expr, unop};
use lumen_ir::visit::{for_each_rvalue_slot, for_each_statement, remap_variables};
use lumen_ir::{
    BaseType, Block, ExprOp, Expression, Handle, Precision, Rvalue, Shader, SignatureId, Statement,
    Swizzle, Type, Variable, VariableMode,
};

use crate::util::{for_each_block_mut, rewrite_bodies};
use crate::{LowerPrecisionOptions, Pass};

/// Verdict for one rvalue node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lowerability {
    /// Nothing forces either precision, as with literals.
    Unknown,
    CantLower,
    ShouldLower,
}

impl Lowerability {
    fn of_precision(precision: Precision) -> Self {
        match precision {
            Precision::None => Self::Unknown,
            Precision::High => Self::CantLower,
            Precision::Low | Precision::Medium => Self::ShouldLower,
        }
    }

    fn combine(states: impl IntoIterator<Item = Self>) -> Self {
        states.into_iter().fold(Self::Unknown, |acc, s| match (acc, s) {
            (Self::CantLower, _) | (_, Self::CantLower) => Self::CantLower,
            (Self::ShouldLower, _) | (_, Self::ShouldLower) => Self::ShouldLower,
            _ => Self::Unknown,
        })
    }
}

/// How a child's verdict relates to its parent's.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Link {
    /// Lowered together with the parent.
    Combined,
    /// Judged on its own; may become a root.
    Independent,
    /// Never a root: the base of a dereference chain, or the operand of a
    /// conversion this pass already inserted.
    Fixed,
}

/// A finished node on the phase-one stack.
#[derive(Clone, Copy, Debug)]
struct Visited {
    state: Lowerability,
    /// The subtree does real arithmetic, so lowering it gains something.
    worth: bool,
    /// Post-order number of the node.
    index: usize,
}

/// Rewrites `mediump`/`lowp` computations to 16-bit arithmetic.
#[derive(Debug)]
pub struct LowerPrecision {
    options: LowerPrecisionOptions,
}

impl LowerPrecision {
    pub fn new(options: LowerPrecisionOptions) -> Self {
        Self { options }
    }

    fn can_lower(&self, ty: &Type) -> bool {
        if !ty.is_scalar() && !ty.is_vector() {
            return false;
        }
        match ty.base_type() {
            BaseType::Float => self.options.lower_float16,
            BaseType::Int | BaseType::Uint => self.options.lower_int16,
            _ => false,
        }
    }

    /// Verdict for `rv` given its children's, and how each child relates.
    fn classify(&self, shader: &Shader, rv: &Rvalue, children: &[Lowerability]) -> (Lowerability, Vec<Link>) {
        use Lowerability::*;
        let own_type = |state: Lowerability| if self.can_lower(rv.ty()) { state } else { CantLower };
        match rv {
            Rvalue::Constant(_) => (own_type(Unknown), Vec::new()),
            Rvalue::Deref(d) => {
                let links = d
                    .children()
                    .iter()
                    .enumerate()
                    .map(|(i, child)| {
                        if i == 0 && matches!(child, Rvalue::Deref(_)) {
                            Link::Fixed
                        } else {
                            Link::Independent
                        }
                    })
                    .collect();
                let declared = d
                    .variable_referenced()
                    .map_or(Unknown, |var| Lowerability::of_precision(shader.variables[var].precision));
                (own_type(declared), links)
            }
            Rvalue::Swizzle(_) => (own_type(children[0]), vec![Link::Combined]),
            Rvalue::Texture(_) => (CantLower, vec![Link::Independent; children.len()]),
            Rvalue::Expression(e) => match e.op {
                op if is_inserted_conversion(op) => (CantLower, vec![Link::Fixed; children.len()]),
                ExprOp::B2F => (own_type(Unknown), vec![Link::Independent]),
                ExprOp::F2B => {
                    let state = if self.can_lower(e.operands[0].ty()) { children[0] } else { CantLower };
                    (state, vec![Link::Combined])
                }
                ExprOp::Csel => (
                    own_type(Lowerability::combine(children[1..].iter().copied())),
                    vec![Link::Independent, Link::Combined, Link::Combined],
                ),
                op if is_half_capable(op) && e.operands.iter().all(|o| self.can_lower(o.ty())) => (
                    own_type(Lowerability::combine(children.iter().copied())),
                    vec![Link::Combined; children.len()],
                ),
                _ => (CantLower, vec![Link::Independent; children.len()]),
            },
        }
    }

    /// Phase one. Returns the verdict for the whole tree and, by post-order
    /// number, which nodes are roots.
    fn find_roots(&self, shader: &Shader, tree: &Rvalue) -> (Lowerability, Vec<bool>) {
        enum Visit<'r> {
            Enter(&'r Rvalue),
            Leave(&'r Rvalue),
        }

        let mut roots = Vec::new();
        let mut finished: Vec<Visited> = Vec::new();
        let mut stack = vec![Visit::Enter(tree)];
        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(rv) => {
                    stack.push(Visit::Leave(rv));
                    stack.extend(rv.children().into_iter().rev().map(Visit::Enter));
                }
                Visit::Leave(rv) => {
                    let kids = finished.split_off(finished.len() - rv.children().len());
                    let states: Vec<Lowerability> = kids.iter().map(|k| k.state).collect();
                    let (state, links) = self.classify(shader, rv, &states);
                    for (kid, link) in kids.iter().zip(links) {
                        let covered = match link {
                            Link::Combined => state == Lowerability::ShouldLower,
                            Link::Independent => false,
                            Link::Fixed => true,
                        };
                        if !covered && kid.state == Lowerability::ShouldLower && kid.worth {
                            roots[kid.index] = true;
                        }
                    }
                    let worth = match rv {
                        Rvalue::Expression(_) => true,
                        Rvalue::Swizzle(_) => kids[0].worth,
                        _ => false,
                    };
                    finished.push(Visited {
                        state,
                        worth,
                        index: roots.len(),
                    });
                    roots.push(false);
                }
            }
        }
        let Some(top) = finished.pop() else {
            unreachable!("every tree has a root node");
        };
        if top.state == Lowerability::ShouldLower && top.worth {
            roots[top.index] = true;
        }
        (top.state, roots)
    }

    /// Lowers every root of `rv`. Returns `true` if anything changed.
    fn lower_tree(&self, shader: &Shader, rv: &mut Rvalue) -> bool {
        let (_, roots) = self.find_roots(shader, rv);
        if !roots.contains(&true) {
            return false;
        }
        let mut next = 0;
        rewrite_roots(rv, &roots, &mut next);
        debug_assert_eq!(next, roots.len());
        true
    }

    fn lower_body(&self, shader: &mut Shader, body: &mut Block) -> bool {
        let mut changed = false;
        if self.options.lower_builtins {
            changed |= for_each_block_mut(body, &mut |block| {
                let mut redirected = false;
                for stmt in block.iter_mut() {
                    if let Statement::Call { callee, args, .. } = stmt
                        && self.call_qualifies(shader, *callee, args)
                    {
                        *callee = self.lowered_clone(shader, *callee);
                        redirected = true;
                    }
                }
                redirected
            });
        }
        let shader = &*shader;
        for_each_rvalue_slot(body, &mut |rv| changed |= self.lower_tree(shader, rv));
        changed
    }

    /// A built-in call whose parameters and result can all be 16 bits wide
    /// and whose arguments ask for it.
    fn call_qualifies(&self, shader: &Shader, callee: SignatureId, args: &[Rvalue]) -> bool {
        let Some(sig) = shader.try_signature(callee) else {
            return false;
        };
        if !sig.is_builtin || !sig.is_defined || !self.can_lower(&sig.return_type) {
            return false;
        }
        let params = sig.parameters.iter().map(|&p| &shader.variables[p]);
        let params_ok = params.clone().all(|p| {
            matches!(p.mode, VariableMode::FunctionIn | VariableMode::ConstIn) && self.can_lower(&p.ty)
        });
        if !params_ok || params.clone().all(|p| p.precision.is_reduced()) {
            return false;
        }
        let states: Vec<Lowerability> = args.iter().map(|a| self.find_roots(shader, a).0).collect();
        !states.contains(&Lowerability::CantLower) && states.contains(&Lowerability::ShouldLower)
    }

    /// The `mediump` clone of a built-in, created on first use.
    fn lowered_clone(&self, shader: &mut Shader, original: SignatureId) -> SignatureId {
        if let Some(clone) = shader.signature(original).lowered_clone {
            return clone;
        }
        let mut sig = shader.signature(original).clone();
        let mut map: HashMap<Handle<Variable>, Handle<Variable>> = HashMap::new();
        for param in &mut sig.parameters {
            let copy = shader.variables[*param].clone().with_precision(Precision::Medium);
            let fresh = shader.add_local(copy);
            map.insert(*param, fresh);
            *param = fresh;
        }
        let mut locals = Vec::new();
        for_each_statement(&sig.body, &mut |s| {
            if let Statement::Declare(var) = s {
                locals.push(*var);
            }
        });
        for var in locals {
            let copy = shader.variables[var].clone();
            map.insert(var, shader.add_local(copy));
        }
        remap_variables(&mut sig.body, &map);

        let mut body = std::mem::take(&mut sig.body);
        self.lower_body(shader, &mut body);
        sig.body = body;
        sig.lowered_clone = None;

        let name = shader.functions[original.function].name.clone();
        let clone = shader.add_signature(&name, sig);
        shader.signature_mut(original).lowered_clone = Some(clone);
        debug!("cloned built-in `{name}` for half precision");
        clone
    }

    /// Gives precision-less temporaries the precision their writers agree
    /// on: `mediump` when every writer is lowerable, `highp` as soon as one
    /// is not.
    fn infer_temporaries(&self, shader: &mut Shader) -> bool {
        let mut decided: HashMap<Handle<Variable>, Precision> = HashMap::new();
        rewrite_bodies(shader, |shader, _, body| {
            let mut changed = false;
            for_each_statement(body, &mut |stmt| {
                let Some((var, state)) = self.writer_verdict(shader, stmt, &decided) else {
                    return;
                };
                let next = match (decided.get(&var), state) {
                    (Some(Precision::High), _) | (_, Lowerability::CantLower) => Precision::High,
                    (_, Lowerability::ShouldLower) => Precision::Medium,
                    (Some(&current), Lowerability::Unknown) => current,
                    (None, Lowerability::Unknown) => return,
                };
                if decided.insert(var, next) != Some(next) {
                    trace!("temporary {} takes {next:?}", shader.variables[var].name);
                    shader.variables[var].precision = next;
                    changed = true;
                }
            });
            changed
        })
    }

    /// The temporary written by `stmt` and how lowerable the written value is.
    fn writer_verdict(
        &self,
        shader: &Shader,
        stmt: &Statement,
        decided: &HashMap<Handle<Variable>, Precision>,
    ) -> Option<(Handle<Variable>, Lowerability)> {
        let (var, state) = match stmt {
            Statement::Assign(a) => (a.whole_variable()?, self.find_roots(shader, &a.rhs).0),
            Statement::Call {
                callee,
                args,
                return_deref: Some(ret),
            } => {
                let state = if self.options.lower_builtins && self.call_qualifies(shader, *callee, args) {
                    Lowerability::ShouldLower
                } else {
                    Lowerability::CantLower
                };
                (ret.as_variable()?, state)
            }
            _ => return None,
        };
        let v = &shader.variables[var];
        let open = v.precision == Precision::None || decided.contains_key(&var);
        (v.mode == VariableMode::Temporary && open && self.can_lower(&v.ty)).then_some((var, state))
    }
}

impl Pass for LowerPrecision {
    fn name(&self) -> &str {
        "lower-precision"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        let mut changed = self.infer_temporaries(shader);
        changed |= rewrite_bodies(shader, |shader, _, body| self.lower_body(shader, body));
        changed
    }
}

/// Conversions introduced by this pass. Their operands are already final.
fn is_inserted_conversion(op: ExprOp) -> bool {
    use ExprOp::*;
    matches!(op, F2Fmp | I2Imp | U2Ump | F162F | I2I | U2U | F162B | B2F16)
}

/// Operators with a 16-bit form that computes the same thing.
fn is_half_capable(op: ExprOp) -> bool {
    use ExprOp::*;
    matches!(
        op,
        Neg | Abs | Sign | Rcp | Rsq | Sqrt | Exp | Log | Exp2 | Log2 | Trunc | Ceil | Floor | Fract
            | RoundEven | Sin | Cos | Atan | Saturate | Add | Sub | Mul | Div | Mod | Dot | Min | Max
            | Pow | Atan2 | Fma | Lrp | BitAnd | BitOr | BitXor | BitNot
    )
}

fn narrowed(base: BaseType) -> BaseType {
    match base {
        BaseType::Float => BaseType::Float16,
        BaseType::Int => BaseType::Int16,
        BaseType::Uint => BaseType::Uint16,
        other => unreachable!("{other:?} has no 16-bit form"),
    }
}

/// Phase two: walks `rv` in the post-order phase one numbered and lowers
/// each root.
fn rewrite_roots(rv: &mut Rvalue, roots: &[bool], next: &mut usize) {
    for child in rv.children_mut() {
        rewrite_roots(child, roots, next);
    }
    let index = *next;
    *next += 1;
    if roots[index] {
        let root = rv.take();
        *rv = lower_root(root);
    }
}

fn lower_root(rv: Rvalue) -> Rvalue {
    let ty = rv.ty().clone();
    let lowered = lower(rv);
    let widened = match ty.base_type() {
        BaseType::Bool => return lowered,
        BaseType::Float => unop(ExprOp::F162F, lowered),
        BaseType::Int => unop(ExprOp::I2I, lowered),
        BaseType::Uint => unop(ExprOp::U2U, lowered),
        other => unreachable!("root of type {other:?}"),
    };
    trace!("lowered a {ty} computation to 16 bits");
    debug_assert_eq!(widened.ty(), &ty);
    widened
}

fn lower(rv: Rvalue) -> Rvalue {
    match rv {
        Rvalue::Constant(c) => c.convert(narrowed(c.ty.base_type())).into(),
        Rvalue::Deref(_) => {
            let down = match rv.ty().base_type() {
                BaseType::Float => ExprOp::F2Fmp,
                BaseType::Int => ExprOp::I2Imp,
                BaseType::Uint => ExprOp::U2Ump,
                other => unreachable!("read of {other:?} inside a lowered tree"),
            };
            unop(down, rv)
        }
        Rvalue::Swizzle(s) => Swizzle::new(lower(*s.val), s.mask).into(),
        Rvalue::Expression(Expression { op, operands, .. }) => {
            let op = match op {
                ExprOp::B2F => ExprOp::B2F16,
                ExprOp::F2B => ExprOp::F162B,
                op => op,
            };
            let operands = operands
                .into_iter()
                .enumerate()
                .map(|(i, o)| match (op, i) {
                    (ExprOp::Csel, 0) | (ExprOp::B2F16, _) => o,
                    _ => lower(o),
                })
                .collect();
            expr(op, operands)
        }
        Rvalue::Texture(_) => unreachable!("texture lookups stay at full precision"),
    }
}
