//! Rvalues: typed expression trees.
//!
//! Every rvalue owns its children and carries the [`Type`] computed when it
//! was built. Variables are referenced by non-owning [`Handle`]s.

use std::fmt;

use crate::arena::Handle;
use crate::constant::Constant;
use crate::expr::{ExprOp, Expression};
use crate::types::Type;
use crate::var::Variable;

/// Up to four source component indices.
#[derive(Clone, Copy, Hash, Eq, PartialEq)]
pub struct SwizzleMask {
    components: [u8; 4],
    len: u8,
}

impl SwizzleMask {
    pub fn new(components: &[u8]) -> Self {
        assert!(
            (1..=4).contains(&components.len()),
            "swizzle of {} components",
            components.len()
        );
        let mut stored = [0u8; 4];
        for (slot, &c) in stored.iter_mut().zip(components) {
            assert!(c < 4, "swizzle component {c} out of range");
            *slot = c;
        }
        Self {
            components: stored,
            len: components.len() as u8,
        }
    }

    /// `.x`, `.xy`, `.xyz` or `.xyzw`.
    pub fn identity(width: u8) -> Self {
        Self::new(&[0, 1, 2, 3][..width as usize])
    }

    /// A single channel.
    pub fn channel(index: u8) -> Self {
        Self::new(&[index])
    }

    /// Builds a mask from a write mask's enabled channels, in order.
    pub fn from_write_mask(write_mask: u8) -> Self {
        let channels: Vec<u8> = (0..4).filter(|i| write_mask & (1 << i) != 0).collect();
        Self::new(&channels)
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, i: usize) -> u8 {
        assert!(i < self.len(), "swizzle index {i} past length {}", self.len);
        self.components[i]
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.components[..self.len()]
    }

    /// Highest source component referenced.
    pub fn max_component(&self) -> u8 {
        self.as_slice().iter().copied().max().unwrap_or(0)
    }

    /// The mask equivalent to applying `self` to the result of `inner`.
    pub fn compose(&self, inner: &SwizzleMask) -> SwizzleMask {
        let composed: Vec<u8> = self
            .as_slice()
            .iter()
            .map(|&c| inner.get(c as usize))
            .collect();
        SwizzleMask::new(&composed)
    }

    /// Returns `true` if this mask reads `0, 1, .., width-1` in order.
    pub fn is_identity(&self, width: u8) -> bool {
        self.len == width && self.as_slice().iter().enumerate().all(|(i, &c)| c as usize == i)
    }
}

impl fmt::Debug for SwizzleMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for SwizzleMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &c in self.as_slice() {
            write!(f, "{}", ['x', 'y', 'z', 'w'][c as usize])?;
        }
        Ok(())
    }
}

/// Component selection and reordering.
#[derive(Clone, Debug, PartialEq)]
pub struct Swizzle {
    pub val: Box<Rvalue>,
    pub mask: SwizzleMask,
    pub ty: Type,
}

impl Swizzle {
    pub fn new(val: Rvalue, mask: SwizzleMask) -> Self {
        let src = val.ty();
        assert!(
            src.is_scalar() || src.is_vector(),
            "swizzle of non-vector type {src}"
        );
        assert!(
            mask.max_component() < src.vector_elements(),
            "swizzle .{mask} reads past {src}"
        );
        let ty = Type::vector(src.base_type(), mask.len() as u8);
        Self {
            val: Box::new(val),
            mask,
            ty,
        }
    }
}

/// A dereference: variable, array element or struct field.
#[derive(Clone, Debug, PartialEq)]
pub enum Deref {
    Variable {
        var: Handle<Variable>,
        ty: Type,
    },
    Array {
        array: Box<Rvalue>,
        index: Box<Rvalue>,
        ty: Type,
    },
    Record {
        record: Box<Rvalue>,
        field: usize,
        ty: Type,
    },
}

impl Deref {
    pub fn variable(var: Handle<Variable>, ty: Type) -> Self {
        Self::Variable { var, ty }
    }

    /// Indexes an array, matrix column or vector component.
    pub fn array(array: Rvalue, index: Rvalue) -> Self {
        let ty = array
            .ty()
            .index_result()
            .unwrap_or_else(|| panic!("indexing non-indexable type {}", array.ty()));
        assert!(index.ty().is_integer() && index.ty().is_scalar(), "non-integer index");
        Self::Array {
            array: Box::new(array),
            index: Box::new(index),
            ty,
        }
    }

    pub fn record(record: Rvalue, field: usize) -> Self {
        let ty = record
            .ty()
            .field_type(field)
            .unwrap_or_else(|| panic!("field {field} out of range for {}", record.ty()))
            .clone();
        Self::Record {
            record: Box::new(record),
            field,
            ty,
        }
    }

    pub fn ty(&self) -> &Type {
        match self {
            Self::Variable { ty, .. } | Self::Array { ty, .. } | Self::Record { ty, .. } => ty,
        }
    }

    /// The variable at the root of the dereference chain, if any.
    pub fn variable_referenced(&self) -> Option<Handle<Variable>> {
        match self {
            Self::Variable { var, .. } => Some(*var),
            Self::Array { array, .. } => array.variable_referenced(),
            Self::Record { record, .. } => record.variable_referenced(),
        }
    }

    /// Returns the variable if this is a whole-variable dereference.
    pub fn as_variable(&self) -> Option<Handle<Variable>> {
        match self {
            Self::Variable { var, .. } => Some(*var),
            _ => None,
        }
    }

    /// Rvalue slots reachable from this dereference used for addressing
    /// (array indices) plus non-deref bases.
    pub fn children(&self) -> Vec<&Rvalue> {
        match self {
            Self::Variable { .. } => Vec::new(),
            Self::Array { array, index, .. } => vec![array.as_ref(), index.as_ref()],
            Self::Record { record, .. } => vec![record.as_ref()],
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut Rvalue> {
        match self {
            Self::Variable { .. } => Vec::new(),
            Self::Array { array, index, .. } => vec![array.as_mut(), index.as_mut()],
            Self::Record { record, .. } => vec![record.as_mut()],
        }
    }

    /// Index rvalues of this chain, excluding the chain itself. Used when the
    /// dereference is an assignment target and only the indices are read.
    pub fn index_slots_mut(&mut self) -> Vec<&mut Rvalue> {
        match self {
            Self::Variable { .. } => Vec::new(),
            Self::Array { array, index, .. } => {
                let mut slots = match array.as_mut() {
                    Rvalue::Deref(inner) => inner.index_slots_mut(),
                    other => vec![other],
                };
                slots.push(index.as_mut());
                slots
            }
            Self::Record { record, .. } => match record.as_mut() {
                Rvalue::Deref(inner) => inner.index_slots_mut(),
                other => vec![other],
            },
        }
    }

    /// Immutable counterpart of [`Deref::index_slots_mut`].
    pub fn index_slots(&self) -> Vec<&Rvalue> {
        match self {
            Self::Variable { .. } => Vec::new(),
            Self::Array { array, index, .. } => {
                let mut slots = match array.as_ref() {
                    Rvalue::Deref(inner) => inner.index_slots(),
                    other => vec![other],
                };
                slots.push(index.as_ref());
                slots
            }
            Self::Record { record, .. } => match record.as_ref() {
                Rvalue::Deref(inner) => inner.index_slots(),
                other => vec![other],
            },
        }
    }
}

/// Texture operation kind.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum TexOp {
    /// Implicit-lod sample.
    Tex,
    /// Sample with lod bias.
    Txb,
    /// Sample with explicit lod.
    Txl,
    /// Sample with explicit gradients.
    Txd,
    /// Texel fetch.
    Txf,
    /// Multisample texel fetch.
    TxfMs,
    /// Texture size query.
    Txs,
    /// Lod query.
    Lod,
    /// Gather.
    Tg4,
    QueryLevels,
    SamplesIdentical,
}

/// The lod-related operand of a texture operation.
#[derive(Clone, Debug, PartialEq)]
pub enum TexLod {
    None,
    Bias(Box<Rvalue>),
    Lod(Box<Rvalue>),
    Grad { dpdx: Box<Rvalue>, dpdy: Box<Rvalue> },
    Sample(Box<Rvalue>),
    Component(Box<Rvalue>),
}

/// A texture sample or query.
#[derive(Clone, Debug, PartialEq)]
pub struct Texture {
    pub op: TexOp,
    pub ty: Type,
    /// Dereference of the sampler variable.
    pub sampler: Box<Rvalue>,
    pub coordinate: Option<Box<Rvalue>>,
    pub projector: Option<Box<Rvalue>>,
    pub shadow_comparator: Option<Box<Rvalue>>,
    pub offset: Option<Box<Rvalue>>,
    pub lod: TexLod,
}

impl Texture {
    /// An implicit-lod sample of `sampler` at `coordinate`.
    pub fn sample(ty: Type, sampler: Deref, coordinate: Rvalue) -> Self {
        Self {
            op: TexOp::Tex,
            ty,
            sampler: Box::new(Rvalue::Deref(sampler)),
            coordinate: Some(Box::new(coordinate)),
            projector: None,
            shadow_comparator: None,
            offset: None,
            lod: TexLod::None,
        }
    }

    fn lod_children(&self) -> Vec<&Rvalue> {
        match &self.lod {
            TexLod::None => Vec::new(),
            TexLod::Bias(v) | TexLod::Lod(v) | TexLod::Sample(v) | TexLod::Component(v) => {
                vec![v.as_ref()]
            }
            TexLod::Grad { dpdx, dpdy } => vec![dpdx.as_ref(), dpdy.as_ref()],
        }
    }

    /// Operand rvalues other than the sampler.
    pub fn operands(&self) -> Vec<&Rvalue> {
        let mut out: Vec<&Rvalue> = [
            &self.coordinate,
            &self.projector,
            &self.shadow_comparator,
            &self.offset,
        ]
        .into_iter()
        .flatten()
        .map(|b| b.as_ref())
        .collect();
        out.extend(self.lod_children());
        out
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Rvalue> {
        self.slots_mut(false)
    }

    fn slots_mut(&mut self, with_sampler: bool) -> Vec<&mut Rvalue> {
        let Texture {
            sampler,
            coordinate,
            projector,
            shadow_comparator,
            offset,
            lod,
            ..
        } = self;
        let mut out: Vec<&mut Rvalue> = Vec::new();
        if with_sampler {
            out.push(sampler.as_mut());
        }
        out.extend(
            [coordinate, projector, shadow_comparator, offset]
                .into_iter()
                .flatten()
                .map(|b| b.as_mut()),
        );
        match lod {
            TexLod::None => {}
            TexLod::Bias(v) | TexLod::Lod(v) | TexLod::Sample(v) | TexLod::Component(v) => {
                out.push(v.as_mut())
            }
            TexLod::Grad { dpdx, dpdy } => {
                out.push(dpdx.as_mut());
                out.push(dpdy.as_mut());
            }
        }
        out
    }
}

/// A typed value-producing tree node.
#[derive(Clone, Debug, PartialEq)]
pub enum Rvalue {
    Expression(Expression),
    Constant(Constant),
    Deref(Deref),
    Swizzle(Swizzle),
    Texture(Texture),
}

impl From<Expression> for Rvalue {
    fn from(e: Expression) -> Self {
        Self::Expression(e)
    }
}

impl From<Constant> for Rvalue {
    fn from(c: Constant) -> Self {
        Self::Constant(c)
    }
}

impl From<Deref> for Rvalue {
    fn from(d: Deref) -> Self {
        Self::Deref(d)
    }
}

impl From<Swizzle> for Rvalue {
    fn from(s: Swizzle) -> Self {
        Self::Swizzle(s)
    }
}

impl From<Texture> for Rvalue {
    fn from(t: Texture) -> Self {
        Self::Texture(t)
    }
}

impl Rvalue {
    pub fn ty(&self) -> &Type {
        match self {
            Self::Expression(e) => &e.ty,
            Self::Constant(c) => &c.ty,
            Self::Deref(d) => d.ty(),
            Self::Swizzle(s) => &s.ty,
            Self::Texture(t) => &t.ty,
        }
    }

    /// Moves the subtree out, leaving a placeholder `false` constant behind.
    /// The caller must overwrite the slot before the tree is observed again.
    pub fn take(&mut self) -> Rvalue {
        std::mem::replace(self, Rvalue::Constant(Constant::bool(false)))
    }

    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            Self::Constant(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_expression(&self) -> Option<&Expression> {
        match self {
            Self::Expression(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_expression_mut(&mut self) -> Option<&mut Expression> {
        match self {
            Self::Expression(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_deref(&self) -> Option<&Deref> {
        match self {
            Self::Deref(d) => Some(d),
            _ => None,
        }
    }

    /// The operator, if this is an expression.
    pub fn op(&self) -> Option<ExprOp> {
        self.as_expression().map(|e| e.op)
    }

    /// Returns the variable if this is a whole-variable dereference.
    pub fn as_variable(&self) -> Option<Handle<Variable>> {
        self.as_deref().and_then(Deref::as_variable)
    }

    /// The variable at the root of a dereference chain.
    pub fn variable_referenced(&self) -> Option<Handle<Variable>> {
        self.as_deref().and_then(Deref::variable_referenced)
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Self::Constant(_))
    }

    pub fn is_zero(&self) -> bool {
        self.as_constant().is_some_and(Constant::is_zero)
    }

    pub fn is_one(&self) -> bool {
        self.as_constant().is_some_and(Constant::is_one)
    }

    pub fn is_negative_one(&self) -> bool {
        self.as_constant().is_some_and(Constant::is_negative_one)
    }

    /// Direct children, in evaluation order.
    pub fn children(&self) -> Vec<&Rvalue> {
        match self {
            Self::Expression(e) => e.operands.iter().collect(),
            Self::Constant(_) => Vec::new(),
            Self::Deref(d) => d.children(),
            Self::Swizzle(s) => vec![s.val.as_ref()],
            Self::Texture(t) => {
                let mut out = vec![t.sampler.as_ref()];
                out.extend(t.operands());
                out
            }
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut Rvalue> {
        match self {
            Self::Expression(e) => e.operands.iter_mut().collect(),
            Self::Constant(_) => Vec::new(),
            Self::Deref(d) => d.children_mut(),
            Self::Swizzle(s) => vec![s.val.as_mut()],
            Self::Texture(t) => t.slots_mut(true),
        }
    }

    /// Visits children before the node itself; `f` may replace the node.
    pub fn rewrite_post_order(&mut self, f: &mut impl FnMut(&mut Rvalue)) {
        for child in self.children_mut() {
            child.rewrite_post_order(f);
        }
        f(self);
    }

    /// Visits the node before its children.
    pub fn for_each_pre_order<'a>(&'a self, f: &mut impl FnMut(&'a Rvalue)) {
        f(self);
        for child in self.children() {
            child.for_each_pre_order(f);
        }
    }

    /// Returns `true` if `pred` holds for this node or any descendant.
    pub fn any(&self, pred: &mut impl FnMut(&Rvalue) -> bool) -> bool {
        pred(self) || self.children().into_iter().any(|c| c.any(pred))
    }

    /// Number of nodes in the tree.
    pub fn node_count(&self) -> usize {
        1 + self
            .children()
            .into_iter()
            .map(Rvalue::node_count)
            .sum::<usize>()
    }

    /// Variables read anywhere in the tree.
    pub fn variables_read(&self, out: &mut Vec<Handle<Variable>>) {
        self.for_each_pre_order(&mut |rv| {
            if let Some(var) = rv.as_variable()
                && !out.contains(&var)
            {
                out.push(var);
            }
        });
    }

    /// Returns `true` if the tree dereferences `var`.
    pub fn references(&self, var: Handle<Variable>) -> bool {
        self.any(&mut |rv| rv.as_variable() == Some(var))
    }

    /// Structural equality that compares constants bitwise.
    pub fn equals(&self, other: &Rvalue) -> bool {
        match (self, other) {
            (Self::Constant(a), Self::Constant(b)) => a.bit_eq(b),
            (Self::Expression(a), Self::Expression(b)) => {
                a.op == b.op
                    && a.ty == b.ty
                    && a.operands.len() == b.operands.len()
                    && a.operands.iter().zip(&b.operands).all(|(x, y)| x.equals(y))
            }
            (Self::Deref(Deref::Variable { var: a, .. }), Self::Deref(Deref::Variable { var: b, .. })) => {
                a == b
            }
            (
                Self::Deref(Deref::Array {
                    array: a, index: i, ..
                }),
                Self::Deref(Deref::Array {
                    array: b, index: j, ..
                }),
            ) => a.equals(b) && i.equals(j),
            (
                Self::Deref(Deref::Record {
                    record: a, field: f, ..
                }),
                Self::Deref(Deref::Record {
                    record: b, field: g, ..
                }),
            ) => f == g && a.equals(b),
            (Self::Swizzle(a), Self::Swizzle(b)) => a.mask == b.mask && a.val.equals(&b.val),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::var::{Variable, VariableMode};

    #[test]
    fn swizzle_compose() {
        let inner = SwizzleMask::new(&[3, 2, 1, 0]);
        let outer = SwizzleMask::new(&[0, 0, 2]);
        assert_eq!(outer.compose(&inner).as_slice(), &[3, 3, 1]);
        assert!(SwizzleMask::identity(3).is_identity(3));
        assert!(!SwizzleMask::identity(3).is_identity(4));
        assert_eq!(SwizzleMask::from_write_mask(0b1010).to_string(), "yw");
    }

    #[test]
    fn swizzle_type() {
        let v = Rvalue::Constant(Constant::vec(&[1.0, 2.0, 3.0]));
        let s = Swizzle::new(v, SwizzleMask::new(&[2, 2]));
        assert_eq!(s.ty, Type::vec(2));
    }

    #[test]
    #[should_panic(expected = "reads past")]
    fn swizzle_out_of_range() {
        let v = Rvalue::Constant(Constant::vec(&[1.0, 2.0]));
        let _ = Swizzle::new(v, SwizzleMask::new(&[2]));
    }

    #[test]
    fn deref_chain_root() {
        let mut vars = Arena::new();
        let arr_ty = Type::array(Type::vec(4), 3);
        let v = vars.append(Variable::new("lights", arr_ty.clone(), VariableMode::Uniform));
        let elem = Deref::array(
            Deref::variable(v, arr_ty).into(),
            Constant::int(1).into(),
        );
        assert_eq!(elem.ty(), &Type::vec(4));
        let rv = Rvalue::Deref(elem);
        assert_eq!(rv.variable_referenced(), Some(v));
        assert_eq!(rv.as_variable(), None);
        assert!(rv.references(v));
        assert_eq!(rv.node_count(), 3);
    }

    #[test]
    fn post_order_rewrite_replaces_leaves() {
        let mut rv: Rvalue = Expression::new(
            ExprOp::Add,
            vec![Constant::float(1.0).into(), Constant::float(2.0).into()],
        )
        .into();
        rv.rewrite_post_order(&mut |node| {
            if let Rvalue::Constant(c) = node {
                *node = Rvalue::Constant(Constant::float(c.get_f32(0) * 10.0));
            }
        });
        let e = rv.as_expression().expect("still an expression");
        assert_eq!(e.operands[1].as_constant().map(|c| c.get_f32(0)), Some(20.0));
    }
}
