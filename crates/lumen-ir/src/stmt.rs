//! Statements: operations with side effects and control flow.

use crate::arena::Handle;
use crate::func::SignatureId;
use crate::rvalue::{Deref, Rvalue};
use crate::var::Variable;

/// A block of statements.
pub type Block = Vec<Statement>;

/// Write mask covering every channel of a value with `components` channels.
pub fn full_write_mask(components: usize) -> u8 {
    if components >= 4 {
        0xf
    } else {
        (1u8 << components) - 1
    }
}

/// An unconditional transfer of control.
#[derive(Clone, Debug, PartialEq)]
pub enum Jump {
    Break,
    Continue,
    Return(Option<Rvalue>),
}

impl Jump {
    /// Returns `true` if both jumps transfer control the same way.
    pub fn same_as(&self, other: &Jump) -> bool {
        match (self, other) {
            (Self::Break, Self::Break) | (Self::Continue, Self::Continue) => true,
            (Self::Return(None), Self::Return(None)) => true,
            (Self::Return(Some(a)), Self::Return(Some(b))) => a.equals(b),
            _ => false,
        }
    }
}

/// An assignment through a dereference, restricted to the channels in
/// `write_mask` when the target is a vector.
#[derive(Clone, Debug, PartialEq)]
pub struct Assign {
    pub lhs: Deref,
    pub rhs: Rvalue,
    pub write_mask: u8,
}

impl Assign {
    /// A whole-value assignment.
    pub fn new(lhs: Deref, rhs: Rvalue) -> Self {
        assert_eq!(lhs.ty(), rhs.ty(), "assignment type mismatch");
        let write_mask = if lhs.ty().is_vector() {
            full_write_mask(lhs.ty().vector_elements() as usize)
        } else {
            0x1
        };
        Self {
            lhs,
            rhs,
            write_mask,
        }
    }

    /// A partial write. `rhs` supplies one component per enabled channel.
    pub fn masked(lhs: Deref, rhs: Rvalue, write_mask: u8) -> Self {
        assert!(
            write_mask != 0 && write_mask < (1 << lhs.ty().vector_elements()),
            "write mask {write_mask:#x} exceeds {}",
            lhs.ty()
        );
        assert_eq!(
            rhs.ty().components(),
            write_mask.count_ones() as usize,
            "masked assignment component count"
        );
        Self {
            lhs,
            rhs,
            write_mask,
        }
    }

    /// Returns `true` if every channel of the target is written.
    pub fn writes_whole(&self) -> bool {
        !self.lhs.ty().is_vector()
            || self.write_mask == full_write_mask(self.lhs.ty().vector_elements() as usize)
    }

    /// The variable written when the target is a whole variable.
    pub fn whole_variable(&self) -> Option<Handle<Variable>> {
        self.lhs.as_variable()
    }
}

/// A statement in the IR.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    /// Brings a function-local variable into scope.
    Declare(Handle<Variable>),
    Assign(Assign),
    /// Calls a signature. Out and inout arguments are dereferences.
    Call {
        callee: SignatureId,
        args: Vec<Rvalue>,
        return_deref: Option<Deref>,
    },
    If {
        condition: Rvalue,
        then_block: Block,
        else_block: Block,
    },
    /// An infinite loop, left by `break` or `return`.
    Loop { body: Block },
    Jump(Jump),
    /// Terminates the invocation, when the optional condition holds.
    Discard(Option<Rvalue>),
    /// Demotes the invocation to a helper invocation.
    Demote,
    EmitVertex(Rvalue),
    EndPrimitive(Rvalue),
    Barrier,
}

impl Statement {
    pub fn assign(lhs: Deref, rhs: Rvalue) -> Self {
        Self::Assign(Assign::new(lhs, rhs))
    }

    pub fn if_then(condition: Rvalue, then_block: Block) -> Self {
        Self::If {
            condition,
            then_block,
            else_block: Vec::new(),
        }
    }

    pub fn is_jump(&self) -> bool {
        matches!(self, Self::Jump(_))
    }

    /// Control never falls through to the next statement.
    pub fn is_terminator(&self) -> bool {
        matches!(self, Self::Jump(_) | Self::Discard(None))
    }

    pub fn as_assign(&self) -> Option<&Assign> {
        match self {
            Self::Assign(a) => Some(a),
            _ => None,
        }
    }

    /// Rvalue slots owned directly by this statement, in evaluation order.
    /// Nested blocks are not included.
    pub fn rvalues(&self) -> Vec<&Rvalue> {
        match self {
            Self::Declare(_) | Self::Demote | Self::Barrier | Self::Loop { .. } => Vec::new(),
            Self::Assign(a) => {
                let mut out = a.lhs.index_slots();
                out.push(&a.rhs);
                out
            }
            Self::Call {
                args, return_deref, ..
            } => {
                let mut out: Vec<&Rvalue> = args.iter().collect();
                if let Some(ret) = return_deref {
                    out.extend(ret.index_slots());
                }
                out
            }
            Self::If { condition, .. } => vec![condition],
            Self::Jump(Jump::Return(Some(v))) => vec![v],
            Self::Jump(_) => Vec::new(),
            Self::Discard(cond) => cond.iter().collect(),
            Self::EmitVertex(s) | Self::EndPrimitive(s) => vec![s],
        }
    }

    pub fn rvalues_mut(&mut self) -> Vec<&mut Rvalue> {
        match self {
            Self::Declare(_) | Self::Demote | Self::Barrier | Self::Loop { .. } => Vec::new(),
            Self::Assign(a) => {
                let mut out = a.lhs.index_slots_mut();
                out.push(&mut a.rhs);
                out
            }
            Self::Call {
                args, return_deref, ..
            } => {
                let mut out: Vec<&mut Rvalue> = args.iter_mut().collect();
                if let Some(ret) = return_deref {
                    out.extend(ret.index_slots_mut());
                }
                out
            }
            Self::If { condition, .. } => vec![condition],
            Self::Jump(Jump::Return(Some(v))) => vec![v],
            Self::Jump(_) => Vec::new(),
            Self::Discard(cond) => cond.iter_mut().collect(),
            Self::EmitVertex(s) | Self::EndPrimitive(s) => vec![s],
        }
    }

    /// Nested blocks owned by this statement.
    pub fn blocks(&self) -> Vec<&Block> {
        match self {
            Self::If {
                then_block,
                else_block,
                ..
            } => vec![then_block, else_block],
            Self::Loop { body } => vec![body],
            _ => Vec::new(),
        }
    }

    pub fn blocks_mut(&mut self) -> Vec<&mut Block> {
        match self {
            Self::If {
                then_block,
                else_block,
                ..
            } => vec![then_block, else_block],
            Self::Loop { body } => vec![body],
            _ => Vec::new(),
        }
    }

    /// Number of statements including nested ones.
    pub fn statement_count(&self) -> usize {
        1 + self
            .blocks()
            .into_iter()
            .flat_map(|b| b.iter())
            .map(Statement::statement_count)
            .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::constant::Constant;
    use crate::types::Type;
    use crate::var::VariableMode;

    #[test]
    fn write_masks() {
        assert_eq!(full_write_mask(1), 0x1);
        assert_eq!(full_write_mask(3), 0x7);
        assert_eq!(full_write_mask(4), 0xf);
    }

    #[test]
    fn masked_assignment() {
        let mut vars = Arena::new();
        let v = vars.append(Variable::new("v", Type::vec(4), VariableMode::Auto));
        let a = Assign::masked(
            Deref::variable(v, Type::vec(4)),
            Constant::vec(&[1.0, 2.0]).into(),
            0b0101,
        );
        assert!(!a.writes_whole());
        assert_eq!(a.whole_variable(), Some(v));

        let whole = Assign::new(Deref::variable(v, Type::vec(4)), Constant::vec(&[0.0; 4]).into());
        assert!(whole.writes_whole());
    }

    #[test]
    #[should_panic(expected = "exceeds")]
    fn mask_past_width() {
        let mut vars = Arena::new();
        let v = vars.append(Variable::new("v", Type::vec(2), VariableMode::Auto));
        let _ = Assign::masked(Deref::variable(v, Type::vec(2)), Constant::float(1.0).into(), 0b100);
    }

    #[test]
    fn nested_blocks_and_slots() {
        let stmt = Statement::If {
            condition: Constant::bool(true).into(),
            then_block: vec![Statement::Loop {
                body: vec![Statement::Jump(Jump::Break)],
            }],
            else_block: vec![Statement::Discard(None)],
        };
        assert_eq!(stmt.statement_count(), 4);
        assert_eq!(stmt.rvalues().len(), 1);
        assert_eq!(stmt.blocks().len(), 2);
        assert!(Statement::Discard(None).is_terminator());
        assert!(!Statement::Discard(Some(Constant::bool(true).into())).is_terminator());
    }

    #[test]
    fn jump_equivalence() {
        assert!(Jump::Break.same_as(&Jump::Break));
        assert!(!Jump::Break.same_as(&Jump::Continue));
        let r = Jump::Return(Some(Constant::int(1).into()));
        assert!(r.same_as(&r.clone()));
    }
}
