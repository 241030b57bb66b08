//! Shorthand constructors for building rvalue trees.
//!
//! Every helper derives its result type through [`Expression::new`], so a
//! mistyped combination panics at the construction site.

use crate::Shader;
use crate::arena::Handle;
use crate::constant::{Constant, Scalar};
use crate::expr::{ExprOp, Expression};
use crate::rvalue::{Rvalue, Swizzle, SwizzleMask};
use crate::stmt::{Assign, Statement};
use crate::types::{BaseType, Type};
use crate::var::Variable;

pub fn expr(op: ExprOp, operands: Vec<Rvalue>) -> Rvalue {
    Rvalue::Expression(Expression::new(op, operands))
}

pub fn unop(op: ExprOp, a: Rvalue) -> Rvalue {
    expr(op, vec![a])
}

pub fn binop(op: ExprOp, a: Rvalue, b: Rvalue) -> Rvalue {
    expr(op, vec![a, b])
}

pub fn triop(op: ExprOp, a: Rvalue, b: Rvalue, c: Rvalue) -> Rvalue {
    expr(op, vec![a, b, c])
}

macro_rules! unary_helpers {
    ($($name:ident => $op:ident),* $(,)?) => {
        $(
            pub fn $name(a: Rvalue) -> Rvalue {
                unop(ExprOp::$op, a)
            }
        )*
    };
}

macro_rules! binary_helpers {
    ($($name:ident => $op:ident),* $(,)?) => {
        $(
            pub fn $name(a: Rvalue, b: Rvalue) -> Rvalue {
                binop(ExprOp::$op, a, b)
            }
        )*
    };
}

unary_helpers! {
    neg => Neg,
    abs => Abs,
    sign => Sign,
    rcp => Rcp,
    rsq => Rsq,
    sqrt => Sqrt,
    exp2 => Exp2,
    log2 => Log2,
    floor => Floor,
    ceil => Ceil,
    trunc => Trunc,
    fract => Fract,
    saturate => Saturate,
    bit_not => BitNot,
    logic_not => LogicNot,
    f2i => F2I,
    f2u => F2U,
    i2f => I2F,
    u2f => U2F,
    i2u => I2U,
    u2i => U2I,
    b2i => B2I,
    i2b => I2B,
    bitcast_f2i => BitcastF2I,
    bitcast_f2u => BitcastF2U,
    bitcast_i2f => BitcastI2F,
    bitcast_u2f => BitcastU2F,
    find_msb => FindMsb,
    find_lsb => FindLsb,
}

binary_helpers! {
    add => Add,
    sub => Sub,
    mul => Mul,
    div => Div,
    modulo => Mod,
    min => Min,
    max => Max,
    pow => Pow,
    dot => Dot,
    less => Less,
    gequal => Gequal,
    equal => Equal,
    nequal => Nequal,
    bit_and => BitAnd,
    bit_or => BitOr,
    bit_xor => BitXor,
    lshift => Lshift,
    rshift => Rshift,
    logic_and => LogicAnd,
    logic_or => LogicOr,
    imul_high => ImulHigh,
}

pub fn csel(condition: Rvalue, a: Rvalue, b: Rvalue) -> Rvalue {
    triop(ExprOp::Csel, condition, a, b)
}

pub fn lrp(x: Rvalue, y: Rvalue, a: Rvalue) -> Rvalue {
    triop(ExprOp::Lrp, x, y, a)
}

pub fn fma(a: Rvalue, b: Rvalue, c: Rvalue) -> Rvalue {
    triop(ExprOp::Fma, a, b, c)
}

pub fn bitfield_extract(value: Rvalue, offset: Rvalue, bits: Rvalue) -> Rvalue {
    triop(ExprOp::BitfieldExtract, value, offset, bits)
}

pub fn swizzle(val: Rvalue, components: &[u8]) -> Rvalue {
    Rvalue::Swizzle(Swizzle::new(val, SwizzleMask::new(components)))
}

/// Selects one channel.
pub fn channel(val: Rvalue, index: u8) -> Rvalue {
    swizzle(val, &[index])
}

/// Repeats a scalar `width` times; returns it unchanged for width 1.
pub fn splat(val: Rvalue, width: u8) -> Rvalue {
    assert!(val.ty().is_scalar(), "splat of non-scalar {}", val.ty());
    if width == 1 {
        val
    } else {
        swizzle(val, &[0, 0, 0, 0][..width as usize])
    }
}

/// A constant with every component of `ty` set to `value`.
pub fn constant_like(ty: &Type, value: f64) -> Rvalue {
    Rvalue::Constant(Constant::splat_f64(ty.clone(), value))
}

/// A constant of `ty`'s shape holding an integer value, exact for 64-bit
/// types.
pub fn int_like(ty: &Type, value: i64) -> Rvalue {
    Rvalue::Constant(Constant::splat(ty.clone(), Scalar::from_i64(ty.base_type(), value)))
}

/// A scalar constant of the given base type.
pub fn scalar_const(base: BaseType, value: f64) -> Rvalue {
    constant_like(&Type::scalar(base), value)
}

/// Collects statements that introduce temporaries ahead of a rewritten
/// statement.
pub struct Emitter<'a> {
    pub shader: &'a mut Shader,
    pub statements: Vec<Statement>,
}

impl<'a> Emitter<'a> {
    pub fn new(shader: &'a mut Shader) -> Self {
        Self {
            shader,
            statements: Vec::new(),
        }
    }

    /// Declares a temporary initialised with `value` and returns a read of it.
    pub fn temp(&mut self, name: &str, value: Rvalue) -> Rvalue {
        let var = self.declare(name, value.ty().clone());
        self.assign(var, value);
        self.shader.read(var)
    }

    /// Declares an uninitialised temporary.
    pub fn declare(&mut self, name: &str, ty: Type) -> Handle<Variable> {
        let var = self.shader.new_temporary(name, ty);
        self.statements.push(Statement::Declare(var));
        var
    }

    pub fn assign(&mut self, var: Handle<Variable>, value: Rvalue) {
        let lhs = self.shader.deref(var);
        self.statements
            .push(Statement::Assign(Assign::new(lhs, value)));
    }

    /// Reads `value` more than once: constants and whole-variable reads are
    /// cloned, anything else is first stored in a temporary.
    pub fn reuse(&mut self, name: &str, value: Rvalue) -> Rvalue {
        match value {
            Rvalue::Constant(_) => value,
            Rvalue::Deref(ref d) if d.as_variable().is_some() => value,
            _ => self.temp(name, value),
        }
    }

    pub fn into_statements(self) -> Vec<Statement> {
        self.statements
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ShaderStage;

    #[test]
    fn helpers_derive_types() {
        let v = constant_like(&Type::vec(3), 2.0);
        assert_eq!(add(v.clone(), scalar_const(BaseType::Float, 1.0)).ty(), &Type::vec(3));
        assert_eq!(dot(v.clone(), v.clone()).ty(), &Type::float());
        assert_eq!(less(v.clone(), v).ty(), &Type::bvec(3));
        assert_eq!(splat(scalar_const(BaseType::Int, 1.0), 4).ty(), &Type::ivec(4));
    }

    #[test]
    fn int_like_is_exact_for_64bit() {
        let c = int_like(&Type::scalar(BaseType::Int64), i64::MIN);
        assert_eq!(c.as_constant().map(|c| c.get_i64(0)), Some(i64::MIN));
    }

    #[test]
    fn emitter_reuses_simple_values() {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let x = shader.new_temporary("x", Type::float());
        let read = shader.read(x);
        let mut emit = Emitter::new(&mut shader);
        let same = emit.reuse("r", read.clone());
        assert_eq!(same, read);
        let stored = emit.reuse("r", add(read.clone(), read));
        assert!(stored.as_variable().is_some());
        assert_eq!(emit.into_statements().len(), 2);
    }
}
