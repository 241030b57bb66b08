//! Expression operators and result-type derivation.

use crate::rvalue::Rvalue;
use crate::types::{BaseType, Type};

/// An expression operator.
///
/// Variants are grouped by arity: unary, binary, ternary, then quaternary.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum ExprOp {
    // Unary
    BitNot,
    LogicNot,
    Neg,
    Abs,
    Sign,
    Rcp,
    Rsq,
    Sqrt,
    Exp,
    Log,
    Exp2,
    Log2,
    F2I,
    F2U,
    I2F,
    F2B,
    B2F,
    B2F16,
    I2B,
    B2I,
    U2F,
    I2U,
    U2I,
    D2F,
    F2D,
    F162F,
    F2F16,
    F2Fmp,
    F162D,
    D2F16,
    F162B,
    D2I,
    I2D,
    D2U,
    U2D,
    D2B,
    I2I,
    U2U,
    I2Imp,
    U2Ump,
    I642I,
    U642I,
    I642U,
    U642U,
    I642B,
    I642F,
    U642F,
    I642D,
    U642D,
    I2I64,
    U2I64,
    B2I64,
    F2I64,
    D2I64,
    I2U64,
    U2U64,
    F2U64,
    D2U64,
    U642I64,
    I642U64,
    BitcastI2F,
    BitcastF2I,
    BitcastU2F,
    BitcastF2U,
    BitcastU642D,
    BitcastI642D,
    BitcastD2U64,
    BitcastD2I64,
    Trunc,
    Ceil,
    Floor,
    Fract,
    RoundEven,
    Sin,
    Cos,
    Atan,
    DFdx,
    DFdxCoarse,
    DFdxFine,
    DFdy,
    DFdyCoarse,
    DFdyFine,
    PackSnorm2x16,
    PackSnorm4x8,
    PackUnorm2x16,
    PackUnorm4x8,
    PackHalf2x16,
    UnpackSnorm2x16,
    UnpackSnorm4x8,
    UnpackUnorm2x16,
    UnpackUnorm4x8,
    UnpackHalf2x16,
    BitfieldReverse,
    BitCount,
    FindMsb,
    FindLsb,
    Clz,
    Saturate,
    PackDouble2x32,
    UnpackDouble2x32,
    PackInt2x32,
    UnpackInt2x32,
    PackUint2x32,
    UnpackUint2x32,
    FrexpSig,
    FrexpExp,
    Noise,
    InterpolateAtCentroid,
    SsboUnsizedArrayLength,
    // Binary
    Add,
    Sub,
    AddSat,
    SubSat,
    AbsSub,
    Avg,
    AvgRound,
    Mul,
    Mul32x16,
    ImulHigh,
    Div,
    Carry,
    Borrow,
    Mod,
    Less,
    Gequal,
    Equal,
    Nequal,
    AllEqual,
    AnyNequal,
    Lshift,
    Rshift,
    BitAnd,
    BitXor,
    BitOr,
    LogicAnd,
    LogicXor,
    LogicOr,
    Dot,
    Min,
    Max,
    Pow,
    Ldexp,
    VectorExtract,
    InterpolateAtOffset,
    InterpolateAtSample,
    Atan2,
    // Ternary
    Fma,
    Lrp,
    Csel,
    BitfieldExtract,
    VectorInsert,
    // Quaternary
    BitfieldInsert,
    Vector,
}

impl ExprOp {
    /// Number of operands the operator takes. `Vector` takes 2 to 4.
    pub fn arity(self) -> usize {
        use ExprOp::*;
        match self {
            Add | Sub | AddSat | SubSat | AbsSub | Avg | AvgRound | Mul | Mul32x16 | ImulHigh
            | Div | Carry | Borrow | Mod | Less | Gequal | Equal | Nequal | AllEqual
            | AnyNequal | Lshift | Rshift | BitAnd | BitXor | BitOr | LogicAnd | LogicXor
            | LogicOr | Dot | Min | Max | Pow | Ldexp | VectorExtract | InterpolateAtOffset
            | InterpolateAtSample | Atan2 => 2,
            Fma | Lrp | Csel | BitfieldExtract | VectorInsert => 3,
            BitfieldInsert | Vector => 4,
            _ => 1,
        }
    }

    /// Returns `true` if `count` operands are acceptable for this operator.
    pub fn accepts_operand_count(self, count: usize) -> bool {
        match self {
            ExprOp::Vector => (2..=4).contains(&count),
            op => op.arity() == count,
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            ExprOp::Less
                | ExprOp::Gequal
                | ExprOp::Equal
                | ExprOp::Nequal
                | ExprOp::AllEqual
                | ExprOp::AnyNequal
        )
    }

    /// Operators where swapping the two operands does not change the result.
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            ExprOp::Add
                | ExprOp::AddSat
                | ExprOp::Avg
                | ExprOp::AvgRound
                | ExprOp::Min
                | ExprOp::Max
                | ExprOp::Equal
                | ExprOp::Nequal
                | ExprOp::AllEqual
                | ExprOp::AnyNequal
                | ExprOp::BitAnd
                | ExprOp::BitOr
                | ExprOp::BitXor
                | ExprOp::LogicAnd
                | ExprOp::LogicOr
                | ExprOp::LogicXor
                | ExprOp::Dot
        )
    }

    /// Operators that may be reassociated freely over operands of one type.
    pub fn is_associative(self) -> bool {
        matches!(
            self,
            ExprOp::Add
                | ExprOp::Mul
                | ExprOp::Min
                | ExprOp::Max
                | ExprOp::BitAnd
                | ExprOp::BitOr
                | ExprOp::BitXor
                | ExprOp::LogicAnd
                | ExprOp::LogicOr
                | ExprOp::LogicXor
        )
    }

    /// Operators whose value depends on state outside the expression tree.
    pub fn has_side_inputs(self) -> bool {
        matches!(
            self,
            ExprOp::DFdx
                | ExprOp::DFdxCoarse
                | ExprOp::DFdxFine
                | ExprOp::DFdy
                | ExprOp::DFdyCoarse
                | ExprOp::DFdyFine
                | ExprOp::Noise
                | ExprOp::InterpolateAtCentroid
                | ExprOp::InterpolateAtOffset
                | ExprOp::InterpolateAtSample
                | ExprOp::SsboUnsizedArrayLength
        )
    }

    /// Lower-case mnemonic used by the text dump.
    pub fn name(self) -> &'static str {
        use ExprOp::*;
        match self {
            BitNot => "~",
            LogicNot => "!",
            Neg => "neg",
            Abs => "abs",
            Sign => "sign",
            Rcp => "rcp",
            Rsq => "rsq",
            Sqrt => "sqrt",
            Exp => "exp",
            Log => "log",
            Exp2 => "exp2",
            Log2 => "log2",
            F2I => "f2i",
            F2U => "f2u",
            I2F => "i2f",
            F2B => "f2b",
            B2F => "b2f",
            B2F16 => "b2f16",
            I2B => "i2b",
            B2I => "b2i",
            U2F => "u2f",
            I2U => "i2u",
            U2I => "u2i",
            D2F => "d2f",
            F2D => "f2d",
            F162F => "f162f",
            F2F16 => "f2f16",
            F2Fmp => "f2fmp",
            F162D => "f162d",
            D2F16 => "d2f16",
            F162B => "f162b",
            D2I => "d2i",
            I2D => "i2d",
            D2U => "d2u",
            U2D => "u2d",
            D2B => "d2b",
            I2I => "i2i",
            U2U => "u2u",
            I2Imp => "i2imp",
            U2Ump => "u2ump",
            I642I => "i642i",
            U642I => "u642i",
            I642U => "i642u",
            U642U => "u642u",
            I642B => "i642b",
            I642F => "i642f",
            U642F => "u642f",
            I642D => "i642d",
            U642D => "u642d",
            I2I64 => "i2i64",
            U2I64 => "u2i64",
            B2I64 => "b2i64",
            F2I64 => "f2i64",
            D2I64 => "d2i64",
            I2U64 => "i2u64",
            U2U64 => "u2u64",
            F2U64 => "f2u64",
            D2U64 => "d2u64",
            U642I64 => "u642i64",
            I642U64 => "i642u64",
            BitcastI2F => "bitcast_i2f",
            BitcastF2I => "bitcast_f2i",
            BitcastU2F => "bitcast_u2f",
            BitcastF2U => "bitcast_f2u",
            BitcastU642D => "bitcast_u642d",
            BitcastI642D => "bitcast_i642d",
            BitcastD2U64 => "bitcast_d2u64",
            BitcastD2I64 => "bitcast_d2i64",
            Trunc => "trunc",
            Ceil => "ceil",
            Floor => "floor",
            Fract => "fract",
            RoundEven => "round_even",
            Sin => "sin",
            Cos => "cos",
            Atan => "atan",
            DFdx => "dFdx",
            DFdxCoarse => "dFdxCoarse",
            DFdxFine => "dFdxFine",
            DFdy => "dFdy",
            DFdyCoarse => "dFdyCoarse",
            DFdyFine => "dFdyFine",
            PackSnorm2x16 => "packSnorm2x16",
            PackSnorm4x8 => "packSnorm4x8",
            PackUnorm2x16 => "packUnorm2x16",
            PackUnorm4x8 => "packUnorm4x8",
            PackHalf2x16 => "packHalf2x16",
            UnpackSnorm2x16 => "unpackSnorm2x16",
            UnpackSnorm4x8 => "unpackSnorm4x8",
            UnpackUnorm2x16 => "unpackUnorm2x16",
            UnpackUnorm4x8 => "unpackUnorm4x8",
            UnpackHalf2x16 => "unpackHalf2x16",
            BitfieldReverse => "bitfield_reverse",
            BitCount => "bit_count",
            FindMsb => "find_msb",
            FindLsb => "find_lsb",
            Clz => "clz",
            Saturate => "sat",
            PackDouble2x32 => "packDouble2x32",
            UnpackDouble2x32 => "unpackDouble2x32",
            PackInt2x32 => "packInt2x32",
            UnpackInt2x32 => "unpackInt2x32",
            PackUint2x32 => "packUint2x32",
            UnpackUint2x32 => "unpackUint2x32",
            FrexpSig => "frexp_sig",
            FrexpExp => "frexp_exp",
            Noise => "noise",
            InterpolateAtCentroid => "interpolate_at_centroid",
            SsboUnsizedArrayLength => "ssbo_unsized_array_length",
            Add => "+",
            Sub => "-",
            AddSat => "add_sat",
            SubSat => "sub_sat",
            AbsSub => "abs_sub",
            Avg => "avg",
            AvgRound => "avg_round",
            Mul => "*",
            Mul32x16 => "mul_32x16",
            ImulHigh => "imul_high",
            Div => "/",
            Carry => "carry",
            Borrow => "borrow",
            Mod => "%",
            Less => "<",
            Gequal => ">=",
            Equal => "==",
            Nequal => "!=",
            AllEqual => "all_equal",
            AnyNequal => "any_nequal",
            Lshift => "<<",
            Rshift => ">>",
            BitAnd => "&",
            BitXor => "^",
            BitOr => "|",
            LogicAnd => "&&",
            LogicXor => "^^",
            LogicOr => "||",
            Dot => "dot",
            Min => "min",
            Max => "max",
            Pow => "pow",
            Ldexp => "ldexp",
            VectorExtract => "vector_extract",
            InterpolateAtOffset => "interpolate_at_offset",
            InterpolateAtSample => "interpolate_at_sample",
            Atan2 => "atan2",
            Fma => "fma",
            Lrp => "lrp",
            Csel => "csel",
            BitfieldExtract => "bitfield_extract",
            VectorInsert => "vector_insert",
            BitfieldInsert => "bitfield_insert",
            Vector => "vector",
        }
    }

    /// Derives the result type from operand types.
    ///
    /// Panics on an operand combination the operator is not defined for:
    /// such IR can only come from a broken producer.
    pub fn result_type(self, operands: &[&Type]) -> Type {
        assert!(
            self.accepts_operand_count(operands.len()),
            "{} takes {} operands, got {}",
            self.name(),
            self.arity(),
            operands.len()
        );
        self.try_result_type(operands)
            .unwrap_or_else(|| no_type_rule(self, operands))
    }

    /// Like [`ExprOp::result_type`], returning `None` instead of panicking.
    pub fn try_result_type(self, operands: &[&Type]) -> Option<Type> {
        use ExprOp::*;
        if !self.accepts_operand_count(operands.len()) {
            return None;
        }
        let op0 = operands[0];
        let retype = |base: BaseType| op0.with_base(base);

        let ty = match self {
            BitNot | Neg | Abs | Sign | Rcp | Rsq | Sqrt | Exp | Log | Exp2 | Log2 | Trunc
            | Ceil | Floor | Fract | RoundEven | Sin | Cos | Atan | DFdx | DFdxCoarse
            | DFdxFine | DFdy | DFdyCoarse | DFdyFine | Saturate | FrexpSig | BitfieldReverse
            | InterpolateAtCentroid => op0.clone(),
            LogicNot => {
                if !op0.is_boolean() {
                    return None;
                }
                op0.clone()
            }
            F2I | U2I | B2I | D2I | I642I | U642I | BitcastF2I => retype(BaseType::Int),
            F2U | I2U | D2U | I642U | U642U | BitcastF2U => retype(BaseType::Uint),
            I2F | U2F | B2F | D2F | F162F | I642F | U642F | BitcastI2F | BitcastU2F => {
                retype(BaseType::Float)
            }
            F2F16 | F2Fmp | D2F16 | B2F16 => retype(BaseType::Float16),
            F2D | I2D | U2D | F162D | I642D | U642D | BitcastU642D | BitcastI642D => {
                retype(BaseType::Double)
            }
            F2B | I2B | D2B | F162B | I642B => retype(BaseType::Bool),
            I2I64 | U2I64 | B2I64 | F2I64 | D2I64 | U642I64 | BitcastD2I64 => {
                retype(BaseType::Int64)
            }
            I2U64 | U2U64 | F2U64 | D2U64 | I642U64 | BitcastD2U64 => retype(BaseType::Uint64),
            I2I => match op0.base_type() {
                BaseType::Int => retype(BaseType::Int16),
                BaseType::Int16 => retype(BaseType::Int),
                _ => return None,
            },
            U2U => match op0.base_type() {
                BaseType::Uint => retype(BaseType::Uint16),
                BaseType::Uint16 => retype(BaseType::Uint),
                _ => return None,
            },
            I2Imp => retype(BaseType::Int16),
            U2Ump => retype(BaseType::Uint16),
            PackSnorm2x16 | PackSnorm4x8 | PackUnorm2x16 | PackUnorm4x8 | PackHalf2x16 => {
                Type::uint()
            }
            UnpackSnorm2x16 | UnpackUnorm2x16 | UnpackHalf2x16 => Type::vec(2),
            UnpackSnorm4x8 | UnpackUnorm4x8 => Type::vec(4),
            PackDouble2x32 => Type::double(),
            UnpackDouble2x32 | UnpackUint2x32 => Type::uvec(2),
            PackInt2x32 => Type::scalar(BaseType::Int64),
            UnpackInt2x32 => Type::ivec(2),
            PackUint2x32 => Type::scalar(BaseType::Uint64),
            BitCount | FindMsb | FindLsb | FrexpExp => retype(BaseType::Int),
            Clz => retype(BaseType::Uint),
            Noise => Type::float(),
            SsboUnsizedArrayLength => Type::int(),

            Add | Sub | AddSat | SubSat | Avg | AvgRound | Mul32x16 | ImulHigh | Div | Mod
            | Min | Max | Pow | BitAnd | BitXor | BitOr | Atan2 => {
                arithmetic_result(op0, operands[1])?
            }
            Mul => multiply_result(op0, operands[1])?,
            AbsSub => {
                let ty = arithmetic_result(op0, operands[1])?;
                match ty.base_type() {
                    BaseType::Int => ty.with_base(BaseType::Uint),
                    BaseType::Int16 => ty.with_base(BaseType::Uint16),
                    BaseType::Int64 => ty.with_base(BaseType::Uint64),
                    _ => ty,
                }
            }
            Carry | Borrow => retype(BaseType::Uint),
            Less | Gequal | Equal | Nequal => {
                let width = op0.vector_elements().max(operands[1].vector_elements());
                Type::bvec(width)
            }
            AllEqual | AnyNequal => Type::bool(),
            Lshift | Rshift | Ldexp | InterpolateAtOffset | InterpolateAtSample => op0.clone(),
            LogicAnd | LogicXor | LogicOr => {
                if !op0.is_boolean() {
                    return None;
                }
                op0.clone()
            }
            Dot => op0.scalar_type(),
            VectorExtract => op0.scalar_type(),
            Fma | Lrp | BitfieldExtract | VectorInsert | BitfieldInsert => op0.clone(),
            Csel => operands[1].clone(),
            Vector => Type::vector(op0.base_type(), operands.len() as u8),
        };
        Some(ty)
    }
}

fn no_type_rule(op: ExprOp, operands: &[&Type]) -> ! {
    let shown: Vec<String> = operands.iter().map(|t| t.to_string()).collect();
    panic!("no type rule for {} on ({})", op.name(), shown.join(", "))
}

/// Component-wise arithmetic result: identical types, or scalar broadcast.
fn arithmetic_result(a: &Type, b: &Type) -> Option<Type> {
    if !a.is_numeric_or_bool() || !b.is_numeric_or_bool() {
        return None;
    }
    if a == b {
        Some(a.clone())
    } else if b.is_scalar() {
        Some(a.clone())
    } else if a.is_scalar() {
        Some(b.clone())
    } else {
        None
    }
}

/// Multiplication additionally follows linear-algebra rules for matrices.
fn multiply_result(a: &Type, b: &Type) -> Option<Type> {
    if a.is_matrix() && b.is_matrix() {
        if a.matrix_columns() != b.vector_elements() {
            return None;
        }
        return Some(Type::matrix(
            a.base_type(),
            b.matrix_columns(),
            a.vector_elements(),
        ));
    }
    if a.is_matrix() && b.is_vector() {
        if a.matrix_columns() != b.vector_elements() {
            return None;
        }
        return Some(a.column_type());
    }
    if a.is_vector() && b.is_matrix() {
        if a.vector_elements() != b.vector_elements() {
            return None;
        }
        return Some(b.row_type());
    }
    arithmetic_result(a, b)
}

/// An operator applied to owned operand subtrees.
#[derive(Clone, Debug, PartialEq)]
pub struct Expression {
    pub op: ExprOp,
    pub ty: Type,
    pub operands: Vec<Rvalue>,
}

impl Expression {
    /// Builds an expression, deriving its type from the operands.
    pub fn new(op: ExprOp, operands: Vec<Rvalue>) -> Self {
        let types: Vec<&Type> = operands.iter().map(Rvalue::ty).collect();
        let ty = op.result_type(&types);
        Self { op, ty, operands }
    }

    /// Builds an expression with an explicit result type.
    pub fn with_type(op: ExprOp, ty: Type, operands: Vec<Rvalue>) -> Self {
        assert!(
            op.accepts_operand_count(operands.len()),
            "{} takes {} operands, got {}",
            op.name(),
            op.arity(),
            operands.len()
        );
        Self { op, ty, operands }
    }

    pub fn operand(&self, index: usize) -> &Rvalue {
        &self.operands[index]
    }

    /// Recomputes the type from the current operands, used after operands
    /// have been retyped as a whole subtree.
    pub fn derived_type(&self) -> Type {
        let types: Vec<&Type> = self.operands.iter().map(Rvalue::ty).collect();
        self.op.result_type(&types)
    }
}
