//! Fold rules for every foldable operator.

use half::f16;

use super::bits;
use crate::constant::{Constant, ConstantValue, Scalar};
use crate::expr::ExprOp;
use crate::types::{BaseType, Type};

/// Applies `$body` to a float component at its own precision. Half floats
/// are computed in single precision and rounded back.
macro_rules! map_float {
    ($a:expr, |$x:ident| $body:expr) => {
        match $a {
            Scalar::Float($x) => Scalar::Float($body),
            Scalar::Float16(h) => {
                let $x = h.to_f32();
                Scalar::Float16(f16::from_f32($body))
            }
            Scalar::Double($x) => Scalar::Double($body),
            other => unreachable!("float operation on {other:?}"),
        }
    };
}

macro_rules! zip_float {
    ($a:expr, $b:expr, |$x:ident, $y:ident| $body:expr) => {
        match ($a, $b) {
            (Scalar::Float($x), Scalar::Float($y)) => Scalar::Float($body),
            (Scalar::Float16(p), Scalar::Float16(q)) => {
                let ($x, $y) = (p.to_f32(), q.to_f32());
                Scalar::Float16(f16::from_f32($body))
            }
            (Scalar::Double($x), Scalar::Double($y)) => Scalar::Double($body),
            (a, b) => unreachable!("float operation on {a:?}, {b:?}"),
        }
    };
}

/// Sign- or zero-extended integer value.
fn wide(s: Scalar) -> i128 {
    match s {
        Scalar::Bool(b) => i128::from(b),
        Scalar::Int(v) => i128::from(v),
        Scalar::Uint(v) => i128::from(v),
        Scalar::Int16(v) => i128::from(v),
        Scalar::Uint16(v) => i128::from(v),
        Scalar::Int64(v) => i128::from(v),
        Scalar::Uint64(v) => i128::from(v),
        other => unreachable!("integer operation on {other:?}"),
    }
}

/// Wraps a wide value into `base`.
fn narrow(base: BaseType, v: i128) -> Scalar {
    match base {
        BaseType::Int => Scalar::Int(v as i32),
        BaseType::Uint => Scalar::Uint(v as u32),
        BaseType::Int16 => Scalar::Int16(v as i16),
        BaseType::Uint16 => Scalar::Uint16(v as u16),
        BaseType::Int64 => Scalar::Int64(v as i64),
        BaseType::Uint64 => Scalar::Uint64(v as u64),
        BaseType::Bool => Scalar::Bool(v != 0),
        other => unreachable!("integer result of type {other:?}"),
    }
}

fn int_range(base: BaseType) -> (i128, i128) {
    match base {
        BaseType::Int => (i32::MIN.into(), i32::MAX.into()),
        BaseType::Uint => (0, u32::MAX.into()),
        BaseType::Int16 => (i16::MIN.into(), i16::MAX.into()),
        BaseType::Uint16 => (0, u16::MAX.into()),
        BaseType::Int64 => (i64::MIN.into(), i64::MAX.into()),
        BaseType::Uint64 => (0, u64::MAX.into()),
        other => unreachable!("integer range of {other:?}"),
    }
}

/// Raw bits of an integer component, masked to its width.
fn raw_bits(s: Scalar) -> u64 {
    (wide(s) as u64) & bits::low_mask(s.base_type().bit_size())
}

fn is_float(s: Scalar) -> bool {
    s.base_type().is_floating()
}

fn sign_f64(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        x
    }
}

fn sign_f32(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        x
    }
}

fn unary(op: ExprOp, a: Scalar, result: BaseType) -> Scalar {
    use ExprOp::*;
    match op {
        Neg if is_float(a) => map_float!(a, |x| -x),
        Neg => narrow(result, wide(a).wrapping_neg()),
        Abs if is_float(a) => map_float!(a, |x| x.abs()),
        Abs => narrow(result, wide(a).abs()),
        Sign if is_float(a) => match a {
            Scalar::Double(x) => Scalar::Double(sign_f64(x)),
            Scalar::Float(x) => Scalar::Float(sign_f32(x)),
            Scalar::Float16(h) => Scalar::Float16(f16::from_f32(sign_f32(h.to_f32()))),
            _ => unreachable!(),
        },
        Sign => narrow(result, wide(a).signum()),
        Rcp => map_float!(a, |x| 1.0 / x),
        Rsq => map_float!(a, |x| 1.0 / x.sqrt()),
        Sqrt => map_float!(a, |x| x.sqrt()),
        Exp => map_float!(a, |x| x.exp()),
        Log => map_float!(a, |x| x.ln()),
        Exp2 => map_float!(a, |x| x.exp2()),
        Log2 => map_float!(a, |x| x.log2()),
        Trunc => map_float!(a, |x| x.trunc()),
        Ceil => map_float!(a, |x| x.ceil()),
        Floor => map_float!(a, |x| x.floor()),
        Fract => map_float!(a, |x| x - x.floor()),
        RoundEven => map_float!(a, |x| x.round_ties_even()),
        Sin => map_float!(a, |x| x.sin()),
        Cos => map_float!(a, |x| x.cos()),
        Atan => map_float!(a, |x| x.atan()),
        Saturate => map_float!(a, |x| x.clamp(0.0, 1.0)),
        FrexpSig => match a {
            Scalar::Double(x) => Scalar::Double(bits::frexp_f64(x).0),
            Scalar::Float(x) => Scalar::Float(bits::frexp_f32(x).0),
            Scalar::Float16(h) => Scalar::Float16(f16::from_f32(bits::frexp_f32(h.to_f32()).0)),
            other => unreachable!("frexp of {other:?}"),
        },
        FrexpExp => {
            let exp = match a {
                Scalar::Double(x) => bits::frexp_f64(x).1,
                other => bits::frexp_f32(other.as_f32()).1,
            };
            Scalar::Int(exp)
        }
        BitNot => narrow(result, !wide(a)),
        LogicNot => Scalar::Bool(!a.as_bool()),
        BitfieldReverse => {
            let width = a.base_type().bit_size();
            narrow(result, i128::from(bits::reverse_bits(raw_bits(a), width)))
        }
        BitCount => Scalar::Int(raw_bits(a).count_ones() as i32),
        FindMsb => {
            let base = a.base_type();
            Scalar::Int(bits::find_msb(raw_bits(a), base.bit_size(), base.is_signed_integer()))
        }
        FindLsb => Scalar::Int(bits::find_lsb(raw_bits(a), a.base_type().bit_size())),
        Clz => {
            let width = a.base_type().bit_size();
            Scalar::Uint(raw_bits(a).leading_zeros() - (64 - width))
        }
        BitcastF2I => Scalar::Int(a.as_f32().to_bits() as i32),
        BitcastF2U => Scalar::Uint(a.as_f32().to_bits()),
        BitcastI2F | BitcastU2F => Scalar::Float(f32::from_bits(raw_bits(a) as u32)),
        BitcastU642D | BitcastI642D => Scalar::Double(f64::from_bits(raw_bits(a))),
        BitcastD2U64 => Scalar::Uint64(a.as_f64().to_bits()),
        BitcastD2I64 => Scalar::Int64(a.as_f64().to_bits() as i64),
        F2I | F2U | I2F | F2B | B2F | B2F16 | I2B | B2I | U2F | I2U | U2I | D2F | F2D | F162F
        | F2F16 | F2Fmp | F162D | D2F16 | F162B | D2I | I2D | D2U | U2D | D2B | I2I | U2U
        | I2Imp | U2Ump | I642I | U642I | I642U | U642U | I642B | I642F | U642F | I642D
        | U642D | I2I64 | U2I64 | B2I64 | F2I64 | D2I64 | I2U64 | U2U64 | F2U64 | D2U64
        | U642I64 | I642U64 => a.convert(result),
        other => unreachable!("no unary fold rule for {}", other.name()),
    }
}

fn compare(op: ExprOp, a: Scalar, b: Scalar) -> bool {
    use std::cmp::Ordering;
    let ord = if is_float(a) {
        a.as_f64().partial_cmp(&b.as_f64())
    } else if a.base_type() == BaseType::Bool {
        Some(a.as_bool().cmp(&b.as_bool()))
    } else {
        Some(wide(a).cmp(&wide(b)))
    };
    match op {
        ExprOp::Less => ord == Some(Ordering::Less),
        ExprOp::Gequal => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
        ExprOp::Equal => ord == Some(Ordering::Equal),
        ExprOp::Nequal => ord != Some(Ordering::Equal),
        other => unreachable!("{} is not a comparison", other.name()),
    }
}

fn float_mod_f32(x: f32, y: f32) -> f32 {
    x - y * (x / y).floor()
}

fn float_mod_f64(x: f64, y: f64) -> f64 {
    x - y * (x / y).floor()
}

fn imul_high(a: Scalar, b: Scalar, result: BaseType) -> Scalar {
    match result {
        BaseType::Uint64 => {
            let p = u128::from(a.as_u64()) * u128::from(b.as_u64());
            Scalar::Uint64((p >> 64) as u64)
        }
        BaseType::Int64 => {
            let p = i128::from(a.as_i64()) * i128::from(b.as_i64());
            Scalar::Int64((p >> 64) as i64)
        }
        _ => {
            let width = result.bit_size();
            narrow(result, (wide(a) * wide(b)) >> width)
        }
    }
}

fn binary(op: ExprOp, a: Scalar, b: Scalar, result: BaseType) -> Scalar {
    use ExprOp::*;
    if matches!(op, Less | Gequal | Equal | Nequal) {
        return Scalar::Bool(compare(op, a, b));
    }
    if is_float(a) {
        return match op {
            Add => zip_float!(a, b, |x, y| x + y),
            Sub => zip_float!(a, b, |x, y| x - y),
            Mul => zip_float!(a, b, |x, y| x * y),
            Div => zip_float!(a, b, |x, y| x / y),
            Mod => match (a, b) {
                (Scalar::Double(x), Scalar::Double(y)) => Scalar::Double(float_mod_f64(x, y)),
                (Scalar::Float(x), Scalar::Float(y)) => Scalar::Float(float_mod_f32(x, y)),
                (Scalar::Float16(x), Scalar::Float16(y)) => {
                    Scalar::Float16(f16::from_f32(float_mod_f32(x.to_f32(), y.to_f32())))
                }
                (a, b) => unreachable!("mod of {a:?}, {b:?}"),
            },
            Min => zip_float!(a, b, |x, y| x.min(y)),
            Max => zip_float!(a, b, |x, y| x.max(y)),
            Pow => zip_float!(a, b, |x, y| x.powf(y)),
            Atan2 => zip_float!(a, b, |x, y| x.atan2(y)),
            Ldexp => match a {
                Scalar::Double(x) => Scalar::Double(bits::ldexp_f64(x, b.as_i64())),
                Scalar::Float(x) => Scalar::Float(bits::ldexp_f32(x, b.as_i64())),
                Scalar::Float16(x) => Scalar::Float16(bits::ldexp_f16(x, b.as_i64())),
                other => unreachable!("ldexp of {other:?}"),
            },
            other => unreachable!("no float fold rule for {}", other.name()),
        };
    }
    if a.base_type() == BaseType::Bool {
        let (x, y) = (a.as_bool(), b.as_bool());
        return Scalar::Bool(match op {
            LogicAnd => x && y,
            LogicOr => x || y,
            LogicXor => x != y,
            other => unreachable!("no boolean fold rule for {}", other.name()),
        });
    }

    let (x, y) = (wide(a), wide(b));
    let width = a.base_type().bit_size();
    match op {
        Add => narrow(result, x.wrapping_add(y)),
        Sub => narrow(result, x.wrapping_sub(y)),
        Mul => narrow(result, x.wrapping_mul(y)),
        Div if y == 0 => narrow(result, 0),
        Div => narrow(result, x / y),
        Mod if y == 0 => narrow(result, 0),
        Mod => narrow(result, x % y),
        Min => narrow(result, x.min(y)),
        Max => narrow(result, x.max(y)),
        AddSat | SubSat => {
            let (lo, hi) = int_range(result);
            let r = if op == AddSat { x + y } else { x - y };
            narrow(result, r.clamp(lo, hi))
        }
        AbsSub => narrow(result, (x - y).abs()),
        Avg => narrow(result, (x + y) >> 1),
        AvgRound => narrow(result, (x + y + 1) >> 1),
        Mul32x16 => {
            let low = if a.base_type().is_signed_integer() {
                i128::from(y as i16)
            } else {
                i128::from(y as u16)
            };
            narrow(result, x.wrapping_mul(low))
        }
        ImulHigh => imul_high(a, b, result),
        Carry => {
            let (_, hi) = int_range(result);
            narrow(result, i128::from(x + y > hi))
        }
        Borrow => narrow(result, i128::from(x < y)),
        Lshift => narrow(result, x << (y & i128::from(width - 1))),
        Rshift => narrow(result, x >> (y & i128::from(width - 1))),
        BitAnd => narrow(result, x & y),
        BitOr => narrow(result, x | y),
        BitXor => narrow(result, x ^ y),
        other => unreachable!("no integer fold rule for {}", other.name()),
    }
}

/// Component `i` of an operand, broadcasting scalars.
fn comp(c: &Constant, i: usize) -> Scalar {
    c.component(i)
}

fn matrix_multiply(result: &Type, a: &Constant, b: &Constant) -> Constant {
    let base = result.base_type();
    let (a_rows, a_cols) = (
        a.ty.vector_elements() as usize,
        a.ty.matrix_columns() as usize,
    );
    let (b_rows, b_cols) = if b.ty.is_vector() && a.ty.is_matrix() {
        (b.ty.vector_elements() as usize, 1)
    } else {
        (b.ty.vector_elements() as usize, b.ty.matrix_columns() as usize)
    };
    // A row vector on the left multiplies as a 1 x n matrix.
    let (a_rows, a_cols) = if a.ty.is_vector() { (1, a_rows) } else { (a_rows, a_cols) };
    debug_assert_eq!(a_cols, b_rows, "matrix multiply shape");
    let mut out = Vec::with_capacity(a_rows * b_cols);
    for col in 0..b_cols {
        for row in 0..a_rows {
            let mut acc = Scalar::zero(base);
            for k in 0..a_cols {
                let x = a.component(k * a_rows + row);
                let y = b.component(col * b_rows + k);
                acc = binary(ExprOp::Add, acc, binary(ExprOp::Mul, x, y, base), base);
            }
            out.push(acc);
        }
    }
    Constant::new(result.clone(), out)
}

fn dot(result: &Type, a: &Constant, b: &Constant) -> Constant {
    let base = result.base_type();
    let mut acc = Scalar::zero(base);
    for i in 0..a.ty.components() {
        acc = binary(
            ExprOp::Add,
            acc,
            binary(ExprOp::Mul, comp(a, i), comp(b, i), base),
            base,
        );
    }
    Constant::new(result.clone(), vec![acc])
}

/// Component-wise equality over numeric and aggregate constants; floats
/// compare by value.
fn all_equal(a: &Constant, b: &Constant) -> bool {
    match (&a.value, &b.value) {
        (ConstantValue::Components(x), ConstantValue::Components(y)) => x
            .iter()
            .zip(y)
            .all(|(&p, &q)| compare(ExprOp::Equal, p, q)),
        (ConstantValue::Aggregate(x), ConstantValue::Aggregate(y)) => {
            x.iter().zip(y).all(|(p, q)| all_equal(p, q))
        }
        _ => false,
    }
}

fn floats<const N: usize>(c: &Constant) -> [f32; N] {
    std::array::from_fn(|i| c.get_f32(i))
}

fn vec_const(values: &[f32]) -> Constant {
    Constant::vec(values)
}

/// Folds `op` applied to constant operands into a constant of type `ty`.
/// Returns `None` for operators whose value is never known at compile time.
pub(crate) fn fold(op: ExprOp, ty: &Type, args: &[Constant]) -> Option<Constant> {
    use ExprOp::*;
    let base = ty.base_type();
    let n = ty.components();

    let folded = match op {
        Noise | DFdx | DFdxCoarse | DFdxFine | DFdy | DFdyCoarse | DFdyFine
        | InterpolateAtCentroid | InterpolateAtOffset | InterpolateAtSample
        | SsboUnsizedArrayLength => return None,

        PackSnorm2x16 => Constant::uint(bits::pack_snorm_2x16(floats(&args[0]))),
        PackUnorm2x16 => Constant::uint(bits::pack_unorm_2x16(floats(&args[0]))),
        PackHalf2x16 => Constant::uint(bits::pack_half_2x16(floats(&args[0]))),
        PackSnorm4x8 => Constant::uint(bits::pack_snorm_4x8(floats(&args[0]))),
        PackUnorm4x8 => Constant::uint(bits::pack_unorm_4x8(floats(&args[0]))),
        UnpackSnorm2x16 => vec_const(&bits::unpack_snorm_2x16(args[0].get_u64(0) as u32)),
        UnpackUnorm2x16 => vec_const(&bits::unpack_unorm_2x16(args[0].get_u64(0) as u32)),
        UnpackHalf2x16 => vec_const(&bits::unpack_half_2x16(args[0].get_u64(0) as u32)),
        UnpackSnorm4x8 => vec_const(&bits::unpack_snorm_4x8(args[0].get_u64(0) as u32)),
        UnpackUnorm4x8 => vec_const(&bits::unpack_unorm_4x8(args[0].get_u64(0) as u32)),
        PackDouble2x32 => {
            let bits = raw_bits(comp(&args[0], 0)) | (raw_bits(comp(&args[0], 1)) << 32);
            Constant::double(f64::from_bits(bits))
        }
        UnpackDouble2x32 => {
            let bits = args[0].get_f64(0).to_bits();
            Constant::new(
                ty.clone(),
                vec![Scalar::Uint(bits as u32), Scalar::Uint((bits >> 32) as u32)],
            )
        }
        PackInt2x32 | PackUint2x32 => {
            let bits = raw_bits(comp(&args[0], 0)) | (raw_bits(comp(&args[0], 1)) << 32);
            Constant::new(ty.clone(), vec![narrow(base, i128::from(bits))])
        }
        UnpackInt2x32 | UnpackUint2x32 => {
            let bits = raw_bits(comp(&args[0], 0));
            Constant::new(
                ty.clone(),
                vec![
                    narrow(base, i128::from(bits as u32)),
                    narrow(base, i128::from((bits >> 32) as u32)),
                ],
            )
        }

        Mul if !args[0].ty.is_scalar()
            && !args[1].ty.is_scalar()
            && (args[0].ty.is_matrix() || args[1].ty.is_matrix()) =>
        {
            matrix_multiply(ty, &args[0], &args[1])
        }
        Dot => dot(ty, &args[0], &args[1]),
        AllEqual => Constant::bool(all_equal(&args[0], &args[1])),
        AnyNequal => Constant::bool(!all_equal(&args[0], &args[1])),
        VectorExtract => {
            let width = args[0].ty.components() as i64;
            let index = args[1].get_i64(0).clamp(0, width - 1) as usize;
            Constant::new(ty.clone(), vec![args[0].component(index)])
        }
        VectorInsert => {
            let width = args[0].ty.components() as i64;
            let index = args[2].get_i64(0).clamp(0, width - 1) as usize;
            let mut comps = args[0].components().to_vec();
            comps[index] = args[1].component(0);
            Constant::new(ty.clone(), comps)
        }
        Vector => Constant::new(
            ty.clone(),
            args.iter().map(|a| a.component(0).convert(base)).collect(),
        ),

        Fma => Constant::new(
            ty.clone(),
            (0..n)
                .map(|i| match (comp(&args[0], i), comp(&args[1], i), comp(&args[2], i)) {
                    (Scalar::Double(a), Scalar::Double(b), Scalar::Double(c)) => {
                        Scalar::Double(a.mul_add(b, c))
                    }
                    (Scalar::Float(a), Scalar::Float(b), Scalar::Float(c)) => {
                        Scalar::Float(a.mul_add(b, c))
                    }
                    (a, b, c) => Scalar::Float16(f16::from_f32(
                        a.as_f32().mul_add(b.as_f32(), c.as_f32()),
                    )),
                })
                .collect(),
        ),
        Lrp => Constant::new(
            ty.clone(),
            (0..n)
                .map(|i| {
                    let (x, y, a) = (comp(&args[0], i), comp(&args[1], i), comp(&args[2], i));
                    match (x, y, a) {
                        (Scalar::Double(x), Scalar::Double(y), Scalar::Double(a)) => {
                            Scalar::Double(x * (1.0 - a) + y * a)
                        }
                        _ => {
                            let (x, y, a) = (x.as_f32(), y.as_f32(), a.as_f32());
                            Scalar::Float(x * (1.0 - a) + y * a).convert(base)
                        }
                    }
                })
                .collect(),
        ),
        Csel => Constant::new(
            ty.clone(),
            (0..n)
                .map(|i| {
                    if comp(&args[0], i).as_bool() {
                        comp(&args[1], i)
                    } else {
                        comp(&args[2], i)
                    }
                })
                .collect(),
        ),
        BitfieldExtract => Constant::new(
            ty.clone(),
            (0..n)
                .map(|i| {
                    let v = comp(&args[0], i);
                    let width = v.base_type().bit_size();
                    let r = bits::bitfield_extract(
                        raw_bits(v),
                        comp(&args[1], i).as_i64(),
                        comp(&args[2], i).as_i64(),
                        width,
                        v.base_type().is_signed_integer(),
                    );
                    narrow(base, i128::from(r))
                })
                .collect(),
        ),
        BitfieldInsert => Constant::new(
            ty.clone(),
            (0..n)
                .map(|i| {
                    let v = comp(&args[0], i);
                    let r = bits::bitfield_insert(
                        raw_bits(v),
                        raw_bits(comp(&args[1], i)),
                        comp(&args[2], i).as_i64(),
                        comp(&args[3], i).as_i64(),
                        v.base_type().bit_size(),
                    );
                    narrow(base, i128::from(r))
                })
                .collect(),
        ),

        _ if op.arity() == 1 => Constant::new(
            ty.clone(),
            (0..n).map(|i| unary(op, comp(&args[0], i), base)).collect(),
        ),
        _ if op.arity() == 2 => Constant::new(
            ty.clone(),
            (0..n)
                .map(|i| binary(op, comp(&args[0], i), comp(&args[1], i), base))
                .collect(),
        ),
        other => unreachable!("no fold rule for {}", other.name()),
    };
    debug_assert_eq!(&folded.ty, ty, "fold of {} changed the type", op.name());
    Some(folded)
}
