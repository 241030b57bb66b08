//! Instruction lowering.
//!
//! Rewrites operators the back end cannot execute directly into sequences of
//! simpler ones. Each rule is selected by a bit in [`LoweringRules`].
//! Operands that an expansion reads more than once are stored in a
//! temporary declared immediately before the enclosing statement.

use bitflags::bitflags;
use log::trace;
use lumen_ir::builder::{
    Emitter, abs, add, bit_and, bit_not, bit_or, bit_xor, bitcast_f2i, bitcast_i2f, constant_like,
    csel, equal, exp2, expr, floor, int_like, less, log2, logic_and, logic_or, lshift, max, min,
    mul, neg, nequal, rcp, rshift, scalar_const, splat, unop,
};
use lumen_ir::{BaseType, Block, Constant, ExprOp, Expression, Rvalue, Shader, Type};

use crate::Pass;
use crate::util::rewrite_bodies;

bitflags! {
    /// Selects which operators [`LowerInstructions`] expands.
    #[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
    pub struct LoweringRules: u32 {
        const SUB_TO_ADD_NEG = 1 << 0;
        const FDIV_TO_MUL_RCP = 1 << 1;
        const DDIV_TO_MUL_RCP = 1 << 2;
        const INT_DIV_TO_MUL_RCP = 1 << 3;
        const EXP_TO_EXP2 = 1 << 4;
        const LOG_TO_LOG2 = 1 << 5;
        const POW_TO_EXP2 = 1 << 6;
        const MOD_TO_FLOOR = 1 << 7;
        const LDEXP_TO_ARITH = 1 << 8;
        const DLDEXP_TO_ARITH = 1 << 9;
        const DFREXP_TO_ARITH = 1 << 10;
        const CARRY_TO_ARITH = 1 << 11;
        const BORROW_TO_ARITH = 1 << 12;
        const SAT_TO_CLAMP = 1 << 13;
        const DOPS_TO_DFRAC = 1 << 14;
        const BIT_COUNT_TO_MATH = 1 << 15;
        const EXTRACT_TO_SHIFTS = 1 << 16;
        const INSERT_TO_SHIFTS = 1 << 17;
        const REVERSE_TO_SHIFTS = 1 << 18;
        const FIND_LSB_TO_FLOAT_CAST = 1 << 19;
        const FIND_MSB_TO_FLOAT_CAST = 1 << 20;
        const IMUL_HIGH_TO_MUL = 1 << 21;
        const SQRT_TO_ABS_SQRT = 1 << 22;
        const MUL64_TO_MUL_AND_MUL_HIGH = 1 << 23;
        const DSIGN_TO_CSEL = 1 << 24;
    }
}

/// Expands the operators selected by `rules`.
#[derive(Debug)]
pub struct LowerInstructions {
    rules: LoweringRules,
}

impl LowerInstructions {
    pub fn new(rules: LoweringRules) -> Self {
        Self { rules }
    }
}

impl Pass for LowerInstructions {
    fn name(&self) -> &str {
        "lower-instructions"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        if self.rules.is_empty() {
            return false;
        }
        rewrite_bodies(shader, |shader, _, body| self.lower_block(shader, body))
    }
}

fn uint(v: u32) -> Rvalue {
    Constant::uint(v).into()
}

fn int(v: i32) -> Rvalue {
    Constant::int(v).into()
}

/// Replicates a scalar operand to `width` channels.
fn widen(val: Rvalue, width: u8) -> Rvalue {
    if val.ty().is_scalar() && width > 1 {
        splat(val, width)
    } else {
        val
    }
}

/// Channel `i` of `val`, or `val` itself when it is a scalar.
fn lane(val: &Rvalue, i: u8) -> Rvalue {
    if val.ty().is_scalar() {
        val.clone()
    } else {
        lumen_ir::builder::channel(val.clone(), i)
    }
}

/// Builds a vector from per-channel scalars, or returns the single scalar.
fn gather(mut lanes: Vec<Rvalue>) -> Rvalue {
    if lanes.len() == 1 {
        lanes.remove(0)
    } else {
        expr(ExprOp::Vector, lanes)
    }
}

impl LowerInstructions {
    fn has(&self, rule: LoweringRules) -> bool {
        self.rules.contains(rule)
    }

    fn lower_block(&self, shader: &mut Shader, block: &mut Block) -> bool {
        let mut changed = false;
        for mut stmt in std::mem::take(block) {
            for nested in stmt.blocks_mut() {
                changed |= self.lower_block(shader, nested);
            }
            let mut emit = Emitter::new(shader);
            for slot in stmt.rvalues_mut() {
                slot.rewrite_post_order(&mut |node| {
                    let Some(e) = node.as_expression() else {
                        return;
                    };
                    if !self.selected(e) {
                        return;
                    }
                    let Rvalue::Expression(e) = node.take() else {
                        unreachable!()
                    };
                    let (op, ty) = (e.op, e.ty.clone());
                    let lowered = self.expand(&mut emit, e);
                    debug_assert_eq!(lowered.ty(), &ty, "lowering {} changed the type", op.name());
                    trace!("lowered {}: {ty}", op.name());
                    *node = lowered;
                    changed = true;
                });
            }
            block.extend(emit.into_statements());
            block.push(stmt);
        }
        changed
    }

    fn selected(&self, e: &Expression) -> bool {
        use ExprOp::*;
        type R = LoweringRules;
        let ty = &e.ty;
        let op0 = e.operands[0].ty();
        match e.op {
            Sub => self.has(R::SUB_TO_ADD_NEG),
            Div if ty.is_float_16_32() => self.has(R::FDIV_TO_MUL_RCP),
            Div if ty.is_double() => self.has(R::DDIV_TO_MUL_RCP),
            Div if ty.is_integer_32() => self.has(R::INT_DIV_TO_MUL_RCP),
            Exp => self.has(R::EXP_TO_EXP2),
            Log => self.has(R::LOG_TO_LOG2),
            Pow => self.has(R::POW_TO_EXP2),
            Mod if ty.is_floating() => self.has(R::MOD_TO_FLOOR),
            Ldexp if ty.base_type() == BaseType::Float => self.has(R::LDEXP_TO_ARITH),
            Ldexp if ty.is_double() => self.has(R::DLDEXP_TO_ARITH),
            FrexpSig | FrexpExp if op0.is_double() => self.has(R::DFREXP_TO_ARITH),
            Carry => self.has(R::CARRY_TO_ARITH),
            Borrow => self.has(R::BORROW_TO_ARITH),
            Saturate => self.has(R::SAT_TO_CLAMP),
            Floor | Ceil | Trunc | RoundEven if ty.is_double() => self.has(R::DOPS_TO_DFRAC),
            BitCount if op0.is_integer_32() => self.has(R::BIT_COUNT_TO_MATH),
            BitfieldExtract if ty.is_integer_32() => self.has(R::EXTRACT_TO_SHIFTS),
            BitfieldInsert if ty.is_integer_32() => self.has(R::INSERT_TO_SHIFTS),
            BitfieldReverse if ty.is_integer_32() => self.has(R::REVERSE_TO_SHIFTS),
            FindLsb if op0.is_integer_32() => self.has(R::FIND_LSB_TO_FLOAT_CAST),
            FindMsb if op0.is_integer_32() => self.has(R::FIND_MSB_TO_FLOAT_CAST),
            ImulHigh if ty.is_integer_32() => self.has(R::IMUL_HIGH_TO_MUL),
            Sqrt | Rsq => {
                self.has(R::SQRT_TO_ABS_SQRT) && e.operands[0].op() != Some(ExprOp::Abs)
            }
            Mul if ty.is_integer_64() && !ty.is_matrix() => {
                self.has(R::MUL64_TO_MUL_AND_MUL_HIGH)
            }
            Sign if ty.is_double() => self.has(R::DSIGN_TO_CSEL),
            _ => false,
        }
    }

    fn expand(&self, emit: &mut Emitter<'_>, e: Expression) -> Rvalue {
        use ExprOp::*;
        let ty = e.ty;
        let mut ops = e.operands.into_iter();
        let mut next = || ops.next().unwrap_or_else(|| unreachable!("missing operand"));
        match e.op {
            Sub => {
                let (a, b) = (next(), next());
                add(a, neg(b))
            }
            Div if ty.is_floating() => {
                let (a, b) = (next(), next());
                mul(a, rcp(b))
            }
            Div => {
                let (a, b) = (next(), next());
                self.int_div(a, b, &ty)
            }
            Exp => mul_const_then(exp2, next(), std::f64::consts::LOG2_E),
            Log => mul(log2(next()), scalar_const(ty.base_type(), std::f64::consts::LN_2)),
            Pow => {
                let (x, y) = (next(), next());
                exp2(mul(log2(x), y))
            }
            Mod => {
                let (x, y) = (next(), next());
                self.mod_to_floor(emit, x, y, &ty)
            }
            Ldexp => {
                let (x, e) = (next(), next());
                self.ldexp(emit, x, e, &ty)
            }
            FrexpSig => self.dfrexp_sig(emit, next()),
            FrexpExp => self.dfrexp_exp(emit, next()),
            Carry => {
                let x = emit.reuse("carry_x", next());
                let y = next();
                csel(less(add(x.clone(), y), x), int_like(&ty, 1), int_like(&ty, 0))
            }
            Borrow => {
                let (x, y) = (next(), next());
                csel(less(x, y), int_like(&ty, 1), int_like(&ty, 0))
            }
            Saturate => {
                let base = ty.base_type();
                min(max(next(), scalar_const(base, 0.0)), scalar_const(base, 1.0))
            }
            Floor => self.dfloor(emit, next()),
            Ceil => self.dceil(emit, next()),
            Trunc => self.dtrunc(emit, next()),
            RoundEven => self.dround_even(emit, next()),
            BitCount => self.bit_count(emit, next()),
            BitfieldExtract => {
                let (value, offset, bits) = (next(), next(), next());
                self.extract(emit, value, offset, bits)
            }
            BitfieldInsert => {
                let (base, insert, offset, bits) = (next(), next(), next(), next());
                self.insert(emit, base, insert, offset, bits)
            }
            BitfieldReverse => self.reverse(emit, next()),
            FindLsb => self.find_lsb(emit, next()),
            FindMsb => self.find_msb(emit, next()),
            ImulHigh => {
                let (x, y) = (next(), next());
                self.imul_high(emit, x, y)
            }
            Sqrt | Rsq => unop(e.op, abs(next())),
            Mul => {
                let (x, y) = (next(), next());
                self.mul64(emit, x, y, &ty)
            }
            Sign => {
                // Zeros and NaNs fail both tests and are their own sign.
                let x = emit.reuse("dsign_x", next());
                let zero = constant_like(&ty, 0.0);
                csel(
                    less(zero.clone(), x.clone()),
                    constant_like(&ty, 1.0),
                    csel(less(x.clone(), zero), constant_like(&ty, -1.0), x),
                )
            }
            other => unreachable!("no lowering for {}", other.name()),
        }
    }

    /// `a - b`, already in add/negate form when that rule is selected.
    fn sub(&self, a: Rvalue, b: Rvalue) -> Rvalue {
        if self.has(LoweringRules::SUB_TO_ADD_NEG) {
            add(a, neg(b))
        } else {
            lumen_ir::builder::sub(a, b)
        }
    }

    fn int_div(&self, a: Rvalue, b: Rvalue, ty: &Type) -> Rvalue {
        let (to_float, from_float) = if ty.base_type() == BaseType::Int {
            (ExprOp::I2F, ExprOp::F2I)
        } else {
            (ExprOp::U2F, ExprOp::F2U)
        };
        let quotient = mul(unop(to_float, a), rcp(unop(to_float, b)));
        unop(from_float, quotient)
    }

    fn mod_to_floor(&self, emit: &mut Emitter<'_>, x: Rvalue, y: Rvalue, ty: &Type) -> Rvalue {
        let x = emit.reuse("mod_x", x);
        let y = emit.reuse("mod_y", y);
        let lower_div = if ty.is_double() {
            self.has(LoweringRules::DDIV_TO_MUL_RCP)
        } else {
            self.has(LoweringRules::FDIV_TO_MUL_RCP)
        };
        let quotient = if lower_div {
            mul(x.clone(), rcp(y.clone()))
        } else {
            lumen_ir::builder::div(x.clone(), y.clone())
        };
        let floored = if ty.is_double() && self.has(LoweringRules::DOPS_TO_DFRAC) {
            self.dfloor(emit, quotient)
        } else {
            floor(quotient)
        };
        self.sub(x, mul(y, floored))
    }

    fn dfloor(&self, emit: &mut Emitter<'_>, x: Rvalue) -> Rvalue {
        let x = emit.reuse("dfloor_x", x);
        self.sub(x.clone(), lumen_ir::builder::fract(x))
    }

    fn dceil(&self, emit: &mut Emitter<'_>, x: Rvalue) -> Rvalue {
        let ty = x.ty().clone();
        let x = emit.reuse("dceil_x", x);
        let frac = emit.temp("dceil_frac", lumen_ir::builder::fract(x.clone()));
        let floored = self.sub(x, frac.clone());
        let step = csel(
            nequal(frac, constant_like(&ty, 0.0)),
            constant_like(&ty, 1.0),
            constant_like(&ty, 0.0),
        );
        add(floored, step)
    }

    fn dtrunc(&self, emit: &mut Emitter<'_>, x: Rvalue) -> Rvalue {
        let ty = x.ty().clone();
        let x = emit.reuse("dtrunc_x", x);
        let frac = emit.temp("dtrunc_frac", lumen_ir::builder::fract(x.clone()));
        let floored = emit.temp("dtrunc_floor", self.sub(x.clone(), frac.clone()));
        let round_up = logic_and(
            less(x, constant_like(&ty, 0.0)),
            nequal(frac, constant_like(&ty, 0.0)),
        );
        csel(round_up, add(floored.clone(), constant_like(&ty, 1.0)), floored)
    }

    fn dround_even(&self, emit: &mut Emitter<'_>, x: Rvalue) -> Rvalue {
        let ty = x.ty().clone();
        let biased = emit.temp("dround_t", add(x, constant_like(&ty, 0.5)));
        let frac = emit.temp("dround_frac", lumen_ir::builder::fract(biased.clone()));
        let floored = emit.temp("dround_floor", self.sub(biased, frac.clone()));
        let half = lumen_ir::builder::fract(mul(floored.clone(), constant_like(&ty, 0.5)));
        let even = csel(
            equal(half, constant_like(&ty, 0.0)),
            floored.clone(),
            self.sub(floored.clone(), constant_like(&ty, 1.0)),
        );
        csel(equal(frac, constant_like(&ty, 0.0)), even, floored)
    }

    /// `x * 2^e` by rewriting the exponent field lane by lane. Zero and
    /// subnormal inputs and results flush to a zero of `x`'s sign, overflow
    /// saturates to infinity, and infinities and NaNs pass through.
    fn ldexp(&self, emit: &mut Emitter<'_>, x: Rvalue, e: Rvalue, ty: &Type) -> Rvalue {
        let x = emit.reuse("ldexp_x", x);
        let e = emit.reuse("ldexp_e", e);
        let lanes = (0..ty.vector_elements())
            .map(|i| {
                let (xi, ei) = (lane(&x, i), lane(&e, i));
                if ty.is_double() {
                    self.dldexp_lane(emit, xi, ei)
                } else {
                    self.ldexp_lane(emit, xi, ei)
                }
            })
            .collect();
        gather(lanes)
    }

    fn ldexp_lane(&self, emit: &mut Emitter<'_>, x: Rvalue, e: Rvalue) -> Rvalue {
        let bits = emit.temp("ldexp_bits", bitcast_f2i(x.clone()));
        let biased = emit.temp("ldexp_biased", bit_and(rshift(bits.clone(), uint(23)), int(0xff)));
        let n = emit.temp("ldexp_n", add(biased.clone(), min(max(e, int(-512)), int(512))));
        let sign = emit.temp("ldexp_sign", bit_and(bits.clone(), int(i32::MIN)));
        let field = bit_and(bits, int(0x807f_ffff_u32 as i32));
        let normal = bitcast_i2f(bit_or(field, lshift(n.clone(), uint(23))));
        let zero = bitcast_i2f(sign.clone());
        let inf = bitcast_i2f(bit_or(sign, int(0x7f80_0000)));
        ldexp_select(x, biased, n, 0xff, zero, inf, normal)
    }

    /// The double form works on the high word, which holds the sign and
    /// the whole exponent field.
    fn dldexp_lane(&self, emit: &mut Emitter<'_>, x: Rvalue, e: Rvalue) -> Rvalue {
        let words = emit.temp("ldexp_words", unop(ExprOp::UnpackDouble2x32, x.clone()));
        let low = lumen_ir::builder::channel(words.clone(), 0);
        let high = emit.temp("ldexp_high", lumen_ir::builder::channel(words, 1));
        let biased = emit.temp(
            "ldexp_biased",
            unop(ExprOp::U2I, bit_and(rshift(high.clone(), uint(20)), uint(0x7ff))),
        );
        let n = emit.temp("ldexp_n", add(biased.clone(), min(max(e, int(-4096)), int(4096))));
        let sign = emit.temp("ldexp_sign", bit_and(high.clone(), uint(0x8000_0000)));
        let pack = |low: Rvalue, high: Rvalue| {
            unop(ExprOp::PackDouble2x32, expr(ExprOp::Vector, vec![low, high]))
        };
        let field = bit_and(high, uint(0x800f_ffff));
        let normal = pack(low, bit_or(field, lshift(unop(ExprOp::I2U, n.clone()), uint(20))));
        let zero = pack(uint(0), sign.clone());
        let inf = pack(uint(0), bit_or(sign, uint(0x7ff0_0000)));
        ldexp_select(x, biased, n, 0x7ff, zero, inf, normal)
    }

    fn dfrexp_exp(&self, emit: &mut Emitter<'_>, x: Rvalue) -> Rvalue {
        let width = x.ty().vector_elements();
        let x = emit.reuse("frexp_x", x);
        let lanes = (0..width)
            .map(|i| {
                let xi = lane(&x, i);
                let bits = unop(ExprOp::UnpackDouble2x32, xi.clone());
                let high = emit.temp("frexp_hi", lumen_ir::builder::channel(bits, 1));
                let field = bit_and(rshift(high, uint(20)), uint(0x7ff));
                let exponent = self.sub(unop(ExprOp::U2I, field), int(1022));
                csel(equal(xi, Constant::double(0.0).into()), int(0), exponent)
            })
            .collect();
        gather(lanes)
    }

    fn dfrexp_sig(&self, emit: &mut Emitter<'_>, x: Rvalue) -> Rvalue {
        let width = x.ty().vector_elements();
        let x = emit.reuse("frexp_x", x);
        let lanes = (0..width)
            .map(|i| {
                let xi = lane(&x, i);
                let bits = emit.temp("frexp_bits", unop(ExprOp::UnpackDouble2x32, xi.clone()));
                let low = lumen_ir::builder::channel(bits.clone(), 0);
                let high = lumen_ir::builder::channel(bits, 1);
                let high = bit_or(bit_and(high, uint(0x800f_ffff)), uint(0x3fe0_0000));
                let packed = unop(ExprOp::PackDouble2x32, expr(ExprOp::Vector, vec![low, high]));
                csel(equal(xi.clone(), Constant::double(0.0).into()), xi, packed)
            })
            .collect();
        gather(lanes)
    }

    /// Reinterprets a signed 32-bit operand as unsigned.
    fn as_unsigned(x: Rvalue) -> Rvalue {
        if x.ty().base_type() == BaseType::Int {
            unop(ExprOp::I2U, x)
        } else {
            x
        }
    }

    fn bit_count(&self, emit: &mut Emitter<'_>, x: Rvalue) -> Rvalue {
        let v = emit.reuse("bc_v", Self::as_unsigned(x));
        let v = emit.temp(
            "bc_v",
            self.sub(v.clone(), bit_and(rshift(v, uint(1)), uint(0x5555_5555))),
        );
        let v = emit.temp(
            "bc_v",
            add(
                bit_and(v.clone(), uint(0x3333_3333)),
                bit_and(rshift(v, uint(2)), uint(0x3333_3333)),
            ),
        );
        let bytes = bit_and(add(v.clone(), rshift(v, uint(4))), uint(0x0f0f_0f0f));
        unop(ExprOp::U2I, rshift(mul(bytes, uint(0x0101_0101)), uint(24)))
    }

    fn extract(&self, emit: &mut Emitter<'_>, value: Rvalue, offset: Rvalue, bits: Rvalue) -> Rvalue {
        let ty = value.ty().clone();
        let width = ty.vector_elements();
        let offset = widen(offset, width);
        let bits = emit.reuse("bfe_bits", widen(bits, width));
        let int_ty = bits.ty().clone();
        if ty.base_type() == BaseType::Uint {
            let all_ones = int_like(&ty, i64::from(u32::MAX));
            let mask = csel(
                equal(bits.clone(), int_like(&int_ty, 0)),
                int_like(&ty, 0),
                rshift(all_ones, self.sub(int_like(&int_ty, 32), bits)),
            );
            bit_and(rshift(value, offset), mask)
        } else {
            let shift = emit.temp("bfe_shift", self.sub(int_like(&int_ty, 32), bits.clone()));
            csel(
                equal(bits, int_like(&int_ty, 0)),
                int_like(&ty, 0),
                rshift(lshift(value, self.sub(shift.clone(), offset)), shift),
            )
        }
    }

    fn insert(
        &self,
        emit: &mut Emitter<'_>,
        base: Rvalue,
        insert: Rvalue,
        offset: Rvalue,
        bits: Rvalue,
    ) -> Rvalue {
        let ty = base.ty().clone();
        let width = ty.vector_elements();
        let offset = emit.reuse("bfi_offset", widen(offset, width));
        let bits = emit.reuse("bfi_bits", widen(bits, width));
        let int_ty = bits.ty().clone();
        let one = int_like(&ty, 1);
        let low_bits = csel(
            equal(bits.clone(), int_like(&int_ty, 32)),
            int_like(&ty, -1),
            self.sub(lshift(one.clone(), bits), one),
        );
        let mask = emit.temp("bfi_mask", lshift(low_bits, offset.clone()));
        bit_or(
            bit_and(base, bit_not(mask.clone())),
            bit_and(lshift(insert, offset), mask),
        )
    }

    fn reverse(&self, emit: &mut Emitter<'_>, x: Rvalue) -> Rvalue {
        let signed = x.ty().base_type() == BaseType::Int;
        let mut v = emit.reuse("rev_v", Self::as_unsigned(x));
        for (shift, mask) in [(1, 0x5555_5555), (2, 0x3333_3333), (4, 0x0f0f_0f0f), (8, 0x00ff_00ff)] {
            let swapped = bit_or(
                bit_and(rshift(v.clone(), uint(shift)), uint(mask)),
                lshift(bit_and(v, uint(mask)), uint(shift)),
            );
            v = emit.temp("rev_v", swapped);
        }
        let reversed = bit_or(rshift(v.clone(), uint(16)), lshift(v, uint(16)));
        if signed {
            unop(ExprOp::U2I, reversed)
        } else {
            reversed
        }
    }

    /// Exponent of a power of two held in an unsigned value, read back
    /// through an exact float conversion.
    fn exponent_of(&self, power_of_two: Rvalue) -> Rvalue {
        let as_float = unop(ExprOp::U2F, power_of_two);
        self.sub(rshift(bitcast_f2i(as_float), uint(23)), int(127))
    }

    fn find_lsb(&self, emit: &mut Emitter<'_>, x: Rvalue) -> Rvalue {
        let v = emit.reuse("lsb_v", Self::as_unsigned(x));
        let int_ty = v.ty().with_base(BaseType::Int);
        let lowest = bit_and(v.clone(), neg(v.clone()));
        csel(
            equal(v, uint(0)),
            int_like(&int_ty, -1),
            self.exponent_of(lowest),
        )
    }

    fn find_msb(&self, emit: &mut Emitter<'_>, x: Rvalue) -> Rvalue {
        let v = if x.ty().base_type() == BaseType::Int {
            let x = emit.reuse("msb_x", x);
            let magnitude = csel(less(x.clone(), int(0)), bit_not(x.clone()), x);
            unop(ExprOp::I2U, magnitude)
        } else {
            x
        };
        let v = emit.reuse("msb_v", v);
        let int_ty = v.ty().with_base(BaseType::Int);
        // No two adjacent bits survive, so the conversion cannot round up
        // into the next exponent.
        let sparse = bit_and(v.clone(), bit_not(rshift(v.clone(), uint(1))));
        csel(
            equal(v, uint(0)),
            int_like(&int_ty, -1),
            self.exponent_of(sparse),
        )
    }

    /// High 32 bits of an unsigned 32x32 product, from 16-bit partial
    /// products.
    fn umul_high(&self, emit: &mut Emitter<'_>, a: Rvalue, b: Rvalue) -> Rvalue {
        let a_lo = emit.temp("mulh_alo", bit_and(a.clone(), uint(0xffff)));
        let a_hi = emit.temp("mulh_ahi", rshift(a, uint(16)));
        let b_lo = emit.temp("mulh_blo", bit_and(b.clone(), uint(0xffff)));
        let b_hi = emit.temp("mulh_bhi", rshift(b, uint(16)));
        let t0 = mul(a_lo.clone(), b_lo.clone());
        let t1 = emit.temp("mulh_t1", mul(a_lo, b_hi.clone()));
        let t2 = emit.temp("mulh_t2", mul(a_hi.clone(), b_lo));
        let t3 = mul(a_hi, b_hi);
        let mid = add(
            add(rshift(t0, uint(16)), bit_and(t1.clone(), uint(0xffff))),
            bit_and(t2.clone(), uint(0xffff)),
        );
        add(
            add(add(t3, rshift(t1, uint(16))), rshift(t2, uint(16))),
            rshift(mid, uint(16)),
        )
    }

    fn imul_high(&self, emit: &mut Emitter<'_>, x: Rvalue, y: Rvalue) -> Rvalue {
        if x.ty().base_type() == BaseType::Uint {
            let a = emit.reuse("mulh_a", x);
            let b = emit.reuse("mulh_b", y);
            return self.umul_high(emit, a, b);
        }
        let x = emit.reuse("mulh_x", x);
        let y = emit.reuse("mulh_y", y);
        let a = emit.temp("mulh_a", unop(ExprOp::I2U, abs(x.clone())));
        let b = emit.temp("mulh_b", unop(ExprOp::I2U, abs(y.clone())));
        let uty = a.ty().clone();
        let high = self.umul_high(emit, a.clone(), b.clone());
        let high = emit.temp("mulh_hi", high);
        let low = mul(a, b);
        let negative = less(bit_xor(x, y), int(0));
        let borrow = csel(equal(low, uint(0)), int_like(&uty, 1), int_like(&uty, 0));
        let negated = add(bit_not(high.clone()), borrow);
        unop(ExprOp::U2I, csel(negative, negated, high))
    }

    /// 64-bit multiply from 32-bit halves.
    fn mul64(&self, emit: &mut Emitter<'_>, x: Rvalue, y: Rvalue, ty: &Type) -> Rvalue {
        let signed = ty.base_type() == BaseType::Int64;
        let to_unsigned = |v: Rvalue| {
            if signed { unop(ExprOp::I642U64, v) } else { v }
        };
        let x = emit.reuse("mul64_x", to_unsigned(x));
        let y = emit.reuse("mul64_y", to_unsigned(y));
        let lanes = (0..ty.vector_elements())
            .map(|i| {
                let xs = emit.temp("mul64_xs", unop(ExprOp::UnpackUint2x32, lane(&x, i)));
                let ys = emit.temp("mul64_ys", unop(ExprOp::UnpackUint2x32, lane(&y, i)));
                let ch = |v: &Rvalue, c| lumen_ir::builder::channel(v.clone(), c);
                let low = mul(ch(&xs, 0), ch(&ys, 0));
                let carry = if self.has(LoweringRules::IMUL_HIGH_TO_MUL) {
                    self.umul_high(emit, ch(&xs, 0), ch(&ys, 0))
                } else {
                    lumen_ir::builder::imul_high(ch(&xs, 0), ch(&ys, 0))
                };
                let high = add(add(carry, mul(ch(&xs, 0), ch(&ys, 1))), mul(ch(&xs, 1), ch(&ys, 0)));
                unop(ExprOp::PackUint2x32, expr(ExprOp::Vector, vec![low, high]))
            })
            .collect();
        let product = gather(lanes);
        if signed {
            unop(ExprOp::U642I64, product)
        } else {
            product
        }
    }
}

/// Picks the ldexp result from the input's biased exponent and the new
/// one, `n`. `all_ones` is the exponent of infinities and NaNs.
fn ldexp_select(
    x: Rvalue,
    biased: Rvalue,
    n: Rvalue,
    all_ones: i32,
    zero: Rvalue,
    inf: Rvalue,
    normal: Rvalue,
) -> Rvalue {
    let flushed = logic_or(equal(biased.clone(), int(0)), less(n.clone(), int(1)));
    csel(
        equal(biased, int(all_ones)),
        x,
        csel(flushed, zero, csel(less(n, int(all_ones)), normal, inf)),
    )
}

/// `f(x * k)` with `k` a scalar constant of `x`'s base type.
fn mul_const_then(f: fn(Rvalue) -> Rvalue, x: Rvalue, k: f64) -> Rvalue {
    let base = x.ty().base_type();
    f(mul(x, scalar_const(base, k)))
}
