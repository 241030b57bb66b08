//! Bit-exact helpers: packing, bitfields, frexp/ldexp.

use half::f16;

pub(crate) fn pack_snorm_2x16(v: [f32; 2]) -> u32 {
    let p = |x: f32| (x.clamp(-1.0, 1.0) * 32767.0).round_ties_even() as i16 as u16;
    u32::from(p(v[0])) | (u32::from(p(v[1])) << 16)
}

pub(crate) fn pack_unorm_2x16(v: [f32; 2]) -> u32 {
    let p = |x: f32| (x.clamp(0.0, 1.0) * 65535.0).round_ties_even() as u16;
    u32::from(p(v[0])) | (u32::from(p(v[1])) << 16)
}

pub(crate) fn pack_snorm_4x8(v: [f32; 4]) -> u32 {
    let p = |x: f32| (x.clamp(-1.0, 1.0) * 127.0).round_ties_even() as i8 as u8;
    v.iter()
        .enumerate()
        .fold(0, |acc, (i, &x)| acc | (u32::from(p(x)) << (8 * i)))
}

pub(crate) fn pack_unorm_4x8(v: [f32; 4]) -> u32 {
    let p = |x: f32| (x.clamp(0.0, 1.0) * 255.0).round_ties_even() as u8;
    v.iter()
        .enumerate()
        .fold(0, |acc, (i, &x)| acc | (u32::from(p(x)) << (8 * i)))
}

pub(crate) fn pack_half_2x16(v: [f32; 2]) -> u32 {
    let p = |x: f32| f16::from_f32(x).to_bits();
    u32::from(p(v[0])) | (u32::from(p(v[1])) << 16)
}

pub(crate) fn unpack_snorm_2x16(bits: u32) -> [f32; 2] {
    let u = |h: u16| (f32::from(h as i16) / 32767.0).clamp(-1.0, 1.0);
    [u(bits as u16), u((bits >> 16) as u16)]
}

pub(crate) fn unpack_unorm_2x16(bits: u32) -> [f32; 2] {
    let u = |h: u16| f32::from(h) / 65535.0;
    [u(bits as u16), u((bits >> 16) as u16)]
}

pub(crate) fn unpack_snorm_4x8(bits: u32) -> [f32; 4] {
    std::array::from_fn(|i| {
        let b = (bits >> (8 * i)) as u8 as i8;
        (f32::from(b) / 127.0).clamp(-1.0, 1.0)
    })
}

pub(crate) fn unpack_unorm_4x8(bits: u32) -> [f32; 4] {
    std::array::from_fn(|i| f32::from((bits >> (8 * i)) as u8) / 255.0)
}

pub(crate) fn unpack_half_2x16(bits: u32) -> [f32; 2] {
    let u = |h: u16| f16::from_bits(h).to_f32();
    [u(bits as u16), u((bits >> 16) as u16)]
}

/// Extracts `bits` bits at `offset` from a `width`-bit value, sign-extending
/// when `signed`. Out-of-range fields yield 0.
pub(crate) fn bitfield_extract(value: u64, offset: i64, bits: i64, width: u32, signed: bool) -> u64 {
    if bits == 0 || offset < 0 || bits < 0 || offset + bits > i64::from(width) {
        return 0;
    }
    let (offset, bits) = (offset as u32, bits as u32);
    let field = (value >> offset) & low_mask(bits);
    if signed && (field >> (bits - 1)) & 1 == 1 {
        (field | !low_mask(bits)) & low_mask(width)
    } else {
        field
    }
}

/// Replaces `bits` bits at `offset` of `base` with the low bits of `insert`.
/// Out-of-range fields yield 0.
pub(crate) fn bitfield_insert(base: u64, insert: u64, offset: i64, bits: i64, width: u32) -> u64 {
    if bits == 0 {
        return base;
    }
    if offset < 0 || bits < 0 || offset + bits > i64::from(width) {
        return 0;
    }
    let mask = low_mask(bits as u32) << offset;
    ((base & !mask) | ((insert << offset) & mask)) & low_mask(width)
}

pub(crate) fn low_mask(bits: u32) -> u64 {
    if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 }
}

/// Reverses the low `width` bits.
pub(crate) fn reverse_bits(value: u64, width: u32) -> u64 {
    value.reverse_bits() >> (64 - width)
}

/// Index of the most significant bit that differs from the sign bit for
/// signed values, or the highest set bit for unsigned ones; -1 if none.
pub(crate) fn find_msb(value: u64, width: u32, signed: bool) -> i32 {
    let value = value & low_mask(width);
    let negative = signed && (value >> (width - 1)) & 1 == 1;
    let v = if negative { !value & low_mask(width) } else { value };
    if v == 0 {
        -1
    } else {
        63 - v.leading_zeros() as i32
    }
}

pub(crate) fn find_lsb(value: u64, width: u32) -> i32 {
    let value = value & low_mask(width);
    if value == 0 {
        -1
    } else {
        value.trailing_zeros() as i32
    }
}

/// Splits `x` into a significand in `[0.5, 1)` and a power of two.
/// Zero, infinity and NaN keep their value and report exponent 0.
pub(crate) fn frexp_f64(x: f64) -> (f64, i32) {
    if x == 0.0 || !x.is_finite() {
        return (x, 0);
    }
    let (x, bias) = if x.is_subnormal() {
        (x * 2f64.powi(54), -54)
    } else {
        (x, 0)
    };
    let bits = x.to_bits();
    let exp = ((bits >> 52) & 0x7ff) as i32 - 1022;
    let sig = f64::from_bits((bits & !(0x7ffu64 << 52)) | (1022u64 << 52));
    (sig, exp + bias)
}

pub(crate) fn frexp_f32(x: f32) -> (f32, i32) {
    if x == 0.0 || !x.is_finite() {
        return (x, 0);
    }
    let (x, bias) = if x.is_subnormal() {
        (x * 2f32.powi(25), -25)
    } else {
        (x, 0)
    };
    let bits = x.to_bits();
    let exp = ((bits >> 23) & 0xff) as i32 - 126;
    let sig = f32::from_bits((bits & !(0xffu32 << 23)) | (126u32 << 23));
    (sig, exp + bias)
}

/// Rewrites the exponent field of an IEEE value with `mantissa` fraction
/// bits. Zero and subnormal inputs and results become a zero of the same
/// sign, overflow becomes infinity, and infinities and NaNs pass through.
fn ldexp_bits(bits: u64, exp: i64, mantissa: u32, exp_mask: u64) -> u64 {
    let sign = bits & (1 << (mantissa + exp_mask.count_ones()));
    let field = exp_mask << mantissa;
    let biased = ((bits >> mantissa) & exp_mask) as i64;
    let n = biased + exp.clamp(-4096, 4096);
    if biased == exp_mask as i64 {
        bits
    } else if biased == 0 || n < 1 {
        sign
    } else if n >= exp_mask as i64 {
        sign | field
    } else {
        (bits & !field) | ((n as u64) << mantissa)
    }
}

/// `x * 2^exp` with subnormals flushed to a signed zero.
pub(crate) fn ldexp_f64(x: f64, exp: i64) -> f64 {
    f64::from_bits(ldexp_bits(x.to_bits(), exp, 52, 0x7ff))
}

pub(crate) fn ldexp_f32(x: f32, exp: i64) -> f32 {
    f32::from_bits(ldexp_bits(u64::from(x.to_bits()), exp, 23, 0xff) as u32)
}

pub(crate) fn ldexp_f16(x: f16, exp: i64) -> f16 {
    f16::from_bits(ldexp_bits(u64::from(x.to_bits()), exp, 10, 0x1f) as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snorm_unorm_packing() {
        assert_eq!(pack_unorm_2x16([0.0, 1.0]), 0xffff_0000);
        assert_eq!(pack_snorm_2x16([1.0, -1.0]), 0x8001_7fff);
        assert_eq!(pack_unorm_4x8([1.0, 0.0, 0.5, 2.0]), 0xff80_00ff);
        assert_eq!(unpack_unorm_4x8(0xff80_00ff), [1.0, 0.0, 128.0 / 255.0, 1.0]);
        assert_eq!(unpack_snorm_2x16(0x8000_7fff), [1.0, -1.0]);
    }

    #[test]
    fn half_packing() {
        let bits = pack_half_2x16([1.0, -2.0]);
        assert_eq!(bits, 0xc000_3c00);
        assert_eq!(unpack_half_2x16(bits), [1.0, -2.0]);
    }

    #[test]
    fn bitfields() {
        assert_eq!(bitfield_extract(0xf0, 4, 4, 32, false), 0xf);
        assert_eq!(bitfield_extract(0xf0, 4, 4, 32, true), 0xffff_ffff);
        assert_eq!(bitfield_extract(0xf0, 30, 4, 32, false), 0);
        assert_eq!(bitfield_insert(0xffff_ffff, 0, 8, 8, 32), 0xffff_00ff);
        assert_eq!(bitfield_insert(0x1234, 0, 0, 0, 32), 0x1234);
        assert_eq!(reverse_bits(1, 32), 0x8000_0000);
    }

    #[test]
    fn msb_lsb() {
        assert_eq!(find_msb(0, 32, true), -1);
        assert_eq!(find_msb(0xffff_ffff, 32, true), -1);
        assert_eq!(find_msb(0x10, 32, false), 4);
        assert_eq!(find_msb(0xffff_fff0, 32, true), 3);
        assert_eq!(find_lsb(0x10, 32), 4);
        assert_eq!(find_lsb(0, 32), -1);
    }

    #[test]
    fn frexp_and_ldexp() {
        assert_eq!(frexp_f32(8.0), (0.5, 4));
        assert_eq!(frexp_f64(-3.0), (-0.75, 2));
        assert_eq!(frexp_f32(0.0), (0.0, 0));
        let tiny = f32::from_bits(1);
        let (sig, exp) = frexp_f32(tiny);
        assert_eq!(sig, 0.5);
        assert_eq!(exp, -148);
        assert_eq!(ldexp_f32(0.75, 3), 6.0);
        assert_eq!(ldexp_f32(1.0, -140), 0.0);
        assert_eq!(ldexp_f32(1.0, 200), f32::INFINITY);
        assert_eq!(ldexp_f64(1.0, 1023), 2f64.powi(1023));
        assert_eq!(ldexp_f32(2f32.powi(127), -253), f32::MIN_POSITIVE);
        assert_eq!(ldexp_f32(-1.0, -130).to_bits(), (-0.0f32).to_bits());
        assert_eq!(ldexp_f32(f32::from_bits(1), 100), 0.0);
        assert_eq!(ldexp_f32(f32::NEG_INFINITY, -5000), f32::NEG_INFINITY);
        assert!(ldexp_f32(f32::NAN, 3).is_nan());
        assert_eq!(ldexp_f64(f64::MIN_POSITIVE, 2045), 2f64.powi(1023));
        assert_eq!(ldexp_f64(1.5, 1024), f64::INFINITY);
        assert_eq!(ldexp_f16(f16::from_f32(1.0), -15), f16::from_f32(0.0));
        assert_eq!(ldexp_f16(f16::from_f32(0.75), 4), f16::from_f32(12.0));
    }
}
