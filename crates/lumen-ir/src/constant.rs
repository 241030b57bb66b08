//! Literal constant values.
//!
//! A [`Constant`] is either up to 16 scalar components of one base type
//! (scalars, vectors, matrices in column-major order) or an owned sequence of
//! child constants (arrays and structs).

use half::f16;

use crate::types::{BaseType, Type};

/// One scalar component.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i32),
    Uint(u32),
    Float(f32),
    Float16(f16),
    Double(f64),
    Int16(i16),
    Uint16(u16),
    Int64(i64),
    Uint64(u64),
}

impl Scalar {
    pub fn base_type(self) -> BaseType {
        match self {
            Self::Bool(_) => BaseType::Bool,
            Self::Int(_) => BaseType::Int,
            Self::Uint(_) => BaseType::Uint,
            Self::Float(_) => BaseType::Float,
            Self::Float16(_) => BaseType::Float16,
            Self::Double(_) => BaseType::Double,
            Self::Int16(_) => BaseType::Int16,
            Self::Uint16(_) => BaseType::Uint16,
            Self::Int64(_) => BaseType::Int64,
            Self::Uint64(_) => BaseType::Uint64,
        }
    }

    /// The zero value of a base type.
    pub fn zero(base: BaseType) -> Self {
        Self::from_f64(base, 0.0)
    }

    /// The one value of a base type (`true` for booleans).
    pub fn one(base: BaseType) -> Self {
        Self::from_f64(base, 1.0)
    }

    /// Creates a component of `base` holding `value`, using the same
    /// conversion rules as [`Scalar::convert`].
    pub fn from_f64(base: BaseType, value: f64) -> Self {
        Self::Double(value).convert(base)
    }

    /// Creates a component of `base` from an exact integer value.
    pub fn from_i64(base: BaseType, value: i64) -> Self {
        Self::Int64(value).convert(base)
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Self::Bool(b) => f64::from(u8::from(b)),
            Self::Int(v) => f64::from(v),
            Self::Uint(v) => f64::from(v),
            Self::Float(v) => f64::from(v),
            Self::Float16(v) => f64::from(v.to_f32()),
            Self::Double(v) => v,
            Self::Int16(v) => f64::from(v),
            Self::Uint16(v) => f64::from(v),
            Self::Int64(v) => v as f64,
            Self::Uint64(v) => v as f64,
        }
    }

    /// Single-precision view; f16 widens exactly.
    pub fn as_f32(self) -> f32 {
        match self {
            Self::Float(v) => v,
            Self::Float16(v) => v.to_f32(),
            other => other.as_f64() as f32,
        }
    }

    /// Integer view; floats truncate toward zero and saturate.
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Bool(b) => i64::from(b),
            Self::Int(v) => i64::from(v),
            Self::Uint(v) => i64::from(v),
            Self::Int16(v) => i64::from(v),
            Self::Uint16(v) => i64::from(v),
            Self::Int64(v) => v,
            Self::Uint64(v) => v as i64,
            Self::Float(v) => v as i64,
            Self::Float16(v) => v.to_f32() as i64,
            Self::Double(v) => v as i64,
        }
    }

    /// Raw unsigned view of integer bits (sign-extended for signed kinds).
    pub fn as_u64(self) -> u64 {
        match self {
            Self::Uint64(v) => v,
            Self::Float(v) => v as u64,
            Self::Float16(v) => v.to_f32() as u64,
            Self::Double(v) => v as u64,
            other => other.as_i64() as u64,
        }
    }

    pub fn as_bool(self) -> bool {
        match self {
            Self::Bool(b) => b,
            other => other.as_f64() != 0.0,
        }
    }

    /// Converts to another base type with GLSL constructor semantics:
    /// float to integer truncates toward zero, integer narrowing wraps,
    /// anything to bool compares against zero.
    pub fn convert(self, base: BaseType) -> Self {
        if self.base_type() == base {
            return self;
        }
        let from_float = self.base_type().is_floating();
        match base {
            BaseType::Bool => Self::Bool(self.as_bool()),
            BaseType::Float => Self::Float(match self {
                Self::Double(v) => v as f32,
                Self::Int64(v) => v as f32,
                Self::Uint64(v) => v as f32,
                other => other.as_f64() as f32,
            }),
            BaseType::Float16 => Self::Float16(match self {
                Self::Double(v) => f16::from_f64(v),
                other => f16::from_f32(other.as_f32()),
            }),
            BaseType::Double => Self::Double(self.as_f64()),
            BaseType::Int if from_float => Self::Int(self.as_f64() as i32),
            BaseType::Int => Self::Int(self.as_i64() as i32),
            BaseType::Uint if from_float => Self::Uint(self.as_f64() as u32),
            BaseType::Uint => Self::Uint(self.as_i64() as u32),
            BaseType::Int16 if from_float => Self::Int16(self.as_f64() as i16),
            BaseType::Int16 => Self::Int16(self.as_i64() as i16),
            BaseType::Uint16 if from_float => Self::Uint16(self.as_f64() as u16),
            BaseType::Uint16 => Self::Uint16(self.as_i64() as u16),
            BaseType::Int64 if from_float => Self::Int64(self.as_f64() as i64),
            BaseType::Int64 => Self::Int64(self.as_i64()),
            BaseType::Uint64 if from_float => Self::Uint64(self.as_f64() as u64),
            BaseType::Uint64 => Self::Uint64(self.as_u64()),
            other => panic!("cannot convert a scalar to {other:?}"),
        }
    }

    /// Bitwise identity (distinguishes `-0.0` from `0.0` and compares NaN payloads).
    pub fn bit_eq(self, other: Self) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Float16(a), Self::Float16(b)) => a.to_bits() == b.to_bits(),
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        }
    }
}

/// Storage of a constant.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstantValue {
    /// Scalar, vector or matrix components in column-major order.
    Components(Vec<Scalar>),
    /// Array elements or struct fields.
    Aggregate(Vec<Constant>),
}

/// A literal value of a given type.
#[derive(Clone, Debug, PartialEq)]
pub struct Constant {
    pub ty: Type,
    pub value: ConstantValue,
}

impl Constant {
    /// Creates a numeric constant from its components.
    pub fn new(ty: Type, components: Vec<Scalar>) -> Self {
        assert!(
            ty.is_numeric_or_bool(),
            "component constant of non-numeric type {ty}"
        );
        assert_eq!(
            components.len(),
            ty.components(),
            "component count mismatch for {ty}"
        );
        debug_assert!(
            components.iter().all(|c| c.base_type() == ty.base_type()),
            "component base mismatch for {ty}"
        );
        Self {
            ty,
            value: ConstantValue::Components(components),
        }
    }

    /// Creates an array or struct constant from its elements.
    pub fn aggregate(ty: Type, elements: Vec<Constant>) -> Self {
        if let Some(length) = ty.array_length() {
            assert_eq!(elements.len(), length as usize, "array length mismatch");
        } else {
            assert!(ty.is_record(), "aggregate constant of type {ty}");
            assert_eq!(elements.len(), ty.fields().len(), "field count mismatch");
        }
        Self {
            ty,
            value: ConstantValue::Aggregate(elements),
        }
    }

    pub fn scalar(value: Scalar) -> Self {
        Self::new(Type::scalar(value.base_type()), vec![value])
    }

    pub fn float(value: f32) -> Self {
        Self::scalar(Scalar::Float(value))
    }

    pub fn float16(value: f32) -> Self {
        Self::scalar(Scalar::Float16(f16::from_f32(value)))
    }

    pub fn double(value: f64) -> Self {
        Self::scalar(Scalar::Double(value))
    }

    pub fn int(value: i32) -> Self {
        Self::scalar(Scalar::Int(value))
    }

    pub fn uint(value: u32) -> Self {
        Self::scalar(Scalar::Uint(value))
    }

    pub fn int64(value: i64) -> Self {
        Self::scalar(Scalar::Int64(value))
    }

    pub fn uint64(value: u64) -> Self {
        Self::scalar(Scalar::Uint64(value))
    }

    pub fn bool(value: bool) -> Self {
        Self::scalar(Scalar::Bool(value))
    }

    /// A float vector.
    pub fn vec(values: &[f32]) -> Self {
        Self::new(
            Type::vec(values.len() as u8),
            values.iter().map(|&v| Scalar::Float(v)).collect(),
        )
    }

    /// Every component of the numeric type set to `value` (converted).
    pub fn splat(ty: Type, value: Scalar) -> Self {
        let component = value.convert(ty.base_type());
        let count = ty.components();
        Self::new(ty, vec![component; count])
    }

    /// Every component of the numeric type set to `value`.
    pub fn splat_f64(ty: Type, value: f64) -> Self {
        Self::splat(ty, Scalar::Double(value))
    }

    /// The zero value of any non-opaque type.
    pub fn zero(ty: Type) -> Self {
        if ty.is_numeric_or_bool() {
            let zero = Scalar::zero(ty.base_type());
            let count = ty.components();
            return Self::new(ty, vec![zero; count]);
        }
        let elements = if let (Some(element), Some(length)) = (ty.element_type(), ty.array_length())
        {
            (0..length).map(|_| Self::zero(element.clone())).collect()
        } else {
            ty.fields()
                .iter()
                .map(|f| Self::zero(f.ty.clone()))
                .collect()
        };
        Self::aggregate(ty, elements)
    }

    /// GLSL constructor semantics over constant parts.
    ///
    /// A single scalar replicates into every vector component, or onto the
    /// diagonal of a matrix with zeros elsewhere. A single matrix copies the
    /// overlapping block and fills the rest from the identity. Otherwise the
    /// components of all parts are consumed in order, converting bases.
    pub fn construct(ty: Type, parts: &[Constant]) -> Self {
        if !ty.is_numeric_or_bool() {
            return Self::aggregate(ty, parts.to_vec());
        }
        let base = ty.base_type();
        let rows = ty.vector_elements() as usize;
        let cols = ty.matrix_columns() as usize;

        if let [single] = parts
            && single.ty.is_scalar()
        {
            let value = single.component(0).convert(base);
            if ty.is_matrix() {
                let zero = Scalar::zero(base);
                let components = (0..cols * rows)
                    .map(|i| if i / rows == i % rows { value } else { zero })
                    .collect();
                return Self::new(ty, components);
            }
            return Self::splat(ty, value);
        }

        if let [single] = parts
            && single.ty.is_matrix()
            && ty.is_matrix()
        {
            let src_rows = single.ty.vector_elements() as usize;
            let src_cols = single.ty.matrix_columns() as usize;
            let components = (0..cols * rows)
                .map(|i| {
                    let (c, r) = (i / rows, i % rows);
                    if c < src_cols && r < src_rows {
                        single.component(c * src_rows + r).convert(base)
                    } else if c == r {
                        Scalar::one(base)
                    } else {
                        Scalar::zero(base)
                    }
                })
                .collect();
            return Self::new(ty, components);
        }

        let components: Vec<Scalar> = parts
            .iter()
            .flat_map(|p| p.components().iter().copied())
            .take(ty.components())
            .map(|c| c.convert(base))
            .collect();
        assert_eq!(
            components.len(),
            ty.components(),
            "not enough components to construct {ty}"
        );
        Self::new(ty, components)
    }

    /// Components of a numeric constant (empty for aggregates).
    pub fn components(&self) -> &[Scalar] {
        match &self.value {
            ConstantValue::Components(c) => c,
            ConstantValue::Aggregate(_) => &[],
        }
    }

    /// Elements of an aggregate constant (empty for numeric constants).
    pub fn elements(&self) -> &[Constant] {
        match &self.value {
            ConstantValue::Aggregate(e) => e,
            ConstantValue::Components(_) => &[],
        }
    }

    /// Component `i`; a scalar constant answers every index with its value.
    pub fn component(&self, i: usize) -> Scalar {
        let components = self.components();
        if components.len() == 1 {
            components[0]
        } else {
            components[i]
        }
    }

    pub fn get_f32(&self, i: usize) -> f32 {
        self.component(i).as_f32()
    }

    pub fn get_f64(&self, i: usize) -> f64 {
        self.component(i).as_f64()
    }

    pub fn get_i64(&self, i: usize) -> i64 {
        self.component(i).as_i64()
    }

    pub fn get_u64(&self, i: usize) -> u64 {
        self.component(i).as_u64()
    }

    pub fn get_bool(&self, i: usize) -> bool {
        self.component(i).as_bool()
    }

    /// Array element with the index clamped into range.
    pub fn array_element(&self, index: i64) -> &Constant {
        let elements = self.elements();
        assert!(!elements.is_empty(), "array_element on {}", self.ty);
        let clamped = index.clamp(0, elements.len() as i64 - 1) as usize;
        &elements[clamped]
    }

    pub fn record_field(&self, index: usize) -> &Constant {
        &self.elements()[index]
    }

    /// Matrix column `index` as a vector constant.
    pub fn column(&self, index: usize) -> Constant {
        let rows = self.ty.vector_elements() as usize;
        let start = index * rows;
        Constant::new(
            self.ty.column_type(),
            self.components()[start..start + rows].to_vec(),
        )
    }

    /// Component-wise conversion to another base type.
    pub fn convert(&self, base: BaseType) -> Constant {
        match &self.value {
            ConstantValue::Components(c) => Constant::new(
                self.ty.with_base(base),
                c.iter().map(|v| v.convert(base)).collect(),
            ),
            ConstantValue::Aggregate(e) => Constant::aggregate(
                self.ty.with_base(base),
                e.iter().map(|v| v.convert(base)).collect(),
            ),
        }
    }

    /// Returns `true` if every component equals `value` (booleans compare as 0/1).
    pub fn has_value(&self, value: f64) -> bool {
        match &self.value {
            ConstantValue::Components(c) => c.iter().all(|s| s.as_f64() == value),
            ConstantValue::Aggregate(_) => false,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.has_value(0.0)
    }

    pub fn is_one(&self) -> bool {
        self.has_value(1.0)
    }

    pub fn is_negative_one(&self) -> bool {
        !self.ty.is_boolean() && self.has_value(-1.0)
    }

    /// Returns `true` if every component of an integer constant fits in 16 bits.
    pub fn is_uint16_constant(&self) -> bool {
        self.ty.is_integer_32()
            && self.components().iter().all(|c| match *c {
                Scalar::Int(v) => i16::try_from(v).is_ok(),
                Scalar::Uint(v) => u16::try_from(v).is_ok(),
                _ => false,
            })
    }

    /// Bitwise equality, including float sign and NaN payload.
    pub fn bit_eq(&self, other: &Constant) -> bool {
        if self.ty != other.ty {
            return false;
        }
        match (&self.value, &other.value) {
            (ConstantValue::Components(a), ConstantValue::Components(b)) => {
                a.iter().zip(b).all(|(x, y)| x.bit_eq(*y))
            }
            (ConstantValue::Aggregate(a), ConstantValue::Aggregate(b)) => {
                a.iter().zip(b).all(|(x, y)| x.bit_eq(y))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splat_vector() {
        let c = Constant::construct(Type::vec(4), &[Constant::float(1.5)]);
        assert_eq!(c.components(), &[Scalar::Float(1.5); 4]);
    }

    #[test]
    fn scalar_matrix_fills_diagonal() {
        let m = Constant::construct(Type::mat(3), &[Constant::float(2.0)]);
        let expected = [2.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 2.0];
        for (i, e) in expected.iter().enumerate() {
            assert_eq!(m.get_f32(i), *e);
        }
    }

    #[test]
    fn matrix_from_smaller_matrix_uses_identity() {
        let small = Constant::construct(Type::mat(2), &[Constant::float(3.0)]);
        let big = Constant::construct(Type::mat(3), &[small]);
        assert_eq!(big.get_f32(0), 3.0);
        assert_eq!(big.get_f32(4), 3.0);
        assert_eq!(big.get_f32(8), 1.0);
        assert_eq!(big.get_f32(2), 0.0);
    }

    #[test]
    fn construct_consumes_components_in_order() {
        let v = Constant::construct(
            Type::ivec(3),
            &[Constant::vec(&[1.9, -2.7]), Constant::bool(true)],
        );
        assert_eq!(
            v.components(),
            &[Scalar::Int(1), Scalar::Int(-2), Scalar::Int(1)]
        );
    }

    #[test]
    fn zero_of_aggregate() {
        let ty = Type::array(Type::vec(2), 3);
        let z = Constant::zero(ty);
        assert_eq!(z.elements().len(), 3);
        assert!(z.elements().iter().all(Constant::is_zero));
    }

    #[test]
    fn array_element_clamps() {
        let ty = Type::array(Type::int(), 3);
        let c = Constant::aggregate(ty, vec![Constant::int(1), Constant::int(2), Constant::int(3)]);
        assert_eq!(c.array_element(-5).get_i64(0), 1);
        assert_eq!(c.array_element(99).get_i64(0), 3);
    }

    #[test]
    fn conversions() {
        assert_eq!(Scalar::Float(-1.7).convert(BaseType::Int), Scalar::Int(-1));
        assert_eq!(Scalar::Int(-1).convert(BaseType::Uint), Scalar::Uint(u32::MAX));
        assert_eq!(Scalar::Float(0.0).convert(BaseType::Bool), Scalar::Bool(false));
        assert_eq!(
            Scalar::Float(1.0).convert(BaseType::Float16),
            Scalar::Float16(f16::ONE)
        );
    }

    #[test]
    fn value_predicates() {
        assert!(Constant::vec(&[0.0, 0.0]).is_zero());
        assert!(Constant::int(1).is_one());
        assert!(Constant::float(-1.0).is_negative_one());
        assert!(!Constant::bool(true).is_negative_one());
        assert!(Constant::int(-300).is_uint16_constant());
        assert!(!Constant::uint(70000).is_uint16_constant());
    }

    #[test]
    fn bit_eq_distinguishes_signed_zero() {
        assert!(!Constant::float(0.0).bit_eq(&Constant::float(-0.0)));
        assert!(Constant::float(f32::NAN).bit_eq(&Constant::float(f32::NAN)));
    }
}
