//! Type system for the lumen IR.
//!
//! Types are interned in a process-wide registry keyed by structural shape,
//! so constructing the same shape twice yields the same shared allocation.
//! A [`Type`] is a cheap reference-counted handle; it outlives any single
//! compile and is never owned by one tree.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError};

/// The base kind of a type.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum BaseType {
    Bool,
    Int,
    Uint,
    Float,
    Float16,
    Double,
    Int16,
    Uint16,
    Int64,
    Uint64,
    Sampler,
    Image,
    Struct,
    Array,
    Void,
}

impl BaseType {
    /// Returns `true` for the numeric and boolean kinds that can form vectors.
    pub fn is_numeric_or_bool(self) -> bool {
        !matches!(
            self,
            Self::Sampler | Self::Image | Self::Struct | Self::Array | Self::Void
        )
    }

    /// Returns `true` for `Float`, `Float16` and `Double`.
    pub fn is_floating(self) -> bool {
        matches!(self, Self::Float | Self::Float16 | Self::Double)
    }

    /// Returns `true` for every integer kind regardless of width.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Int | Self::Uint | Self::Int16 | Self::Uint16 | Self::Int64 | Self::Uint64
        )
    }

    /// Returns `true` for the signed integer kinds.
    pub fn is_signed_integer(self) -> bool {
        matches!(self, Self::Int | Self::Int16 | Self::Int64)
    }

    /// Returns `true` for the unsigned integer kinds.
    pub fn is_unsigned_integer(self) -> bool {
        matches!(self, Self::Uint | Self::Uint16 | Self::Uint64)
    }

    /// Returns `true` for 64-bit kinds.
    pub fn is_64bit(self) -> bool {
        matches!(self, Self::Double | Self::Int64 | Self::Uint64)
    }

    /// Returns `true` for 16-bit kinds.
    pub fn is_16bit(self) -> bool {
        matches!(self, Self::Float16 | Self::Int16 | Self::Uint16)
    }

    /// Width of one component in bits, or 0 for non-numeric kinds.
    pub fn bit_size(self) -> u32 {
        match self {
            Self::Bool | Self::Int | Self::Uint | Self::Float => 32,
            Self::Float16 | Self::Int16 | Self::Uint16 => 16,
            Self::Double | Self::Int64 | Self::Uint64 => 64,
            _ => 0,
        }
    }
}

/// Dimensionality of a sampler or image.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum SamplerDim {
    D1,
    D2,
    D3,
    Cube,
    Rect,
    Buffer,
    External,
    Ms,
}

/// A member of a struct type.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct StructField {
    pub name: String,
    pub ty: Type,
}

/// The structural shape of a type; the registry key.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum TypeDesc {
    Void,
    /// Scalars, vectors and matrices of a numeric or boolean base.
    Numeric {
        base: BaseType,
        vector_elements: u8,
        matrix_columns: u8,
    },
    Sampler {
        dim: SamplerDim,
        shadow: bool,
        arrayed: bool,
        sampled: BaseType,
    },
    Image {
        dim: SamplerDim,
        arrayed: bool,
        sampled: BaseType,
    },
    Array {
        element: Type,
        length: u32,
    },
    Struct {
        name: String,
        fields: Vec<StructField>,
    },
}

/// An interned, shared type descriptor.
#[derive(Clone)]
pub struct Type(Arc<TypeDesc>);

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || *self.0 == *other.0
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

struct RegistryState {
    users: usize,
    table: Option<HashMap<TypeDesc, Type>>,
}

static REGISTRY: Mutex<RegistryState> = Mutex::new(RegistryState {
    users: 0,
    table: None,
});

/// The process-wide type registry.
///
/// Interning works without an explicit [`acquire`](Self::acquire); hosts that
/// want the table dropped at a lifetime boundary bracket their use with
/// `acquire`/`release`. Types held by live trees stay valid after the last
/// release because each [`Type`] owns a reference to its descriptor.
pub struct TypeRegistry;

impl TypeRegistry {
    /// Registers a user of the registry.
    pub fn acquire() {
        let mut state = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
        state.users += 1;
        state.table.get_or_insert_with(HashMap::new);
    }

    /// Unregisters a user; the last release drops the interning table.
    pub fn release() {
        let mut state = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
        assert!(state.users > 0, "type registry released more often than acquired");
        state.users -= 1;
        if state.users == 0 {
            log::debug!("releasing type registry");
            state.table = None;
        }
    }

    /// Number of outstanding `acquire` calls.
    pub fn live_users() -> usize {
        REGISTRY
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .users
    }

    /// Number of interned shapes currently held by the registry.
    pub fn interned_count() -> usize {
        REGISTRY
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .table
            .as_ref()
            .map_or(0, HashMap::len)
    }

    fn intern(desc: TypeDesc) -> Type {
        let mut state = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .table
            .get_or_insert_with(HashMap::new)
            .entry(desc)
            .or_insert_with_key(|desc| Type(Arc::new(desc.clone())))
            .clone()
    }
}

impl Type {
    /// Interns an arbitrary shape.
    pub fn from_desc(desc: TypeDesc) -> Self {
        if let TypeDesc::Numeric {
            base,
            vector_elements,
            matrix_columns,
        } = &desc
        {
            assert!(
                base.is_numeric_or_bool(),
                "numeric type with non-numeric base {base:?}"
            );
            assert!(
                (1..=4).contains(vector_elements) && (1..=4).contains(matrix_columns),
                "bad shape {vector_elements}x{matrix_columns}"
            );
        }
        TypeRegistry::intern(desc)
    }

    pub fn void() -> Self {
        Self::from_desc(TypeDesc::Void)
    }

    pub fn scalar(base: BaseType) -> Self {
        Self::vector(base, 1)
    }

    /// A vector (or scalar when `size == 1`) of `base`.
    pub fn vector(base: BaseType, size: u8) -> Self {
        Self::from_desc(TypeDesc::Numeric {
            base,
            vector_elements: size,
            matrix_columns: 1,
        })
    }

    /// A matrix with `columns` columns of `rows`-element vectors.
    pub fn matrix(base: BaseType, columns: u8, rows: u8) -> Self {
        assert!(base.is_floating(), "matrix of non-float base {base:?}");
        Self::from_desc(TypeDesc::Numeric {
            base,
            vector_elements: rows,
            matrix_columns: columns,
        })
    }

    pub fn array(element: Type, length: u32) -> Self {
        Self::from_desc(TypeDesc::Array { element, length })
    }

    pub fn record(name: impl Into<String>, fields: Vec<StructField>) -> Self {
        Self::from_desc(TypeDesc::Struct {
            name: name.into(),
            fields,
        })
    }

    pub fn sampler(dim: SamplerDim, shadow: bool, arrayed: bool, sampled: BaseType) -> Self {
        Self::from_desc(TypeDesc::Sampler {
            dim,
            shadow,
            arrayed,
            sampled,
        })
    }

    pub fn image(dim: SamplerDim, arrayed: bool, sampled: BaseType) -> Self {
        Self::from_desc(TypeDesc::Image {
            dim,
            arrayed,
            sampled,
        })
    }

    pub fn bool() -> Self {
        Self::scalar(BaseType::Bool)
    }

    pub fn int() -> Self {
        Self::scalar(BaseType::Int)
    }

    pub fn uint() -> Self {
        Self::scalar(BaseType::Uint)
    }

    pub fn float() -> Self {
        Self::scalar(BaseType::Float)
    }

    pub fn float16() -> Self {
        Self::scalar(BaseType::Float16)
    }

    pub fn double() -> Self {
        Self::scalar(BaseType::Double)
    }

    pub fn vec(size: u8) -> Self {
        Self::vector(BaseType::Float, size)
    }

    pub fn ivec(size: u8) -> Self {
        Self::vector(BaseType::Int, size)
    }

    pub fn uvec(size: u8) -> Self {
        Self::vector(BaseType::Uint, size)
    }

    pub fn bvec(size: u8) -> Self {
        Self::vector(BaseType::Bool, size)
    }

    /// A square float matrix.
    pub fn mat(size: u8) -> Self {
        Self::matrix(BaseType::Float, size, size)
    }

    /// The interned shape.
    pub fn desc(&self) -> &TypeDesc {
        &self.0
    }

    pub fn base_type(&self) -> BaseType {
        match &*self.0 {
            TypeDesc::Void => BaseType::Void,
            TypeDesc::Numeric { base, .. } => *base,
            TypeDesc::Sampler { .. } => BaseType::Sampler,
            TypeDesc::Image { .. } => BaseType::Image,
            TypeDesc::Array { .. } => BaseType::Array,
            TypeDesc::Struct { .. } => BaseType::Struct,
        }
    }

    /// Rows of a matrix, width of a vector, 1 for scalars, 0 otherwise.
    pub fn vector_elements(&self) -> u8 {
        match &*self.0 {
            TypeDesc::Numeric {
                vector_elements, ..
            } => *vector_elements,
            _ => 0,
        }
    }

    /// Columns of a matrix, 1 for scalars and vectors, 0 otherwise.
    pub fn matrix_columns(&self) -> u8 {
        match &*self.0 {
            TypeDesc::Numeric { matrix_columns, .. } => *matrix_columns,
            _ => 0,
        }
    }

    /// Number of scalar components of a numeric type.
    pub fn components(&self) -> usize {
        self.vector_elements() as usize * self.matrix_columns() as usize
    }

    pub fn is_void(&self) -> bool {
        matches!(&*self.0, TypeDesc::Void)
    }

    pub fn is_numeric_or_bool(&self) -> bool {
        matches!(&*self.0, TypeDesc::Numeric { .. })
    }

    pub fn is_scalar(&self) -> bool {
        self.is_numeric_or_bool() && self.vector_elements() == 1 && self.matrix_columns() == 1
    }

    pub fn is_vector(&self) -> bool {
        self.is_numeric_or_bool() && self.vector_elements() > 1 && self.matrix_columns() == 1
    }

    pub fn is_matrix(&self) -> bool {
        self.matrix_columns() > 1
    }

    pub fn is_array(&self) -> bool {
        matches!(&*self.0, TypeDesc::Array { .. })
    }

    pub fn is_record(&self) -> bool {
        matches!(&*self.0, TypeDesc::Struct { .. })
    }

    pub fn is_sampler(&self) -> bool {
        matches!(&*self.0, TypeDesc::Sampler { .. })
    }

    pub fn is_image(&self) -> bool {
        matches!(&*self.0, TypeDesc::Image { .. })
    }

    pub fn is_boolean(&self) -> bool {
        self.is_numeric_or_bool() && self.base_type() == BaseType::Bool
    }

    /// 32-bit float scalars, vectors and matrices.
    pub fn is_float(&self) -> bool {
        self.is_numeric_or_bool() && self.base_type() == BaseType::Float
    }

    pub fn is_float16(&self) -> bool {
        self.is_numeric_or_bool() && self.base_type() == BaseType::Float16
    }

    /// 16- or 32-bit float.
    pub fn is_float_16_32(&self) -> bool {
        self.is_float() || self.is_float16()
    }

    pub fn is_double(&self) -> bool {
        self.is_numeric_or_bool() && self.base_type() == BaseType::Double
    }

    /// Any floating-point width.
    pub fn is_floating(&self) -> bool {
        self.is_numeric_or_bool() && self.base_type().is_floating()
    }

    /// Any integer width.
    pub fn is_integer(&self) -> bool {
        self.is_numeric_or_bool() && self.base_type().is_integer()
    }

    /// 32-bit `int` or `uint`.
    pub fn is_integer_32(&self) -> bool {
        matches!(self.base_type(), BaseType::Int | BaseType::Uint) && self.is_numeric_or_bool()
    }

    pub fn is_integer_16(&self) -> bool {
        matches!(self.base_type(), BaseType::Int16 | BaseType::Uint16)
    }

    pub fn is_integer_64(&self) -> bool {
        matches!(self.base_type(), BaseType::Int64 | BaseType::Uint64)
    }

    pub fn is_64bit(&self) -> bool {
        self.is_numeric_or_bool() && self.base_type().is_64bit()
    }

    /// Returns the type with the same shape and a different base.
    pub fn with_base(&self, base: BaseType) -> Type {
        match &*self.0 {
            TypeDesc::Numeric {
                vector_elements,
                matrix_columns,
                ..
            } => Self::from_desc(TypeDesc::Numeric {
                base,
                vector_elements: *vector_elements,
                matrix_columns: *matrix_columns,
            }),
            TypeDesc::Array { element, length } => Self::array(element.with_base(base), *length),
            _ => panic!("with_base({base:?}) on non-numeric type {self}"),
        }
    }

    /// Returns a vector type of the same base with `size` components.
    pub fn with_vector_elements(&self, size: u8) -> Type {
        Self::vector(self.base_type(), size)
    }

    /// The type of one scalar component.
    pub fn scalar_type(&self) -> Type {
        Self::scalar(self.base_type())
    }

    /// The vector type of one matrix column.
    pub fn column_type(&self) -> Type {
        assert!(self.is_matrix(), "column_type of non-matrix {self}");
        Self::vector(self.base_type(), self.vector_elements())
    }

    /// The vector type of one matrix row.
    pub fn row_type(&self) -> Type {
        assert!(self.is_matrix(), "row_type of non-matrix {self}");
        Self::vector(self.base_type(), self.matrix_columns())
    }

    /// The transposed matrix type.
    pub fn transposed(&self) -> Type {
        Self::matrix(
            self.base_type(),
            self.vector_elements(),
            self.matrix_columns(),
        )
    }

    /// Element type of an array.
    pub fn element_type(&self) -> Option<&Type> {
        match &*self.0 {
            TypeDesc::Array { element, .. } => Some(element),
            _ => None,
        }
    }

    /// Length of an array type.
    pub fn array_length(&self) -> Option<u32> {
        match &*self.0 {
            TypeDesc::Array { length, .. } => Some(*length),
            _ => None,
        }
    }

    /// Fields of a struct type (empty for other types).
    pub fn fields(&self) -> &[StructField] {
        match &*self.0 {
            TypeDesc::Struct { fields, .. } => fields,
            _ => &[],
        }
    }

    pub fn field_type(&self, index: usize) -> Option<&Type> {
        self.fields().get(index).map(|f| &f.ty)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields().iter().position(|f| f.name == name)
    }

    /// Type produced by indexing: array element, matrix column or vector component.
    pub fn index_result(&self) -> Option<Type> {
        if let Some(element) = self.element_type() {
            Some(element.clone())
        } else if self.is_matrix() {
            Some(self.column_type())
        } else if self.is_vector() {
            Some(self.scalar_type())
        } else {
            None
        }
    }

    /// Number of elements that can be indexed, if this type is indexable.
    pub fn index_bound(&self) -> Option<u32> {
        if let Some(length) = self.array_length() {
            Some(length)
        } else if self.is_matrix() {
            Some(self.matrix_columns() as u32)
        } else if self.is_vector() {
            Some(self.vector_elements() as u32)
        } else {
            None
        }
    }

    /// Returns `true` if the type contains an array, sampler or image anywhere.
    pub fn contains_opaque(&self) -> bool {
        match &*self.0 {
            TypeDesc::Sampler { .. } | TypeDesc::Image { .. } => true,
            TypeDesc::Array { element, .. } => element.contains_opaque(),
            TypeDesc::Struct { fields, .. } => fields.iter().any(|f| f.ty.contains_opaque()),
            _ => false,
        }
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

fn base_prefix(base: BaseType) -> &'static str {
    match base {
        BaseType::Bool => "b",
        BaseType::Int => "i",
        BaseType::Uint => "u",
        BaseType::Float => "",
        BaseType::Float16 => "f16",
        BaseType::Double => "d",
        BaseType::Int16 => "i16",
        BaseType::Uint16 => "u16",
        BaseType::Int64 => "i64",
        BaseType::Uint64 => "u64",
        _ => "?",
    }
}

fn base_scalar_name(base: BaseType) -> &'static str {
    match base {
        BaseType::Bool => "bool",
        BaseType::Int => "int",
        BaseType::Uint => "uint",
        BaseType::Float => "float",
        BaseType::Float16 => "float16_t",
        BaseType::Double => "double",
        BaseType::Int16 => "int16_t",
        BaseType::Uint16 => "uint16_t",
        BaseType::Int64 => "int64_t",
        BaseType::Uint64 => "uint64_t",
        BaseType::Sampler => "sampler",
        BaseType::Image => "image",
        BaseType::Struct => "struct",
        BaseType::Array => "array",
        BaseType::Void => "void",
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            TypeDesc::Void => write!(f, "void"),
            TypeDesc::Numeric {
                base,
                vector_elements,
                matrix_columns,
            } => match (*vector_elements, *matrix_columns) {
                (1, 1) => write!(f, "{}", base_scalar_name(*base)),
                (n, 1) => write!(f, "{}vec{n}", base_prefix(*base)),
                (r, c) if r == c => write!(f, "{}mat{c}", base_prefix(*base)),
                (r, c) => write!(f, "{}mat{c}x{r}", base_prefix(*base)),
            },
            TypeDesc::Sampler {
                dim,
                shadow,
                arrayed,
                sampled,
            } => {
                write!(f, "{}sampler{dim:?}", base_prefix(*sampled))?;
                if *arrayed {
                    write!(f, "Array")?;
                }
                if *shadow {
                    write!(f, "Shadow")?;
                }
                Ok(())
            }
            TypeDesc::Image {
                dim,
                arrayed,
                sampled,
            } => {
                write!(f, "{}image{dim:?}", base_prefix(*sampled))?;
                if *arrayed {
                    write!(f, "Array")?;
                }
                Ok(())
            }
            TypeDesc::Array { element, length } => write!(f, "{element}[{length}]"),
            TypeDesc::Struct { name, .. } => write!(f, "{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_shares_allocation() {
        let a = Type::vec(4);
        let b = Type::vector(BaseType::Float, 4);
        assert!(Arc::ptr_eq(&a.0, &b.0));
        assert_eq!(a, b);
    }

    #[test]
    fn different_shapes_not_equal() {
        assert_ne!(Type::vec(3), Type::vec(4));
        assert_ne!(Type::vec(4), Type::ivec(4));
        assert_ne!(Type::mat(2), Type::vec(4));
    }

    #[test]
    fn matrix_shape() {
        let m = Type::matrix(BaseType::Float, 3, 2);
        assert_eq!(m.matrix_columns(), 3);
        assert_eq!(m.vector_elements(), 2);
        assert_eq!(m.components(), 6);
        assert_eq!(m.column_type(), Type::vec(2));
        assert_eq!(m.row_type(), Type::vec(3));
        assert_eq!(m.to_string(), "mat3x2");
        assert_eq!(m.transposed().to_string(), "mat2x3");
    }

    #[test]
    fn with_base_preserves_shape() {
        let v = Type::vec(3).with_base(BaseType::Float16);
        assert_eq!(v.vector_elements(), 3);
        assert!(v.is_float16());
        assert_eq!(v.to_string(), "f16vec3");
    }

    #[test]
    fn array_and_record() {
        let arr = Type::array(Type::vec(2), 4);
        assert_eq!(arr.array_length(), Some(4));
        assert_eq!(arr.index_result(), Some(Type::vec(2)));
        let rec = Type::record(
            "Light",
            vec![
                StructField {
                    name: "color".into(),
                    ty: Type::vec(3),
                },
                StructField {
                    name: "power".into(),
                    ty: Type::float(),
                },
            ],
        );
        assert_eq!(rec.field_index("power"), Some(1));
        assert_eq!(rec.field_type(0), Some(&Type::vec(3)));
        assert!(!rec.contains_opaque());
    }

    #[test]
    fn registry_release_keeps_live_types_valid() {
        TypeRegistry::acquire();
        let before = Type::vec(2);
        assert!(TypeRegistry::live_users() >= 1);
        TypeRegistry::release();
        // Structural equality still holds even if the table was dropped.
        assert_eq!(before, Type::vec(2));
        assert_eq!(before.components(), 2);
    }

    #[test]
    #[should_panic(expected = "matrix of non-float")]
    fn integer_matrix_is_rejected() {
        let _ = Type::matrix(BaseType::Int, 2, 2);
    }
}
