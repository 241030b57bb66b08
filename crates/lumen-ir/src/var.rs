//! Variables and their qualifiers.

use bitflags::bitflags;

use crate::constant::Constant;
use crate::types::Type;
use crate::diag::SourceLocation;

/// Storage class of a variable.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum VariableMode {
    /// Function-local or global automatic storage.
    Auto,
    Uniform,
    ShaderStorage,
    ShaderShared,
    /// Stage input.
    In,
    /// Stage output.
    Out,
    FunctionIn,
    FunctionOut,
    FunctionInOut,
    /// `const in` function parameter.
    ConstIn,
    /// Built-in system value, such as the fragment coordinate.
    SystemValue,
    /// Compiler-generated temporary.
    Temporary,
}

impl VariableMode {
    /// Returns `true` for function parameters.
    pub fn is_parameter(self) -> bool {
        matches!(
            self,
            Self::FunctionIn | Self::FunctionOut | Self::FunctionInOut | Self::ConstIn
        )
    }

    /// Returns `true` if writes to this variable are observable outside the
    /// function that makes them.
    pub fn is_externally_visible(self) -> bool {
        matches!(
            self,
            Self::Out
                | Self::ShaderStorage
                | Self::ShaderShared
                | Self::FunctionOut
                | Self::FunctionInOut
        )
    }

    /// Returns `true` if the value is supplied from outside the shader.
    pub fn is_external_input(self) -> bool {
        matches!(
            self,
            Self::Uniform | Self::ShaderStorage | Self::ShaderShared | Self::In | Self::SystemValue
        )
    }

    /// Modes whose storage is owned by a single function invocation.
    pub fn is_local(self) -> bool {
        matches!(self, Self::Auto | Self::Temporary)
    }
}

/// Declared precision qualifier.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum Precision {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl Precision {
    /// `lowp` and `mediump` may be evaluated with 16 bits.
    pub fn is_reduced(self) -> bool {
        matches!(self, Self::Low | Self::Medium)
    }
}

#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub enum Interpolation {
    #[default]
    None,
    Smooth,
    Flat,
    NoPerspective,
}

bitflags! {
    /// Memory qualifiers on buffer and image variables.
    #[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
    pub struct MemoryAccess: u8 {
        const COHERENT = 1 << 0;
        const VOLATILE = 1 << 1;
        const RESTRICT = 1 << 2;
        const READ_ONLY = 1 << 3;
        const WRITE_ONLY = 1 << 4;
    }
}

/// A variable. Owned by the shader's variable arena and referenced from the
/// tree through handles.
#[derive(Clone, Debug)]
pub struct Variable {
    pub name: String,
    pub ty: Type,
    pub mode: VariableMode,
    pub precision: Precision,
    pub interpolation: Interpolation,
    pub invariant: bool,
    pub precise: bool,
    pub memory: MemoryAccess,
    pub read_only: bool,
    /// Value known at compile time, set by constant-variable marking or by
    /// the front end for `const` declarations.
    pub constant_value: Option<Constant>,
    /// Declared initializer of a `const` or uniform variable.
    pub constant_initializer: Option<Constant>,
    pub location: SourceLocation,
}

impl Variable {
    pub fn new(name: impl Into<String>, ty: Type, mode: VariableMode) -> Self {
        Self {
            name: name.into(),
            ty,
            mode,
            precision: Precision::None,
            interpolation: Interpolation::None,
            invariant: false,
            precise: false,
            memory: MemoryAccess::empty(),
            read_only: false,
            constant_value: None,
            constant_initializer: None,
            location: SourceLocation::default(),
        }
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    /// A read-only variable with a known value.
    pub fn constant(name: impl Into<String>, value: Constant) -> Self {
        let mut var = Self::new(name, value.ty.clone(), VariableMode::Auto);
        var.read_only = true;
        var.constant_initializer = Some(value.clone());
        var.constant_value = Some(value);
        var
    }

    /// Reads of this variable may be replaced by its constant value.
    pub fn known_value(&self) -> Option<&Constant> {
        self.constant_value.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes() {
        assert!(VariableMode::FunctionInOut.is_parameter());
        assert!(VariableMode::FunctionInOut.is_externally_visible());
        assert!(!VariableMode::Temporary.is_externally_visible());
        assert!(VariableMode::Uniform.is_external_input());
        assert!(VariableMode::Auto.is_local());
    }

    #[test]
    fn constant_variable() {
        let v = Variable::constant("k", Constant::float(2.0));
        assert!(v.read_only);
        assert_eq!(v.ty, Type::float());
        assert_eq!(v.known_value().map(|c| c.get_f32(0)), Some(2.0));
    }

    #[test]
    fn memory_flags() {
        let m = MemoryAccess::COHERENT | MemoryAccess::READ_ONLY;
        assert!(m.contains(MemoryAccess::READ_ONLY));
        assert!(!m.contains(MemoryAccess::VOLATILE));
    }

    #[test]
    fn reduced_precision() {
        assert!(Precision::Medium.is_reduced());
        assert!(!Precision::High.is_reduced());
        assert!(!Precision::None.is_reduced());
    }
}
