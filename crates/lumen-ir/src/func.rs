//! Functions and their overload signatures.

use crate::arena::Handle;
use crate::stmt::Block;
use crate::types::Type;
use crate::var::Variable;
use crate::ShaderStage;
use crate::diag::SourceLocation;

/// Decides whether a built-in signature exists for a shader stage.
pub type Availability = fn(ShaderStage) -> bool;

/// Identifies one signature of one function.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct SignatureId {
    pub function: Handle<Function>,
    pub index: usize,
}

/// One overload of a function.
#[derive(Clone, Debug)]
pub struct Signature {
    pub return_type: Type,
    /// Parameter variables, owned by the shader's variable arena.
    pub parameters: Vec<Handle<Variable>>,
    pub body: Block,
    /// A body was provided.
    pub is_defined: bool,
    pub is_builtin: bool,
    pub availability: Option<Availability>,
    /// Half-precision clone created on demand by precision lowering.
    pub lowered_clone: Option<SignatureId>,
    pub location: SourceLocation,
}

impl Signature {
    pub fn new(return_type: Type, parameters: Vec<Handle<Variable>>, body: Block) -> Self {
        Self {
            return_type,
            parameters,
            body,
            is_defined: true,
            is_builtin: false,
            availability: None,
            lowered_clone: None,
            location: SourceLocation::default(),
        }
    }

    /// A built-in signature whose body was imported from the built-in
    /// function library.
    pub fn builtin(return_type: Type, parameters: Vec<Handle<Variable>>, body: Block) -> Self {
        Self {
            is_builtin: true,
            ..Self::new(return_type, parameters, body)
        }
    }

    pub fn is_available(&self, stage: ShaderStage) -> bool {
        self.availability.is_none_or(|pred| pred(stage))
    }
}

/// A named overload set.
#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub signatures: Vec<Signature>,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signatures: Vec::new(),
        }
    }

    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.signatures.push(signature);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_signature() {
        let sig = Signature::builtin(Type::float(), Vec::new(), Vec::new());
        assert!(sig.is_builtin);
        assert!(sig.is_defined);
        assert!(sig.is_available(ShaderStage::Vertex));
    }

    #[test]
    fn availability_predicate() {
        let mut sig = Signature::builtin(Type::float(), Vec::new(), Vec::new());
        sig.availability = Some(|stage| stage == ShaderStage::Fragment);
        assert!(sig.is_available(ShaderStage::Fragment));
        assert!(!sig.is_available(ShaderStage::Compute));
    }

    #[test]
    fn overload_set() {
        let f = Function::new("helper")
            .with_signature(Signature::new(Type::float(), Vec::new(), Vec::new()))
            .with_signature(Signature::new(Type::vec(2), Vec::new(), Vec::new()));
        assert_eq!(f.signatures.len(), 2);
        assert_eq!(f.name, "helper");
    }
}
