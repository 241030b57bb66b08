//! Lumen intermediate representation.
//!
//! A typed, tree-shaped IR for one shader stage. Rvalue and statement trees
//! are owned; variables and functions live in per-shader arenas and are
//! referenced from the tree through [`Handle`]s. Types are interned in a
//! process-wide registry.

pub mod arena;
pub mod builder;
pub mod const_eval;
mod constant;
mod diag;
mod display;
mod error;
mod expr;
mod func;
mod rvalue;
mod stmt;
mod types;
mod validate;
mod var;
pub mod visit;

pub use arena::{Arena, Handle};
pub use constant::{Constant, ConstantValue, Scalar};
pub use diag::{Diagnostic, DiagnosticSink, Severity, SourceLocation, has_errors};
pub use display::{Printer, dump_shader};
pub use error::IrError;
pub use expr::{ExprOp, Expression};
pub use func::{Availability, Function, Signature, SignatureId};
pub use rvalue::{Deref, Rvalue, Swizzle, SwizzleMask, TexLod, TexOp, Texture};
pub use stmt::{Assign, Block, Jump, Statement, full_write_mask};
pub use types::{BaseType, SamplerDim, StructField, Type, TypeDesc, TypeRegistry};
pub use validate::validate_shader;
pub use var::{Interpolation, MemoryAccess, Precision, Variable, VariableMode};

/// Pipeline stage a shader is compiled for.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum ShaderStage {
    Vertex,
    TessControl,
    TessEvaluation,
    Geometry,
    Fragment,
    Compute,
}

/// One compiled shader stage.
#[derive(Clone, Debug)]
pub struct Shader {
    pub stage: ShaderStage,
    /// Every variable: globals, parameters, locals and temporaries.
    pub variables: Arena<Variable>,
    pub functions: Arena<Function>,
    /// Variables declared at global scope, in declaration order.
    pub globals: Vec<Handle<Variable>>,
}

impl Shader {
    pub fn new(stage: ShaderStage) -> Self {
        Self {
            stage,
            variables: Arena::new(),
            functions: Arena::new(),
            globals: Vec::new(),
        }
    }

    /// Adds a global-scope variable.
    pub fn add_global(&mut self, var: Variable) -> Handle<Variable> {
        let handle = self.variables.append(var);
        self.globals.push(handle);
        handle
    }

    /// Adds a function-local variable. The caller emits its declaration.
    pub fn add_local(&mut self, var: Variable) -> Handle<Variable> {
        self.variables.append(var)
    }

    /// Adds a compiler temporary. The caller emits its declaration.
    pub fn new_temporary(&mut self, name: &str, ty: Type) -> Handle<Variable> {
        self.variables
            .append(Variable::new(name, ty, VariableMode::Temporary))
    }

    pub fn is_global(&self, var: Handle<Variable>) -> bool {
        self.globals.contains(&var)
    }

    /// Whole-variable dereference.
    pub fn deref(&self, var: Handle<Variable>) -> Deref {
        Deref::variable(var, self.variables[var].ty.clone())
    }

    /// Whole-variable read.
    pub fn read(&self, var: Handle<Variable>) -> Rvalue {
        Rvalue::Deref(self.deref(var))
    }

    pub fn add_function(&mut self, function: Function) -> Handle<Function> {
        self.functions.append(function)
    }

    /// Adds a signature to the named function, creating the function if
    /// needed.
    pub fn add_signature(&mut self, name: &str, signature: Signature) -> SignatureId {
        let function = match self.find_function(name) {
            Some(f) => f,
            None => self.add_function(Function::new(name)),
        };
        let signatures = &mut self.functions[function].signatures;
        signatures.push(signature);
        SignatureId {
            function,
            index: signatures.len() - 1,
        }
    }

    /// Adds a `void main()` with the given body.
    pub fn add_main(&mut self, body: Block) -> SignatureId {
        self.add_signature("main", Signature::new(Type::void(), Vec::new(), body))
    }

    pub fn find_function(&self, name: &str) -> Option<Handle<Function>> {
        self.functions
            .iter()
            .find(|(_, f)| f.name == name)
            .map(|(h, _)| h)
    }

    /// The defined `main` signature, if any.
    pub fn main_signature(&self) -> Option<SignatureId> {
        let function = self.find_function("main")?;
        let index = self.functions[function]
            .signatures
            .iter()
            .position(|s| s.is_defined && s.parameters.is_empty())?;
        Some(SignatureId { function, index })
    }

    pub fn signature(&self, id: SignatureId) -> &Signature {
        &self.functions[id.function].signatures[id.index]
    }

    pub fn signature_mut(&mut self, id: SignatureId) -> &mut Signature {
        &mut self.functions[id.function].signatures[id.index]
    }

    pub fn try_signature(&self, id: SignatureId) -> Option<&Signature> {
        self.functions
            .try_get(id.function)
            .and_then(|f| f.signatures.get(id.index))
    }

    /// Every signature of every live function.
    pub fn signature_ids(&self) -> Vec<SignatureId> {
        self.functions
            .iter()
            .flat_map(|(function, f)| {
                (0..f.signatures.len()).map(move |index| SignatureId { function, index })
            })
            .collect()
    }

    /// Signatures whose bodies user passes should rewrite: defined and not
    /// built in.
    pub fn user_signature_ids(&self) -> Vec<SignatureId> {
        self.signature_ids()
            .into_iter()
            .filter(|&id| {
                let sig = self.signature(id);
                sig.is_defined && !sig.is_builtin
            })
            .collect()
    }

    /// Moves a body out so it can be rewritten while the rest of the shader
    /// is mutated.
    pub fn take_body(&mut self, id: SignatureId) -> Block {
        std::mem::take(&mut self.signature_mut(id).body)
    }

    pub fn restore_body(&mut self, id: SignatureId, body: Block) {
        self.signature_mut(id).body = body;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_lookup() {
        let mut shader = Shader::new(ShaderStage::Fragment);
        assert!(shader.main_signature().is_none());
        let id = shader.add_main(Vec::new());
        assert_eq!(shader.main_signature(), Some(id));
        assert_eq!(shader.signature(id).return_type, Type::void());
    }

    #[test]
    fn overloads_share_function() {
        let mut shader = Shader::new(ShaderStage::Vertex);
        let a = shader.add_signature("f", Signature::new(Type::float(), Vec::new(), Vec::new()));
        let b = shader.add_signature("f", Signature::new(Type::int(), Vec::new(), Vec::new()));
        assert_eq!(a.function, b.function);
        assert_eq!(b.index, 1);
        assert_eq!(shader.signature_ids().len(), 2);
    }

    #[test]
    fn take_and_restore_body() {
        let mut shader = Shader::new(ShaderStage::Vertex);
        let id = shader.add_main(vec![Statement::Barrier]);
        let body = shader.take_body(id);
        assert!(shader.signature(id).body.is_empty());
        shader.restore_body(id, body);
        assert_eq!(shader.signature(id).body.len(), 1);
    }
}
