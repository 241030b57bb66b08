//! Compile-time evaluation of rvalue trees.
//!
//! [`constant_value`] answers `Some(constant)` when a tree has a value known
//! at compile time and `None` otherwise: uninitialised variables, uniforms,
//! texture lookups, derivatives, noise and interpolation never fold.
//! Built-in function bodies are run by a small statement interpreter through
//! [`call_value`].

mod bits;
mod interp;
mod ops;

use std::collections::HashMap;

use crate::Shader;
use crate::arena::{Arena, Handle};
use crate::constant::Constant;
use crate::func::{Function, Signature};
use crate::rvalue::{Deref, Rvalue};
use crate::var::Variable;

pub use interp::call_value;

/// Where the evaluator looks up variables and functions.
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    pub variables: &'a Arena<Variable>,
    /// Needed to run nested built-in calls inside built-in bodies.
    pub functions: Option<&'a Arena<Function>>,
    /// Values that take precedence over each variable's `constant_value`.
    pub bindings: Option<&'a HashMap<Handle<Variable>, Constant>>,
}

impl<'a> EvalContext<'a> {
    pub fn new(variables: &'a Arena<Variable>) -> Self {
        Self {
            variables,
            functions: None,
            bindings: None,
        }
    }

    pub fn for_shader(shader: &'a Shader) -> Self {
        Self {
            variables: &shader.variables,
            functions: Some(&shader.functions),
            bindings: None,
        }
    }

    pub fn with_bindings(self, bindings: &'a HashMap<Handle<Variable>, Constant>) -> Self {
        Self {
            bindings: Some(bindings),
            ..self
        }
    }

    fn variable_value(&self, var: Handle<Variable>) -> Option<Constant> {
        if let Some(value) = self.bindings.and_then(|b| b.get(&var)) {
            return Some(value.clone());
        }
        self.variables.try_get(var)?.constant_value.clone()
    }

    pub(crate) fn signature(&self, callee: crate::SignatureId) -> Option<&'a Signature> {
        self.functions?
            .try_get(callee.function)?
            .signatures
            .get(callee.index)
    }
}

/// Evaluates `rv` at compile time.
pub fn constant_value(rv: &Rvalue, ctx: &EvalContext<'_>) -> Option<Constant> {
    match rv {
        Rvalue::Constant(c) => Some(c.clone()),
        Rvalue::Texture(_) => None,
        Rvalue::Deref(d) => deref_value(d, ctx),
        Rvalue::Swizzle(s) => {
            let val = constant_value(&s.val, ctx)?;
            let components = s.mask.as_slice().iter().map(|&c| val.component(c as usize));
            Some(Constant::new(s.ty.clone(), components.collect()))
        }
        Rvalue::Expression(e) => {
            if e.op.has_side_inputs() {
                return None;
            }
            let args = e
                .operands
                .iter()
                .map(|o| constant_value(o, ctx))
                .collect::<Option<Vec<_>>>()?;
            ops::fold(e.op, &e.ty, &args)
        }
    }
}

fn deref_value(d: &Deref, ctx: &EvalContext<'_>) -> Option<Constant> {
    match d {
        Deref::Variable { var, .. } => ctx.variable_value(*var),
        Deref::Array { array, index, ty } => {
            let index = constant_value(index, ctx)?.get_i64(0);
            let array = constant_value(array, ctx)?;
            let value = if array.ty.is_array() {
                array.array_element(index).clone()
            } else if array.ty.is_matrix() {
                let columns = i64::from(array.ty.matrix_columns());
                array.column(index.clamp(0, columns - 1) as usize)
            } else {
                let width = array.ty.components() as i64;
                Constant::scalar(array.component(index.clamp(0, width - 1) as usize))
            };
            debug_assert_eq!(&value.ty, ty);
            Some(value)
        }
        Deref::Record { record, field, .. } => {
            Some(constant_value(record, ctx)?.record_field(*field).clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{add, channel, mul, swizzle, unop};
    use crate::expr::ExprOp;
    use crate::rvalue::Texture;
    use crate::types::{SamplerDim, Type};
    use crate::var::VariableMode;
    use crate::{BaseType, Scalar, ShaderStage};

    fn eval(shader: &Shader, rv: &Rvalue) -> Option<Constant> {
        constant_value(rv, &EvalContext::for_shader(shader))
    }

    #[test]
    fn vector_addition_folds() {
        let shader = Shader::new(ShaderStage::Fragment);
        let rv = add(
            Constant::splat_f64(Type::vec(4), 1.0).into(),
            Constant::splat_f64(Type::vec(4), 2.0).into(),
        );
        let folded = eval(&shader, &rv).expect("constant");
        assert_eq!(folded, Constant::splat_f64(Type::vec(4), 3.0));
        assert_eq!(folded.to_string(), "(constant vec4 (3.0 3.0 3.0 3.0))");
    }

    #[test]
    fn variables_fold_only_with_known_values() {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let k = shader.add_local(Variable::constant("k", Constant::float(4.0)));
        let u = shader.add_global(Variable::new("u", Type::float(), VariableMode::Uniform));
        let t = shader.new_temporary("t", Type::float());

        assert_eq!(eval(&shader, &mul(shader.read(k), shader.read(k))), Some(Constant::float(16.0)));
        assert_eq!(eval(&shader, &shader.read(u)), None);
        assert_eq!(eval(&shader, &add(shader.read(t), shader.read(k))), None);

        let bindings = HashMap::from([(t, Constant::float(1.0))]);
        let ctx = EvalContext::for_shader(&shader).with_bindings(&bindings);
        assert_eq!(
            constant_value(&add(shader.read(t), shader.read(k)), &ctx),
            Some(Constant::float(5.0))
        );
    }

    #[test]
    fn indexing_is_clamped() {
        let shader = Shader::new(ShaderStage::Vertex);
        let v: Rvalue = Constant::vec(&[1.0, 2.0, 3.0]).into();
        let idx = |i: i32| -> Rvalue { Constant::int(i).into() };
        let at = |i| Rvalue::Deref(Deref::array(v.clone(), idx(i)));
        assert_eq!(eval(&shader, &at(7)), Some(Constant::float(3.0)));
        assert_eq!(eval(&shader, &at(-2)), Some(Constant::float(1.0)));

        let arr = Constant::aggregate(
            Type::array(Type::int(), 2),
            vec![Constant::int(10), Constant::int(20)],
        );
        let elem = Rvalue::Deref(Deref::array(arr.into(), idx(5)));
        assert_eq!(eval(&shader, &elem), Some(Constant::int(20)));

        let m = Constant::new(
            Type::mat(2),
            [1.0, 2.0, 3.0, 4.0].map(Scalar::Float).to_vec(),
        );
        let col = Rvalue::Deref(Deref::array(m.into(), idx(1)));
        assert_eq!(eval(&shader, &col), Some(Constant::vec(&[3.0, 4.0])));
    }

    #[test]
    fn swizzles_select_components() {
        let shader = Shader::new(ShaderStage::Vertex);
        let v: Rvalue = Constant::vec(&[1.0, 2.0, 3.0, 4.0]).into();
        assert_eq!(
            eval(&shader, &swizzle(v.clone(), &[3, 0])),
            Some(Constant::vec(&[4.0, 1.0]))
        );
        let s: Rvalue = Constant::float(5.0).into();
        assert_eq!(
            eval(&shader, &swizzle(s, &[0, 0, 0])),
            Some(Constant::vec(&[5.0, 5.0, 5.0]))
        );
        assert_eq!(eval(&shader, &channel(v, 1)), Some(Constant::float(2.0)));
    }

    #[test]
    fn side_inputs_never_fold() {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let one: Rvalue = Constant::float(1.0).into();
        assert_eq!(eval(&shader, &unop(ExprOp::Noise, one.clone())), None);
        assert_eq!(eval(&shader, &unop(ExprOp::DFdx, one)), None);

        let sampler_ty = Type::sampler(SamplerDim::D2, false, false, BaseType::Float);
        let s = shader.add_global(Variable::new("s", sampler_ty, VariableMode::Uniform));
        let tex = Texture::sample(
            Type::vec(4),
            shader.deref(s),
            Constant::vec(&[0.5, 0.5]).into(),
        );
        assert_eq!(eval(&shader, &Rvalue::Texture(tex)), None);
    }
}
