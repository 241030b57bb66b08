//! Structural validation of a shader.
//!
//! Collects every violated tree invariant instead of stopping at the first.

use crate::Shader;
use crate::error::IrError;
use crate::rvalue::{Deref, Rvalue};
use crate::stmt::{Block, Jump, Statement};
use crate::types::Type;

struct Validator<'a> {
    shader: &'a Shader,
    function: String,
    errors: Vec<IrError>,
}

impl Validator<'_> {
    fn check_variable(&mut self, var: crate::Handle<crate::Variable>) {
        if !self.shader.variables.contains(var) {
            self.errors.push(IrError::BadHandle {
                kind: "variable",
                index: var.index(),
                function: self.function.clone(),
            });
        }
    }

    fn check_bool(&mut self, rv: &Rvalue, context: &'static str) {
        if *rv.ty() != Type::bool() {
            self.errors.push(IrError::ConditionType {
                context,
                found: rv.ty().to_string(),
            });
        }
    }

    fn rvalue(&mut self, rv: &Rvalue) {
        match rv {
            Rvalue::Constant(_) => {}
            Rvalue::Deref(d) => self.deref(d),
            Rvalue::Swizzle(s) => {
                let width = s.val.ty().vector_elements();
                for &c in s.mask.as_slice() {
                    if c >= width {
                        self.errors
                            .push(IrError::SwizzleOutOfRange { component: c, width });
                    }
                }
                self.rvalue(&s.val);
            }
            Rvalue::Expression(e) => {
                if !e.op.accepts_operand_count(e.operands.len()) {
                    self.errors.push(IrError::OperandCount {
                        op: e.op.name(),
                        expected: e.op.arity(),
                        found: e.operands.len(),
                    });
                } else {
                    let types: Vec<&Type> = e.operands.iter().map(Rvalue::ty).collect();
                    match e.op.try_result_type(&types) {
                        Some(derived) if derived != e.ty => {
                            self.errors.push(IrError::ExpressionType {
                                op: e.op.name(),
                                expected: derived.to_string(),
                                found: e.ty.to_string(),
                            });
                        }
                        Some(_) => {}
                        None => {
                            let shown: Vec<String> =
                                types.iter().map(|t| t.to_string()).collect();
                            self.errors.push(IrError::NoTypeRule {
                                op: e.op.name(),
                                operands: shown.join(", "),
                            });
                        }
                    }
                }
                for operand in &e.operands {
                    self.rvalue(operand);
                }
            }
            Rvalue::Texture(t) => {
                self.rvalue(&t.sampler);
                for operand in t.operands() {
                    self.rvalue(operand);
                }
            }
        }
    }

    fn deref(&mut self, d: &Deref) {
        match d {
            Deref::Variable { var, .. } => self.check_variable(*var),
            Deref::Array { array, index, .. } => {
                self.rvalue(array);
                self.rvalue(index);
            }
            Deref::Record { record, .. } => self.rvalue(record),
        }
    }

    fn block(&mut self, block: &Block) {
        for stmt in block {
            self.statement(stmt);
        }
    }

    fn statement(&mut self, stmt: &Statement) {
        match stmt {
            Statement::Declare(var) => self.check_variable(*var),
            Statement::Assign(a) => {
                self.deref(&a.lhs);
                self.rvalue(&a.rhs);
                let lhs = a.lhs.ty();
                let width = if lhs.is_vector() { lhs.vector_elements() } else { 1 };
                if a.write_mask == 0 || a.write_mask >= (1u8 << width) {
                    self.errors.push(IrError::WriteMaskOutOfRange {
                        mask: a.write_mask,
                        components: width,
                    });
                } else if a.writes_whole() {
                    if lhs != a.rhs.ty() {
                        self.errors.push(IrError::AssignmentType {
                            lhs: lhs.to_string(),
                            rhs: a.rhs.ty().to_string(),
                        });
                    }
                } else if a.rhs.ty().components() != a.write_mask.count_ones() as usize
                    || a.rhs.ty().base_type() != lhs.base_type()
                {
                    self.errors.push(IrError::AssignmentType {
                        lhs: lhs.to_string(),
                        rhs: a.rhs.ty().to_string(),
                    });
                }
            }
            Statement::Call {
                callee,
                args,
                return_deref,
            } => {
                match self
                    .shader
                    .functions
                    .try_get(callee.function)
                    .and_then(|f| f.signatures.get(callee.index).map(|s| (f, s)))
                {
                    Some((func, sig)) => {
                        if sig.parameters.len() != args.len() {
                            self.errors.push(IrError::CallArgumentCount {
                                callee: func.name.clone(),
                                expected: sig.parameters.len(),
                                found: args.len(),
                            });
                        }
                    }
                    None => self.errors.push(IrError::BadHandle {
                        kind: "signature",
                        index: callee.function.index(),
                        function: self.function.clone(),
                    }),
                }
                for arg in args {
                    self.rvalue(arg);
                }
                if let Some(ret) = return_deref {
                    self.deref(ret);
                }
            }
            Statement::If {
                condition,
                then_block,
                else_block,
            } => {
                self.check_bool(condition, "if");
                self.rvalue(condition);
                self.block(then_block);
                self.block(else_block);
            }
            Statement::Loop { body } => self.block(body),
            Statement::Jump(Jump::Return(Some(v))) => self.rvalue(v),
            Statement::Jump(_) | Statement::Demote | Statement::Barrier => {}
            Statement::Discard(cond) => {
                if let Some(c) = cond {
                    self.check_bool(c, "discard");
                    self.rvalue(c);
                }
            }
            Statement::EmitVertex(s) | Statement::EndPrimitive(s) => self.rvalue(s),
        }
    }
}

/// Checks tree invariants over every function body of `shader`.
pub fn validate_shader(shader: &Shader) -> Vec<IrError> {
    let mut v = Validator {
        shader,
        function: String::new(),
        errors: Vec::new(),
    };
    for &global in &shader.globals {
        v.check_variable(global);
    }
    for (_, func) in shader.functions.iter() {
        v.function = func.name.clone();
        for sig in &func.signatures {
            for &param in &sig.parameters {
                v.check_variable(param);
            }
            v.block(&sig.body);
        }
    }
    v.errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ShaderStage;
    use crate::constant::Constant;
    use crate::expr::{ExprOp, Expression};
    use crate::stmt::Assign;
    use crate::var::{Variable, VariableMode};

    #[test]
    fn well_formed_shader() {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let out = shader.add_global(Variable::new("o", Type::vec(2), VariableMode::Out));
        let rhs: Rvalue = Expression::new(
            ExprOp::Add,
            vec![Constant::vec(&[1.0, 2.0]).into(), Constant::float(1.0).into()],
        )
        .into();
        shader.add_main(vec![Statement::assign(shader.deref(out), rhs)]);
        assert_eq!(validate_shader(&shader), Vec::new());
    }

    #[test]
    fn reports_mistyped_expression_and_mask() {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let out = shader.add_global(Variable::new("o", Type::vec(2), VariableMode::Out));
        let bad = Expression::with_type(
            ExprOp::Add,
            Type::vec(3),
            vec![Constant::vec(&[1.0, 2.0]).into(), Constant::float(1.0).into()],
        );
        let assign = Assign {
            lhs: shader.deref(out),
            rhs: bad.into(),
            write_mask: 0b100,
        };
        shader.add_main(vec![Statement::Assign(assign)]);
        let errors = validate_shader(&shader);
        assert!(errors.iter().any(|e| matches!(e, IrError::ExpressionType { .. })));
        assert!(errors.iter().any(|e| matches!(e, IrError::WriteMaskOutOfRange { .. })));
    }

    #[test]
    fn reports_dead_variable() {
        let mut shader = Shader::new(ShaderStage::Vertex);
        let t = shader.new_temporary("t", Type::float());
        let deref = shader.deref(t);
        shader.variables.remove(t);
        shader.add_main(vec![Statement::assign(deref, Constant::float(1.0).into())]);
        let errors = validate_shader(&shader);
        assert!(matches!(errors[0], IrError::BadHandle { kind: "variable", .. }));
    }
}
