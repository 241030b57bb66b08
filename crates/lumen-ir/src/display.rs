//! Display implementations and s-expression dump for debugging.

use std::fmt::{self, Write as _};

use crate::Shader;
use crate::arena::{Arena, Handle};
use crate::constant::{Constant, ConstantValue, Scalar};
use crate::expr::ExprOp;
use crate::func::Function;
use crate::rvalue::{Deref, Rvalue, TexLod, TexOp};
use crate::stmt::{Jump, Statement};
use crate::var::{Variable, VariableMode};

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Uint(v) => write!(f, "{v}u"),
            Self::Float(v) => write!(f, "{v:?}"),
            Self::Float16(v) => write!(f, "{:?}hf", v.to_f32()),
            Self::Double(v) => write!(f, "{v:?}lf"),
            Self::Int16(v) => write!(f, "{v}s"),
            Self::Uint16(v) => write!(f, "{v}us"),
            Self::Int64(v) => write!(f, "{v}l"),
            Self::Uint64(v) => write!(f, "{v}ul"),
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(constant {} (", self.ty)?;
        match &self.value {
            ConstantValue::Components(comps) => {
                for (i, c) in comps.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{c}")?;
                }
            }
            ConstantValue::Aggregate(elems) => {
                for (i, c) in elems.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{c}")?;
                }
            }
        }
        f.write_str("))")
    }
}

impl fmt::Display for ExprOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for VariableMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::Uniform => "uniform",
            Self::ShaderStorage => "shader_storage",
            Self::ShaderShared => "shader_shared",
            Self::In => "in",
            Self::Out => "out",
            Self::FunctionIn => "function_in",
            Self::FunctionOut => "function_out",
            Self::FunctionInOut => "function_inout",
            Self::ConstIn => "const_in",
            Self::SystemValue => "system_value",
            Self::Temporary => "temporary",
        };
        f.write_str(s)
    }
}

fn tex_name(op: TexOp) -> &'static str {
    match op {
        TexOp::Tex => "tex",
        TexOp::Txb => "txb",
        TexOp::Txl => "txl",
        TexOp::Txd => "txd",
        TexOp::Txf => "txf",
        TexOp::TxfMs => "txf_ms",
        TexOp::Txs => "txs",
        TexOp::Lod => "lod",
        TexOp::Tg4 => "tg4",
        TexOp::QueryLevels => "query_levels",
        TexOp::SamplesIdentical => "samples_identical",
    }
}

/// Prints trees using names from the variable and function arenas.
pub struct Printer<'a> {
    variables: &'a Arena<Variable>,
    functions: Option<&'a Arena<Function>>,
}

impl<'a> Printer<'a> {
    pub fn new(variables: &'a Arena<Variable>) -> Self {
        Self {
            variables,
            functions: None,
        }
    }

    pub fn for_shader(shader: &'a Shader) -> Self {
        Self {
            variables: &shader.variables,
            functions: Some(&shader.functions),
        }
    }

    fn var_name(&self, var: Handle<Variable>) -> String {
        match self.variables.try_get(var) {
            Some(v) => v.name.clone(),
            None => format!("<dead{var:?}>"),
        }
    }

    pub fn rvalue(&self, rv: &Rvalue) -> String {
        let mut out = String::new();
        self.write_rvalue(&mut out, rv);
        out
    }

    fn write_opt(&self, out: &mut String, rv: &Option<Box<Rvalue>>) {
        match rv {
            Some(v) => self.write_rvalue(out, v),
            None => out.push_str("()"),
        }
    }

    fn write_deref(&self, out: &mut String, d: &Deref) {
        match d {
            Deref::Variable { var, .. } => {
                let _ = write!(out, "(var_ref {})", self.var_name(*var));
            }
            Deref::Array { array, index, .. } => {
                out.push_str("(array_ref ");
                self.write_rvalue(out, array);
                out.push(' ');
                self.write_rvalue(out, index);
                out.push(')');
            }
            Deref::Record { record, field, .. } => {
                out.push_str("(record_ref ");
                self.write_rvalue(out, record);
                let name = record
                    .ty()
                    .fields()
                    .get(*field)
                    .map_or_else(|| field.to_string(), |f| f.name.clone());
                let _ = write!(out, " {name})");
            }
        }
    }

    fn write_rvalue(&self, out: &mut String, rv: &Rvalue) {
        match rv {
            Rvalue::Constant(c) => {
                let _ = write!(out, "{c}");
            }
            Rvalue::Expression(e) => {
                let _ = write!(out, "(expression {} {}", e.ty, e.op);
                for operand in &e.operands {
                    out.push(' ');
                    self.write_rvalue(out, operand);
                }
                out.push(')');
            }
            Rvalue::Deref(d) => self.write_deref(out, d),
            Rvalue::Swizzle(s) => {
                let _ = write!(out, "(swiz {} ", s.mask);
                self.write_rvalue(out, &s.val);
                out.push(')');
            }
            Rvalue::Texture(t) => {
                let _ = write!(out, "({} {} ", tex_name(t.op), t.ty);
                self.write_rvalue(out, &t.sampler);
                out.push(' ');
                self.write_opt(out, &t.coordinate);
                out.push(' ');
                self.write_opt(out, &t.offset);
                match &t.lod {
                    TexLod::None => {}
                    TexLod::Bias(v) | TexLod::Lod(v) | TexLod::Sample(v) | TexLod::Component(v) => {
                        out.push(' ');
                        self.write_rvalue(out, v);
                    }
                    TexLod::Grad { dpdx, dpdy } => {
                        out.push_str(" (");
                        self.write_rvalue(out, dpdx);
                        out.push(' ');
                        self.write_rvalue(out, dpdy);
                        out.push(')');
                    }
                }
                if let Some(p) = &t.projector {
                    out.push_str(" (proj ");
                    self.write_rvalue(out, p);
                    out.push(')');
                }
                if let Some(c) = &t.shadow_comparator {
                    out.push_str(" (shadow ");
                    self.write_rvalue(out, c);
                    out.push(')');
                }
                out.push(')');
            }
        }
    }

    pub fn statement(&self, stmt: &Statement) -> String {
        let mut out = String::new();
        self.write_stmt(&mut out, stmt, 0);
        out
    }

    pub fn block(&self, block: &[Statement], indent: usize) -> String {
        let mut out = String::new();
        for stmt in block {
            self.write_stmt(&mut out, stmt, indent);
        }
        out
    }

    fn write_stmt(&self, out: &mut String, stmt: &Statement, indent: usize) {
        let pad = " ".repeat(indent);
        out.push_str(&pad);
        match stmt {
            Statement::Declare(var) => match self.variables.try_get(*var) {
                Some(v) => {
                    let _ = writeln!(out, "(declare ({}) {} {})", v.mode, v.ty, v.name);
                }
                None => {
                    let _ = writeln!(out, "(declare <dead{var:?}>)");
                }
            },
            Statement::Assign(a) => {
                out.push_str("(assign (");
                let channels = if a.lhs.ty().is_vector() {
                    (0..4)
                        .filter(|i| a.write_mask & (1 << i) != 0)
                        .map(|i| ['x', 'y', 'z', 'w'][i])
                        .collect::<String>()
                } else {
                    "x".to_string()
                };
                out.push_str(&channels);
                out.push_str(") ");
                self.write_deref(out, &a.lhs);
                out.push(' ');
                self.write_rvalue(out, &a.rhs);
                out.push_str(")\n");
            }
            Statement::Call {
                callee,
                args,
                return_deref,
            } => {
                let name = self
                    .functions
                    .and_then(|fns| fns.try_get(callee.function))
                    .map_or_else(|| format!("{:?}", callee.function), |f| f.name.clone());
                let _ = write!(out, "(call {name}");
                if let Some(ret) = return_deref {
                    out.push(' ');
                    self.write_deref(out, ret);
                }
                out.push_str(" (");
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    self.write_rvalue(out, arg);
                }
                out.push_str("))\n");
            }
            Statement::If {
                condition,
                then_block,
                else_block,
            } => {
                out.push_str("(if ");
                self.write_rvalue(out, condition);
                out.push_str(" (\n");
                out.push_str(&self.block(then_block, indent + 2));
                let _ = writeln!(out, "{pad}) (");
                out.push_str(&self.block(else_block, indent + 2));
                let _ = writeln!(out, "{pad}))");
            }
            Statement::Loop { body } => {
                out.push_str("(loop (\n");
                out.push_str(&self.block(body, indent + 2));
                let _ = writeln!(out, "{pad}))");
            }
            Statement::Jump(Jump::Break) => out.push_str("(break)\n"),
            Statement::Jump(Jump::Continue) => out.push_str("(continue)\n"),
            Statement::Jump(Jump::Return(None)) => out.push_str("(return)\n"),
            Statement::Jump(Jump::Return(Some(v))) => {
                out.push_str("(return ");
                self.write_rvalue(out, v);
                out.push_str(")\n");
            }
            Statement::Discard(None) => out.push_str("(discard)\n"),
            Statement::Discard(Some(c)) => {
                out.push_str("(discard ");
                self.write_rvalue(out, c);
                out.push_str(")\n");
            }
            Statement::Demote => out.push_str("(demote)\n"),
            Statement::EmitVertex(s) => {
                out.push_str("(emit-vertex ");
                self.write_rvalue(out, s);
                out.push_str(")\n");
            }
            Statement::EndPrimitive(s) => {
                out.push_str("(end-primitive ");
                self.write_rvalue(out, s);
                out.push_str(")\n");
            }
            Statement::Barrier => out.push_str("(barrier)\n"),
        }
    }
}

/// Produces a text dump of every global and function of a shader.
pub fn dump_shader(shader: &Shader) -> String {
    let printer = Printer::for_shader(shader);
    let mut out = String::new();

    for &global in &shader.globals {
        if let Some(v) = shader.variables.try_get(global) {
            let _ = writeln!(out, "(declare ({}) {} {})", v.mode, v.ty, v.name);
        }
    }

    for (_, func) in shader.functions.iter() {
        for sig in &func.signatures {
            let params: Vec<String> = sig
                .parameters
                .iter()
                .map(|&p| {
                    let v = &shader.variables[p];
                    format!("(declare ({}) {} {})", v.mode, v.ty, v.name)
                })
                .collect();
            let kind = if sig.is_builtin { " builtin" } else { "" };
            let _ = writeln!(
                out,
                "(function {}{kind} {} ({})",
                func.name,
                sig.return_type,
                params.join(" ")
            );
            out.push_str(&printer.block(&sig.body, 2));
            out.push_str(")\n");
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ShaderStage;
    use crate::expr::Expression;
    use crate::types::Type;
    use pretty_assertions::assert_eq;

    #[test]
    fn display_constant() {
        assert_eq!(
            Constant::vec(&[3.0, 3.0, 3.0, 3.0]).to_string(),
            "(constant vec4 (3.0 3.0 3.0 3.0))"
        );
        assert_eq!(Constant::uint(7).to_string(), "(constant uint (7u))");
    }

    #[test]
    fn print_expression() {
        let mut vars = Arena::new();
        let a = vars.append(Variable::new("a", Type::float(), VariableMode::Auto));
        let rv: Rvalue = Expression::new(
            ExprOp::Add,
            vec![
                Deref::variable(a, Type::float()).into(),
                Constant::float(1.0).into(),
            ],
        )
        .into();
        assert_eq!(
            Printer::new(&vars).rvalue(&rv),
            "(expression float + (var_ref a) (constant float (1.0)))"
        );
    }

    #[test]
    fn dump_main() {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let out = shader.add_global(Variable::new("color", Type::float(), VariableMode::Out));
        let body = vec![Statement::assign(
            shader.deref(out),
            Constant::float(0.5).into(),
        )];
        shader.add_main(body);
        let dump = dump_shader(&shader);
        assert_eq!(
            dump,
            "(declare (out) float color)\n\
             (function main void ()\n  \
             (assign (x) (var_ref color) (constant float (0.5)))\n\
             )\n"
        );
    }
}
