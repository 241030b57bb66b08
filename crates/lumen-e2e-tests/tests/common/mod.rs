use std::collections::HashMap;

use lumen_ir::const_eval::{EvalContext, constant_value};
use lumen_ir::visit::for_each_rvalue;
use lumen_ir::{
    Constant, ExprOp, Handle, Scalar, Shader, SignatureId, Statement, Variable, dump_shader,
    validate_shader,
};
use lumen_opt::{CompilerOptions, optimize};

pub type Bindings = HashMap<Handle<Variable>, Constant>;

/// Run the driver, then check that it reported nothing and left valid IR.
#[allow(dead_code)]
pub fn optimize_checked(shader: &mut Shader, options: &CompilerOptions) -> bool {
    let mut diagnostics = Vec::new();
    let changed = optimize(shader, options, &mut diagnostics);
    assert!(diagnostics.is_empty(), "unexpected diagnostics: {diagnostics:?}");
    let errors = validate_shader(shader);
    assert!(errors.is_empty(), "invalid IR: {errors:?}\n{}", dump_shader(shader));
    changed
}

/// Execute a straight-line body with `inputs` bound. Returns the value of
/// every variable afterwards.
#[allow(dead_code)]
pub fn execute(shader: &Shader, id: SignatureId, inputs: &Bindings) -> Bindings {
    let mut values = inputs.clone();
    for stmt in &shader.signature(id).body {
        match stmt {
            Statement::Declare(_) => {}
            Statement::Assign(a) => {
                let ctx = EvalContext::for_shader(shader).with_bindings(&values);
                let value = constant_value(&a.rhs, &ctx)
                    .unwrap_or_else(|| panic!("cannot evaluate {:?}", a.rhs));
                let var = a
                    .whole_variable()
                    .unwrap_or_else(|| panic!("write through {:?}", a.lhs));
                let value = if a.writes_whole() {
                    value
                } else {
                    merge_channels(values.get(&var), &value, a.write_mask, &shader.variables[var])
                };
                values.insert(var, value);
            }
            other => panic!("not straight-line code: {other:?}"),
        }
    }
    values
}

fn merge_channels(old: Option<&Constant>, value: &Constant, mask: u8, var: &Variable) -> Constant {
    let mut components = match old {
        Some(c) => c.components().to_vec(),
        None => vec![Scalar::zero(var.ty.base_type()); var.ty.components()],
    };
    let mut written = value.components().iter();
    for (i, slot) in components.iter_mut().enumerate() {
        if mask & (1 << i) != 0
            && let Some(v) = written.next()
        {
            *slot = *v;
        }
    }
    Constant::new(var.ty.clone(), components)
}

/// Returns `true` if any rvalue in the body applies `op`.
#[allow(dead_code)]
pub fn uses_op(shader: &Shader, id: SignatureId, op: ExprOp) -> bool {
    let mut found = false;
    for_each_rvalue(&shader.signature(id).body, &mut |rv| found |= rv.op() == Some(op));
    found
}

/// Returns `true` if any rvalue in the body reads `var`.
#[allow(dead_code)]
pub fn reads(shader: &Shader, id: SignatureId, var: Handle<Variable>) -> bool {
    let mut found = false;
    for_each_rvalue(&shader.signature(id).body, &mut |rv| found |= rv.references(var));
    found
}
