//! Linking-time passes over whole functions and aggregates.
//!
//! - [`FunctionInlining`] replaces calls with the callee's body.
//! - [`DeadFunctions`] removes signatures `main` can no longer reach.
//! - [`StructureSplitting`] breaks struct locals into one variable per field.

use std::collections::{HashMap, HashSet};

use log::{debug, trace};
use lumen_ir::visit::{for_each_rvalue_slot, for_each_statement, remap_variables, replace_reads, rewrite_rvalues};
use lumen_ir::{
    Assign, Block, Deref, Handle, Jump, Rvalue, Shader, SignatureId, Statement, Variable, VariableMode,
};

use crate::Pass;
use crate::util::{for_each_block_mut, rewrite_bodies};

/// Inlines calls to functions whose only `return` is their last statement.
#[derive(Debug)]
pub struct FunctionInlining;

impl Pass for FunctionInlining {
    fn name(&self) -> &str {
        "inline"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        rewrite_bodies(shader, |shader, caller, body| inline_block(shader, caller, body))
    }
}

/// Returns `true` if `callee` has a body that can be pasted at a call site.
fn can_inline(shader: &Shader, caller: SignatureId, callee: SignatureId) -> bool {
    if caller == callee {
        return false;
    }
    let Some(sig) = shader.try_signature(callee) else {
        return false;
    };
    if !sig.is_defined || (sig.body.is_empty() && !sig.return_type.is_void()) {
        return false;
    }
    let (last, rest) = match sig.body.split_last() {
        Some((last, rest)) => (Some(last), rest),
        None => (None, &sig.body[..]),
    };
    let returns_early = |block: &[Statement]| {
        lumen_ir::visit::block_contains(block, &mut |s| matches!(s, Statement::Jump(Jump::Return(_))))
    };
    let recursive = lumen_ir::visit::block_contains(&sig.body, &mut |s| {
        matches!(s, Statement::Call { callee: c, .. } if *c == callee)
    });
    let last_ok = match last {
        Some(Statement::Jump(Jump::Return(_))) | None => true,
        Some(other) => !returns_early(std::slice::from_ref(other)),
    };
    !recursive && last_ok && !returns_early(rest)
}

fn inline_block(shader: &mut Shader, caller: SignatureId, block: &mut Block) -> bool {
    let mut changed = false;
    let mut out = Vec::with_capacity(block.len());
    for mut stmt in std::mem::take(block) {
        for nested in stmt.blocks_mut() {
            changed |= inline_block(shader, caller, nested);
        }
        match stmt {
            Statement::Call {
                callee,
                args,
                return_deref,
            } if can_inline(shader, caller, callee) => {
                out.extend(expand_call(shader, callee, args, return_deref));
                changed = true;
            }
            other => out.push(other),
        }
    }
    *block = out;
    changed
}

/// The statements that replace one call.
fn expand_call(
    shader: &mut Shader,
    callee: SignatureId,
    args: Vec<Rvalue>,
    return_deref: Option<Deref>,
) -> Block {
    let sig = shader.signature(callee);
    let params = sig.parameters.clone();
    let mut body = sig.body.clone();
    let name = shader.functions[callee.function].name.clone();
    trace!("inlining call to {name}");

    let mut out = Vec::new();
    let mut map = HashMap::new();
    let mut opaque = Vec::new();
    let mut copy_back = Vec::new();

    for (&param, arg) in params.iter().zip(args) {
        let template = shader.variables[param].clone();
        if template.ty.contains_opaque() {
            opaque.push((param, arg));
            continue;
        }
        let mut local = template.clone();
        local.mode = VariableMode::Temporary;
        let local = shader.add_local(local);
        map.insert(param, local);
        out.push(Statement::Declare(local));
        if template.mode != VariableMode::FunctionOut {
            out.push(Statement::assign(shader.deref(local), arg.clone()));
        }
        if matches!(template.mode, VariableMode::FunctionOut | VariableMode::FunctionInOut)
            && let Rvalue::Deref(target) = arg
        {
            copy_back.push(Statement::assign(target, shader.read(local)));
        }
    }

    let mut declared = Vec::new();
    for_each_statement(&body, &mut |s| {
        if let Statement::Declare(var) = s {
            declared.push(*var);
        }
    });
    for var in declared {
        let copy = shader.variables[var].clone();
        map.insert(var, shader.add_local(copy));
    }
    remap_variables(&mut body, &map);
    for (param, arg) in &opaque {
        for_each_rvalue_slot(&mut body, &mut |slot| {
            replace_reads(slot, *param, arg);
        });
    }

    match body.pop() {
        Some(Statement::Jump(Jump::Return(Some(value)))) => {
            out.extend(body);
            if let Some(ret) = return_deref {
                out.push(Statement::Assign(Assign::new(ret, value)));
            }
        }
        Some(Statement::Jump(Jump::Return(None))) | None => out.extend(body),
        Some(last) => {
            out.extend(body);
            out.push(last);
        }
    }
    out.extend(copy_back);
    out
}

/// Removes signatures unreachable from `main` and calls to functions that do
/// nothing.
#[derive(Debug)]
pub struct DeadFunctions;

impl Pass for DeadFunctions {
    fn name(&self) -> &str {
        "dead-functions"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        let Some(main) = shader.main_signature() else {
            return false;
        };
        let mut changed = remove_empty_calls(shader);

        let mut live = HashSet::from([main]);
        let mut work = vec![main];
        while let Some(id) = work.pop() {
            let sig = shader.signature(id);
            let mut reached: Vec<SignatureId> = sig.lowered_clone.into_iter().collect();
            for_each_statement(&sig.body, &mut |s| {
                if let Statement::Call { callee, .. } = s {
                    reached.push(*callee);
                }
            });
            for callee in reached {
                if shader.try_signature(callee).is_some() && live.insert(callee) {
                    work.push(callee);
                }
            }
        }

        let mut remap = HashMap::new();
        for (function, f) in shader.functions.iter_mut() {
            let before = f.signatures.len();
            let mut kept = 0;
            let mut index = 0;
            f.signatures.retain(|_| {
                let old = SignatureId { function, index };
                index += 1;
                if live.contains(&old) {
                    remap.insert(old, SignatureId { function, index: kept });
                    kept += 1;
                    true
                } else {
                    false
                }
            });
            if f.signatures.len() != before {
                debug!("removed {} unused signature(s) of {}", before - f.signatures.len(), f.name);
                changed = true;
            }
        }
        let empty: Vec<_> = shader
            .functions
            .iter()
            .filter(|(_, f)| f.signatures.is_empty())
            .map(|(h, _)| h)
            .collect();
        for function in empty {
            shader.functions.remove(function);
        }

        for id in shader.signature_ids() {
            let sig = shader.signature_mut(id);
            sig.lowered_clone = sig.lowered_clone.and_then(|c| remap.get(&c).copied());
            for_each_block_mut(&mut sig.body, &mut |block| {
                for stmt in block.iter_mut() {
                    if let Statement::Call { callee, .. } = stmt
                        && let Some(&to) = remap.get(callee)
                    {
                        *callee = to;
                    }
                }
                false
            });
        }
        changed
    }
}

/// Drops calls to void functions with an empty body and no outputs.
fn remove_empty_calls(shader: &mut Shader) -> bool {
    let empty: HashSet<SignatureId> = shader
        .user_signature_ids()
        .into_iter()
        .filter(|&id| {
            let sig = shader.signature(id);
            sig.body.is_empty()
                && sig.return_type.is_void()
                && sig
                    .parameters
                    .iter()
                    .all(|&p| !shader.variables[p].mode.is_externally_visible())
        })
        .collect();
    if empty.is_empty() {
        return false;
    }
    rewrite_bodies(shader, |_, _, body| {
        for_each_block_mut(body, &mut |block| {
            let before = block.len();
            block.retain(|s| !matches!(s, Statement::Call { callee, .. } if empty.contains(callee)));
            block.len() != before
        })
    })
}

/// Splits struct-typed locals that are only accessed field by field.
#[derive(Debug)]
pub struct StructureSplitting;

impl Pass for StructureSplitting {
    fn name(&self) -> &str {
        "split-structures"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        rewrite_bodies(shader, |shader, _, body| split_structures(shader, body))
    }
}

/// Records every variable used other than through a field of itself.
fn scan_rvalue(rv: &Rvalue, whole: &mut HashSet<Handle<Variable>>) {
    match rv {
        Rvalue::Deref(Deref::Record { record, .. }) if record.as_variable().is_some() => {}
        Rvalue::Deref(Deref::Variable { var, .. }) => {
            whole.insert(*var);
        }
        other => {
            for child in other.children() {
                scan_rvalue(child, whole);
            }
        }
    }
}

fn scan_target(d: &Deref, whole: &mut HashSet<Handle<Variable>>) {
    let base = match d {
        Deref::Variable { var, .. } => {
            whole.insert(*var);
            return;
        }
        Deref::Record { record, .. } if record.as_variable().is_some() => return,
        Deref::Record { record, .. } => record,
        Deref::Array { array, index, .. } => {
            scan_rvalue(index, whole);
            array
        }
    };
    match base.as_ref() {
        Rvalue::Deref(inner) => scan_target(inner, whole),
        other => scan_rvalue(other, whole),
    }
}

fn split_target(shader: &Shader, d: &mut Deref, fields: &HashMap<Handle<Variable>, Vec<Handle<Variable>>>) {
    match d {
        Deref::Record { record, field, .. } => {
            if let Some(split) = record.as_variable().and_then(|v| fields.get(&v)) {
                let var = split[*field];
                *d = shader.deref(var);
            } else if let Rvalue::Deref(inner) = record.as_mut() {
                split_target(shader, inner, fields);
            }
        }
        Deref::Array { array, .. } => {
            if let Rvalue::Deref(inner) = array.as_mut() {
                split_target(shader, inner, fields);
            }
        }
        Deref::Variable { .. } => {}
    }
}

fn split_structures(shader: &mut Shader, body: &mut Block) -> bool {
    let mut candidates = Vec::new();
    let mut whole = HashSet::new();
    for_each_statement(body, &mut |s| match s {
        Statement::Declare(var) => {
            let v = &shader.variables[*var];
            if v.ty.is_record() && v.mode.is_local() && !shader.is_global(*var) {
                candidates.push(*var);
            }
        }
        Statement::Assign(a) => {
            scan_target(&a.lhs, &mut whole);
            scan_rvalue(&a.rhs, &mut whole);
        }
        Statement::Call {
            args, return_deref, ..
        } => {
            for arg in args {
                scan_rvalue(arg, &mut whole);
            }
            if let Some(ret) = return_deref {
                scan_target(ret, &mut whole);
            }
        }
        other => {
            for slot in other.rvalues() {
                scan_rvalue(slot, &mut whole);
            }
        }
    });
    candidates.retain(|v| !whole.contains(v));
    if candidates.is_empty() {
        return false;
    }

    let mut fields = HashMap::new();
    for var in candidates {
        let original = shader.variables[var].clone();
        let split: Vec<_> = original
            .ty
            .fields()
            .iter()
            .map(|f| {
                let mut v = original.clone();
                v.name = format!("{}_{}", original.name, f.name);
                v.ty = f.ty.clone();
                shader.add_local(v)
            })
            .collect();
        debug!("split {} into {} variables", original.name, split.len());
        fields.insert(var, split);
    }

    for_each_block_mut(body, &mut |block| {
        let mut out = Vec::with_capacity(block.len());
        for mut stmt in std::mem::take(block) {
            match &mut stmt {
                Statement::Declare(var) if fields.contains_key(&*var) => {
                    out.extend(fields[&*var].iter().map(|&f| Statement::Declare(f)));
                    continue;
                }
                Statement::Assign(a) => split_target(shader, &mut a.lhs, &fields),
                Statement::Call {
                    return_deref: Some(ret),
                    ..
                } => split_target(shader, ret, &fields),
                _ => {}
            }
            out.push(stmt);
        }
        *block = out;
        false
    });
    rewrite_rvalues(body, &mut |rv| {
        if let Rvalue::Deref(Deref::Record { record, field, .. }) = rv
            && let Some(split) = record.as_variable().and_then(|v| fields.get(&v))
        {
            let var = split[*field];
            *rv = shader.read(var);
        }
    });
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_ir::builder::{add, mul};
    use lumen_ir::{Constant, ShaderStage, Signature, StructField, Type};

    fn setup() -> (Shader, Handle<Variable>, Handle<Variable>) {
        let mut shader = Shader::new(ShaderStage::Fragment);
        let u = shader.add_global(Variable::new("u", Type::float(), VariableMode::Uniform));
        let out = shader.add_global(Variable::new("o", Type::float(), VariableMode::Out));
        (shader, u, out)
    }

    fn declared(stmt: &Statement) -> Handle<Variable> {
        match stmt {
            Statement::Declare(v) => *v,
            other => panic!("expected a declaration, got {other:?}"),
        }
    }

    #[test]
    fn value_returning_call_is_inlined() {
        let (mut shader, u, out) = setup();
        let x = shader.add_local(Variable::new("x", Type::float(), VariableMode::FunctionIn));
        let square = shader.add_signature(
            "square",
            Signature::new(
                Type::float(),
                vec![x],
                vec![Statement::Jump(Jump::Return(Some(mul(shader.read(x), shader.read(x)))))],
            ),
        );
        let main = shader.add_main(vec![Statement::Call {
            callee: square,
            args: vec![shader.read(u)],
            return_deref: Some(shader.deref(out)),
        }]);

        assert!(FunctionInlining.run(&mut shader));
        let body = &shader.signature(main).body;
        assert_eq!(body.len(), 3);
        let tmp = declared(&body[0]);
        assert_ne!(tmp, x);
        assert_eq!(body[1], Statement::assign(shader.deref(tmp), shader.read(u)));
        assert_eq!(
            body[2],
            Statement::assign(shader.deref(out), mul(shader.read(tmp), shader.read(tmp)))
        );
        assert!(!FunctionInlining.run(&mut shader));
    }

    #[test]
    fn out_parameters_are_copied_back() {
        let (mut shader, _, out) = setup();
        let r = shader.add_local(Variable::new("r", Type::float(), VariableMode::FunctionOut));
        let produce = shader.add_signature(
            "produce",
            Signature::new(
                Type::void(),
                vec![r],
                vec![Statement::assign(shader.deref(r), Constant::float(2.0).into())],
            ),
        );
        let main = shader.add_main(vec![Statement::Call {
            callee: produce,
            args: vec![shader.read(out)],
            return_deref: None,
        }]);

        assert!(FunctionInlining.run(&mut shader));
        let body = &shader.signature(main).body;
        let tmp = declared(&body[0]);
        assert_eq!(
            &body[1..],
            &[
                Statement::assign(shader.deref(tmp), Constant::float(2.0).into()),
                Statement::assign(shader.deref(out), shader.read(tmp)),
            ]
        );
    }

    #[test]
    fn early_returns_block_inlining() {
        let (mut shader, u, out) = setup();
        let x = shader.add_local(Variable::new("x", Type::float(), VariableMode::FunctionIn));
        let early = shader.add_signature(
            "early",
            Signature::new(
                Type::float(),
                vec![x],
                vec![
                    Statement::if_then(
                        lumen_ir::builder::less(shader.read(x), Constant::float(0.0).into()),
                        vec![Statement::Jump(Jump::Return(Some(Constant::float(0.0).into())))],
                    ),
                    Statement::Jump(Jump::Return(Some(shader.read(x)))),
                ],
            ),
        );
        shader.add_main(vec![Statement::Call {
            callee: early,
            args: vec![shader.read(u)],
            return_deref: Some(shader.deref(out)),
        }]);
        assert!(!FunctionInlining.run(&mut shader));
    }

    #[test]
    fn unreachable_functions_are_removed() {
        let (mut shader, _, out) = setup();
        let used = shader.add_signature(
            "used",
            Signature::new(Type::float(), Vec::new(), vec![Statement::Jump(Jump::Return(Some(
                Constant::float(1.0).into(),
            )))]),
        );
        shader.add_signature("unused", Signature::new(Type::void(), Vec::new(), vec![Statement::Barrier]));
        shader.add_main(vec![Statement::Call {
            callee: used,
            args: Vec::new(),
            return_deref: Some(shader.deref(out)),
        }]);

        assert!(DeadFunctions.run(&mut shader));
        assert!(shader.find_function("unused").is_none());
        assert!(shader.find_function("used").is_some());
        assert!(!DeadFunctions.run(&mut shader));
    }

    #[test]
    fn overload_indices_are_remapped() {
        let (mut shader, _, out) = setup();
        shader.add_signature("f", Signature::new(Type::int(), Vec::new(), vec![Statement::Barrier]));
        let kept = shader.add_signature(
            "f",
            Signature::new(Type::float(), Vec::new(), vec![Statement::Jump(Jump::Return(Some(
                Constant::float(1.0).into(),
            )))]),
        );
        let main = shader.add_main(vec![Statement::Call {
            callee: kept,
            args: Vec::new(),
            return_deref: Some(shader.deref(out)),
        }]);

        assert!(DeadFunctions.run(&mut shader));
        let Statement::Call { callee, .. } = &shader.signature(main).body[0] else {
            panic!("call disappeared");
        };
        assert_eq!(callee.index, 0);
        assert_eq!(shader.signature(*callee).return_type, Type::float());
    }

    #[test]
    fn calls_to_empty_functions_vanish() {
        let (mut shader, _, _) = setup();
        let nothing = shader.add_signature("nothing", Signature::new(Type::void(), Vec::new(), Vec::new()));
        let main = shader.add_main(vec![Statement::Call {
            callee: nothing,
            args: Vec::new(),
            return_deref: None,
        }]);
        assert!(DeadFunctions.run(&mut shader));
        assert!(shader.signature(main).body.is_empty());
        assert!(shader.find_function("nothing").is_none());
    }

    fn light_type() -> Type {
        Type::record(
            "Light",
            vec![
                StructField {
                    name: "intensity".into(),
                    ty: Type::float(),
                },
                StructField {
                    name: "color".into(),
                    ty: Type::vec(3),
                },
            ],
        )
    }

    #[test]
    fn field_only_structs_are_split() {
        let (mut shader, u, out) = setup();
        let light = shader.add_local(Variable::new("light", light_type(), VariableMode::Auto));
        let intensity = || Deref::record(Rvalue::Deref(Deref::variable(light, light_type())), 0);
        let main = shader.add_main(vec![
            Statement::Declare(light),
            Statement::assign(intensity(), shader.read(u)),
            Statement::assign(shader.deref(out), add(intensity().into(), Constant::float(1.0).into())),
        ]);

        assert!(StructureSplitting.run(&mut shader));
        let body = &shader.signature(main).body;
        let split = declared(&body[0]);
        assert_eq!(shader.variables[split].name, "light_intensity");
        assert_eq!(declared(&body[1]).index(), split.index() + 1);
        assert_eq!(body[2], Statement::assign(shader.deref(split), shader.read(u)));
        assert_eq!(
            body[3],
            Statement::assign(shader.deref(out), add(shader.read(split), Constant::float(1.0).into()))
        );
        assert!(!StructureSplitting.run(&mut shader));
    }

    #[test]
    fn whole_struct_uses_prevent_splitting() {
        let (mut shader, _, _) = setup();
        let a = shader.add_local(Variable::new("a", light_type(), VariableMode::Auto));
        let b = shader.add_local(Variable::new("b", light_type(), VariableMode::Auto));
        shader.add_main(vec![
            Statement::Declare(a),
            Statement::Declare(b),
            Statement::assign(shader.deref(b), shader.read(a)),
        ]);
        assert!(!StructureSplitting.run(&mut shader));
    }
}
