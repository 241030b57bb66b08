#![no_main]

use libfuzzer_sys::fuzz_target;
use lumen_ir::builder::{abs, add, bit_and, bit_xor, max, min, mul, neg, sub};
use lumen_ir::{Constant, Handle, Rvalue, Shader, ShaderStage, Statement, Type, Variable, VariableMode};
use lumen_opt::{CompilerOptions, LowerPrecisionOptions, LoweringRules, optimize};

/// Decodes an integer expression from a byte stream. Running out of bytes
/// yields a literal.
fn decode(
    shader: &Shader,
    inputs: &[Handle<Variable>],
    bytes: &mut std::slice::Iter<'_, u8>,
    depth: u8,
) -> Rvalue {
    let Some(&b) = bytes.next() else {
        return Constant::int(0).into();
    };
    if depth == 0 {
        return Constant::int(i32::from(b as i8)).into();
    }
    let next = |bytes: &mut std::slice::Iter<'_, u8>| decode(shader, inputs, bytes, depth - 1);
    match b % 12 {
        0 => shader.read(inputs[usize::from(b / 12) % inputs.len()]),
        1 => Constant::int(i32::from(b as i8)).into(),
        2 => neg(next(bytes)),
        3 => abs(next(bytes)),
        4 => add(next(bytes), next(bytes)),
        5 => sub(next(bytes), next(bytes)),
        6 => mul(next(bytes), next(bytes)),
        7 => min(next(bytes), next(bytes)),
        8 => max(next(bytes), next(bytes)),
        9 => bit_and(next(bytes), next(bytes)),
        10 => bit_xor(next(bytes), next(bytes)),
        _ => {
            let d = Constant::int(i32::from(b)).into();
            add(next(bytes), d)
        }
    }
}

fuzz_target!(|data: &[u8]| {
    let Some((&flags, rest)) = data.split_first() else {
        return;
    };
    let mut shader = Shader::new(ShaderStage::Fragment);
    let inputs: Vec<_> = (0..3)
        .map(|i| shader.add_global(Variable::new(format!("u{i}"), Type::int(), VariableMode::Uniform)))
        .collect();
    let out = shader.add_global(Variable::new("o", Type::int(), VariableMode::Out));
    let mut bytes = rest.iter();
    let mut body = Vec::new();
    while !bytes.as_slice().is_empty() && body.len() < 8 {
        let rv = decode(&shader, &inputs, &mut bytes, 6);
        body.push(Statement::assign(shader.deref(out), rv));
    }
    shader.add_main(body);

    let options = CompilerOptions {
        optimize_for_aos: flags & 1 != 0,
        native_integers: flags & 2 == 0,
        lowering: LoweringRules::from_bits_truncate(u32::from(flags) << 4),
        lower_precision: (flags & 4 != 0).then(LowerPrecisionOptions::all),
        ..Default::default()
    };
    // The pipeline must never panic, whatever the input tree.
    optimize(&mut shader, &options, &mut Vec::new());
});
