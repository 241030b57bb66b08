//! IR validation pass.
//!
//! Checks structural invariants of the shader and logs warnings for
//! problems found. This pass never modifies the shader.

use lumen_ir::{Shader, validate_shader};

use crate::Pass;

/// Validates IR structural invariants. Returns `false` (never modifies the shader).
#[derive(Debug)]
pub struct IrValidation;

impl Pass for IrValidation {
    fn name(&self) -> &str {
        "ir-validation"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        for error in validate_shader(shader) {
            log::warn!("{error}");
        }
        false
    }
}

/// Panics if `shader` violates a tree invariant after `pass` ran.
pub(crate) fn assert_valid(shader: &Shader, pass: &str) {
    let errors = validate_shader(shader);
    if !errors.is_empty() {
        let shown: Vec<String> = errors.iter().map(ToString::to_string).collect();
        panic!("invalid IR after {pass}:\n  {}", shown.join("\n  "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_ir::{Constant, ShaderStage, Statement};

    #[test]
    fn valid_shader_passes() {
        let mut shader = Shader::new(ShaderStage::Compute);
        shader.add_main(vec![Statement::Barrier]);
        assert!(!IrValidation.run(&mut shader));
        assert_valid(&shader, "test");
    }

    #[test]
    fn bad_condition_still_unchanged() {
        // Findings go to `log::warn!`, which is a no-op without a logger.
        let mut shader = Shader::new(ShaderStage::Fragment);
        shader.add_main(vec![Statement::if_then(Constant::int(1).into(), Vec::new())]);
        assert!(!IrValidation.run(&mut shader));
    }

    #[test]
    #[should_panic(expected = "invalid IR after broken")]
    fn assert_valid_panics_on_errors() {
        let mut shader = Shader::new(ShaderStage::Fragment);
        shader.add_main(vec![Statement::Discard(Some(Constant::float(1.0).into()))]);
        assert_valid(&shader, "broken");
    }
}
