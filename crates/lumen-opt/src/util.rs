//! Helpers shared by the passes.

use lumen_ir::{Block, Shader, SignatureId, Statement};

/// Runs `f` over the body of every defined user signature. The body is moved
/// out while `f` runs so the rest of the shader stays mutable.
pub(crate) fn rewrite_bodies(
    shader: &mut Shader,
    mut f: impl FnMut(&mut Shader, SignatureId, &mut Block) -> bool,
) -> bool {
    let mut changed = false;
    for id in shader.user_signature_ids() {
        let mut body = shader.take_body(id);
        changed |= f(shader, id, &mut body);
        shader.restore_body(id, body);
    }
    changed
}

/// Returns `true` if `id` is the parameterless `main`.
pub(crate) fn is_main(shader: &Shader, id: SignatureId) -> bool {
    shader.main_signature() == Some(id)
}

/// Calls `f` on every block, innermost blocks first.
pub(crate) fn for_each_block_mut(block: &mut Block, f: &mut impl FnMut(&mut Block) -> bool) -> bool {
    let mut changed = false;
    for stmt in block.iter_mut() {
        for nested in stmt.blocks_mut() {
            changed |= for_each_block_mut(nested, f);
        }
    }
    changed | f(block)
}

/// Returns `true` if the statement can transfer control somewhere other than
/// the next statement.
pub(crate) fn may_jump(stmt: &Statement) -> bool {
    lumen_ir::visit::block_contains(std::slice::from_ref(stmt), &mut |s| {
        matches!(s, Statement::Jump(_) | Statement::Discard(_) | Statement::Demote)
    })
}
