//! Error types for the lumen IR.

/// Structural problems found by [`validate_shader`](crate::validate_shader).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IrError {
    /// A handle refers to a vacated or never-allocated slot.
    #[error("{kind} handle {index} is not live in `{function}`")]
    BadHandle {
        kind: &'static str,
        index: usize,
        function: String,
    },

    #[error("swizzle component {component} out of range for {width}-component source")]
    SwizzleOutOfRange { component: u8, width: u8 },

    #[error("write mask {mask:#x} exceeds {components}-component target")]
    WriteMaskOutOfRange { mask: u8, components: u8 },

    #[error("`{op}` has {found} operands, expected {expected}")]
    OperandCount {
        op: &'static str,
        expected: usize,
        found: usize,
    },

    /// The stored type differs from the type derived from the operands.
    #[error("`{op}` typed {found}, operands derive {expected}")]
    ExpressionType {
        op: &'static str,
        expected: String,
        found: String,
    },

    #[error("`{op}` has no type rule for operands ({operands})")]
    NoTypeRule { op: &'static str, operands: String },

    #[error("call to `{callee}` passes {found} arguments, expected {expected}")]
    CallArgumentCount {
        callee: String,
        expected: usize,
        found: usize,
    },

    #[error("assignment of {rhs} to {lhs}")]
    AssignmentType { lhs: String, rhs: String },

    #[error("{context} condition has type {found}, expected bool")]
    ConditionType {
        context: &'static str,
        found: String,
    },
}
