//! Diagnostics reported back to the front end.

use std::fmt;

/// Position in the shader source.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub struct SourceLocation {
    pub source: u32,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(source: u32, line: u32, column: u32) -> Self {
        Self {
            source,
            line,
            column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}({})", self.source, self.line, self.column)
    }
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub location: SourceLocation,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{}: {kind}: {}", self.location, self.message)
    }
}

/// Receives warnings and errors keyed by source location.
pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);

    fn warning(&mut self, location: SourceLocation, message: impl Into<String>)
    where
        Self: Sized,
    {
        self.report(Diagnostic {
            severity: Severity::Warning,
            location,
            message: message.into(),
        });
    }

    fn error(&mut self, location: SourceLocation, message: impl Into<String>)
    where
        Self: Sized,
    {
        self.report(Diagnostic {
            severity: Severity::Error,
            location,
            message: message.into(),
        });
    }
}

impl DiagnosticSink for Vec<Diagnostic> {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.push(diagnostic);
    }
}

/// Returns `true` if any diagnostic is an error.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(|d| d.severity == Severity::Error)
}
