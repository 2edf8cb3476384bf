//! Structured diagnostics
//!
//! Every parser and verifier failure is a [`Diag`] carrying a stable code
//! (e.g. `IL-SSA-001`), a message, and the offending entity's source
//! location when one is available.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// Resolved location in user-facing form: path plus 1-indexed line/column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagLoc {
    pub file: String,
    pub line: u32,
    pub col: u32,
}

impl fmt::Display for DiagLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.col)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diag {
    pub code: &'static str,
    pub severity: Severity,
    pub message: String,
    pub loc: Option<DiagLoc>,
}

impl Diag {
    pub fn error(code: &'static str, message: impl Into<String>) -> Self {
        Diag {
            code,
            severity: Severity::Error,
            message: message.into(),
            loc: None,
        }
    }

    pub fn with_loc(mut self, file: impl Into<String>, line: u32, col: u32) -> Self {
        self.loc = Some(DiagLoc {
            file: file.into(),
            line,
            col,
        });
        self
    }
}

impl fmt::Display for Diag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(loc) = &self.loc {
            write!(f, "{}: ", loc)?;
        }
        write!(f, "{}[{}]: {}", self.severity, self.code, self.message)
    }
}

impl std::error::Error for Diag {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_location() {
        let d = Diag::error("IL-SSA-001", "temp %3 redefined").with_loc("t.vil", 12, 5);
        assert_eq!(d.to_string(), "t.vil:12:5: error[IL-SSA-001]: temp %3 redefined");
    }

    #[test]
    fn test_display_without_location() {
        let d = Diag::error("IL-STRUCT-002", "function has no blocks");
        assert_eq!(d.to_string(), "error[IL-STRUCT-002]: function has no blocks");
    }
}
