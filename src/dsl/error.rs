//! Error types for the score compiler.

use thiserror::Error;

/// What went wrong while compiling a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unmatched brackets, malformed repetition or decorator.
    Syntax,
    /// A note, chord or chain reference that cannot be resolved.
    Resolution,
}

/// An error that occurred during compilation.
///
/// Carries the offending text and a caret line pointing at the failing
/// position so callers can show it under the source.
#[derive(Debug, Clone, Error)]
#[error("[{line}:{col}] {kind:?}: {message}\n{text}\n{pointer}")]
pub struct CompileError {
    pub message: String,
    pub line: usize,
    pub col: usize,
    pub kind: ErrorKind,
    pub text: String,
    pub pointer: String,
}

impl CompileError {
    pub fn syntax(message: impl Into<String>, text: impl Into<String>, col: usize) -> Self {
        Self::new(ErrorKind::Syntax, message, text, col)
    }

    pub fn resolution(message: impl Into<String>, text: impl Into<String>, col: usize) -> Self {
        Self::new(ErrorKind::Resolution, message, text, col)
    }

    fn new(kind: ErrorKind, message: impl Into<String>, text: impl Into<String>, col: usize) -> Self {
        let message = message.into();
        let pointer = format!("{}^ {}", " ".repeat(col), message);
        Self {
            message,
            line: 0,
            col,
            kind,
            text: text.into(),
            pointer,
        }
    }

    /// Attach the 1-based source line this error came from.
    pub fn at_line(mut self, line: usize) -> Self {
        self.line = line;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_lines_up_with_column() {
        let err = CompileError::syntax("brackets do not match", "a [b c", 2);
        assert_eq!(err.pointer, "  ^ brackets do not match");
        assert_eq!(err.kind, ErrorKind::Syntax);
    }

    #[test]
    fn display_includes_line_text_and_pointer() {
        let err = CompileError::resolution("unknown chord quality 'xyz'", "Cxyz", 1).at_line(7);
        let shown = err.to_string();
        assert!(shown.starts_with("[7:1] Resolution: unknown chord quality"));
        assert!(shown.contains("\nCxyz\n"));
        assert!(shown.ends_with(" ^ unknown chord quality 'xyz'"));
    }
}
