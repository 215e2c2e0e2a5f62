//! Token types for the sequencing-line lexer.

/// Filler emitted by the rhythm allocator; also written by hand to sustain.
pub const HOLD: &str = "_";

/// Explicit rest.
pub const REST: &str = "~";

/// A token produced by the lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Character column in the (expanded) line.
    pub col: usize,
}

/// The kind of token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    LBracket,
    RBracket,
    /// A note, chord, hold or rest, with any `(...)` decorator attached.
    Word(String),
}

impl Token {
    pub fn word(text: impl Into<String>, col: usize) -> Self {
        Self {
            kind: TokenKind::Word(text.into()),
            col,
        }
    }

    pub fn is_bracket(&self) -> bool {
        !matches!(self.kind, TokenKind::Word(_))
    }

    /// The token as it appeared in source (`[`, `]` or the word).
    pub fn text(&self) -> &str {
        match &self.kind {
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Word(w) => w,
        }
    }
}
