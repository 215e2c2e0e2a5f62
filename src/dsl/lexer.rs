//! Lexer for sequencing lines.
//!
//! Splits one line into bracket tokens and words. A word may carry a
//! parenthesized decorator list (`c4(v80,h50)`), which stays part of the word;
//! nested parentheses inside the list are depth-tracked.

use super::error::CompileError;
use super::token::{Token, TokenKind};

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    source: String,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            source: source.to_string(),
        }
    }

    /// Tokenize the line and validate bracket balance.
    pub fn tokenize(&mut self) -> Result<Vec<Token>, CompileError> {
        let mut tokens = Vec::new();

        while !self.is_at_end() {
            let ch = self.peek();
            let col = self.pos;
            match ch {
                '[' => {
                    self.advance();
                    tokens.push(Token {
                        kind: TokenKind::LBracket,
                        col,
                    });
                }
                ']' => {
                    self.advance();
                    tokens.push(Token {
                        kind: TokenKind::RBracket,
                        col,
                    });
                }
                c if c.is_whitespace() => {
                    self.advance();
                }
                '(' => {
                    return Err(CompileError::syntax(
                        "decorator without a note",
                        self.source.clone(),
                        col,
                    ));
                }
                ')' => {
                    return Err(CompileError::syntax(
                        "unmatched ')'",
                        self.source.clone(),
                        col,
                    ));
                }
                _ => tokens.push(self.lex_word()?),
            }
        }

        check_brackets(&tokens, &self.source)?;
        Ok(tokens)
    }

    fn peek(&self) -> char {
        self.chars[self.pos]
    }

    fn advance(&mut self) -> char {
        let ch = self.chars[self.pos];
        self.pos += 1;
        ch
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn lex_word(&mut self) -> Result<Token, CompileError> {
        let col = self.pos;
        let mut word = String::new();
        while !self.is_at_end() {
            let ch = self.peek();
            if ch.is_whitespace() || matches!(ch, '(' | ')' | '[' | ']') {
                break;
            }
            word.push(self.advance());
        }

        if !self.is_at_end() && self.peek() == '(' {
            let open_col = self.pos;
            let mut depth = 0usize;
            loop {
                if self.is_at_end() {
                    return Err(CompileError::syntax(
                        "unclosed '('",
                        self.source.clone(),
                        open_col,
                    ));
                }
                let ch = self.advance();
                word.push(ch);
                match ch {
                    '(' => depth += 1,
                    ')' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(Token::word(word, col))
    }
}

/// Tokenize a single line.
pub fn tokenize_line(line: &str) -> Result<Vec<Token>, CompileError> {
    Lexer::new(line).tokenize()
}

/// Verify `[`/`]` balance with a running depth counter.
///
/// Depth going negative marks an unmatched `]` at that token; depth left
/// above zero marks an unmatched `[` where the depth last increased.
pub fn check_brackets(tokens: &[Token], source: &str) -> Result<(), CompileError> {
    let mut depth = 0i32;
    let mut last_open = 0;
    for token in tokens {
        match token.kind {
            TokenKind::LBracket => {
                depth += 1;
                last_open = token.col;
            }
            TokenKind::RBracket => {
                depth -= 1;
                if depth < 0 {
                    return Err(CompileError::syntax("unmatched ']'", source, token.col));
                }
            }
            TokenKind::Word(_) => {}
        }
    }
    if depth != 0 {
        return Err(CompileError::syntax("unmatched '['", source, last_open));
    }
    Ok(())
}
