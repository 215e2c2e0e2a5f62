//! Rhythm allocation: proportional time shares from bracket nesting.
//!
//! At each level the time available to a group is split equally among its
//! immediate entities; a nested group counts as one entity whose share is
//! subdivided again among its own children. Every share is therefore `1/d`
//! for an integer `d`, so shares are kept as denominators.
//!
//! Flattening emits each word followed by enough [`HOLD`]s that every slot in
//! the resulting line lasts one "tick" (the smallest share in the line).

use super::error::CompileError;
use super::token::{Token, TokenKind, HOLD};

/// Most slots a flattened line may hold.
pub const MAX_SLOTS: usize = 1 << 16;

/// Denominator of each word's time share; `None` for bracket tokens.
///
/// Brackets must be balanced (see [`super::lexer::check_brackets`]).
pub fn share_denominators(tokens: &[Token]) -> Vec<Option<u64>> {
    let matching = match_brackets(tokens);
    let mut dens = vec![None; tokens.len()];
    assign(tokens, &matching, 0, tokens.len(), 1, &mut dens);
    dens
}

/// Time share of each word as a fraction of the whole line.
pub fn time_shares(tokens: &[Token]) -> Vec<Option<f64>> {
    share_denominators(tokens)
        .into_iter()
        .map(|d| d.map(|d| 1.0 / d as f64))
        .collect()
}

/// Flatten a bracketed token stream into a linear line of words and holds.
///
/// Nesting so deep that the line would exceed [`MAX_SLOTS`] is an error; the
/// error's text is left empty for the caller to fill in.
pub fn allocate(tokens: &[Token]) -> Result<Vec<String>, CompileError> {
    let dens = share_denominators(tokens);
    let Some(finest) = dens.iter().flatten().copied().max() else {
        return Ok(Vec::new());
    };

    let mut line = Vec::new();
    for (token, den) in tokens.iter().zip(&dens) {
        let (TokenKind::Word(word), Some(den)) = (&token.kind, den) else {
            continue;
        };
        let slots = ((finest as f64 / *den as f64).round() as usize).max(1);
        if slots > MAX_SLOTS - line.len() {
            return Err(CompileError::syntax(
                "line is subdivided too finely",
                String::new(),
                token.col,
            ));
        }
        line.push(word.clone());
        line.extend(std::iter::repeat(HOLD.to_string()).take(slots - 1));
    }
    Ok(line)
}

/// For every `[`, the index of its matching `]`.
fn match_brackets(tokens: &[Token]) -> Vec<usize> {
    let mut matching = vec![usize::MAX; tokens.len()];
    let mut stack = Vec::new();
    for (i, token) in tokens.iter().enumerate() {
        match token.kind {
            TokenKind::LBracket => stack.push(i),
            TokenKind::RBracket => {
                if let Some(open) = stack.pop() {
                    matching[open] = i;
                }
            }
            TokenKind::Word(_) => {}
        }
    }
    matching
}

/// Entities directly inside `[start, end)`: words and top-level groups.
fn count_entities(tokens: &[Token], matching: &[usize], start: usize, end: usize) -> u64 {
    let mut count = 0;
    let mut i = start;
    while i < end {
        match tokens[i].kind {
            TokenKind::LBracket if matching[i] < end => {
                count += 1;
                i = matching[i] + 1;
            }
            TokenKind::Word(_) => {
                count += 1;
                i += 1;
            }
            _ => i += 1,
        }
    }
    count
}

fn assign(
    tokens: &[Token],
    matching: &[usize],
    start: usize,
    end: usize,
    parent_den: u64,
    dens: &mut [Option<u64>],
) {
    let entities = count_entities(tokens, matching, start, end);
    if entities == 0 {
        return;
    }
    let den = parent_den.saturating_mul(entities);

    let mut i = start;
    while i < end {
        match tokens[i].kind {
            TokenKind::LBracket if matching[i] < end => {
                let close = matching[i];
                assign(tokens, matching, i + 1, close, den, dens);
                i = close + 1;
            }
            TokenKind::Word(_) => {
                dens[i] = Some(den);
                i += 1;
            }
            _ => i += 1,
        }
    }
}
