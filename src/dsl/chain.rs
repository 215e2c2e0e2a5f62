//! Chain expressions: `a*3 [b c]*2` to an ordered list of loop names.
//!
//! Evaluation runs in two passes: the expression is cut into atoms, brackets
//! and `*` markers, then bracketed spans are evaluated recursively with a
//! trailing `* N` applied to whatever item (name or span) precedes it.

use tracing::debug;

use super::error::CompileError;
use super::repeat::MAX_REPEAT;

/// Most loop names a chain may expand to.
pub const MAX_CHAIN_LEN: usize = 1 << 12;

/// Keywords that may open a chain declaration.
pub const CHAIN_KEYWORDS: [&str; 2] = ["chain", "tie"];

#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Name(String),
    Open(usize),
    Close(usize),
    Times(usize),
}

/// Evaluate a chain expression (optionally led by `chain`/`tie`).
pub fn parse_chain(expr: &str) -> Result<Vec<String>, CompileError> {
    let body = strip_keyword(expr.trim());
    let pieces = split(body);
    let names = evaluate(&pieces, 0, pieces.len(), body)?;
    debug!("chain '{body}' -> {names:?}");
    Ok(names)
}

fn strip_keyword(expr: &str) -> &str {
    for keyword in CHAIN_KEYWORDS {
        if let Some(rest) = expr.strip_prefix(keyword) {
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                return rest.trim_start();
            }
        }
    }
    expr
}

fn split(body: &str) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let flush = |current: &mut String, pieces: &mut Vec<Piece>| {
        if !current.is_empty() {
            pieces.push(Piece::Name(std::mem::take(current)));
        }
    };
    for (col, ch) in body.char_indices() {
        match ch {
            '[' => {
                flush(&mut current, &mut pieces);
                pieces.push(Piece::Open(col));
            }
            ']' => {
                flush(&mut current, &mut pieces);
                pieces.push(Piece::Close(col));
            }
            '*' => {
                flush(&mut current, &mut pieces);
                pieces.push(Piece::Times(col));
            }
            c if c.is_whitespace() => flush(&mut current, &mut pieces),
            c => current.push(c),
        }
    }
    flush(&mut current, &mut pieces);
    pieces
}

fn evaluate(
    pieces: &[Piece],
    from: usize,
    to: usize,
    source: &str,
) -> Result<Vec<String>, CompileError> {
    let mut result: Vec<String> = Vec::new();
    // start of the most recent item in `result`, the target of a `*`
    let mut last_item: Option<usize> = None;
    let mut i = from;
    while i < to {
        match &pieces[i] {
            Piece::Name(name) => {
                last_item = Some(result.len());
                result.push(name.clone());
                i += 1;
            }
            Piece::Open(col) => {
                let close = find_close(pieces, i + 1, to).ok_or_else(|| {
                    CompileError::syntax("unmatched '['", source, *col)
                })?;
                let inner = evaluate(pieces, i + 1, close, source)?;
                last_item = Some(result.len());
                result.extend(inner);
                i = close + 1;
            }
            Piece::Close(col) => {
                return Err(CompileError::syntax("unmatched ']'", source, *col));
            }
            Piece::Times(col) => {
                let start = last_item
                    .take()
                    .ok_or_else(|| CompileError::syntax("'*' without a name", source, *col))?;
                let count = match pieces.get(i + 1) {
                    Some(Piece::Name(n)) if i + 1 < to => n.parse::<usize>().ok(),
                    _ => None,
                }
                .ok_or_else(|| CompileError::syntax("'*' needs a count", source, *col))?;
                if count > MAX_REPEAT {
                    return Err(CompileError::syntax(
                        format!("repeat count is larger than {MAX_REPEAT}"),
                        source,
                        *col,
                    ));
                }
                let grown = (result.len() - start)
                    .checked_mul(count)
                    .and_then(|n| n.checked_add(start))
                    .filter(|&n| n <= MAX_CHAIN_LEN);
                if grown.is_none() {
                    return Err(CompileError::syntax(
                        format!("chain is longer than {MAX_CHAIN_LEN} loops"),
                        source,
                        *col,
                    ));
                }
                let item: Vec<String> = result.drain(start..).collect();
                for _ in 0..count {
                    result.extend(item.iter().cloned());
                }
                i += 2;
            }
        }
    }
    Ok(result)
}

fn find_close(pieces: &[Piece], from: usize, to: usize) -> Option<usize> {
    let mut depth = 1;
    for (i, piece) in pieces.iter().enumerate().take(to).skip(from) {
        match piece {
            Piece::Open(_) => depth += 1,
            Piece::Close(_) => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
