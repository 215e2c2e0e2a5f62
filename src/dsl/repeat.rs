//! Repetition expansion: `atom*N` rewritten textually before lexing.
//!
//! `a*3` becomes `[a a a]` and `[a b]*2` becomes `[[a b] [a b]]`. The result is
//! always wrapped in a group so the rhythm allocator treats the whole expansion
//! as one timing unit. Nested repetitions are handled by rescanning from the
//! left until no `*` remains.

use super::error::CompileError;

/// Largest count accepted after a `*`.
pub const MAX_REPEAT: usize = 256;

/// Longest a line may grow to, in characters, once repetitions are expanded.
pub const MAX_EXPANDED_CHARS: usize = 1 << 16;

/// Expand every `*N` repetition in a sequencing line.
pub fn expand_repetition(line: &str) -> Result<String, CompileError> {
    let mut text: Vec<char> = line.chars().collect();

    while let Some(star) = find_star(&text) {
        let source: String = text.iter().collect();

        let mut digits_end = star + 1;
        while digits_end < text.len() && text[digits_end].is_whitespace() {
            digits_end += 1;
        }
        let digits_start = digits_end;
        while digits_end < text.len() && text[digits_end].is_ascii_digit() {
            digits_end += 1;
        }
        if digits_start == digits_end {
            return Err(CompileError::syntax(
                "expected a repeat count after '*'",
                source,
                star,
            ));
        }
        let count_text: String = text[digits_start..digits_end].iter().collect();
        let count = match count_text.parse::<usize>() {
            Ok(count) if count <= MAX_REPEAT => count,
            _ => {
                return Err(CompileError::syntax(
                    format!("repeat count is larger than {MAX_REPEAT}"),
                    source,
                    star,
                ))
            }
        };
        if count == 0 {
            return Err(CompileError::syntax(
                "repeat count must be positive",
                source,
                star,
            ));
        }

        let mut atom_end = star;
        while atom_end > 0 && text[atom_end - 1].is_whitespace() {
            atom_end -= 1;
        }
        let atom_start = atom_start(&text, atom_end)
            .ok_or_else(|| CompileError::syntax("nothing to repeat", source.clone(), star))?;

        let atom: String = text[atom_start..atom_end].iter().collect();
        let grown = (atom_end - atom_start + 1)
            .checked_mul(count)
            .and_then(|n| n.checked_add(text.len()))
            .filter(|&n| n <= MAX_EXPANDED_CHARS);
        if grown.is_none() {
            return Err(CompileError::syntax(
                "line is too long once repeated",
                source,
                star,
            ));
        }
        let repeated = vec![atom.as_str(); count].join(" ");
        let replacement: Vec<char> = format!("[{repeated}]").chars().collect();
        text.splice(atom_start..digits_end, replacement);
    }

    Ok(text.into_iter().collect())
}

/// First `*` outside any decorator parentheses.
fn find_star(text: &[char]) -> Option<usize> {
    let mut depth = 0i32;
    for (i, &c) in text.iter().enumerate() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            '*' if depth <= 0 => return Some(i),
            _ => {}
        }
    }
    None
}

/// Start index of the atom ending right before `end`: a bracketed group or a
/// single word (decorator included).
fn atom_start(text: &[char], end: usize) -> Option<usize> {
    if end == 0 {
        return None;
    }

    if text[end - 1] == ']' {
        let mut depth = 0i32;
        for i in (0..end).rev() {
            match text[i] {
                ']' => depth += 1,
                '[' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            }
        }
        return None;
    }

    let mut paren = 0i32;
    let mut i = end;
    while i > 0 {
        let c = text[i - 1];
        match c {
            ')' => paren += 1,
            '(' => paren -= 1,
            _ if paren == 0 && (c.is_whitespace() || c == '[' || c == ']') => break,
            _ => {}
        }
        i -= 1;
    }
    (i < end).then_some(i)
}
