//! Arpeggiator: expands a word decorated with `r<dir><count>...` into notes.
//!
//! `Cm(rud4)` walks the chord tones up once and down four times. The walk
//! keeps a signed index into the chord; indexes outside `[0, n)` wrap and
//! shift by whole octaves (floor division, so `-1` is the top tone an octave
//! down). The generated notes replace the original word in place and keep
//! its other decorators.

use tracing::{debug, warn};

use super::chord::{looks_like_chord, resolve_chord};
use super::error::CompileError;
use super::function::Function;
use super::note::{resolve_notes, Note};
use super::repeat::MAX_REPEAT;
use super::token::{Token, TokenKind};

/// Direction of one arpeggio run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// Parse `ru4d2` into `[(Up, 4), (Down, 2)]`. A missing count means 1.
///
/// Patterns walking more than [`MAX_REPEAT`] notes are rejected.
pub fn parse_pattern(value: &str) -> Option<Vec<(Direction, usize)>> {
    let body = value.strip_prefix('r')?;
    let mut runs = Vec::new();
    let mut chars = body.chars().peekable();
    while let Some(letter) = chars.next() {
        let direction = match letter {
            'u' => Direction::Up,
            'd' => Direction::Down,
            _ => return None,
        };
        let mut digits = String::new();
        while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
            digits.push(d);
            chars.next();
        }
        let count = if digits.is_empty() {
            1
        } else {
            digits.parse().ok()?
        };
        runs.push((direction, count));
    }
    let total = runs
        .iter()
        .try_fold(0usize, |total, &(_, count)| total.checked_add(count))?;
    (total <= MAX_REPEAT).then_some(runs)
}

/// Walk `notes` following `runs`, one output note per step.
pub fn walk(notes: &[Note], runs: &[(Direction, usize)]) -> Vec<Note> {
    let n = notes.len() as i32;
    if n == 0 {
        return Vec::new();
    }
    let mut index = 0i32;
    let mut out = Vec::new();
    for &(direction, count) in runs {
        for _ in 0..count {
            let note = &notes[index.rem_euclid(n) as usize];
            out.push(note.transpose(index.div_euclid(n) * 12));
            index += match direction {
                Direction::Up => 1,
                Direction::Down => -1,
            };
        }
    }
    out
}

/// Replace every arpeggio-decorated word with its expansion.
///
/// `near` is the reference pitch used to voice the chord.
pub fn arpeggiate(tokens: Vec<Token>, near: i32) -> Result<Vec<Token>, CompileError> {
    let mut out = Vec::with_capacity(tokens.len());
    for token in tokens {
        let TokenKind::Word(word) = &token.kind else {
            out.push(token);
            continue;
        };
        let function = Function::parse(word);
        let Some(pattern) = function
            .args
            .iter()
            .find(|a| a.name.is_none() && a.value.starts_with('r'))
        else {
            out.push(token);
            continue;
        };

        let runs = parse_pattern(&pattern.value).ok_or_else(|| {
            CompileError::syntax(
                format!("bad arpeggio '{}'", pattern.value),
                word.clone(),
                token.col,
            )
        })?;

        let base = if looks_like_chord(&function.name) {
            resolve_chord(&function.name, near)
        } else {
            resolve_notes(&function.name, near)
        };
        let notes = match base {
            Ok(notes) => notes,
            Err(e) => {
                warn!("cannot arpeggiate '{word}': {}", e.message);
                out.push(token);
                continue;
            }
        };

        let kept: Vec<String> = function
            .args
            .iter()
            .filter(|a| !std::ptr::eq(*a, pattern))
            .map(|a| a.to_source())
            .collect();
        let suffix = if kept.is_empty() {
            String::new()
        } else {
            format!("({})", kept.join(","))
        };

        let expanded = walk(&notes, &runs);
        debug!(
            "arpeggio {word} -> {}",
            expanded.iter().map(|n| n.name.as_str()).collect::<Vec<_>>().join(" ")
        );
        out.extend(
            expanded
                .into_iter()
                .map(|note| Token::word(format!("{}{suffix}", note.name), token.col)),
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::lexer::tokenize_line;
    use crate::dsl::rhythm::allocate;

    fn expand(line: &str) -> String {
        let tokens = tokenize_line(line).unwrap();
        allocate(&arpeggiate(tokens, 60).unwrap())
            .unwrap()
            .join(" ")
    }

    #[test]
    fn pattern_parsing() {
        assert_eq!(
            parse_pattern("ru4d2u4"),
            Some(vec![
                (Direction::Up, 4),
                (Direction::Down, 2),
                (Direction::Up, 4)
            ])
        );
        assert_eq!(
            parse_pattern("rud4"),
            Some(vec![(Direction::Up, 1), (Direction::Down, 4)])
        );
        assert_eq!(parse_pattern("rx2"), None);
        assert_eq!(parse_pattern("h50"), None);
    }

    #[test]
    fn walk_wraps_below_the_chord() {
        assert_eq!(expand("Cm(rud4)"), "c4 d#4 c4 g3 d#3");
    }

    #[test]
    fn walk_wraps_above_the_chord() {
        assert_eq!(expand("F(ru4d2u4)"), "f4 a4 c5 f5 a5 f5 c5 f5 a5 c6");
    }

    #[test]
    fn other_decorators_are_carried() {
        assert_eq!(
            expand("F(ru4d2u4,v4)"),
            "f4(v4) a4(v4) c5(v4) f5(v4) a5(v4) f5(v4) c5(v4) f5(v4) a5(v4) c6(v4)"
        );
        assert_eq!(expand("C(ru3,v4) f4"), "c4(v4) e4(v4) g4(v4) f4");
    }

    #[test]
    fn plain_words_pass_through() {
        assert_eq!(expand("a b c"), "a b c");
    }

    #[test]
    fn exact_octave_multiples_shift_down_once() {
        let notes = resolve_chord("C", 60).unwrap();
        let walked = walk(&notes, &[(Direction::Down, 4)]);
        let names: Vec<&str> = walked.iter().map(|n| n.name.as_str()).collect();
        // indexes 0, -1, -2, -3: -3 is the root one octave down, not two
        assert_eq!(names, vec!["c4", "g3", "e3", "c3"]);
    }

    #[test]
    fn bare_notes_arpeggiate_too() {
        assert_eq!(expand("c4eg(ru3)"), "c4 e4 g4");
    }

    #[test]
    fn malformed_pattern_is_a_syntax_error() {
        let tokens = tokenize_line("C(rq2)").unwrap();
        assert!(arpeggiate(tokens, 60).is_err());
    }

    #[test]
    fn errors_point_at_the_word() {
        let tokens = tokenize_line("é c4 C(rq2)").unwrap();
        assert_eq!(arpeggiate(tokens, 60).unwrap_err().col, 5);
    }

    #[test]
    fn overlong_walks_are_rejected() {
        assert!(parse_pattern("ru256").is_some());
        assert!(parse_pattern("ru200d57").is_none());
        assert!(parse_pattern("ru99999999999999999999").is_none());
        let tokens = tokenize_line("C(ru999999999)").unwrap();
        assert!(arpeggiate(tokens, 60).is_err());
    }
}
