//! Note names: the pitch table and bare-note resolution.
//!
//! Pitches are MIDI-style semitone numbers (`c4` = 60). A bare-note word is
//! split at each letter `a`..`g` (`c4eg` → `c4`, `e`, `g`); each piece is
//! resolved exactly when it carries an octave, otherwise to the nearest
//! matching pitch relative to a running reference.

use serde::Serialize;

use super::error::CompileError;

/// Lowest pitch in the note table.
pub const MIN_PITCH: i32 = 0;
/// Highest pitch in the note table.
pub const MAX_PITCH: i32 = 127;

const SHARP_NAMES: [&str; 12] = [
    "c", "c#", "d", "d#", "e", "f", "f#", "g", "g#", "a", "a#", "b",
];

/// Every accepted pitch-class spelling with its pitch class.
const SPELLINGS: [(&str, i32); 21] = [
    ("c", 0),
    ("c#", 1),
    ("db", 1),
    ("d", 2),
    ("d#", 3),
    ("eb", 3),
    ("e", 4),
    ("fb", 4),
    ("e#", 5),
    ("f", 5),
    ("f#", 6),
    ("gb", 6),
    ("g", 7),
    ("g#", 8),
    ("ab", 8),
    ("a", 9),
    ("a#", 10),
    ("bb", 10),
    ("b", 11),
    ("cb", 11),
    ("b#", 0),
];

/// A resolved pitched note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Note {
    pub pitch: i32,
    /// Canonical display name, sharp spelling with octave (`d#4`).
    pub name: String,
    /// The source text this note was resolved from.
    pub original: String,
}

impl Note {
    pub fn from_pitch(pitch: i32, original: impl Into<String>) -> Self {
        Self {
            pitch,
            name: pitch_name(pitch),
            original: original.into(),
        }
    }

    /// The same note moved by `semitones`, renamed for its new pitch.
    pub fn transpose(&self, semitones: i32) -> Self {
        Self::from_pitch(self.pitch + semitones, self.original.clone())
    }
}

/// Canonical name of a pitch: `60` → `c4`, `63` → `d#4`, `0` → `c-1`.
pub fn pitch_name(pitch: i32) -> String {
    let class = SHARP_NAMES[pitch.rem_euclid(12) as usize];
    format!("{class}{}", pitch.div_euclid(12) - 1)
}

/// Resolve a bare-note word into one or more notes.
///
/// `near` seeds the reference pitch; each resolved note becomes the reference
/// for the next one in the same word.
pub fn resolve_notes(word: &str, near: i32) -> Result<Vec<Note>, CompileError> {
    let lower = word.to_lowercase();
    let mut near = near;
    let mut notes = Vec::new();
    for piece in split_at_letters(&lower) {
        let note = resolve_piece(&canonical_accidentals(&piece), near)
            .ok_or_else(|| CompileError::resolution(format!("cannot resolve note '{piece}'"), word, 0))?;
        near = note.pitch;
        notes.push(note);
    }
    if notes.is_empty() {
        return Err(CompileError::resolution("empty note", word, 0));
    }
    Ok(notes)
}

/// Split before every note letter except the first character.
fn split_at_letters(word: &str) -> Vec<String> {
    let mut pieces: Vec<String> = Vec::new();
    for (i, ch) in word.chars().enumerate() {
        if i == 0 || ('a'..='g').contains(&ch) {
            pieces.push(String::new());
        }
        if let Some(last) = pieces.last_mut() {
            last.push(ch);
        }
    }
    pieces
}

/// `♯` and `s` become `#`, `♭` becomes `b`.
fn canonical_accidentals(piece: &str) -> String {
    piece
        .chars()
        .map(|c| match c {
            '♯' | 's' => '#',
            '♭' => 'b',
            other => other,
        })
        .collect()
}

/// Split `c#4` into its pitch-class part (`c#`) and octave (`Some(4)`).
fn split_octave(piece: &str) -> Option<(&str, Option<i32>)> {
    let digits_at = piece
        .find(|c: char| c.is_ascii_digit() || c == '-')
        .unwrap_or(piece.len());
    let (class, octave) = piece.split_at(digits_at);
    if octave.is_empty() {
        return Some((class, None));
    }
    Some((class, Some(octave.parse().ok()?)))
}

fn resolve_piece(piece: &str, near: i32) -> Option<Note> {
    let (class, octave) = split_octave(piece)?;
    let pitch_class = SPELLINGS
        .iter()
        .find(|(name, _)| *name == class)
        .map(|(_, pc)| *pc)?;

    if let Some(octave) = octave {
        let base = SPELLINGS
            .iter()
            .find(|(name, _)| name.len() == 1 && class.starts_with(*name))?
            .1;
        // cb4 is b3, b#3 is c4: the accidental moves across the octave line
        let offset = match pitch_class - base {
            o if o > 6 => o - 12,
            o if o < -6 => o + 12,
            o => o,
        };
        let pitch = (octave + 1) * 12 + base + offset;
        return (MIN_PITCH..=MAX_PITCH)
            .contains(&pitch)
            .then(|| Note::from_pitch(pitch, piece));
    }

    nearest(class, near)
}

/// Nearest-match lookup over the note table.
///
/// Candidates are spellings that fully prefix the input; the longest
/// spelling wins, then the pitch closest to `near`. Equally close pitches
/// resolve to the lower register.
fn nearest(class: &str, near: i32) -> Option<Note> {
    let mut best: Option<(usize, i32, i32)> = None;
    for pitch in MIN_PITCH..=MAX_PITCH {
        for (name, pc) in SPELLINGS {
            if pc != pitch.rem_euclid(12) || !class.starts_with(name) {
                continue;
            }
            let distance = (pitch - near).abs();
            let better = match best {
                None => true,
                Some((len, dist, _)) => name.len() > len || (name.len() == len && distance < dist),
            };
            if better {
                best = Some((name.len(), distance, pitch));
            }
        }
    }
    let (len, _, pitch) = best?;
    // anything after the matched spelling is not a note
    (len == class.len()).then(|| Note::from_pitch(pitch, class))
}
