//! Chord resolution: `Root[quality][/Bass][;octave]` to absolute notes.
//!
//! The root is an uppercase letter with an optional accidental. Without an
//! octave suffix the root sits in the octave that contains the reference
//! pitch and the remaining tones stack above it. A slash bass that is a chord
//! tone inverts the chord (that tone and every tone after it drop an octave);
//! any other bass is added below the root. `;N` moves the whole voicing so
//! its lowest note lands in octave `N`.

use super::error::CompileError;
use super::note::Note;

/// Interval sets by quality suffix.
const QUALITIES: [(&str, &[i32]); 24] = [
    ("", &[0, 4, 7]),
    ("maj", &[0, 4, 7]),
    ("m", &[0, 3, 7]),
    ("min", &[0, 3, 7]),
    ("5", &[0, 7]),
    ("6", &[0, 4, 7, 9]),
    ("m6", &[0, 3, 7, 9]),
    ("7", &[0, 4, 7, 10]),
    ("maj7", &[0, 4, 7, 11]),
    ("m7", &[0, 3, 7, 10]),
    ("mmaj7", &[0, 3, 7, 11]),
    ("m7b5", &[0, 3, 6, 10]),
    ("dim", &[0, 3, 6]),
    ("dim7", &[0, 3, 6, 9]),
    ("aug", &[0, 4, 8]),
    ("sus2", &[0, 2, 7]),
    ("sus4", &[0, 5, 7]),
    ("7sus4", &[0, 5, 7, 10]),
    ("add9", &[0, 4, 7, 14]),
    ("9", &[0, 4, 7, 10, 14]),
    ("maj9", &[0, 4, 7, 11, 14]),
    ("m9", &[0, 3, 7, 10, 14]),
    ("11", &[0, 4, 7, 10, 14, 17]),
    ("13", &[0, 4, 7, 10, 14, 21]),
];

/// Whether a word uses chord syntax (uppercase root letter).
pub fn looks_like_chord(word: &str) -> bool {
    word.chars().next().is_some_and(|c| ('A'..='G').contains(&c))
}

/// Resolve a chord word against the reference pitch `near`.
pub fn resolve_chord(word: &str, near: i32) -> Result<Vec<Note>, CompileError> {
    let err = |msg: String| CompileError::resolution(msg, word, 0);

    let (body, register) = match word.split_once(';') {
        Some((body, reg)) => {
            let reg: i32 = reg
                .parse()
                .map_err(|_| err(format!("bad octave '{reg}'")))?;
            (body, Some(reg))
        }
        None => (word, None),
    };
    let (head, bass) = match body.split_once('/') {
        Some((head, bass)) => (head, Some(bass)),
        None => (body, None),
    };

    let (root_class, quality) =
        split_root(head).ok_or_else(|| err(format!("'{head}' has no chord root")))?;
    let intervals = QUALITIES
        .iter()
        .find(|(name, _)| *name == quality)
        .map(|(_, iv)| *iv)
        .ok_or_else(|| err(format!("unknown chord quality '{quality}'")))?;

    let root = (near.div_euclid(12)) * 12 + root_class;
    let mut pitches: Vec<i32> = intervals.iter().map(|iv| root + iv).collect();

    if let Some(bass) = bass {
        let (bass_class, rest) =
            split_root(bass).ok_or_else(|| err(format!("'{bass}' is not a bass note")))?;
        if !rest.is_empty() {
            return Err(err(format!("'{bass}' is not a bass note")));
        }
        match pitches.iter().position(|p| p.rem_euclid(12) == bass_class) {
            Some(0) => {}
            Some(inversion) => {
                for p in &mut pitches[inversion..] {
                    *p -= 12;
                }
            }
            None => {
                let below = (root - bass_class).rem_euclid(12);
                let below = if below == 0 { 12 } else { below };
                pitches.push(root - below);
            }
        }
        pitches.sort_unstable();
    }

    if let Some(octave) = register {
        let lowest = pitches[0];
        let shift = ((octave + 1) - lowest.div_euclid(12)) * 12;
        for p in &mut pitches {
            *p += shift;
        }
    }

    if pitches.iter().any(|p| !(super::note::MIN_PITCH..=super::note::MAX_PITCH).contains(p)) {
        return Err(err("chord is outside the playable range".to_string()));
    }

    Ok(pitches
        .into_iter()
        .map(|p| Note::from_pitch(p, word))
        .collect())
}

/// Split an uppercase root (with optional `#`, `b`, `♯`, `♭`) from the rest.
fn split_root(text: &str) -> Option<(i32, &str)> {
    let mut chars = text.char_indices();
    let (_, letter) = chars.next()?;
    let base: i32 = match letter {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let (class, rest_at) = match chars.next() {
        Some((i, '#' | '♯')) => (base + 1, i + text[i..].chars().next()?.len_utf8()),
        // "b" is a flat; "B" qualities never start with a lowercase b
        Some((i, 'b' | '♭')) => (base - 1, i + text[i..].chars().next()?.len_utf8()),
        Some((i, _)) => (base, i),
        None => (base, text.len()),
    };
    Some((class.rem_euclid(12), &text[rest_at..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chord(word: &str, near: i32) -> Vec<(i32, String)> {
        resolve_chord(word, near)
            .unwrap()
            .into_iter()
            .map(|n| (n.pitch, n.name))
            .collect()
    }

    fn expect(pairs: &[(i32, &str)]) -> Vec<(i32, String)> {
        pairs.iter().map(|(p, n)| (*p, n.to_string())).collect()
    }

    #[test]
    fn root_sits_in_reference_octave() {
        assert_eq!(chord("Cm", 32), expect(&[(24, "c1"), (27, "d#1"), (31, "g1")]));
        assert_eq!(chord("Cm", 70), expect(&[(60, "c4"), (63, "d#4"), (67, "g4")]));
        assert_eq!(chord("G", 70), expect(&[(67, "g4"), (71, "b4"), (74, "d5")]));
    }

    #[test]
    fn extensions_stack_above() {
        assert_eq!(
            chord("Amaj7", 70),
            expect(&[(69, "a4"), (73, "c#5"), (76, "e5"), (80, "g#5")])
        );
        assert_eq!(
            chord("G7", 70),
            expect(&[(67, "g4"), (71, "b4"), (74, "d5"), (77, "f5")])
        );
        assert_eq!(
            chord("Gmaj7", 70),
            expect(&[(67, "g4"), (71, "b4"), (74, "d5"), (78, "f#5")])
        );
    }

    #[test]
    fn slash_chord_tone_inverts() {
        assert_eq!(
            chord("Gmaj7/F#", 70),
            expect(&[(66, "f#4"), (67, "g4"), (71, "b4"), (74, "d5")])
        );
    }

    #[test]
    fn register_places_lowest_note() {
        assert_eq!(
            chord("Dm7/A;3", 60),
            expect(&[(57, "a3"), (60, "c4"), (62, "d4"), (65, "f4")])
        );
        assert_eq!(chord("Am;2", 60), expect(&[(45, "a2"), (48, "c3"), (52, "e3")]));
    }

    #[test]
    fn foreign_bass_goes_below_root() {
        assert_eq!(
            chord("C/D", 60),
            expect(&[(50, "d3"), (60, "c4"), (64, "e4"), (67, "g4")])
        );
    }

    #[test]
    fn accidental_roots() {
        assert_eq!(chord("Ebm", 60)[0], (63, "d#4".to_string()));
        assert_eq!(chord("F#", 60)[0], (66, "f#4".to_string()));
        assert_eq!(chord("Bb", 60)[0], (70, "a#4".to_string()));
    }

    #[test]
    fn root_accidentals_wrap_the_octave() {
        assert_eq!(split_root("Cbmaj7"), Some((11, "maj7")));
        assert_eq!(split_root("B#m"), Some((0, "m")));
        assert_eq!(split_root("E♭"), Some((3, "")));
        assert_eq!(split_root("x"), None);
    }

    #[test]
    fn unknown_quality_is_an_error() {
        let err = resolve_chord("Cxyz", 60).unwrap_err();
        assert!(err.message.contains("unknown chord quality"));
    }

    #[test]
    fn lowercase_is_not_chord_syntax() {
        assert!(looks_like_chord("Cm7"));
        assert!(!looks_like_chord("c4"));
        assert!(!looks_like_chord("_"));
    }
}
