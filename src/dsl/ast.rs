//! Program model for the score compiler.
//!
//! A [`Program`] holds named [`Loop`]s and the [`Chain`]s that play them.
//! Loops keep the Steps produced line by line; chains are filled with
//! absolute timing by the renderer in [`crate::event::render`].

use serde::Serialize;

use super::function::{Argument, Function};
use super::note::Note;

/// Pitch a fresh Loop resolves its first relative note against (`c4`).
pub const DEFAULT_REFERENCE_PITCH: i32 = 60;
/// Beats per line until a `b` decorator says otherwise.
pub const DEFAULT_BEATS_PER_LINE: u32 = 4;

/// Resolved playback parameters of one Step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Params {
    /// Beats per minute.
    pub tempo: u32,
    /// Fraction of the duration the note is held, 0–1.
    pub gate: f64,
    /// MIDI-style velocity, 0–127.
    pub velocity: u8,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            tempo: 120,
            gate: 0.95,
            velocity: 120,
        }
    }
}

impl Params {
    /// Fill every unset field of `overrides` from `self`.
    pub fn with(self, overrides: &ParamOverrides) -> Self {
        Self {
            tempo: overrides.tempo.unwrap_or(self.tempo),
            gate: overrides.gate.unwrap_or(self.gate),
            velocity: overrides.velocity.unwrap_or(self.velocity),
        }
    }
}

/// Parameters set explicitly on a Step; `None` inherits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ParamOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tempo: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity: Option<u8>,
}

/// What a Step sounds like.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sound {
    Notes(Vec<Note>),
    Rest,
    /// Sustains the previous event.
    Legato,
}

/// One rhythmic slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    pub beats_per_line: u32,
    /// Number of slots in the flattened line this Step came from.
    pub line_divisor: u32,
    pub sound: Sound,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Argument>,
    pub overrides: ParamOverrides,
    /// Set by the renderer.
    pub params: Params,
    pub beats_start: f64,
    pub beats_duration: f64,
    pub time_start_micros: u64,
    pub time_duration_micros: u64,
}

impl Step {
    pub fn new(sound: Sound, beats_per_line: u32, line_divisor: u32) -> Self {
        Self {
            beats_per_line,
            line_divisor,
            sound,
            args: Vec::new(),
            overrides: ParamOverrides::default(),
            params: Params::default(),
            beats_start: 0.0,
            beats_duration: 0.0,
            time_start_micros: 0,
            time_duration_micros: 0,
        }
    }

    /// The Step's own length in beats (`beats_per_line / line_divisor`).
    pub fn beats(&self) -> f64 {
        self.beats_per_line as f64 / self.line_divisor.max(1) as f64
    }

    /// Notes and rests start events; legato Steps only extend them.
    pub fn is_event(&self) -> bool {
        !matches!(self.sound, Sound::Legato)
    }

    /// The notes to dispatch, empty for rests.
    pub fn notes(&self) -> &[Note] {
        match &self.sound {
            Sound::Notes(notes) => notes,
            _ => &[],
        }
    }
}

/// A named sequence of Steps, built one line at a time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Loop {
    pub name: String,
    pub steps: Vec<Step>,
    /// Reference pitch for the next relative note.
    #[serde(skip)]
    pub last_pitch: i32,
    #[serde(skip)]
    pub last_beats_per_line: u32,
}

impl Loop {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            last_pitch: DEFAULT_REFERENCE_PITCH,
            last_beats_per_line: DEFAULT_BEATS_PER_LINE,
        }
    }
}

/// An ordered concatenation of Loops bound to outputs.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Chain {
    pub loop_names: Vec<String>,
    /// `out` declarations as written.
    pub outputs: Vec<String>,
    #[serde(skip)]
    pub output_functions: Vec<Function>,
    /// Event Steps with absolute timing, filled by the renderer.
    pub steps: Vec<Step>,
    pub beats_total: f64,
    pub micros_total: u64,
}

impl Chain {
    pub fn new(loop_names: Vec<String>) -> Self {
        Self {
            loop_names,
            ..Self::default()
        }
    }

    /// Record an `out` declaration.
    pub fn add_output(&mut self, decl: &str) {
        self.outputs.push(decl.to_string());
        self.output_functions.push(Function::parse(decl));
    }
}

/// A compiled score.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Program {
    pub loops: Vec<Loop>,
    pub chains: Vec<Chain>,
    pub defaults: Params,
}

impl Program {
    /// Every Loop with this name, in declaration order.
    pub fn loops_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Loop> + 'a {
        self.loops.iter().filter(move |l| l.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_beats_are_the_line_fraction() {
        let step = Step::new(Sound::Rest, 4, 8);
        assert_eq!(step.beats(), 0.5);
        assert!(step.is_event());
        assert!(!Step::new(Sound::Legato, 4, 8).is_event());
    }

    #[test]
    fn overrides_fill_from_defaults() {
        let overrides = ParamOverrides {
            tempo: Some(90),
            ..Default::default()
        };
        let params = Params::default().with(&overrides);
        assert_eq!(params.tempo, 90);
        assert_eq!(params.gate, 0.95);
        assert_eq!(params.velocity, 120);
    }

    #[test]
    fn new_loop_carries_default_context() {
        let l = Loop::new("a");
        assert_eq!(l.last_pitch, 60);
        assert_eq!(l.last_beats_per_line, 4);
    }

    #[test]
    fn chain_outputs_are_parsed() {
        let mut chain = Chain::new(vec!["a".into()]);
        chain.add_output("crow(1, env=2)");
        assert_eq!(chain.outputs, vec!["crow(1, env=2)"]);
        assert_eq!(chain.output_functions[0].name, "crow");
        assert_eq!(chain.output_functions[0].get_int("env", 9), Some(2));
    }
}
