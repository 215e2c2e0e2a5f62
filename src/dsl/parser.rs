//! Document parser for scores.
//!
//! A score is line oriented. Block keywords open a settings block (`set`), a
//! Loop (`loop <name>` / `run <name>`) or a Chain (`chain <expr>` /
//! `tie <expr>`); the lines that follow belong to that block until the next
//! keyword. Sequencing lines go through the line pipeline in
//! [`Loop::add_line`]: repetition expansion, lexing, arpeggiation, rhythm
//! allocation, pitch resolution and decorators.

use tracing::{debug, warn};

use super::arpeggio::arpeggiate;
use super::ast::*;
use super::chain::{parse_chain, CHAIN_KEYWORDS};
use super::chord::{looks_like_chord, resolve_chord};
use super::error::CompileError;
use super::function::{Argument, Function};
use super::lexer::tokenize_line;
use super::note::resolve_notes;
use super::repeat::expand_repetition;
use super::rhythm::allocate;
use super::token::{HOLD, REST};

const LOOP_KEYWORDS: [&str; 2] = ["loop", "run"];
const DEFAULT_LOOP: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq)]
enum Block {
    None,
    Settings,
    Loop(usize),
    Chain(usize),
}

pub struct Parser {
    defaults: Params,
    loops: Vec<Loop>,
    chains: Vec<Chain>,
    block: Block,
}

impl Parser {
    pub fn new(defaults: Params) -> Self {
        Self {
            defaults,
            loops: Vec::new(),
            chains: Vec::new(),
            block: Block::None,
        }
    }

    pub fn parse(mut self, source: &str) -> Result<Program, CompileError> {
        for (index, raw) in source.lines().enumerate() {
            let Some(line) = sanitize(raw) else {
                continue;
            };
            self.parse_line(line).map_err(|e| e.at_line(index + 1))?;
        }
        Ok(self.finish())
    }

    fn parse_line(&mut self, line: &str) -> Result<(), CompileError> {
        let (keyword, rest) = match line.split_once(char::is_whitespace) {
            Some((keyword, rest)) => (keyword, rest.trim()),
            None => (line, ""),
        };

        if keyword == "set" {
            // `set bpm 90` is a one-off; a bare `set` opens a block
            if rest.is_empty() {
                self.block = Block::Settings;
                return Ok(());
            }
            return apply_setting(&mut self.defaults, rest);
        }
        if LOOP_KEYWORDS.contains(&keyword) {
            let name = rest.split_whitespace().next().ok_or_else(|| {
                CompileError::syntax("expected a loop name", line, keyword.len())
            })?;
            self.loops.push(Loop::new(name));
            self.block = Block::Loop(self.loops.len() - 1);
            return Ok(());
        }
        if CHAIN_KEYWORDS.contains(&keyword) {
            self.chains.push(Chain::new(parse_chain(line)?));
            self.block = Block::Chain(self.chains.len() - 1);
            return Ok(());
        }
        if keyword == "out" {
            let Block::Chain(index) = self.block else {
                return Err(CompileError::syntax("'out' outside a chain", line, 0));
            };
            if rest.is_empty() {
                return Err(CompileError::syntax("expected an output", line, keyword.len()));
            }
            self.chains[index].add_output(rest);
            return Ok(());
        }
        if keyword == "bpm" && self.block != Block::Settings {
            return apply_setting(&mut self.defaults, line);
        }

        match self.block {
            Block::Settings => apply_setting(&mut self.defaults, line),
            Block::Chain(_) => Err(CompileError::syntax(
                "expected 'out' inside a chain",
                line,
                0,
            )),
            Block::Loop(index) => self.loops[index].add_line(line),
            Block::None => {
                self.loops.push(Loop::new(DEFAULT_LOOP));
                let index = self.loops.len() - 1;
                self.block = Block::Loop(index);
                self.loops[index].add_line(line)
            }
        }
    }

    fn finish(self) -> Program {
        let mut loops = self.loops;
        loops.retain(|l| !l.steps.is_empty());
        let mut chains = self.chains;
        chains.retain(|c| !c.loop_names.is_empty());

        if chains.is_empty() && !loops.is_empty() {
            let mut names: Vec<String> = Vec::new();
            for l in &loops {
                if !names.contains(&l.name) {
                    names.push(l.name.clone());
                }
            }
            debug!("no chain declared, playing {names:?}");
            chains.push(Chain::new(names));
        }

        Program {
            loops,
            chains,
            defaults: self.defaults,
        }
    }
}

/// Strip comments and surrounding blanks; `None` for lines with nothing left.
fn sanitize(raw: &str) -> Option<&str> {
    let line = raw.split("//").next().unwrap_or_default().trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    Some(line)
}

/// Apply `bpm N`, `gate N` (percent) or `velocity N` to the document defaults.
fn apply_setting(defaults: &mut Params, line: &str) -> Result<(), CompileError> {
    let mut words = line.split_whitespace();
    let name = words.next().unwrap_or_default();
    let value = words.next().unwrap_or_default();
    let bad = |msg: &str| CompileError::syntax(msg, line, name.len() + 1);
    match name {
        "bpm" => {
            defaults.tempo = parse_tempo(value).map_err(|m| bad(&m))?;
        }
        "gate" => {
            defaults.gate = parse_gate(value).map_err(|m| bad(&m))?;
        }
        "velocity" => {
            defaults.velocity = parse_velocity(value).map_err(|m| bad(&m))?;
        }
        other => {
            return Err(CompileError::syntax(
                format!("unknown setting '{other}'"),
                line,
                0,
            ))
        }
    }
    debug!("defaults now {defaults:?}");
    Ok(())
}

impl Loop {
    /// Compile one sequencing line and append its Steps.
    ///
    /// The Loop's reference pitch and beats-per-line carry over from the
    /// previous line. Tokens that resolve to nothing are dropped with a
    /// warning; syntax errors abort the line.
    pub fn add_line(&mut self, line: &str) -> Result<(), CompileError> {
        let expanded = expand_repetition(line)?;
        let tokens = tokenize_line(&expanded)?;
        let tokens = arpeggiate(tokens, self.last_pitch)
            .map_err(|e| CompileError::syntax(e.message, expanded.clone(), e.col))?;
        let words = allocate(&tokens)
            .map_err(|e| CompileError::syntax(e.message, expanded.clone(), e.col))?;
        debug!("loop {}: {:?}", self.name, words);

        let divisor = words.len() as u32;
        for word in &words {
            if let Some(step) = self.step_for(word, divisor, &expanded)? {
                self.steps.push(step);
            }
        }
        Ok(())
    }

    fn step_for(
        &mut self,
        word: &str,
        divisor: u32,
        line: &str,
    ) -> Result<Option<Step>, CompileError> {
        let function = Function::parse(word);
        let sound = match function.name.as_str() {
            HOLD => Sound::Legato,
            REST => Sound::Rest,
            name => match self.resolve(name) {
                Ok(notes) => Sound::Notes(notes),
                Err(e) => {
                    warn!("loop {}: dropping '{word}': {}", self.name, e.message);
                    return Ok(None);
                }
            },
        };

        let mut step = Step::new(sound, self.last_beats_per_line, divisor);
        let decorators = Decorators::from_args(&function.args)
            .map_err(|msg| CompileError::syntax(msg, line, char_column(line, word)))?;
        if let Some(beats) = decorators.beats_per_line {
            step.beats_per_line = beats;
            self.last_beats_per_line = beats;
        }
        step.overrides = decorators.overrides;
        step.args = function.args;
        Ok(Some(step))
    }

    /// Chord syntax first, then bare notes.
    fn resolve(&mut self, name: &str) -> Result<Vec<super::note::Note>, CompileError> {
        let notes = if looks_like_chord(name) {
            resolve_chord(name, self.last_pitch)
                .or_else(|e| resolve_notes(name, self.last_pitch).map_err(|_| e))?
        } else {
            resolve_notes(name, self.last_pitch)?
        };
        if let Some(last) = notes.last() {
            self.last_pitch = last.pitch;
        }
        Ok(notes)
    }
}

/// Character column of `word` in `line`, or 0 when it is not there verbatim.
fn char_column(line: &str, word: &str) -> usize {
    line.find(word)
        .map(|at| line[..at].chars().count())
        .unwrap_or_default()
}

/// Parameter decorators read from a token's argument list.
#[derive(Debug, Default, PartialEq)]
pub struct Decorators {
    pub overrides: ParamOverrides,
    pub beats_per_line: Option<u32>,
}

impl Decorators {
    /// Read `t`/`b`/`v`/`h` values and their named forms.
    ///
    /// Values this layer does not know (arpeggios, envelopes) are left for
    /// other consumers. A known prefix followed by a malformed number is an
    /// error.
    pub fn from_args(args: &[Argument]) -> Result<Self, String> {
        let mut decorators = Self::default();
        for arg in args {
            let (key, value) = match &arg.name {
                Some(name) => match name.as_str() {
                    "tempo" | "t" => ('t', arg.value.as_str()),
                    "beats" | "b" => ('b', arg.value.as_str()),
                    "velocity" | "v" => ('v', arg.value.as_str()),
                    "gate" | "h" => ('h', arg.value.as_str()),
                    _ => continue,
                },
                None => {
                    let mut chars = arg.value.chars();
                    let Some(prefix) = chars.next() else {
                        continue;
                    };
                    let rest = chars.as_str();
                    if !rest.starts_with(|c: char| c.is_ascii_digit()) {
                        continue;
                    }
                    (prefix, rest)
                }
            };
            match key {
                't' => decorators.overrides.tempo = Some(parse_tempo(value)?),
                'b' => decorators.beats_per_line = Some(parse_beats(value)?),
                'v' => decorators.overrides.velocity = Some(parse_velocity(value)?),
                'h' => decorators.overrides.gate = Some(parse_gate(value)?),
                _ => {}
            }
        }
        Ok(decorators)
    }
}

/// Fastest tempo a score may ask for, in beats per minute.
pub const MAX_TEMPO: u32 = 1000;

fn parse_tempo(value: &str) -> Result<u32, String> {
    match value.parse::<u32>() {
        Ok(bpm) if (1..=MAX_TEMPO).contains(&bpm) => Ok(bpm),
        Ok(_) => Err(format!("tempo '{value}' is outside 1..={MAX_TEMPO}")),
        _ => Err(format!("bad tempo '{value}'")),
    }
}

fn parse_beats(value: &str) -> Result<u32, String> {
    match value.parse::<u32>() {
        Ok(beats) if beats > 0 => Ok(beats),
        _ => Err(format!("bad beats per line '{value}'")),
    }
}

fn parse_velocity(value: &str) -> Result<u8, String> {
    value
        .parse::<f64>()
        .map(|v| v.clamp(0.0, 127.0).round() as u8)
        .map_err(|_| format!("bad velocity '{value}'"))
}

/// Gate percent to a 0–1 fraction.
fn parse_gate(value: &str) -> Result<f64, String> {
    value
        .parse::<f64>()
        .map(|g| (g / 100.0).clamp(0.0, 1.0))
        .map_err(|_| format!("bad gate '{value}'"))
}
