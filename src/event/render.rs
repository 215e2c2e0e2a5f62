//! Program renderer: Loops concatenated into absolute-timed Chains.
//!
//! For each Chain the Steps of every referenced Loop are copied in chain
//! order, parameters are carried forward (last explicit value wins, seeded
//! by the document defaults), and start/duration are computed in beats and
//! microseconds. Legato Steps lengthen the event before them, wrapping past
//! the end of the Chain once, and are then removed.

use tracing::{debug, warn};

use crate::dsl::ast::{Chain, Loop, Params, Program, Step};

const MICROS_PER_MINUTE: f64 = 60_000_000.0;

/// Render every Chain of the program in place. Safe to call again.
pub fn render(program: &mut Program) {
    let Program {
        loops,
        chains,
        defaults,
    } = program;
    for chain in chains.iter_mut() {
        let steps = gather(chain, loops);
        render_chain(chain, steps, *defaults);
    }
}

/// Microseconds a Step lasts at its resolved tempo, never less than one.
pub fn step_micros(step: &Step) -> u64 {
    let micros = step.beats() * MICROS_PER_MINUTE / step.params.tempo.max(1) as f64;
    (micros as u64).max(1)
}

fn gather(chain: &Chain, loops: &[Loop]) -> Vec<Step> {
    let mut steps = Vec::new();
    for name in &chain.loop_names {
        let before = steps.len();
        for l in loops.iter().filter(|l| &l.name == name) {
            steps.extend(l.steps.iter().cloned());
        }
        if steps.len() == before {
            warn!("chain {:?}: no loop named '{name}'", chain.loop_names);
        }
    }
    steps
}

fn render_chain(chain: &mut Chain, mut steps: Vec<Step>, defaults: Params) {
    let mut current = defaults;
    for step in &mut steps {
        current = current.with(&step.overrides);
        step.params = current;
    }

    let mut beats_total = 0.0;
    let mut micros_total = 0u64;
    for step in &mut steps {
        step.beats_start = beats_total;
        step.time_start_micros = micros_total;
        step.beats_duration = step.beats();
        step.time_duration_micros = step_micros(step);
        beats_total += step.beats_duration;
        micros_total += step.time_duration_micros;
    }

    let n = steps.len();
    for i in 0..n {
        if !steps[i].is_event() {
            continue;
        }
        let (mut beats, mut micros) = (0.0, 0u64);
        for k in 1..n {
            let next = &steps[(i + k) % n];
            if next.is_event() {
                break;
            }
            beats += next.beats_duration;
            micros += next.time_duration_micros;
        }
        steps[i].beats_duration += beats;
        steps[i].time_duration_micros += micros;
    }

    steps.retain(Step::is_event);
    debug!(
        "chain {:?}: {} events, {beats_total} beats, {micros_total}us",
        chain.loop_names,
        steps.len()
    );
    chain.steps = steps;
    chain.beats_total = beats_total;
    chain.micros_total = micros_total;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::ast::Sound;
    use crate::dsl::Compiler;

    fn compile(src: &str) -> Program {
        Compiler::compile(src).unwrap()
    }

    fn durations(chain: &Chain) -> Vec<(f64, u64)> {
        chain
            .steps
            .iter()
            .map(|s| (s.beats_duration, s.time_duration_micros))
            .collect()
    }

    #[test]
    fn holds_extend_the_previous_note() {
        let program = compile("c4 _ d4 e4");
        let chain = &program.chains[0];
        assert_eq!(
            durations(chain),
            vec![(2.0, 1_000_000), (1.0, 500_000), (1.0, 500_000)]
        );
        assert_eq!(chain.beats_total, 4.0);
        assert_eq!(chain.micros_total, 2_000_000);
        let starts: Vec<u64> = chain.steps.iter().map(|s| s.time_start_micros).collect();
        assert_eq!(starts, vec![0, 1_000_000, 1_500_000]);
    }

    #[test]
    fn tiny_subdivisions_still_take_time() {
        let mut step = Step::new(Sound::Rest, 1, 1 << 20);
        step.params.tempo = 1000;
        assert_eq!(step_micros(&step), 1);
    }

    #[test]
    fn leading_holds_wrap_onto_the_last_note() {
        let program = compile("_ c4 d4 e4");
        let chain = &program.chains[0];
        assert_eq!(chain.steps.len(), 3);
        assert_eq!(chain.steps[0].time_start_micros, 500_000);
        assert_eq!(chain.steps[2].beats_duration, 2.0);
    }

    #[test]
    fn rests_stop_legato() {
        let program = compile("c4 ~ _ d4");
        let chain = &program.chains[0];
        assert!(matches!(chain.steps[1].sound, Sound::Rest));
        assert_eq!(durations(chain)[0].0, 1.0);
        assert_eq!(durations(chain)[1].0, 2.0);
    }

    #[test]
    fn tempo_carries_forward() {
        let program = compile("c4(t60) d4\ne4(t240) f4");
        let chain = &program.chains[0];
        let tempos: Vec<u32> = chain.steps.iter().map(|s| s.params.tempo).collect();
        assert_eq!(tempos, vec![60, 60, 240, 240]);
        // two beats per note at 60 and 240 bpm
        let micros: Vec<u64> = chain.steps.iter().map(|s| s.time_duration_micros).collect();
        assert_eq!(micros, vec![2_000_000, 2_000_000, 500_000, 500_000]);
    }

    #[test]
    fn gate_and_velocity_seeded_from_document() {
        let program = compile("set\nbpm 60\ngate 50\nvelocity 90\nloop a\nc4 d4(h25,v10) e4");
        let params: Vec<Params> = program.chains[0].steps.iter().map(|s| s.params).collect();
        assert_eq!(params[0].gate, 0.5);
        assert_eq!(params[0].velocity, 90);
        assert_eq!(params[0].tempo, 60);
        assert_eq!(params[2].gate, 0.25);
        assert_eq!(params[2].velocity, 10);
    }

    #[test]
    fn chains_repeat_loops() {
        let program = compile("loop a\nc4 d4\nloop b\ne4\nchain a*2 b\n");
        let chain = &program.chains[0];
        assert_eq!(chain.steps.len(), 5);
        assert_eq!(chain.beats_total, 12.0);
        assert_eq!(chain.steps[4].beats_start, 8.0);
    }

    #[test]
    fn total_beats_equal_the_sum_of_event_durations() {
        for src in ["c4 _ [d e] ~", "_ _ c4 [d [e f]] ~ _", "Cm(rud4) [c d]*2 _"] {
            let program = compile(src);
            let chain = &program.chains[0];
            let sum: f64 = chain.steps.iter().map(|s| s.beats_duration).sum();
            assert!((sum - chain.beats_total).abs() < 1e-9, "{src}");
            assert!(chain.steps.iter().all(|s| s.time_duration_micros > 0));
        }
    }

    #[test]
    fn unknown_loop_names_render_empty() {
        let program = compile("loop a\nc4\nchain b\n");
        let chain = &program.chains[0];
        assert!(chain.steps.is_empty());
        assert_eq!(chain.micros_total, 0);
    }

    #[test]
    fn rendering_twice_is_stable() {
        let mut program = compile("c4 _ d4");
        let once = program.clone();
        render(&mut program);
        assert_eq!(program, once);
    }
}
