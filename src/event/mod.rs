//! Real-time playback: the tick loop and live program replacement.
//!
//! The [`Scheduler`] owns the active [`Program`] together with the small
//! shared state the tick loop mutates (play state, per-Chain cursors and
//! pending note-offs), all behind one lock. A background thread ticks every
//! [`SchedulerSettings::tick`]: it releases due note-offs, then fires the
//! note-ons whose start each Chain's cursor crossed, in Chain order.
//!
//! [`Scheduler::update`] compiles and binds a new program off to the side and
//! only takes the lock to swap it in, so a failed compile never disturbs
//! playback.

pub mod pending;
pub mod render;
pub mod timeline;
pub mod transport;

pub use pending::{NoteOff, PendingOffs};
pub use timeline::{Timeline, BEFORE_START};
pub use transport::{Clock, ManualClock, PlayState, SystemClock, Transport};

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::dsl::ast::{Params, Program, Step};
use crate::dsl::{CompileError, Compiler};
use crate::output::{DeviceRegistry, Output};
use pending::hold_micros;

/// Scheduler tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerSettings {
    /// Period between ticks.
    pub tick: Duration,
    /// Document defaults new programs are compiled with.
    pub defaults: Params,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_micros(10),
            defaults: Params::default(),
        }
    }
}

/// State shared between the control surface and the tick thread.
struct Shared {
    program: Arc<Program>,
    /// Bound outputs, one list per Chain.
    outputs: Vec<Vec<Output>>,
    timeline: Timeline,
    transport: Transport,
    pending: PendingOffs,
    /// Transport time of the most recent tick while playing.
    last_elapsed: Option<u64>,
    /// Bumped on every play/stop so a stale tick thread knows to exit.
    generation: u64,
}

impl Shared {
    fn tick(&mut self, now: u64) {
        let elapsed = self.transport.elapsed(now);
        self.last_elapsed = Some(elapsed);
        for off in self.pending.pop_due(elapsed) {
            dispatch(&off.outputs, &off.step, false);
        }

        let program = Arc::clone(&self.program);
        for (index, chain) in program.chains.iter().enumerate() {
            for step_index in self.timeline.advance(index, chain, elapsed) {
                let step = &chain.steps[step_index];
                let outputs = &self.outputs[index];
                if step.notes().is_empty() || outputs.is_empty() {
                    continue;
                }
                trace!("chain {index} step {step_index} at {elapsed}us");
                dispatch(outputs, step, true);
                self.pending
                    .push(elapsed + hold_micros(step), step.clone(), outputs.clone());
            }
        }
    }

    fn halt(&mut self) {
        self.transport.stop();
        self.last_elapsed = None;
        self.generation += 1;
        for off in self.pending.drain_all() {
            dispatch(&off.outputs, &off.step, false);
        }
    }
}

fn dispatch(outputs: &[Output], step: &Step, on: bool) {
    for output in outputs {
        if let Err(e) = output.fire(step, on) {
            warn!("{output:?}: {e}");
        }
    }
}

/// Plays a program against its bound outputs.
pub struct Scheduler {
    shared: Arc<Mutex<Shared>>,
    registry: Mutex<DeviceRegistry>,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
}

impl Scheduler {
    /// A stopped scheduler with an empty program, timed by the wall clock.
    pub fn new(registry: DeviceRegistry, settings: SchedulerSettings) -> Self {
        Self::with_clock(registry, settings, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(
        registry: DeviceRegistry,
        settings: SchedulerSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                program: Arc::new(Program::default()),
                outputs: Vec::new(),
                timeline: Timeline::default(),
                transport: Transport::new(),
                pending: PendingOffs::new(),
                last_elapsed: None,
                generation: 0,
            })),
            registry: Mutex::new(registry),
            clock,
            settings,
        }
    }

    /// Compile a score with this scheduler's defaults.
    pub fn compile(&self, text: &str) -> Result<Program, CompileError> {
        Compiler::compile_with(text, self.settings.defaults)
    }

    /// Replace the running program with a newly compiled one.
    ///
    /// Play state and cursors carry over by Chain index; a cursor past the
    /// end of its new Chain continues from the current time instead. On a
    /// compile error the running program is left untouched.
    pub fn update(&self, text: &str) -> Result<(), CompileError> {
        let program = self.compile(text)?;
        self.load(program);
        Ok(())
    }

    /// Bind and swap in an already rendered program.
    pub fn load(&self, program: Program) {
        let outputs: Vec<Vec<Output>> = {
            let mut registry = self.registry.lock();
            program
                .chains
                .iter()
                .map(|chain| registry.bind_chain(chain))
                .collect()
        };

        let mut shared = self.shared.lock();
        let mut timeline = shared.timeline.carried_over(program.chains.len());
        timeline.refit(&program.chains, shared.last_elapsed);
        shared.timeline = timeline;
        shared.outputs = outputs;
        shared.program = Arc::new(program);
        info!(
            "loaded program with {} chains ({})",
            shared.program.chains.len(),
            if shared.transport.is_playing() { "playing" } else { "stopped" }
        );
    }

    /// Start playback from the top of every Chain.
    pub fn play(&self) {
        let mut shared = self.shared.lock();
        if shared.transport.is_playing() {
            return;
        }
        if shared.program.chains.iter().all(|c| c.steps.is_empty()) {
            warn!("nothing to play");
            return;
        }
        shared.transport.play(self.clock.now_micros());
        shared.timeline.reset();
        shared.last_elapsed = None;
        shared.generation += 1;
        let generation = shared.generation;
        drop(shared);

        let shared = Arc::clone(&self.shared);
        let clock = Arc::clone(&self.clock);
        let period = self.settings.tick;
        let spawned = thread::Builder::new()
            .name("tieloop-tick".into())
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    run_ticks(&shared, clock.as_ref(), period, generation)
                }));
                if let Err(payload) = result {
                    error!("tick thread panicked: {}", panic_message(&*payload));
                    shared.lock().halt();
                }
            });
        match spawned {
            Ok(_) => info!("playing"),
            Err(e) => {
                error!("cannot start tick thread: {e}");
                self.shared.lock().halt();
            }
        }
    }

    /// Stop playback. Pending note-offs are sent immediately.
    pub fn stop(&self) {
        let mut shared = self.shared.lock();
        if !shared.transport.is_playing() {
            return;
        }
        shared.halt();
        info!("stopped");
    }

    pub fn toggle(&self) {
        if self.is_playing() {
            self.stop();
        } else {
            self.play();
        }
    }

    pub fn is_playing(&self) -> bool {
        self.shared.lock().transport.is_playing()
    }

    /// Run one tick at the clock's current time, as the tick thread does.
    pub fn tick(&self) {
        let mut shared = self.shared.lock();
        if shared.transport.is_playing() {
            shared.tick(self.clock.now_micros());
        }
    }

    /// Snapshot of every Chain's cursor.
    pub fn cursors(&self) -> Vec<i64> {
        self.shared.lock().timeline.cursors().to_vec()
    }

    pub fn chain_count(&self) -> usize {
        self.shared.lock().program.chains.len()
    }

    /// The active program.
    pub fn program(&self) -> Arc<Program> {
        Arc::clone(&self.shared.lock().program)
    }

    /// Number of note-offs waiting to be sent.
    pub fn pending_note_offs(&self) -> usize {
        self.shared.lock().pending.len()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_ticks(shared: &Mutex<Shared>, clock: &dyn Clock, period: Duration, generation: u64) {
    loop {
        thread::sleep(period);
        let mut state = shared.lock();
        if state.generation != generation || !state.transport.is_playing() {
            debug!("tick thread {generation} exiting");
            return;
        }
        state.tick(clock.now_micros());
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{MidiDevice, OutputError, StaticConnector};

    #[derive(Default)]
    struct Recorder(Vec<(bool, u8)>);

    impl MidiDevice for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }
        fn note_on(&mut self, _channel: u8, pitch: u8, _velocity: u8) -> Result<(), OutputError> {
            self.0.push((true, pitch));
            Ok(())
        }
        fn note_off(&mut self, _channel: u8, pitch: u8) -> Result<(), OutputError> {
            self.0.push((false, pitch));
            Ok(())
        }
    }

    fn scheduler() -> (Scheduler, Arc<ManualClock>, Arc<Mutex<Recorder>>) {
        let device = Arc::new(Mutex::new(Recorder::default()));
        let registry =
            DeviceRegistry::new(StaticConnector::new().with_midi("rec", device.clone()));
        let clock = Arc::new(ManualClock::new());
        let settings = SchedulerSettings {
            tick: Duration::from_millis(1),
            ..SchedulerSettings::default()
        };
        let scheduler = Scheduler::with_clock(registry, settings, clock.clone());
        (scheduler, clock, device)
    }

    const SCORE: &str = "loop a\nc4 d4 e4 f4\nchain a\nout midi(rec)\n";

    #[test]
    fn play_stop_toggle() {
        let (scheduler, _, _) = scheduler();
        scheduler.update(SCORE).unwrap();
        assert!(!scheduler.is_playing());
        scheduler.play();
        assert!(scheduler.is_playing());
        scheduler.toggle();
        assert!(!scheduler.is_playing());
        scheduler.toggle();
        assert!(scheduler.is_playing());
        scheduler.stop();
        assert!(!scheduler.is_playing());
    }

    #[test]
    fn empty_program_does_not_play() {
        let (scheduler, _, _) = scheduler();
        scheduler.play();
        assert!(!scheduler.is_playing());
    }

    #[test]
    fn note_off_follows_gate() {
        let (scheduler, clock, device) = scheduler();
        scheduler.update(SCORE).unwrap();
        scheduler.play();
        clock.set(1);
        scheduler.tick();
        assert_eq!(device.lock().0, vec![(true, 60)]);
        assert_eq!(scheduler.pending_note_offs(), 1);

        // 500ms quarter notes held 95%
        clock.set(475_000);
        scheduler.tick();
        assert_eq!(device.lock().0.last(), Some(&(true, 60)));
        clock.set(475_001);
        scheduler.tick();
        assert_eq!(device.lock().0.last(), Some(&(false, 60)));
        scheduler.stop();
    }

    #[test]
    fn stop_flushes_pending_note_offs() {
        let (scheduler, clock, device) = scheduler();
        scheduler.update(SCORE).unwrap();
        scheduler.play();
        clock.set(10);
        scheduler.tick();
        scheduler.stop();
        assert_eq!(device.lock().0, vec![(true, 60), (false, 60)]);
        assert_eq!(scheduler.pending_note_offs(), 0);
    }

    #[test]
    fn failed_update_keeps_the_running_program() {
        let (scheduler, clock, _) = scheduler();
        scheduler.update(SCORE).unwrap();
        scheduler.play();
        clock.set(600_000);
        scheduler.tick();
        let before = scheduler.cursors();
        assert!(scheduler.update("loop a\n[c4 d4").is_err());
        assert!(scheduler.is_playing());
        assert_eq!(scheduler.cursors(), before);
        assert_eq!(scheduler.program().chains[0].steps.len(), 4);
        scheduler.stop();
    }

    #[test]
    fn panic_messages() {
        let a: Box<dyn Any + Send> = Box::new("boom");
        let b: Box<dyn Any + Send> = Box::new(String::from("bang"));
        let c: Box<dyn Any + Send> = Box::new(7);
        assert_eq!(panic_message(&*a), "boom");
        assert_eq!(panic_message(&*b), "bang");
        assert_eq!(panic_message(&*c), "unknown panic");
    }
}
