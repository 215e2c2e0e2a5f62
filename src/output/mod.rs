//! Output collaborators: where fired Steps turn into voltages and MIDI.
//!
//! A Chain's `out` declarations are bound through the [`DeviceRegistry`]
//! into [`Output`]s. Each output receives a fired Step's notes, whether it is
//! a note-on or note-off, and the Step's arguments (for envelopes).

pub mod cv;
pub mod midi;
pub mod registry;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{trace, warn};

use crate::dsl::ast::Step;
use crate::dsl::function::{split_floats, Argument};

pub use cv::{CrowModule, CvModule, Envelope};
pub use midi::{MidiDevice, MidirDevice};
pub use registry::{DeviceConnector, DeviceRegistry, HardwareConnector, StaticConnector};

/// A CV module shared between bindings and the scheduler.
pub type SharedCv = Arc<Mutex<dyn CvModule>>;
/// A MIDI device shared between bindings and the scheduler.
pub type SharedMidi = Arc<Mutex<dyn MidiDevice>>;

/// Errors from binding or driving an output device.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("{0} is not ready")]
    NotReady(String),
    #[error("channel {channel} is out of range (1..={max})")]
    ChannelOutOfRange { channel: usize, max: usize },
    #[error("no device matching '{0}'")]
    DeviceNotFound(String),
    #[error("cannot bind '{0}'")]
    Binding(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("send failed: {0}")]
    Send(String),
}

/// A bound output.
#[derive(Clone)]
pub enum Output {
    /// Pitch CV on `output + 2i` for the i-th note; gate on `env` when set,
    /// otherwise on the channel after each pitch channel.
    Cv {
        module: SharedCv,
        output: usize,
        env: Option<usize>,
    },
    /// Notes on one channel (0-based) of a MIDI device.
    Midi {
        device: SharedMidi,
        name: String,
        channel: u8,
    },
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Cv { output, env, .. } => f
                .debug_struct("Cv")
                .field("output", output)
                .field("env", env)
                .finish(),
            Output::Midi { name, channel, .. } => f
                .debug_struct("Midi")
                .field("name", name)
                .field("channel", channel)
                .finish(),
        }
    }
}

impl Output {
    /// Send a Step's notes on or off.
    pub fn fire(&self, step: &Step, on: bool) -> Result<(), OutputError> {
        let notes = step.notes();
        trace!("{self:?} {} {:?}", if on { "on" } else { "off" }, notes);
        match self {
            Output::Cv {
                module,
                output,
                env,
            } => {
                let mut module = module.lock();
                if !module.is_ready() {
                    return Err(OutputError::NotReady("cv module".into()));
                }
                if on {
                    if let Some(envelope) = envelope_for(step) {
                        module.set_envelope(env.unwrap_or(output + 1), envelope)?;
                    }
                }
                for (i, note) in notes.iter().enumerate() {
                    let channel = output + 2 * i;
                    if let Err(e) = cv_note(&mut *module, channel, note.pitch, on, env.is_none()) {
                        warn!("skipping {} on cv {channel}: {e}", note.name);
                    }
                }
                if let Some(env) = env {
                    module.gate(*env, on)?;
                }
                module.flush()
            }
            Output::Midi {
                device, channel, ..
            } => {
                let mut device = device.lock();
                for note in notes {
                    let Some(pitch) = u8::try_from(note.pitch).ok().filter(|p| *p <= 127) else {
                        trace!("skipping {} outside the MIDI range", note.name);
                        continue;
                    };
                    if on {
                        device.note_on(*channel, pitch, step.params.velocity.min(127))?;
                    } else {
                        device.note_off(*channel, pitch)?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// Pitch on `channel` and, without a shared envelope, its gate on the next.
fn cv_note(
    module: &mut dyn CvModule,
    channel: usize,
    pitch: i32,
    on: bool,
    own_gate: bool,
) -> Result<(), OutputError> {
    if on {
        module.set_voltage(channel, pitch_volts(pitch))?;
    }
    if own_gate {
        module.gate(channel + 1, on)?;
    }
    Ok(())
}

/// 1 V/octave with `c0` (pitch 12) at 0 V.
pub fn pitch_volts(pitch: i32) -> f64 {
    (pitch - 12) as f64 / 12.0
}

/// Envelope from an `adsr(a,d,s,r)` or `adsr=(a,d,s,r)` argument.
///
/// Attack, decay and release are fractions of the Step's duration and are
/// scaled to seconds; sustain is a level and stays as written.
pub fn envelope_for(step: &Step) -> Option<Envelope> {
    let values = step.args.iter().find_map(adsr_values)?;
    let [a, d, s, r] = values[..] else {
        return None;
    };
    let seconds = step.time_duration_micros as f64 / 1_000_000.0;
    Some(Envelope {
        attack: a * seconds,
        decay: d * seconds,
        sustain: s,
        release: r * seconds,
    })
}

fn adsr_values(arg: &Argument) -> Option<Vec<f64>> {
    let list = match &arg.name {
        Some(name) if name == "adsr" => arg.value.as_str(),
        Some(_) => return None,
        None => arg.value.strip_prefix("adsr")?,
    };
    Some(split_floats(list))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::Compiler;
    use assert_approx_eq::assert_approx_eq;

    fn first_step(src: &str) -> Step {
        Compiler::compile(src).unwrap().chains[0].steps[0].clone()
    }

    #[test]
    fn volts_per_octave() {
        assert_eq!(pitch_volts(12), 0.0);
        assert_eq!(pitch_volts(60), 4.0);
        assert_eq!(pitch_volts(66), 4.5);
    }

    #[test]
    fn envelope_scales_with_duration() {
        // one beat at 120 bpm: half a second
        let step = first_step("c4(adsr(0.1,0.2,5,0.4)) d e f");
        let env = envelope_for(&step).unwrap();
        assert_approx_eq!(env.attack, 0.05);
        assert_approx_eq!(env.decay, 0.1);
        assert_eq!(env.sustain, 5.0);
        assert_approx_eq!(env.release, 0.2);

        let named = first_step("c4(adsr=(1,1,1,1)) d e f");
        assert!(envelope_for(&named).is_some());
    }

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn chord_past_the_last_channel_still_gates_env() {
        let capture = Capture::default();
        let module: SharedCv = Arc::new(Mutex::new(CrowModule::new(vec![capture.clone()])));
        let output = Output::Cv {
            module,
            output: 1,
            env: Some(4),
        };
        // three notes need channels 1, 3 and 5; only four exist
        let step = first_step("C");
        assert_eq!(step.notes().len(), 3);
        output.fire(&step, true).unwrap();
        output.fire(&step, false).unwrap();

        let text = String::from_utf8(capture.0.lock().clone()).unwrap();
        assert_eq!(
            text,
            "output[1].volts=4.000\noutput[3].volts=4.333\noutput[4](true)\noutput[4](false)\n"
        );
    }

    #[test]
    fn envelope_needs_four_values() {
        assert!(envelope_for(&first_step("c4(adsr(1,2,3))")).is_none());
        assert!(envelope_for(&first_step("c4(v30)")).is_none());
    }
}
