//! Device registry: lazy connection and binding of `out` declarations.
//!
//! Devices are connected on first use and cached. A device that could not
//! be reached is not cached, so the next bind (on the next update) retries.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::cv::CrowModule;
use super::midi::MidirDevice;
use super::{CvModule, Output, OutputError, SharedCv, SharedMidi};
use crate::dsl::ast::Chain;
use crate::dsl::function::Function;

/// MIDI channels are written 1–16.
const MIDI_CHANNELS: usize = 16;

/// Opens devices for the registry.
pub trait DeviceConnector: Send {
    fn connect_cv(&mut self) -> Result<SharedCv, OutputError>;
    fn connect_midi(&mut self, name: &str) -> Result<SharedMidi, OutputError>;
}

/// Connects to real hardware: crow modules on serial ports, MIDI via midir.
///
/// With no `cv_ports` configured every serial port is scanned for crows.
pub struct HardwareConnector {
    cv_ports: Vec<PathBuf>,
    client_name: String,
}

impl HardwareConnector {
    pub fn new(cv_ports: Vec<PathBuf>, client_name: impl Into<String>) -> Self {
        Self {
            cv_ports,
            client_name: client_name.into(),
        }
    }
}

impl DeviceConnector for HardwareConnector {
    fn connect_cv(&mut self) -> Result<SharedCv, OutputError> {
        let module = CrowModule::open(&self.cv_ports);
        if !module.is_ready() {
            let tried = if self.cv_ports.is_empty() {
                "no crow found on any serial port".to_string()
            } else {
                format!("no crow answered on {} ports", self.cv_ports.len())
            };
            return Err(OutputError::NotReady(tried));
        }
        Ok(Arc::new(Mutex::new(module)))
    }

    fn connect_midi(&mut self, name: &str) -> Result<SharedMidi, OutputError> {
        let device = MidirDevice::connect(&self.client_name, name)?;
        Ok(Arc::new(Mutex::new(device)))
    }
}

/// Hands out devices built ahead of time, for embedding and tests.
#[derive(Default)]
pub struct StaticConnector {
    cv: Option<SharedCv>,
    midi: HashMap<String, SharedMidi>,
}

impl StaticConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cv(mut self, module: SharedCv) -> Self {
        self.cv = Some(module);
        self
    }

    pub fn with_midi(mut self, name: impl Into<String>, device: SharedMidi) -> Self {
        self.midi.insert(name.into(), device);
        self
    }
}

impl DeviceConnector for StaticConnector {
    fn connect_cv(&mut self) -> Result<SharedCv, OutputError> {
        self.cv
            .clone()
            .ok_or_else(|| OutputError::NotReady("cv module".into()))
    }

    fn connect_midi(&mut self, name: &str) -> Result<SharedMidi, OutputError> {
        self.midi
            .get(name)
            .cloned()
            .ok_or_else(|| OutputError::DeviceNotFound(name.to_string()))
    }
}

/// Cache of connected devices.
pub struct DeviceRegistry {
    connector: Box<dyn DeviceConnector>,
    cv: Option<SharedCv>,
    midi: HashMap<String, SharedMidi>,
}

impl DeviceRegistry {
    pub fn new(connector: impl DeviceConnector + 'static) -> Self {
        Self {
            connector: Box::new(connector),
            cv: None,
            midi: HashMap::new(),
        }
    }

    /// Bind every `out` of a Chain. Failures are logged and skipped.
    pub fn bind_chain(&mut self, chain: &Chain) -> Vec<Output> {
        let mut outputs = Vec::new();
        for (decl, function) in chain.outputs.iter().zip(&chain.output_functions) {
            match self.bind(function) {
                Ok(output) => {
                    debug!("bound '{decl}' -> {output:?}");
                    outputs.push(output);
                }
                Err(e) => warn!("chain {:?}: output '{decl}': {e}", chain.loop_names),
            }
        }
        outputs
    }

    /// Bind one output declaration.
    pub fn bind(&mut self, function: &Function) -> Result<Output, OutputError> {
        match function.name.as_str() {
            "crow" | "cv" => self.bind_cv(function),
            "midi" => self.bind_midi(function),
            other => Err(OutputError::Binding(format!("unknown output '{other}'"))),
        }
    }

    fn bind_cv(&mut self, function: &Function) -> Result<Output, OutputError> {
        let output = function
            .get_int("output", 0)
            .filter(|o| *o > 0)
            .ok_or_else(|| OutputError::Binding(format!("{}: needs an output number", function.name)))?
            as usize;
        let env = function
            .get_named("env")
            .and_then(|e| e.parse::<usize>().ok())
            .filter(|e| *e > 0);

        let module = self.cv()?;
        if let Some(slew) = function.get_float_named("slew") {
            module.lock().set_slew(output, slew)?;
        }
        Ok(Output::Cv {
            module,
            output,
            env,
        })
    }

    fn bind_midi(&mut self, function: &Function) -> Result<Output, OutputError> {
        let name = function
            .get("name", 0)
            .ok_or_else(|| OutputError::Binding("midi: needs a device name".into()))?
            .to_string();
        let channel = match function.get("ch", 1) {
            Some(ch) => ch
                .parse::<usize>()
                .map_err(|_| OutputError::Binding(format!("midi: bad channel '{ch}'")))?,
            None => 1,
        };
        if !(1..=MIDI_CHANNELS).contains(&channel) {
            return Err(OutputError::ChannelOutOfRange {
                channel,
                max: MIDI_CHANNELS,
            });
        }

        let device = match self.midi.get(&name) {
            Some(device) => device.clone(),
            None => {
                let device = self.connector.connect_midi(&name)?;
                self.midi.insert(name.clone(), device.clone());
                device
            }
        };
        Ok(Output::Midi {
            device,
            name,
            channel: (channel - 1) as u8,
        })
    }

    fn cv(&mut self) -> Result<SharedCv, OutputError> {
        if let Some(module) = &self.cv {
            if module.lock().is_ready() {
                return Ok(module.clone());
            }
        }
        self.cv = None;
        let module = self.connector.connect_cv()?;
        self.cv = Some(module.clone());
        Ok(module)
    }
}
