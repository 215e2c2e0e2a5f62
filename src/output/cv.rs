//! CV/gate modules: the crow-style text protocol.
//!
//! Channels are 1-based across every connected module, four outputs per
//! module: channel 6 is output 2 of the second module.
//!
//! A serial port only counts as a module once it has answered the version
//! handshake.

use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, trace};

use super::OutputError;

/// Outputs on one physical module.
pub const OUTPUTS_PER_MODULE: usize = 4;

/// Serial speed crow listens at.
pub const BAUD_RATE: u32 = 115_200;

const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Firmware generations that speak this protocol.
const VERSIONS: [&str; 3] = ["v2", "v3", "v4"];

/// The system console, never a crow.
const CONSOLE: &str = "ttyS0";

/// Attack/decay/release in seconds, sustain as a level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub attack: f64,
    pub decay: f64,
    pub sustain: f64,
    pub release: f64,
}

/// A bank of CV outputs.
pub trait CvModule: Send {
    /// Whether at least one module is connected.
    fn is_ready(&self) -> bool;
    fn set_voltage(&mut self, channel: usize, volts: f64) -> Result<(), OutputError>;
    fn gate(&mut self, channel: usize, on: bool) -> Result<(), OutputError>;
    fn set_envelope(&mut self, channel: usize, envelope: Envelope) -> Result<(), OutputError>;
    fn set_slew(&mut self, channel: usize, seconds: f64) -> Result<(), OutputError>;
    fn flush(&mut self) -> Result<(), OutputError> {
        Ok(())
    }
}

/// Crow modules reached through any writer (a serial device in practice).
pub struct CrowModule<W: Write + Send> {
    ports: Vec<W>,
}

impl<W: Write + Send> CrowModule<W> {
    pub fn new(ports: Vec<W>) -> Self {
        Self { ports }
    }

    /// Total number of addressable channels.
    pub fn channels(&self) -> usize {
        self.ports.len() * OUTPUTS_PER_MODULE
    }

    fn command(&mut self, channel: usize, command: impl FnOnce(usize) -> String) -> Result<(), OutputError> {
        let max = self.channels();
        if channel == 0 || channel > max {
            return Err(OutputError::ChannelOutOfRange { channel, max });
        }
        let module = (channel - 1) / OUTPUTS_PER_MODULE;
        let output = (channel - 1) % OUTPUTS_PER_MODULE + 1;
        let line = command(output);
        trace!("crow {module}: {line}");
        writeln!(self.ports[module], "{line}")?;
        Ok(())
    }
}

impl CrowModule<Box<dyn SerialPort>> {
    /// Connect to every crow on `paths`, or on every serial port except the
    /// console when `paths` is empty. Ports that fail the handshake are
    /// skipped; the result may hold no modules.
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> Self {
        let names: Vec<String> = if paths.is_empty() {
            list_ports()
        } else {
            paths
                .iter()
                .map(|p| p.as_ref().to_string_lossy().into_owned())
                .collect()
        };
        let ports: Vec<_> = names.iter().filter_map(|name| connect(name)).collect();
        debug!("found {} crows", ports.len());
        Self::new(ports)
    }
}

fn list_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports
            .into_iter()
            .map(|p| p.port_name)
            .filter(|name| !name.contains(CONSOLE))
            .collect(),
        Err(e) => {
            debug!("cannot list serial ports: {e}");
            Vec::new()
        }
    }
}

fn connect(name: &str) -> Option<Box<dyn SerialPort>> {
    let mut port = match serialport::new(name, BAUD_RATE).timeout(READ_TIMEOUT).open() {
        Ok(port) => port,
        Err(e) => {
            trace!("could not open {name}: {e}");
            return None;
        }
    };
    match handshake(&mut port) {
        Ok(version) => {
            debug!("crow {} connected on {name}", version.trim());
            Some(port)
        }
        Err(e) => {
            trace!("not a crow: {name}: {e}");
            None
        }
    }
}

/// Ask for the firmware version, then reset the module to its default
/// script. Returns the version reply.
pub fn handshake<P: Read + Write>(port: &mut P) -> Result<String, OutputError> {
    port.write_all(b"^^version")?;
    let version = read_reply(port)?;
    if !VERSIONS.iter().any(|v| version.contains(v)) {
        return Err(OutputError::NotReady(format!(
            "unexpected version reply {:?}",
            version.trim()
        )));
    }
    port.write_all(b"^^First")?;
    read_reply(port)?;
    Ok(version)
}

/// Read until the port goes quiet.
fn read_reply<P: Read>(port: &mut P) -> Result<String, OutputError> {
    let mut reply = Vec::new();
    let mut buf = [0u8; 100];
    loop {
        match port.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => reply.extend_from_slice(&buf[..n]),
            Err(e) => {
                trace!("read ended: {e}");
                break;
            }
        }
    }
    if reply.is_empty() {
        return Err(OutputError::NotReady("no reply".into()));
    }
    trace!("read {} bytes", reply.len());
    Ok(String::from_utf8_lossy(&reply).into_owned())
}

impl<W: Write + Send> CvModule for CrowModule<W> {
    fn is_ready(&self) -> bool {
        !self.ports.is_empty()
    }

    fn set_voltage(&mut self, channel: usize, volts: f64) -> Result<(), OutputError> {
        self.command(channel, |n| format!("output[{n}].volts={volts:.3}"))
    }

    fn gate(&mut self, channel: usize, on: bool) -> Result<(), OutputError> {
        self.command(channel, |n| format!("output[{n}]({on})"))
    }

    fn set_envelope(&mut self, channel: usize, envelope: Envelope) -> Result<(), OutputError> {
        let Envelope {
            attack,
            decay,
            sustain,
            release,
        } = envelope;
        self.command(channel, |n| {
            format!("output[{n}].action=adsr({attack:.3},{decay:.3},{sustain:.3},{release:.3})")
        })
    }

    fn set_slew(&mut self, channel: usize, seconds: f64) -> Result<(), OutputError> {
        self.command(channel, |n| format!("output[{n}].slew={seconds:.3}"))
    }

    fn flush(&mut self) -> Result<(), OutputError> {
        for port in &mut self.ports {
            port.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Answers each write with the next scripted reply.
    #[derive(Default)]
    struct ScriptedPort {
        replies: VecDeque<&'static str>,
        unread: Vec<u8>,
        written: Vec<u8>,
    }

    impl ScriptedPort {
        fn new(replies: &[&'static str]) -> Self {
            Self {
                replies: replies.iter().copied().collect(),
                ..Self::default()
            }
        }
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = buf.len().min(self.unread.len());
            buf[..n].copy_from_slice(&self.unread[..n]);
            self.unread.drain(..n);
            Ok(n)
        }
    }

    impl Write for ScriptedPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            if let Some(reply) = self.replies.pop_front() {
                self.unread.extend_from_slice(reply.as_bytes());
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn handshake_checks_the_version_then_resets() {
        let mut port = ScriptedPort::new(&["^^version('v4.0.4')\r\n", "ok\r\n"]);
        let version = handshake(&mut port).unwrap();
        assert!(version.contains("v4.0.4"));
        assert_eq!(port.written, b"^^version^^First");
    }

    #[test]
    fn handshake_rejects_other_devices() {
        let mut port = ScriptedPort::new(&["hello from a modem"]);
        assert!(matches!(
            handshake(&mut port),
            Err(OutputError::NotReady(_))
        ));
        // no reset is sent to something that is not a crow
        assert_eq!(port.written, b"^^version");

        let mut silent = ScriptedPort::new(&[]);
        assert!(handshake(&mut silent).is_err());
    }

    #[test]
    fn reply_to_the_reset_is_required() {
        let mut port = ScriptedPort::new(&["v3.0.1"]);
        assert!(handshake(&mut port).is_err());
        assert_eq!(port.written, b"^^version^^First");
    }

    fn lines(module: &CrowModule<Vec<u8>>, index: usize) -> Vec<String> {
        String::from_utf8(module.ports[index].clone())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn protocol_lines() {
        let mut crow = CrowModule::new(vec![Vec::new()]);
        crow.set_voltage(1, 4.0).unwrap();
        crow.gate(2, true).unwrap();
        crow.gate(2, false).unwrap();
        crow.set_slew(3, 0.05).unwrap();
        crow.set_envelope(
            4,
            Envelope {
                attack: 0.01,
                decay: 0.2,
                sustain: 5.0,
                release: 1.0,
            },
        )
        .unwrap();
        assert_eq!(
            lines(&crow, 0),
            vec![
                "output[1].volts=4.000",
                "output[2](true)",
                "output[2](false)",
                "output[3].slew=0.050",
                "output[4].action=adsr(0.010,0.200,5.000,1.000)",
            ]
        );
    }

    #[test]
    fn channels_span_modules() {
        let mut crow = CrowModule::new(vec![Vec::new(), Vec::new()]);
        assert_eq!(crow.channels(), 8);
        crow.set_voltage(6, 1.5).unwrap();
        assert!(lines(&crow, 0).is_empty());
        assert_eq!(lines(&crow, 1), vec!["output[2].volts=1.500"]);
    }

    #[test]
    fn out_of_range_channels() {
        let mut crow = CrowModule::new(vec![Vec::new()]);
        assert!(matches!(
            crow.gate(5, true),
            Err(OutputError::ChannelOutOfRange { channel: 5, max: 4 })
        ));
        assert!(crow.gate(0, true).is_err());
    }

    #[test]
    fn readiness() {
        assert!(!CrowModule::<Vec<u8>>::new(Vec::new()).is_ready());
        assert!(CrowModule::new(vec![Vec::<u8>::new()]).is_ready());
        assert!(!CrowModule::open(&["/nonexistent/tty-crow"]).is_ready());
    }
}
