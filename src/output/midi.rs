//! MIDI output devices.

use midir::{MidiOutput, MidiOutputConnection};
use tracing::debug;

use super::OutputError;

const NOTE_ON: u8 = 0x90;
const NOTE_OFF: u8 = 0x80;

/// Something that plays MIDI notes. Channels are 0-based.
pub trait MidiDevice: Send {
    fn name(&self) -> &str;
    fn note_on(&mut self, channel: u8, pitch: u8, velocity: u8) -> Result<(), OutputError>;
    fn note_off(&mut self, channel: u8, pitch: u8) -> Result<(), OutputError>;
}

/// A MIDI output port opened through midir.
pub struct MidirDevice {
    connection: MidiOutputConnection,
    port_name: String,
}

impl MidirDevice {
    /// Connect to the first output port whose name contains `name_filter`.
    pub fn connect(client_name: &str, name_filter: &str) -> Result<Self, OutputError> {
        let midi_out =
            MidiOutput::new(client_name).map_err(|e| OutputError::Connect(format!("MIDI init: {e}")))?;

        let (port, port_name) = midi_out
            .ports()
            .iter()
            .find_map(|p| {
                let name = midi_out.port_name(p).unwrap_or_default();
                name.contains(name_filter).then(|| (p.clone(), name))
            })
            .ok_or_else(|| OutputError::DeviceNotFound(name_filter.to_string()))?;

        let connection = midi_out
            .connect(&port, &format!("{client_name}-out"))
            .map_err(|e| OutputError::Connect(format!("MIDI connect: {e}")))?;
        debug!("midi connected to {port_name}");

        Ok(Self {
            connection,
            port_name,
        })
    }

    /// List all available MIDI output port names.
    pub fn list_devices(client_name: &str) -> Vec<String> {
        let Ok(midi_out) = MidiOutput::new(client_name) else {
            return Vec::new();
        };
        midi_out
            .ports()
            .iter()
            .filter_map(|p| midi_out.port_name(p).ok())
            .collect()
    }

    fn send(&mut self, message: [u8; 3]) -> Result<(), OutputError> {
        self.connection
            .send(&message)
            .map_err(|e| OutputError::Send(e.to_string()))
    }
}

impl MidiDevice for MidirDevice {
    fn name(&self) -> &str {
        &self.port_name
    }

    fn note_on(&mut self, channel: u8, pitch: u8, velocity: u8) -> Result<(), OutputError> {
        self.send(note_on(channel, pitch, velocity))
    }

    fn note_off(&mut self, channel: u8, pitch: u8) -> Result<(), OutputError> {
        self.send(note_off(channel, pitch))
    }
}

/// Note-on message bytes.
pub fn note_on(channel: u8, pitch: u8, velocity: u8) -> [u8; 3] {
    [NOTE_ON | (channel & 0x0F), pitch & 0x7F, velocity & 0x7F]
}

/// Note-off message bytes.
pub fn note_off(channel: u8, pitch: u8) -> [u8; 3] {
    [NOTE_OFF | (channel & 0x0F), pitch & 0x7F, 0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_bytes() {
        assert_eq!(note_on(0, 60, 120), [0x90, 60, 120]);
        assert_eq!(note_on(15, 61, 1), [0x9F, 61, 1]);
        assert_eq!(note_off(2, 60), [0x82, 60, 0]);
    }

    #[test]
    fn list_devices_does_not_panic() {
        // may be empty without a MIDI system
        let _ = MidirDevice::list_devices("tieloop-test");
    }
}
