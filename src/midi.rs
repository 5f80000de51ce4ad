//! MIDI message classification and input-port management.
//!
//! The `midir` callback runs on a driver thread. It only classifies the raw
//! bytes and forwards them with their arrival time; all interpretation
//! happens on the control thread.

use std::time::Instant;

use midir::{Ignore, MidiInput, MidiInputConnection};
use tracing::{debug, info};

use crate::error::{Error, Result};

const CLIENT_NAME: &str = "miditypist";

/// A channel-voice message the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
    ControlChange { controller: u8, value: u8 },
}

impl MidiEvent {
    /// Classifies a raw message. Anything shorter than three bytes, and any
    /// status other than note-on, note-off or control change, yields `None`.
    pub fn classify(bytes: &[u8]) -> Option<Self> {
        let [status, data1, data2, ..] = *bytes else {
            return None;
        };
        let number = data1 & 0x7F;
        let value = data2 & 0x7F;
        match status & 0xF0 {
            0x90 if value > 0 => Some(MidiEvent::NoteOn {
                note: number,
                velocity: value,
            }),
            0x90 | 0x80 => Some(MidiEvent::NoteOff { note: number }),
            0xB0 => Some(MidiEvent::ControlChange {
                controller: number,
                value,
            }),
            _ => None,
        }
    }
}

/// A classified message stamped with its arrival time.
#[derive(Debug, Clone, Copy)]
pub struct TimedMidiEvent {
    pub at: Instant,
    pub event: MidiEvent,
}

/// Names of the MIDI input ports currently visible to the system.
pub fn list_input_ports() -> Result<Vec<String>> {
    let midi_input = MidiInput::new(CLIENT_NAME)?;
    let ports = midi_input.ports();
    let mut names = Vec::with_capacity(ports.len());
    for (index, port) in ports.iter().enumerate() {
        let name = midi_input
            .port_name(port)
            .unwrap_or_else(|_| format!("Unknown Device {}", index));
        names.push(name);
    }
    Ok(names)
}

/// Owns at most one open input connection.
#[derive(Default)]
pub struct MidiInputManager {
    connection: Option<MidiInputConnection<()>>,
    port_name: Option<String>,
}

impl MidiInputManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the port with exactly this name, closing any previous one.
    /// Classified events go to `sink`; malformed messages are dropped.
    pub fn connect<F>(&mut self, port_name: &str, sink: F) -> Result<()>
    where
        F: Fn(TimedMidiEvent) + Send + 'static,
    {
        self.disconnect();

        let mut midi_input = MidiInput::new(CLIENT_NAME)?;
        midi_input.ignore(Ignore::All);

        let ports = midi_input.ports();
        let mut found = None;
        for port in &ports {
            if midi_input.port_name(port)? == port_name {
                found = Some(port.clone());
                break;
            }
        }
        let port = found.ok_or_else(|| Error::MidiPort(format!("port '{}' not found", port_name)))?;

        let connection = midi_input.connect(
            &port,
            "miditypist-input",
            move |_timestamp, message, _| match MidiEvent::classify(message) {
                Some(event) => sink(TimedMidiEvent {
                    at: Instant::now(),
                    event,
                }),
                None => debug!(?message, "Dropping unhandled MIDI message"),
            },
            (),
        )?;

        info!(port = port_name, "MIDI input connected");
        self.connection = Some(connection);
        self.port_name = Some(port_name.to_string());
        Ok(())
    }

    /// Closes the open connection, if any. Returns whether one was open.
    pub fn disconnect(&mut self) -> bool {
        match self.connection.take() {
            Some(connection) => {
                connection.close();
                info!(port = ?self.port_name, "MIDI input disconnected");
                self.port_name = None;
                true
            }
            None => false,
        }
    }

    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }
}

impl Drop for MidiInputManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_note_on() {
        assert_eq!(
            MidiEvent::classify(&[0x90, 60, 100]),
            Some(MidiEvent::NoteOn {
                note: 60,
                velocity: 100
            })
        );
        // Channel nibble is ignored
        assert_eq!(
            MidiEvent::classify(&[0x9F, 36, 1]),
            Some(MidiEvent::NoteOn {
                note: 36,
                velocity: 1
            })
        );
    }

    #[test]
    fn test_classify_note_off_forms() {
        assert_eq!(
            MidiEvent::classify(&[0x80, 60, 64]),
            Some(MidiEvent::NoteOff { note: 60 })
        );
        assert_eq!(
            MidiEvent::classify(&[0x90, 60, 0]),
            Some(MidiEvent::NoteOff { note: 60 })
        );
    }

    #[test]
    fn test_classify_control_change() {
        assert_eq!(
            MidiEvent::classify(&[0xB3, 64, 127]),
            Some(MidiEvent::ControlChange {
                controller: 64,
                value: 127
            })
        );
    }

    #[test]
    fn test_classify_drops_short_and_unknown() {
        assert_eq!(MidiEvent::classify(&[]), None);
        assert_eq!(MidiEvent::classify(&[0x90]), None);
        assert_eq!(MidiEvent::classify(&[0x90, 60]), None);
        assert_eq!(MidiEvent::classify(&[0xE0, 0, 64]), None);
        assert_eq!(MidiEvent::classify(&[0xF8, 0, 0]), None);
    }
}
