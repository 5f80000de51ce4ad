//! Core modules for the MIDI-to-keystroke translator.
//!
//! The library holds everything that does not need a window: MIDI input,
//! the mapping store and the dispatch engine. The binary wires them to the
//! platform hooks.

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod gesture;
pub mod keys;
pub mod learn;
pub mod mapping;
pub mod midi;
pub mod notify;
pub mod service;
pub mod simulator;
pub mod sustain;
pub mod timer;

#[cfg(windows)]
pub mod foreground;
#[cfg(windows)]
pub mod keyboard;
#[cfg(windows)]
pub mod signal;

// Re-export types for test modules
pub use config::AppConfig;
pub use context::{AppContext, ContextTracker};
pub use engine::{Engine, EngineSettings, HostRequest};
pub use error::{Error, Result};
pub use keys::{KeyCombo, Modifiers};
pub use mapping::{MappingRule, MappingStore, ProfileSlots};
pub use midi::MidiEvent;
pub use notify::{Notification, Notifier};
pub use service::{Command, Service, ServiceHandle, ServiceInput};
pub use simulator::{InputSimulator, RecordingSink};
