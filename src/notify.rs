//! Outbound notifications for whatever front end is attached.

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{error, info, warn};

use crate::learn::LearnPhase;
use crate::mapping::MappingRule;

/// Log line category, mirrored into the `tracing` level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    Midi,
    Mapping,
    System,
    Warning,
    Error,
}

/// Resolved gesture phases reported to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GesturePhase {
    Single,
    DoubleTap,
    LongHold,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Log { category: LogCategory, text: String },
    Status(String),
    Mappings(Vec<MappingRule>),
    Ports(Vec<String>),
    NoteVelocity { note: u8, velocity: u8 },
    CcValue { controller: u8, value: u8 },
    Connection { connected: bool, port: Option<String> },
    Gesture { note: u8, phase: GesturePhase },
    Learn(LearnPhase),
    LearnCompleted(MappingRule),
    HudActive(String),
    HudInactive,
    AiPrompt(String),
    ProfileChanged { path: String },
    AppChanged { process_name: String, window_title: String },
}

/// Cloneable sending half. Sends never block and a missing receiver is
/// not an error.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: Option<Sender<Notification>>,
}

impl Notifier {
    pub fn channel() -> (Self, Receiver<Notification>) {
        let (sender, receiver) = unbounded();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// A notifier that only logs.
    pub fn silent() -> Self {
        Self { sender: None }
    }

    #[inline]
    pub fn send(&self, notification: Notification) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(notification);
        }
    }

    pub fn log(&self, category: LogCategory, text: impl Into<String>) {
        let text = text.into();
        match category {
            LogCategory::Warning => warn!(target: "miditypist::log", "{}", text),
            LogCategory::Error => error!(target: "miditypist::log", "{}", text),
            _ => info!(target: "miditypist::log", ?category, "{}", text),
        }
        self.send(Notification::Log { category, text });
    }

    pub fn status(&self, text: impl Into<String>) {
        self.send(Notification::Status(text.into()));
    }
}
