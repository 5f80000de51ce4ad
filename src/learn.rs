//! Interactive learn mode: press a MIDI control, then a keyboard key.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::keys::{KeyCombo, Modifiers, is_modifier_vk};
use crate::mapping::{CcAction, MappingRule, TriggerKind};
use crate::midi::MidiEvent;

/// Channel-mode controllers (all notes off, reset, ...) are never learned.
const FIRST_CHANNEL_MODE_CC: u8 = 120;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LearnPhase {
    #[default]
    Idle,
    AwaitingTrigger,
    AwaitingAction { kind: TriggerKind, number: u8 },
}

/// What the dispatcher should do with a MIDI event seen during learning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnMidi {
    /// Not capturing; dispatch normally.
    PassThrough,
    /// Consumed by the session.
    Swallowed,
    Captured { kind: TriggerKind, number: u8 },
}

#[derive(Debug)]
pub struct LearnSession {
    phase: LearnPhase,
    started_at: Option<Instant>,
    grace: Duration,
}

impl LearnSession {
    pub fn new(grace: Duration) -> Self {
        Self {
            phase: LearnPhase::Idle,
            started_at: None,
            grace,
        }
    }

    pub fn phase(&self) -> LearnPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase != LearnPhase::Idle
    }

    pub fn set_grace(&mut self, grace: Duration) {
        self.grace = grace;
    }

    /// Begins a session. Returns `false` if one is already running.
    pub fn start(&mut self, now: Instant) -> bool {
        if self.is_active() {
            return false;
        }
        self.phase = LearnPhase::AwaitingTrigger;
        self.started_at = Some(now);
        true
    }

    /// Returns whether a session was running.
    pub fn cancel(&mut self) -> bool {
        let was_active = self.is_active();
        self.phase = LearnPhase::Idle;
        self.started_at = None;
        was_active
    }

    /// Note-offs always pass through so keys held before the session
    /// started are still released.
    pub fn offer_midi(&mut self, event: MidiEvent, now: Instant) -> LearnMidi {
        if self.phase != LearnPhase::AwaitingTrigger || matches!(event, MidiEvent::NoteOff { .. })
        {
            return LearnMidi::PassThrough;
        }
        if let Some(started) = self.started_at
            && now.saturating_duration_since(started) < self.grace
        {
            debug!(?event, "Ignoring MIDI inside learn grace period");
            return LearnMidi::Swallowed;
        }

        let (kind, number) = match event {
            MidiEvent::NoteOn { note, .. } => (TriggerKind::Note, note),
            MidiEvent::ControlChange { controller, .. } if controller < FIRST_CHANNEL_MODE_CC => {
                (TriggerKind::ControlChange, controller)
            }
            _ => return LearnMidi::Swallowed,
        };
        self.phase = LearnPhase::AwaitingAction { kind, number };
        LearnMidi::Captured { kind, number }
    }

    /// Completes the session with a keyboard key. Modifier-only presses and
    /// keys offered in any other phase return `None`.
    pub fn offer_key(&mut self, vk: u16, modifiers: Modifiers) -> Option<MappingRule> {
        let LearnPhase::AwaitingAction { kind, number } = self.phase else {
            return None;
        };
        if vk == 0 || is_modifier_vk(vk) {
            return None;
        }

        self.phase = LearnPhase::Idle;
        self.started_at = None;
        Some(MappingRule {
            kind,
            number,
            key: KeyCombo::new(vk, modifiers),
            cc_action: CcAction::KeyPress,
            ..MappingRule::default()
        })
    }
}
