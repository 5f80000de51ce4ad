//! Sustain pedal (CC 64) handling.

use std::collections::BTreeSet;

use tracing::debug;

use crate::keys::KeyCombo;
use crate::simulator::InputSimulator;

pub const SUSTAIN_CONTROLLER: u8 = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PedalState {
    #[default]
    Released,
    Held,
}

/// Defers key releases while the pedal is down.
#[derive(Debug, Default)]
pub struct SustainController {
    pedal: PedalState,
    sustained: BTreeSet<KeyCombo>,
}

impl SustainController {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_held(&self) -> bool {
        self.pedal == PedalState::Held
    }

    pub fn sustained(&self) -> impl Iterator<Item = &KeyCombo> {
        self.sustained.iter()
    }

    /// Feeds a CC 64 value. Releasing the pedal flushes every sustained key.
    pub fn on_pedal(&mut self, value: u8, simulator: &InputSimulator) -> Option<PedalState> {
        match (self.pedal, value > 63) {
            (PedalState::Released, true) => {
                self.pedal = PedalState::Held;
                Some(PedalState::Held)
            }
            (PedalState::Held, false) => {
                self.flush(simulator);
                Some(PedalState::Released)
            }
            _ => None,
        }
    }

    /// Holds back the release of `combo` if the pedal is down.
    /// Returns `false` when the caller should release it now.
    pub fn defer_release(&mut self, combo: KeyCombo) -> bool {
        if !self.is_held() {
            return false;
        }
        self.sustained.insert(combo);
        true
    }

    /// Forgets a sustained key that is being pressed again.
    pub fn reclaim(&mut self, combo: &KeyCombo) -> bool {
        self.sustained.remove(combo)
    }

    /// Flips the pedal off and releases each sustained key exactly once.
    pub fn flush(&mut self, simulator: &InputSimulator) {
        self.pedal = PedalState::Released;
        let keys = std::mem::take(&mut self.sustained);
        if !keys.is_empty() {
            debug!(count = keys.len(), "Flushing sustained keys");
        }
        for combo in keys {
            simulator.release(combo);
        }
    }
}
