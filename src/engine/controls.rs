//! Per-controller state: last value, and keys held down by CC rules.

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::keys::KeyCombo;

const THRESHOLD: u8 = 63;

/// Value transition for one controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CcEdge {
    pub previous: u8,
    pub value: u8,
}

impl CcEdge {
    #[inline]
    pub fn crossed_up(&self) -> bool {
        self.previous <= THRESHOLD && self.value > THRESHOLD
    }

    #[inline]
    pub fn crossed_down(&self) -> bool {
        self.previous > THRESHOLD && self.value <= THRESHOLD
    }
}

pub(super) type HeldKeys = SmallVec<[KeyCombo; 2]>;

#[derive(Debug)]
pub(super) struct ControlTracker {
    last: [u8; 128],
    /// Keys pressed by `KeyPress` rules, released on the down-crossing.
    pressed: HashMap<u8, HeldKeys>,
    /// Keys held by `HoldKey` rules. Presence marks the controller active.
    holds: HashMap<u8, HeldKeys>,
}

impl Default for ControlTracker {
    fn default() -> Self {
        Self {
            last: [0; 128],
            pressed: HashMap::new(),
            holds: HashMap::new(),
        }
    }
}

impl ControlTracker {
    /// Records `value` and returns the transition from the previous one.
    pub fn update(&mut self, controller: u8, value: u8) -> CcEdge {
        let slot = &mut self.last[(controller & 0x7F) as usize];
        let previous = std::mem::replace(slot, value);
        CcEdge { previous, value }
    }

    pub fn record_press(&mut self, controller: u8, combo: KeyCombo) {
        self.pressed.entry(controller).or_default().push(combo);
    }

    pub fn take_pressed(&mut self, controller: u8) -> HeldKeys {
        self.pressed.remove(&controller).unwrap_or_default()
    }

    #[inline]
    pub fn hold_active(&self, controller: u8) -> bool {
        self.holds.contains_key(&controller)
    }

    pub fn activate_hold(&mut self, controller: u8, keys: HeldKeys) {
        self.holds.insert(controller, keys);
    }

    pub fn take_hold(&mut self, controller: u8) -> Option<HeldKeys> {
        self.holds.remove(&controller)
    }

    /// Forgets every value and returns all keys still held down.
    pub fn reset(&mut self) -> Vec<KeyCombo> {
        self.last = [0; 128];
        let mut keys: Vec<KeyCombo> = self.pressed.drain().flat_map(|(_, keys)| keys).collect();
        keys.extend(self.holds.drain().flat_map(|(_, keys)| keys));
        keys
    }
}
