//! Chord debouncing and tap/hold gesture recognition.
//!
//! Both paths are plain state machines driven by explicit `Instant`s. The
//! resolver owns its timers; the caller polls it and feeds each
//! `Resolution` back through the normal dispatch path.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use smallvec::SmallVec;
use tracing::trace;

use crate::mapping::{ChordNotes, normalize_chord};
use crate::notify::GesturePhase;
use crate::timer::TimerQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKey {
    ChordDebounce,
    Gesture(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GestureTiming {
    pub chord_window: Duration,
    pub gesture_window: Duration,
    pub hold_threshold: Duration,
}

impl Default for GestureTiming {
    fn default() -> Self {
        Self {
            chord_window: Duration::from_millis(60),
            gesture_window: Duration::from_millis(300),
            hold_threshold: Duration::from_millis(800),
        }
    }
}

/// A note-on held back by the chord debounce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferedNote {
    pub note: u8,
    pub velocity: u8,
    /// The note-off arrived while the note was still buffered.
    pub released: bool,
}

pub type ChordBuffer = SmallVec<[BufferedNote; 8]>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Debounce window closed. `notes` is the normalized set; `buffered`
    /// keeps arrival order for replay.
    Chord {
        notes: ChordNotes,
        buffered: ChordBuffer,
    },
    Gesture { note: u8, phase: GesturePhase },
}

#[derive(Debug, Clone, Copy)]
struct KeyState {
    last_press: Instant,
    tap_count: u8,
    hold_triggered: bool,
    held: bool,
    /// Tap window closed while the key was still down; resolve on release.
    deferred: bool,
}

#[derive(Debug, Default)]
pub struct GestureResolver {
    timing: GestureTiming,
    timers: TimerQueue<TimerKey>,
    chord: ChordBuffer,
    keys: HashMap<u8, KeyState>,
}

impl GestureResolver {
    pub fn new(timing: GestureTiming) -> Self {
        Self {
            timing,
            ..Self::default()
        }
    }

    pub fn set_timing(&mut self, timing: GestureTiming) {
        self.timing = timing;
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Adds a note-on to the chord buffer and restarts the debounce window.
    pub fn buffer_chord_note(&mut self, note: u8, velocity: u8, now: Instant) {
        self.chord.push(BufferedNote {
            note,
            velocity,
            released: false,
        });
        self.timers
            .schedule(TimerKey::ChordDebounce, now + self.timing.chord_window);
    }

    /// Marks the newest unreleased buffered entry for `note` as released.
    /// Returns `false` when the note is not waiting in the buffer.
    pub fn release_buffered(&mut self, note: u8) -> bool {
        match self
            .chord
            .iter_mut()
            .rev()
            .find(|entry| entry.note == note && !entry.released)
        {
            Some(entry) => {
                entry.released = true;
                true
            }
            None => false,
        }
    }

    pub fn chord_pending(&self) -> bool {
        !self.chord.is_empty()
    }

    /// Starts or extends a tap sequence for `note`.
    pub fn note_on(&mut self, note: u8, now: Instant) {
        let window = self.timing.gesture_window;
        let state = self.keys.entry(note).or_insert(KeyState {
            last_press: now,
            tap_count: 0,
            hold_triggered: false,
            held: false,
            deferred: false,
        });

        let in_window = state.tap_count > 0
            && !state.deferred
            && now.saturating_duration_since(state.last_press) < window;
        if in_window {
            state.tap_count = state.tap_count.saturating_add(1);
        } else {
            state.tap_count = 1;
            state.hold_triggered = false;
            state.deferred = false;
            self.timers.schedule(TimerKey::Gesture(note), now + window);
        }
        state.last_press = now;
        state.held = true;
    }

    /// Long holds resolve here, as do single taps whose window closed while
    /// the key was down.
    pub fn note_off(&mut self, note: u8, now: Instant) -> Option<GesturePhase> {
        let hold_threshold = self.timing.hold_threshold;
        let state = self.keys.get_mut(&note)?;
        state.held = false;

        let held_for = now.saturating_duration_since(state.last_press);
        if held_for >= hold_threshold && !state.hold_triggered && state.tap_count > 0 {
            state.hold_triggered = true;
            state.tap_count = 0;
            state.deferred = false;
            self.timers.cancel(&TimerKey::Gesture(note));
            return Some(GesturePhase::LongHold);
        }

        if state.deferred {
            state.deferred = false;
            let count = std::mem::take(&mut state.tap_count);
            return phase_for(count);
        }
        None
    }

    /// Drains expired timers into resolutions, earliest first.
    pub fn poll(&mut self, now: Instant) -> SmallVec<[Resolution; 4]> {
        let mut resolved = SmallVec::new();
        for key in self.timers.take_expired(now) {
            match key {
                TimerKey::ChordDebounce => {
                    let buffered = std::mem::take(&mut self.chord);
                    let mut notes: ChordNotes = buffered.iter().map(|entry| entry.note).collect();
                    normalize_chord(&mut notes);
                    resolved.push(Resolution::Chord { notes, buffered });
                }
                TimerKey::Gesture(note) => {
                    if let Some(phase) = self.gesture_window_closed(note) {
                        resolved.push(Resolution::Gesture { note, phase });
                    }
                }
            }
        }
        resolved
    }

    fn gesture_window_closed(&mut self, note: u8) -> Option<GesturePhase> {
        // State reset by a long hold or cancel: stale expiry.
        let state = self.keys.get_mut(&note)?;
        if state.tap_count == 0 {
            return None;
        }
        if state.held && state.tap_count == 1 {
            trace!(note, "Tap window closed while held, deferring");
            state.deferred = true;
            return None;
        }
        let count = std::mem::take(&mut state.tap_count);
        phase_for(count)
    }

    /// Drops all pending timers, buffered notes and tap state.
    pub fn cancel_all(&mut self) {
        self.timers.clear();
        self.chord.clear();
        self.keys.clear();
    }
}

/// More than two taps still count as a double tap.
fn phase_for(tap_count: u8) -> Option<GesturePhase> {
    match tap_count {
        0 => None,
        1 => Some(GesturePhase::Single),
        _ => Some(GesturePhase::DoubleTap),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_single_tap_resolves_on_window_close() {
        let t0 = Instant::now();
        let mut resolver = GestureResolver::new(GestureTiming::default());
        resolver.note_on(60, t0);
        assert_eq!(resolver.note_off(60, t0 + ms(50)), None);

        assert!(resolver.poll(t0 + ms(299)).is_empty());
        assert_eq!(
            resolver.poll(t0 + ms(300)).as_slice(),
            &[Resolution::Gesture {
                note: 60,
                phase: GesturePhase::Single
            }]
        );
    }

    #[test]
    fn test_double_tap_within_window() {
        let t0 = Instant::now();
        let mut resolver = GestureResolver::new(GestureTiming::default());
        resolver.note_on(60, t0);
        resolver.note_off(60, t0 + ms(40));
        resolver.note_on(60, t0 + ms(120));
        resolver.note_off(60, t0 + ms(160));

        let resolved = resolver.poll(t0 + ms(300));
        assert_eq!(
            resolved.as_slice(),
            &[Resolution::Gesture {
                note: 60,
                phase: GesturePhase::DoubleTap
            }]
        );
        // Nothing else pending
        assert!(resolver.poll(t0 + ms(2000)).is_empty());
    }

    #[test]
    fn test_triple_tap_counts_as_double() {
        let t0 = Instant::now();
        let mut resolver = GestureResolver::new(GestureTiming::default());
        for i in 0..3 {
            resolver.note_on(60, t0 + ms(i * 80));
            resolver.note_off(60, t0 + ms(i * 80 + 20));
        }
        assert_eq!(
            resolver.poll(t0 + ms(300)).as_slice(),
            &[Resolution::Gesture {
                note: 60,
                phase: GesturePhase::DoubleTap
            }]
        );
    }

    #[test]
    fn test_long_hold_suppresses_single() {
        let t0 = Instant::now();
        let mut resolver = GestureResolver::new(GestureTiming::default());
        resolver.note_on(60, t0);
        // Window closes while held
        assert!(resolver.poll(t0 + ms(300)).is_empty());

        assert_eq!(
            resolver.note_off(60, t0 + ms(900)),
            Some(GesturePhase::LongHold)
        );
        assert!(resolver.poll(t0 + ms(2000)).is_empty());
    }

    #[test]
    fn test_medium_hold_resolves_single_on_release() {
        let t0 = Instant::now();
        let mut resolver = GestureResolver::new(GestureTiming::default());
        resolver.note_on(60, t0);
        assert!(resolver.poll(t0 + ms(300)).is_empty());
        assert_eq!(
            resolver.note_off(60, t0 + ms(500)),
            Some(GesturePhase::Single)
        );
    }

    #[test]
    fn test_note_off_without_state_is_ignored() {
        let mut resolver = GestureResolver::new(GestureTiming::default());
        assert_eq!(resolver.note_off(61, Instant::now()), None);
    }

    #[test]
    fn test_chord_debounce_restarts_and_normalizes() {
        let t0 = Instant::now();
        let mut resolver = GestureResolver::new(GestureTiming::default());
        resolver.buffer_chord_note(64, 90, t0);
        resolver.buffer_chord_note(60, 91, t0 + ms(30));
        resolver.buffer_chord_note(64, 92, t0 + ms(50));
        resolver.buffer_chord_note(67, 93, t0 + ms(80));

        // Restarted by the last note, so not yet due at t0 + 60
        assert!(resolver.poll(t0 + ms(100)).is_empty());

        let resolved = resolver.poll(t0 + ms(140));
        match resolved.as_slice() {
            [Resolution::Chord { notes, buffered }] => {
                assert_eq!(notes.as_slice(), &[60, 64, 67]);
                let order: Vec<u8> = buffered.iter().map(|b| b.note).collect();
                assert_eq!(order, vec![64, 60, 64, 67]);
            }
            other => panic!("unexpected resolution {other:?}"),
        }
        assert!(!resolver.chord_pending());
    }

    #[test]
    fn test_release_buffered_marks_latest_entry() {
        let t0 = Instant::now();
        let mut resolver = GestureResolver::new(GestureTiming::default());
        resolver.buffer_chord_note(60, 100, t0);
        resolver.buffer_chord_note(60, 100, t0 + ms(10));

        assert!(resolver.release_buffered(60));
        assert!(resolver.release_buffered(60));
        assert!(!resolver.release_buffered(60));
        assert!(!resolver.release_buffered(62));
    }

    #[test]
    fn test_cancel_all_drops_pending_work() {
        let t0 = Instant::now();
        let mut resolver = GestureResolver::new(GestureTiming::default());
        resolver.buffer_chord_note(60, 100, t0);
        resolver.note_on(60, t0);
        resolver.cancel_all();

        assert_eq!(resolver.next_deadline(), None);
        assert!(resolver.poll(t0 + ms(1000)).is_empty());
        assert_eq!(resolver.note_off(60, t0 + ms(1000)), None);
    }
}
