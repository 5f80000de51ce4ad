//! The mapping engine.
//!
//! `Engine` receives classified MIDI events, resolves them against the rule
//! store under the current foreground context and emits synthetic input.
//! It is single-threaded and time is passed in explicitly: the control
//! thread feeds it events as they arrive and calls `poll_timers` at
//! `next_deadline`. Chord and gesture resolutions re-enter the same
//! dispatch routines from `poll_timers`, never recursively.

mod controls;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use smallvec::SmallVec;
use tracing::{debug, info, trace, warn};

use crate::context::{AppContext, ContextTracker};
use crate::gesture::{BufferedNote, GestureResolver, GestureTiming, Resolution};
use crate::keys::Modifiers;
use crate::learn::{LearnMidi, LearnPhase, LearnSession};
use crate::mapping::{
    CcAction, ChordNotes, Gesture, MappingRule, MappingStore, ProfileSlots, RuleAction, TriggerKind,
};
use crate::midi::MidiEvent;
use crate::notify::{GesturePhase, LogCategory, Notification, Notifier};
use crate::simulator::InputSimulator;
use crate::sustain::{PedalState, SUSTAIN_CONTROLLER, SustainController};

pub use controls::CcEdge;
use controls::{ControlTracker, HeldKeys};

const MOUSE_STEP: i32 = 2;
const SCROLL_STEP: i32 = 20;

/// Runtime-tunable engine behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub timing: GestureTiming,
    pub learn_grace: Duration,
    /// Enforce each rule's velocity zone on note-on.
    pub velocity_zones: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            timing: GestureTiming::default(),
            learn_grace: Duration::from_millis(200),
            velocity_zones: true,
        }
    }
}

/// Work the engine hands back to its host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostRequest {
    /// Replace the store with the profile in this slot.
    SwitchProfile(usize),
}

pub struct Engine {
    store: Arc<MappingStore>,
    context: Arc<ContextTracker>,
    simulator: InputSimulator,
    notifier: Notifier,
    settings: EngineSettings,
    slots: ProfileSlots,
    resolver: GestureResolver,
    sustain: SustainController,
    controls: ControlTracker,
    /// Combos pressed by each sounding note, released on its note-off.
    held: HashMap<u8, HeldKeys>,
    /// Notes whose press was consumed by a chord; their note-off is dropped.
    chord_consumed: HashSet<u8>,
    /// Notes currently showing a layer label on the HUD.
    hud_notes: HashSet<u8>,
    learn: LearnSession,
    requests: SmallVec<[HostRequest; 2]>,
}

impl Engine {
    pub fn new(
        store: Arc<MappingStore>,
        context: Arc<ContextTracker>,
        simulator: InputSimulator,
        notifier: Notifier,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            context,
            simulator,
            notifier,
            resolver: GestureResolver::new(settings.timing),
            learn: LearnSession::new(settings.learn_grace),
            settings,
            slots: ProfileSlots::default(),
            sustain: SustainController::new(),
            controls: ControlTracker::default(),
            held: HashMap::new(),
            chord_consumed: HashSet::new(),
            hud_notes: HashSet::new(),
            requests: SmallVec::new(),
        }
    }

    pub fn store(&self) -> &Arc<MappingStore> {
        &self.store
    }

    pub fn context(&self) -> &Arc<ContextTracker> {
        &self.context
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    pub fn set_settings(&mut self, settings: EngineSettings) {
        self.resolver.set_timing(settings.timing);
        self.learn.set_grace(settings.learn_grace);
        self.settings = settings;
    }

    pub fn profile_slots(&self) -> &ProfileSlots {
        &self.slots
    }

    pub fn set_profile_slots(&mut self, slots: ProfileSlots) {
        self.slots = slots;
    }

    pub fn sustain(&self) -> &SustainController {
        &self.sustain
    }

    pub fn learn_phase(&self) -> LearnPhase {
        self.learn.phase()
    }

    /// Earliest pending chord or gesture deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.resolver.next_deadline()
    }

    /// Requests raised since the last drain.
    pub fn drain_requests(&mut self) -> SmallVec<[HostRequest; 2]> {
        std::mem::take(&mut self.requests)
    }

    /// Entry point for raw bytes. Anything that does not classify is dropped.
    pub fn handle_midi(&mut self, bytes: &[u8], now: Instant) {
        match MidiEvent::classify(bytes) {
            Some(event) => self.handle_event(event, now),
            None => trace!(?bytes, "Dropping unclassified MIDI message"),
        }
    }

    pub fn handle_event(&mut self, event: MidiEvent, now: Instant) {
        self.monitor(event);

        match self.learn.offer_midi(event, now) {
            LearnMidi::PassThrough => {}
            LearnMidi::Swallowed => {
                self.settle_control(event);
                return;
            }
            LearnMidi::Captured { kind, number } => {
                self.settle_control(event);
                let what = match kind {
                    TriggerKind::ControlChange => "CC",
                    _ => "Note",
                };
                self.notifier.log(
                    LogCategory::Mapping,
                    format!("Learned {} {}. Now press the keyboard key to map...", what, number),
                );
                self.notifier.status("Waiting for keyboard key...");
                self.notifier.send(Notification::Learn(self.learn.phase()));
                return;
            }
        }

        match event {
            MidiEvent::NoteOn { note, velocity } => {
                self.resolver.note_on(note, now);
                if self.chords_armed() {
                    self.resolver.buffer_chord_note(note, velocity, now);
                } else {
                    self.fire_note_on(note, velocity);
                }
            }
            MidiEvent::NoteOff { note } => {
                if self.resolver.release_buffered(note) {
                    trace!(note, "Note released inside chord window");
                } else if self.chord_consumed.remove(&note) {
                    trace!(note, "Swallowing note-off of chord member");
                } else {
                    self.fire_note_off(note);
                }
                if let Some(phase) = self.resolver.note_off(note, now) {
                    self.resolve_gesture(note, phase);
                }
            }
            MidiEvent::ControlChange { controller, value } => {
                self.fire_control(controller, value);
            }
        }
    }

    /// Runs every chord and gesture resolution due at `now`.
    pub fn poll_timers(&mut self, now: Instant) {
        for resolution in self.resolver.poll(now) {
            match resolution {
                Resolution::Chord { notes, buffered } => self.resolve_chord(&notes, &buffered),
                Resolution::Gesture { note, phase } => self.resolve_gesture(note, phase),
            }
        }
    }

    /// Starts a learn session. Returns `false` if one is already running.
    pub fn start_learn(&mut self, now: Instant) -> bool {
        if !self.learn.start(now) {
            return false;
        }
        self.notifier.log(
            LogCategory::Mapping,
            "Learning: press a MIDI key or move a controller...",
        );
        self.notifier.status("Waiting for MIDI input...");
        self.notifier.send(Notification::Learn(self.learn.phase()));
        true
    }

    pub fn cancel_learn(&mut self) -> bool {
        if !self.learn.cancel() {
            return false;
        }
        self.notifier.log(LogCategory::Mapping, "Learn mode cancelled");
        self.notifier.status("Ready");
        self.notifier.send(Notification::Learn(LearnPhase::Idle));
        true
    }

    /// Offers a keyboard key to the learn session. Returns `true` when the
    /// key completed a mapping.
    pub fn capture_key(&mut self, vk: u16, modifiers: Modifiers) -> bool {
        let Some(rule) = self.learn.offer_key(vk, modifiers) else {
            return false;
        };
        match self.store.add(rule.clone()) {
            Ok(_) => {
                self.notifier
                    .log(LogCategory::Mapping, format!("Mapped: {}", rule));
                self.notifier.send(Notification::Mappings(self.store.list()));
                self.notifier.send(Notification::LearnCompleted(rule));
            }
            Err(e) => self
                .notifier
                .log(LogCategory::Error, format!("Could not add mapping: {}", e)),
        }
        self.notifier.status("Ready");
        self.notifier.send(Notification::Learn(LearnPhase::Idle));
        true
    }

    /// Forced cancellation after a device disconnect: pending chords and
    /// gestures are dropped, learning stops and every key we hold is released.
    pub fn cancel_pending(&mut self) {
        self.resolver.cancel_all();
        self.cancel_learn();
        self.chord_consumed.clear();

        let mut released = 0usize;
        for (_, combos) in self.held.drain() {
            for combo in combos {
                self.simulator.release(combo);
                released += 1;
            }
        }
        for combo in self.controls.reset() {
            self.simulator.release(combo);
            released += 1;
        }
        self.sustain.flush(&self.simulator);
        if !self.hud_notes.is_empty() {
            self.hud_notes.clear();
            self.notifier.send(Notification::HudInactive);
        }
        debug!(released, "Pending input cancelled");
    }

    fn monitor(&self, event: MidiEvent) {
        match event {
            MidiEvent::NoteOn { note, velocity } => {
                self.notifier
                    .send(Notification::NoteVelocity { note, velocity });
                self.notifier.log(
                    LogCategory::Midi,
                    format!("Note On: {} (v:{})", note, velocity),
                );
            }
            MidiEvent::NoteOff { note } => {
                self.notifier
                    .send(Notification::NoteVelocity { note, velocity: 0 });
            }
            MidiEvent::ControlChange { controller, value } => {
                self.notifier
                    .send(Notification::CcValue { controller, value });
                self.notifier.log(
                    LogCategory::Midi,
                    format!("CC: {} (v:{})", controller, value),
                );
            }
        }
    }

    /// Note-ons are debounced only while some chord rule could match.
    fn chords_armed(&self) -> bool {
        self.store
            .snapshot()
            .iter()
            .any(MappingRule::is_playable_chord)
    }

    #[inline]
    fn fire_note_on(&mut self, note: u8, velocity: u8) {
        self.dispatch_note(note, Some(velocity), Gesture::Any);
    }

    /// Matches note-keyed rules for `note`. `velocity` is `None` for gesture
    /// triggers, which skip velocity guards and only tap.
    fn dispatch_note(&mut self, note: u8, velocity: Option<u8>, gesture: Gesture) {
        let rules = self.store.snapshot();
        let context = self.context.snapshot();

        for rule in rules.iter() {
            if !rule.kind.is_note_keyed() || rule.number != note || rule.gesture != gesture {
                continue;
            }
            if !rule.matches_context(&context) {
                continue;
            }

            if let RuleAction::ProfileSwitch(slot) = rule.action() {
                if gesture == Gesture::Any {
                    self.request_profile_switch(slot);
                }
                continue;
            }

            if let Some(velocity) = velocity
                && !rule.accepts_velocity(velocity, self.settings.velocity_zones)
            {
                continue;
            }

            match rule.action() {
                RuleAction::Key(combo) => {
                    if velocity.is_some() {
                        self.sustain.reclaim(&combo);
                        self.simulator.press(combo);
                        self.held.entry(note).or_default().push(combo);
                    } else {
                        self.simulator.tap(combo);
                    }
                }
                RuleAction::Layer(combo) => {
                    if velocity.is_some() {
                        self.hud_notes.insert(note);
                        self.notifier.send(Notification::HudActive(combo.label()));
                    }
                }
                RuleAction::Macro(text) => {
                    self.simulator.type_text(text);
                    self.notifier
                        .log(LogCategory::Mapping, format!("Macro: {}", text));
                }
                RuleAction::Ai(prompt) => {
                    self.notifier
                        .log(LogCategory::Mapping, format!("AI prompt: {}", prompt));
                    self.notifier
                        .send(Notification::AiPrompt(prompt.to_string()));
                }
                RuleAction::ProfileSwitch(_) | RuleAction::Control(..) | RuleAction::Chord(_) => {}
            }
        }
    }

    fn fire_note_off(&mut self, note: u8) {
        if let Some(combos) = self.held.remove(&note) {
            for combo in combos {
                if !self.sustain.defer_release(combo) {
                    self.simulator.release(combo);
                }
            }
        }
        if self.hud_notes.remove(&note) {
            self.notifier.send(Notification::HudInactive);
        }
    }

    fn fire_control(&mut self, controller: u8, value: u8) {
        let edge = self.track_control(controller, value);

        let rules = self.store.snapshot();
        let context = self.context.snapshot();
        let hold_was_active = self.controls.hold_active(controller);
        let mut new_holds = HeldKeys::new();

        for rule in rules.iter() {
            if rule.kind != TriggerKind::ControlChange
                || rule.number != controller
                || !rule.matches_context(&context)
            {
                continue;
            }
            let RuleAction::Control(action, combo) = rule.action() else {
                // Profile slot on a CC rule: never a key/mouse action.
                continue;
            };
            match action {
                CcAction::KeyPress => {
                    if edge.crossed_up() {
                        self.simulator.press(combo);
                        self.controls.record_press(controller, combo);
                    }
                }
                CcAction::HoldKey => {
                    if edge.crossed_up() && !hold_was_active {
                        self.simulator.press(combo);
                        new_holds.push(combo);
                    }
                }
                CcAction::MouseX => {
                    self.simulator
                        .move_mouse((value as i32 - 64) * MOUSE_STEP, 0);
                }
                CcAction::MouseY => {
                    self.simulator
                        .move_mouse(0, (value as i32 - 64) * MOUSE_STEP);
                }
                CcAction::Scroll => {
                    self.simulator.scroll((value as i32 - 64) * SCROLL_STEP);
                }
            }
        }

        if !new_holds.is_empty() {
            self.controls.activate_hold(controller, new_holds);
        }
        self.release_controls(controller, edge);
    }

    /// Records the new controller value and drives the sustain pedal.
    fn track_control(&mut self, controller: u8, value: u8) -> CcEdge {
        let edge = self.controls.update(controller, value);

        if controller == SUSTAIN_CONTROLLER
            && let Some(state) = self.sustain.on_pedal(value, &self.simulator)
        {
            debug!(?state, "Sustain pedal");
            self.notifier.status(match state {
                PedalState::Held => "Sustain on",
                PedalState::Released => "Sustain off",
            });
        }
        edge
    }

    fn release_controls(&mut self, controller: u8, edge: CcEdge) {
        if !edge.crossed_down() {
            return;
        }
        for combo in self.controls.take_pressed(controller) {
            self.simulator.release(combo);
        }
        if let Some(combos) = self.controls.take_hold(controller) {
            for combo in combos {
                self.simulator.release(combo);
            }
        }
    }

    /// A controller message taken by learn mode still moves the pedal and
    /// releases keys on its down-crossing; it just fires no new actions.
    fn settle_control(&mut self, event: MidiEvent) {
        if let MidiEvent::ControlChange { controller, value } = event {
            let edge = self.track_control(controller, value);
            self.release_controls(controller, edge);
        }
    }

    fn resolve_chord(&mut self, notes: &ChordNotes, buffered: &[BufferedNote]) {
        if notes.len() >= 2 {
            let rules = self.store.snapshot();
            let context = self.context.snapshot();
            if let Some(rule) = find_chord(&rules, notes, &context) {
                info!(chord = ?notes.as_slice(), "Chord matched");
                self.notifier
                    .log(LogCategory::Mapping, format!("Chord: {}", rule));
                match rule.action() {
                    RuleAction::ProfileSwitch(slot) => self.request_profile_switch(slot),
                    RuleAction::Chord(combo) => {
                        self.simulator.tap(combo);
                    }
                    _ => {}
                }
                for entry in buffered.iter().filter(|entry| !entry.released) {
                    self.chord_consumed.insert(entry.note);
                }
                return;
            }
        }

        // Replayed notes keep the velocity they arrived with, so velocity
        // guards treat them like unbuffered notes.
        for entry in buffered {
            self.fire_note_on(entry.note, entry.velocity);
            if entry.released {
                self.fire_note_off(entry.note);
            }
        }
    }

    fn resolve_gesture(&mut self, note: u8, phase: GesturePhase) {
        self.notifier.send(Notification::Gesture { note, phase });
        let gesture = match phase {
            GesturePhase::Single => return,
            GesturePhase::DoubleTap => Gesture::DoubleTap,
            GesturePhase::LongHold => Gesture::LongHold,
        };
        debug!(note, ?gesture, "Gesture resolved");
        self.dispatch_note(note, None, gesture);
    }

    fn request_profile_switch(&mut self, slot: usize) {
        if slot < self.slots.len() {
            self.notifier.log(
                LogCategory::System,
                format!("Switching to profile #{}", slot + 1),
            );
            self.requests.push(HostRequest::SwitchProfile(slot));
        } else {
            warn!(slot, slots = self.slots.len(), "Profile slot not assigned");
        }
    }
}

/// First chord rule whose notes equal `notes` exactly and whose context
/// filter passes.
fn find_chord<'a>(
    rules: &'a [MappingRule],
    notes: &ChordNotes,
    context: &AppContext,
) -> Option<&'a MappingRule> {
    rules.iter().find(|rule| {
        rule.is_playable_chord() && rule.chord_notes == *notes && rule.matches_context(context)
    })
}
