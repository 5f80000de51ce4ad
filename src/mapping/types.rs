//! Mapping rule types.

use std::fmt;

use smallvec::SmallVec;

use crate::context::AppContext;
use crate::keys::KeyCombo;

/// Normalized chord notes (sorted, no duplicates).
pub type ChordNotes = SmallVec<[u8; 8]>;

/// What kind of MIDI trigger a rule listens for, and by extension which
/// action it performs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    #[default]
    Note,
    ControlChange,
    Chord,
    /// Held note shows a modifier/key label on the HUD while down.
    LayerKey,
    Macro,
    Ai,
    ProfileSwitch,
}

impl TriggerKind {
    pub const fn from_id(id: i32) -> Option<Self> {
        Some(match id {
            0 => TriggerKind::Note,
            1 => TriggerKind::ControlChange,
            2 => TriggerKind::Chord,
            3 => TriggerKind::LayerKey,
            4 => TriggerKind::Macro,
            5 => TriggerKind::Ai,
            6 => TriggerKind::ProfileSwitch,
            _ => return None,
        })
    }

    pub const fn id(self) -> i32 {
        match self {
            TriggerKind::Note => 0,
            TriggerKind::ControlChange => 1,
            TriggerKind::Chord => 2,
            TriggerKind::LayerKey => 3,
            TriggerKind::Macro => 4,
            TriggerKind::Ai => 5,
            TriggerKind::ProfileSwitch => 6,
        }
    }

    /// Trigger kinds keyed by a single note number.
    pub const fn is_note_keyed(self) -> bool {
        matches!(
            self,
            TriggerKind::Note
                | TriggerKind::LayerKey
                | TriggerKind::Macro
                | TriggerKind::Ai
                | TriggerKind::ProfileSwitch
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Gesture {
    #[default]
    Any,
    DoubleTap,
    LongHold,
}

impl Gesture {
    pub const fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(Gesture::Any),
            1 => Some(Gesture::DoubleTap),
            2 => Some(Gesture::LongHold),
            _ => None,
        }
    }

    pub const fn id(self) -> i32 {
        match self {
            Gesture::Any => 0,
            Gesture::DoubleTap => 1,
            Gesture::LongHold => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum VelocityZone {
    #[default]
    Any,
    /// 1..=63
    Soft,
    /// 64..=127
    Hard,
}

impl VelocityZone {
    pub const fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(VelocityZone::Any),
            1 => Some(VelocityZone::Soft),
            2 => Some(VelocityZone::Hard),
            _ => None,
        }
    }

    pub const fn id(self) -> i32 {
        match self {
            VelocityZone::Any => 0,
            VelocityZone::Soft => 1,
            VelocityZone::Hard => 2,
        }
    }

    #[inline]
    pub const fn contains(self, velocity: u8) -> bool {
        match self {
            VelocityZone::Any => true,
            VelocityZone::Soft => velocity >= 1 && velocity <= 63,
            VelocityZone::Hard => velocity >= 64 && velocity <= 127,
        }
    }
}

/// What a control-change rule does with the controller value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CcAction {
    /// Key down when the value rises above 63, key up when it falls back.
    #[default]
    KeyPress,
    MouseX,
    MouseY,
    Scroll,
    /// Like `KeyPress`, but tracked so repeated crossings are no-ops.
    HoldKey,
}

impl CcAction {
    pub const fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(CcAction::KeyPress),
            1 => Some(CcAction::MouseX),
            2 => Some(CcAction::MouseY),
            3 => Some(CcAction::Scroll),
            4 => Some(CcAction::HoldKey),
            _ => None,
        }
    }

    pub const fn id(self) -> i32 {
        match self {
            CcAction::KeyPress => 0,
            CcAction::MouseX => 1,
            CcAction::MouseY => 2,
            CcAction::Scroll => 3,
            CcAction::HoldKey => 4,
        }
    }
}

/// A declarative binding from a MIDI trigger to an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingRule {
    pub kind: TriggerKind,
    /// Note or controller number. Unused by chord rules.
    pub number: u8,
    pub chord_notes: ChordNotes,
    pub gesture: Gesture,
    pub velocity_min: u8,
    pub velocity_zone: VelocityZone,
    /// Substring required in the foreground window title. Empty matches all.
    pub title_pattern: String,
    /// Substring required in the foreground process name. Empty matches all.
    pub app_pattern: String,
    pub key: KeyCombo,
    pub cc_action: CcAction,
    pub macro_text: String,
    pub ai_prompt: String,
    /// Profile slot to load. Takes precedence over every other action.
    pub profile_switch: Option<usize>,
}

impl Default for MappingRule {
    fn default() -> Self {
        Self {
            kind: TriggerKind::Note,
            number: 0,
            chord_notes: ChordNotes::new(),
            gesture: Gesture::Any,
            velocity_min: 1,
            velocity_zone: VelocityZone::Any,
            title_pattern: String::new(),
            app_pattern: String::new(),
            key: KeyCombo::default(),
            cc_action: CcAction::KeyPress,
            macro_text: String::new(),
            ai_prompt: String::new(),
            profile_switch: None,
        }
    }
}

/// The single action a rule performs, derived from its kind and fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction<'a> {
    ProfileSwitch(usize),
    Key(KeyCombo),
    Control(CcAction, KeyCombo),
    Chord(KeyCombo),
    Layer(KeyCombo),
    Macro(&'a str),
    Ai(&'a str),
}

impl MappingRule {
    pub fn note(number: u8, key: KeyCombo) -> Self {
        Self {
            kind: TriggerKind::Note,
            number,
            key,
            ..Self::default()
        }
    }

    pub fn control(number: u8, action: CcAction, key: KeyCombo) -> Self {
        Self {
            kind: TriggerKind::ControlChange,
            number,
            cc_action: action,
            key,
            ..Self::default()
        }
    }

    pub fn chord(notes: &[u8], key: KeyCombo) -> Self {
        let mut chord_notes: ChordNotes = notes.iter().copied().collect();
        normalize_chord(&mut chord_notes);
        Self {
            kind: TriggerKind::Chord,
            chord_notes,
            key,
            ..Self::default()
        }
    }

    /// The action this rule performs. A profile slot wins over everything.
    pub fn action(&self) -> RuleAction<'_> {
        if let Some(slot) = self.profile_switch {
            return RuleAction::ProfileSwitch(slot);
        }
        match self.kind {
            TriggerKind::Note | TriggerKind::ProfileSwitch => RuleAction::Key(self.key),
            TriggerKind::ControlChange => RuleAction::Control(self.cc_action, self.key),
            TriggerKind::Chord => RuleAction::Chord(self.key),
            TriggerKind::LayerKey => RuleAction::Layer(self.key),
            TriggerKind::Macro => RuleAction::Macro(&self.macro_text),
            TriggerKind::Ai => RuleAction::Ai(&self.ai_prompt),
        }
    }

    /// Case-sensitive substring check against the foreground window.
    pub fn matches_context(&self, context: &AppContext) -> bool {
        (self.title_pattern.is_empty() || context.window_title.contains(&self.title_pattern))
            && (self.app_pattern.is_empty() || context.process_name.contains(&self.app_pattern))
    }

    /// Velocity floor and, when enabled, zone gating for note-on.
    pub fn accepts_velocity(&self, velocity: u8, enforce_zone: bool) -> bool {
        velocity >= self.velocity_min && (!enforce_zone || self.velocity_zone.contains(velocity))
    }

    /// Chord rules need at least two distinct notes to ever match.
    pub fn is_playable_chord(&self) -> bool {
        self.kind == TriggerKind::Chord && self.chord_notes.len() >= 2
    }

    /// Chord notes sorted and deduplicated; dropped for every other kind.
    pub fn normalize(&mut self) {
        if self.kind == TriggerKind::Chord {
            normalize_chord(&mut self.chord_notes);
        } else {
            self.chord_notes.clear();
        }
    }

    /// Rejects rules that can never fire.
    pub fn validate(&self) -> Result<(), String> {
        if self.kind == TriggerKind::Chord && self.chord_notes.len() < 2 {
            return Err("chord needs at least two distinct notes".to_string());
        }
        if self.number > 127 {
            return Err(format!("MIDI number {} out of range", self.number));
        }
        if self.velocity_min > 127 {
            return Err(format!("velocity floor {} out of range", self.velocity_min));
        }
        if self.key.vk > 0xFF {
            return Err(format!("virtual key 0x{:X} out of range", self.key.vk));
        }
        Ok(())
    }
}

impl fmt::Display for MappingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TriggerKind::Chord => {
                let notes: Vec<String> = self.chord_notes.iter().map(|n| n.to_string()).collect();
                write!(f, "Chord [{}]", notes.join(","))?;
            }
            TriggerKind::ControlChange => write!(f, "CC {}", self.number)?,
            _ => write!(f, "Note {}", self.number)?,
        }
        match self.gesture {
            Gesture::Any => {}
            Gesture::DoubleTap => f.write_str(" (double tap)")?,
            Gesture::LongHold => f.write_str(" (long hold)")?,
        }
        f.write_str(" -> ")?;
        match self.action() {
            RuleAction::ProfileSwitch(slot) => write!(f, "[Profile #{}]", slot + 1)?,
            RuleAction::Key(key) | RuleAction::Chord(key) => write!(f, "{}", key)?,
            RuleAction::Control(action, key) => match action {
                CcAction::KeyPress => write!(f, "{}", key)?,
                CcAction::MouseX => f.write_str("Mouse X")?,
                CcAction::MouseY => f.write_str("Mouse Y")?,
                CcAction::Scroll => f.write_str("Scroll")?,
                CcAction::HoldKey => write!(f, "Hold {}", key)?,
            },
            RuleAction::Layer(key) => write!(f, "HUD {}", key)?,
            RuleAction::Macro(text) => write!(f, "Macro \"{}\"", text)?,
            RuleAction::Ai(prompt) => write!(f, "AI \"{}\"", prompt)?,
        }
        match self.velocity_zone {
            VelocityZone::Any => {}
            VelocityZone::Soft => f.write_str(" [soft]")?,
            VelocityZone::Hard => f.write_str(" [hard]")?,
        }
        if !self.app_pattern.is_empty() {
            write!(f, " @{}", self.app_pattern)?;
        }
        Ok(())
    }
}

/// Sorts and dedups chord notes in place.
pub fn normalize_chord(notes: &mut ChordNotes) {
    notes.sort_unstable();
    notes.dedup();
}

/// Sparse edit applied by `MappingStore::update`. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct RulePatch {
    pub kind: Option<TriggerKind>,
    pub number: Option<u8>,
    pub chord_notes: Option<ChordNotes>,
    pub gesture: Option<Gesture>,
    pub velocity_min: Option<u8>,
    pub velocity_zone: Option<VelocityZone>,
    pub title_pattern: Option<String>,
    pub app_pattern: Option<String>,
    pub key: Option<KeyCombo>,
    pub cc_action: Option<CcAction>,
    pub macro_text: Option<String>,
    pub ai_prompt: Option<String>,
    /// `Some(None)` clears the profile slot.
    pub profile_switch: Option<Option<usize>>,
}

impl RulePatch {
    pub fn apply_to(self, rule: &mut MappingRule) {
        if let Some(kind) = self.kind {
            rule.kind = kind;
        }
        if let Some(number) = self.number {
            rule.number = number;
        }
        if let Some(mut notes) = self.chord_notes {
            normalize_chord(&mut notes);
            rule.chord_notes = notes;
        }
        if let Some(gesture) = self.gesture {
            rule.gesture = gesture;
        }
        if let Some(velocity_min) = self.velocity_min {
            rule.velocity_min = velocity_min;
        }
        if let Some(zone) = self.velocity_zone {
            rule.velocity_zone = zone;
        }
        if let Some(pattern) = self.title_pattern {
            rule.title_pattern = pattern;
        }
        if let Some(pattern) = self.app_pattern {
            rule.app_pattern = pattern;
        }
        if let Some(key) = self.key {
            rule.key = key;
        }
        if let Some(action) = self.cc_action {
            rule.cc_action = action;
        }
        if let Some(text) = self.macro_text {
            rule.macro_text = text;
        }
        if let Some(prompt) = self.ai_prompt {
            rule.ai_prompt = prompt;
        }
        if let Some(slot) = self.profile_switch {
            rule.profile_switch = slot;
        }
    }
}
