//! JSON profile format.
//!
//! A profile is a flat array of rule records. Enum-valued fields are stored
//! as integers and every field is optional; unknown values fall back to the
//! rule defaults.

use serde::{Deserialize, Serialize};

use super::types::*;
use crate::keys::{KeyCombo, Modifiers};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleRecord {
    #[serde(default)]
    pub midi_type: i32,
    #[serde(default)]
    pub midi_num: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub midi_chord: Vec<i32>,
    #[serde(default)]
    pub key_vk: i32,
    #[serde(default)]
    pub modifiers: i32,
    #[serde(default = "default_vel_min")]
    pub vel_min: i32,
    #[serde(default)]
    pub vel_zone: i32,
    #[serde(default)]
    pub cc_action: i32,
    #[serde(default = "default_profile_switch")]
    pub profile_switch: i32,
    #[serde(default)]
    pub macro_text: String,
    #[serde(default)]
    pub ai_prompt: String,
    #[serde(default)]
    pub title_pattern: String,
    #[serde(default)]
    pub app_pattern: String,
    #[serde(default)]
    pub gesture_id: i32,
}

fn default_vel_min() -> i32 {
    1
}
fn default_profile_switch() -> i32 {
    -1
}

#[inline]
fn midi_byte(value: i32) -> u8 {
    value.clamp(0, 127) as u8
}

impl From<&MappingRule> for RuleRecord {
    fn from(rule: &MappingRule) -> Self {
        Self {
            midi_type: rule.kind.id(),
            midi_num: rule.number as i32,
            midi_chord: if rule.kind == TriggerKind::Chord {
                rule.chord_notes.iter().map(|&n| n as i32).collect()
            } else {
                Vec::new()
            },
            key_vk: rule.key.vk as i32,
            modifiers: rule.key.modifiers.bits() as i32,
            vel_min: rule.velocity_min as i32,
            vel_zone: rule.velocity_zone.id(),
            cc_action: rule.cc_action.id(),
            profile_switch: rule.profile_switch.map_or(-1, |slot| slot as i32),
            macro_text: rule.macro_text.clone(),
            ai_prompt: rule.ai_prompt.clone(),
            title_pattern: rule.title_pattern.clone(),
            app_pattern: rule.app_pattern.clone(),
            gesture_id: rule.gesture.id(),
        }
    }
}

impl From<RuleRecord> for MappingRule {
    fn from(record: RuleRecord) -> Self {
        let kind = TriggerKind::from_id(record.midi_type).unwrap_or_default();
        let mut chord_notes: ChordNotes = if kind == TriggerKind::Chord {
            record
                .midi_chord
                .iter()
                .filter(|n| (0..=127).contains(*n))
                .map(|&n| n as u8)
                .collect()
        } else {
            ChordNotes::new()
        };
        normalize_chord(&mut chord_notes);

        MappingRule {
            kind,
            number: midi_byte(record.midi_num),
            chord_notes,
            gesture: Gesture::from_id(record.gesture_id).unwrap_or_default(),
            velocity_min: midi_byte(record.vel_min),
            velocity_zone: VelocityZone::from_id(record.vel_zone).unwrap_or_default(),
            title_pattern: record.title_pattern,
            app_pattern: record.app_pattern,
            key: KeyCombo::new(
                record.key_vk.clamp(0, 0xFF) as u16,
                Modifiers::from_bits(record.modifiers.clamp(0, 0xFF) as u8),
            ),
            cc_action: CcAction::from_id(record.cc_action).unwrap_or_default(),
            macro_text: record.macro_text,
            ai_prompt: record.ai_prompt,
            profile_switch: usize::try_from(record.profile_switch).ok(),
        }
    }
}

/// Parses a profile document into rules.
pub fn parse_profile(json: &str) -> serde_json::Result<Vec<MappingRule>> {
    let records: Vec<RuleRecord> = serde_json::from_str(json)?;
    Ok(records.into_iter().map(MappingRule::from).collect())
}

/// Renders rules as a pretty-printed profile document.
pub fn render_profile(rules: &[MappingRule]) -> serde_json::Result<String> {
    let records: Vec<RuleRecord> = rules.iter().map(RuleRecord::from).collect();
    serde_json::to_string_pretty(&records)
}
