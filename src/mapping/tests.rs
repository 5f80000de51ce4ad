//! Unit tests for the mapping store and profile format.

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use crate::context::AppContext;
    use crate::error::Error;
    use crate::keys::{KeyCombo, Modifiers};
    use crate::mapping::*;

    fn temp_profile(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "miditypist_mapping_test_{}_{}.json",
            name,
            std::process::id()
        ));
        path
    }

    fn ctrl(vk: u16) -> KeyCombo {
        KeyCombo::new(vk, Modifiers::CTRL)
    }

    #[test]
    fn test_add_normalizes_chord_notes() {
        let store = MappingStore::new();
        let mut rule = MappingRule::chord(&[], ctrl(0x41));
        rule.chord_notes = [67, 60, 64, 60].into_iter().collect();
        store.add(rule).unwrap();

        assert_eq!(store.list()[0].chord_notes.as_slice(), &[60, 64, 67]);
    }

    #[test]
    fn test_add_rejects_single_note_chord() {
        let store = MappingStore::new();
        let result = store.add(MappingRule::chord(&[60, 60], ctrl(0x41)));
        assert!(matches!(result, Err(Error::InvalidRule(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_is_sparse() {
        let store = MappingStore::new();
        let mut rule = MappingRule::note(60, ctrl(0x43));
        rule.app_pattern = "code.exe".to_string();
        store.add(rule).unwrap();

        store
            .update(
                0,
                RulePatch {
                    velocity_zone: Some(VelocityZone::Hard),
                    ..RulePatch::default()
                },
            )
            .unwrap();

        let rule = &store.list()[0];
        assert_eq!(rule.velocity_zone, VelocityZone::Hard);
        assert_eq!(rule.app_pattern, "code.exe");
        assert_eq!(rule.key, ctrl(0x43));
        assert_eq!(rule.number, 60);
    }

    #[test]
    fn test_update_clears_profile_switch() {
        let store = MappingStore::new();
        let mut rule = MappingRule::note(36, KeyCombo::default());
        rule.profile_switch = Some(2);
        store.add(rule).unwrap();

        store
            .update(
                0,
                RulePatch {
                    profile_switch: Some(None),
                    ..RulePatch::default()
                },
            )
            .unwrap();
        assert_eq!(store.list()[0].profile_switch, None);
    }

    #[test]
    fn test_index_out_of_range() {
        let store = MappingStore::new();
        store.add(MappingRule::note(60, ctrl(0x41))).unwrap();

        assert!(matches!(
            store.remove_at(3),
            Err(Error::IndexOutOfRange { index: 3, len: 1 })
        ));
        assert!(store.update(1, RulePatch::default()).is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove_and_clear() {
        let store = MappingStore::new();
        store.add(MappingRule::note(60, ctrl(0x41))).unwrap();
        store.add(MappingRule::note(62, ctrl(0x42))).unwrap();
        store.add(MappingRule::note(64, ctrl(0x43))).unwrap();

        let removed = store.remove_at(1).unwrap();
        assert_eq!(removed.number, 62);
        let numbers: Vec<u8> = store.list().iter().map(|r| r.number).collect();
        assert_eq!(numbers, vec![60, 64]);

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_snapshot_is_stable_across_writes() {
        let store = MappingStore::new();
        store.add(MappingRule::note(60, ctrl(0x41))).unwrap();
        let snapshot = store.snapshot();

        store.add(MappingRule::note(61, ctrl(0x42))).unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_save_load_round_trip() {
        let path = temp_profile("round_trip");
        let store = MappingStore::new();

        let mut note = MappingRule::note(60, KeyCombo::new(0x43, Modifiers::CTRL | Modifiers::SHIFT));
        note.velocity_zone = VelocityZone::Soft;
        note.velocity_min = 10;
        note.title_pattern = "Untitled".to_string();
        store.add(note).unwrap();
        store
            .add(MappingRule::chord(&[67, 64, 60], KeyCombo::new(0x09, Modifiers::ALT)))
            .unwrap();
        store
            .add(MappingRule::control(1, CcAction::Scroll, KeyCombo::default()))
            .unwrap();
        let mut macro_rule = MappingRule::note(48, KeyCombo::default());
        macro_rule.kind = TriggerKind::Macro;
        macro_rule.gesture = Gesture::DoubleTap;
        macro_rule.macro_text = "héllo\n".to_string();
        store.add(macro_rule).unwrap();
        let mut switch = MappingRule::note(36, KeyCombo::default());
        switch.profile_switch = Some(0);
        store.add(switch).unwrap();

        store.save(&path).unwrap();

        let loaded = MappingStore::new();
        assert_eq!(loaded.load(&path).unwrap(), 5);
        assert_eq!(loaded.list(), store.list());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_round_trip_after_kind_edit() {
        let path = temp_profile("kind_edit");
        let store = MappingStore::new();
        store.add(MappingRule::chord(&[64, 60], ctrl(0x41))).unwrap();
        store
            .update(
                0,
                RulePatch {
                    kind: Some(TriggerKind::Note),
                    number: Some(60),
                    ..RulePatch::default()
                },
            )
            .unwrap();
        assert!(store.list()[0].chord_notes.is_empty());

        store.save(&path).unwrap();
        let loaded = MappingStore::new();
        loaded.load(&path).unwrap();
        assert_eq!(loaded.list(), store.list());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_non_chord_rules_drop_chord_notes() {
        let mut rule = MappingRule::note(60, ctrl(0x41));
        rule.chord_notes = [60, 64].into_iter().collect();

        let store = MappingStore::new();
        store.add(rule.clone()).unwrap();
        assert!(store.list()[0].chord_notes.is_empty());

        store.replace(vec![rule]);
        assert!(store.list()[0].chord_notes.is_empty());
    }

    #[test]
    fn test_virtual_key_out_of_range_rejected() {
        let store = MappingStore::new();
        let result = store.add(MappingRule::note(60, KeyCombo::new(0x100, Modifiers::NONE)));
        assert!(matches!(result, Err(Error::InvalidRule(_))));

        store.add(MappingRule::note(60, ctrl(0x41))).unwrap();
        let result = store.update(
            0,
            RulePatch {
                key: Some(KeyCombo::new(0x1FF, Modifiers::NONE)),
                ..RulePatch::default()
            },
        );
        assert!(matches!(result, Err(Error::InvalidRule(_))));
        assert_eq!(store.list()[0].key, ctrl(0x41));
    }

    #[test]
    fn test_load_failure_leaves_store_untouched() {
        let path = temp_profile("corrupt");
        fs::write(&path, "[{\"midi_type\": 0, ").unwrap();

        let store = MappingStore::new();
        store.add(MappingRule::note(60, ctrl(0x41))).unwrap();

        assert!(matches!(store.load(&path), Err(Error::ProfileParse(_))));
        assert_eq!(store.len(), 1);
        assert_eq!(store.list()[0].number, 60);

        let missing = temp_profile("does_not_exist");
        assert!(matches!(store.load(&missing), Err(Error::Io(_))));
        assert_eq!(store.len(), 1);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_parse_profile_defaults_missing_and_unknown_fields() {
        let rules = parse_profile(r#"[{"midi_num": 61, "midi_type": 42, "extra": true}]"#).unwrap();
        let rule = &rules[0];
        assert_eq!(rule.kind, TriggerKind::Note);
        assert_eq!(rule.number, 61);
        assert_eq!(rule.velocity_min, 1);
        assert_eq!(rule.profile_switch, None);
        assert_eq!(rule.gesture, Gesture::Any);
        assert_eq!(rule.velocity_zone, VelocityZone::Any);
    }

    #[test]
    fn test_parse_profile_normalizes_chords() {
        let rules = parse_profile(
            r#"[{"midi_type": 2, "midi_chord": [67, 60, 64, 60], "key_vk": 65, "modifiers": 5}]"#,
        )
        .unwrap();
        assert_eq!(rules[0].chord_notes.as_slice(), &[60, 64, 67]);
        assert_eq!(rules[0].key, KeyCombo::new(65, Modifiers::CTRL | Modifiers::ALT));
    }

    #[test]
    fn test_record_writes_profile_switch_sentinel() {
        let rule = MappingRule::note(60, ctrl(0x41));
        let record = RuleRecord::from(&rule);
        assert_eq!(record.profile_switch, -1);
        assert!(record.midi_chord.is_empty());
    }

    #[test]
    fn test_profile_switch_wins_over_key_action() {
        let mut rule = MappingRule::note(36, ctrl(0x41));
        rule.profile_switch = Some(1);
        assert_eq!(rule.action(), RuleAction::ProfileSwitch(1));
        rule.profile_switch = None;
        assert_eq!(rule.action(), RuleAction::Key(ctrl(0x41)));
    }

    #[test]
    fn test_context_match_is_case_sensitive_substring() {
        let mut rule = MappingRule::note(60, ctrl(0x41));
        rule.app_pattern = "chrome.exe".to_string();

        let ctx = |app: &str| AppContext::new(app, "Some Window");
        assert!(!rule.matches_context(&ctx("notepad.exe")));
        assert!(rule.matches_context(&ctx("chrome.exe")));
        assert!(rule.matches_context(&ctx("googlechrome.exe")));
        assert!(!rule.matches_context(&ctx("Chrome.exe")));

        rule.app_pattern.clear();
        rule.title_pattern = "Window".to_string();
        assert!(rule.matches_context(&ctx("anything.exe")));
        rule.title_pattern = "Other".to_string();
        assert!(!rule.matches_context(&ctx("anything.exe")));
    }

    #[test]
    fn test_velocity_gating() {
        let mut rule = MappingRule::note(60, ctrl(0x41));
        rule.velocity_zone = VelocityZone::Soft;
        rule.velocity_min = 20;

        assert!(rule.accepts_velocity(50, true));
        assert!(!rule.accepts_velocity(100, true));
        assert!(rule.accepts_velocity(100, false));
        assert!(!rule.accepts_velocity(10, false));
    }

    #[test]
    fn test_rule_description() {
        let mut rule = MappingRule::note(60, ctrl(0x43));
        rule.velocity_zone = VelocityZone::Soft;
        assert_eq!(rule.to_string(), "Note 60 -> Ctrl+C [soft]");

        let chord = MappingRule::chord(&[64, 60, 67], KeyCombo::new(0x09, Modifiers::ALT));
        assert_eq!(chord.to_string(), "Chord [60,64,67] -> Alt+TAB");

        let mut switch = MappingRule::note(36, KeyCombo::default());
        switch.profile_switch = Some(1);
        assert_eq!(switch.to_string(), "Note 36 -> [Profile #2]");

        let scroll = MappingRule::control(7, CcAction::Scroll, KeyCombo::default());
        assert_eq!(scroll.to_string(), "CC 7 -> Scroll");
    }
}
