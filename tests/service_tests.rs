//! Control loop tests.
//!
//! Inputs are fed through `Service::handle_input` directly, so no MIDI
//! device or platform hook is needed.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Receiver;
use miditypist::config::AppConfig;
use miditypist::context::{AppContext, ContextTracker};
use miditypist::keys::{KeyCombo, Modifiers};
use miditypist::mapping::{MappingRule, MappingStore, RulePatch};
use miditypist::midi::{MidiEvent, TimedMidiEvent};
use miditypist::notify::{Notification, Notifier};
use miditypist::service::{Command, Service, ServiceInput};
use miditypist::simulator::{InputSimulator, RecordingSink, SyntheticInput};

fn get_test_file_path(name: &str, extension: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!(
        "miditypist_service_test_{}_{}.{}",
        name,
        std::process::id(),
        extension
    ));
    path
}

fn cleanup(paths: &[&Path]) {
    for path in paths {
        let _ = fs::remove_file(path);
    }
}

fn write_profile(path: &Path, rules: Vec<MappingRule>) {
    MappingStore::with_rules(rules)
        .save(path)
        .expect("Failed to write profile");
}

struct Fixture {
    service: Service,
    sink: Arc<RecordingSink>,
    notifications: Receiver<Notification>,
    context: Arc<ContextTracker>,
}

impl Fixture {
    fn new(config: AppConfig, config_path: &Path) -> Self {
        let context = Arc::new(ContextTracker::new());
        let sink = Arc::new(RecordingSink::new());
        let (notifier, notifications) = Notifier::channel();
        let service = Service::new(
            config,
            config_path,
            Arc::clone(&context),
            InputSimulator::new(sink.clone()),
            notifier,
        );
        Self {
            service,
            sink,
            notifications,
            context,
        }
    }

    fn midi(&mut self, event: MidiEvent) {
        let input = ServiceInput::Midi(TimedMidiEvent {
            at: Instant::now(),
            event,
        });
        assert!(self.service.handle_input(input).is_continue());
    }

    fn command(&mut self, command: Command) {
        assert!(self.service.handle_input(ServiceInput::Command(command)).is_continue());
    }

    fn drain(&self) -> Vec<Notification> {
        self.notifications.try_iter().collect()
    }
}

fn key(vk: u16) -> KeyCombo {
    KeyCombo::new(vk, Modifiers::NONE)
}

#[test]
fn test_profile_switch_rule_loads_slot() {
    let config_path = get_test_file_path("switch_config", "toml");
    let second = get_test_file_path("switch_second", "json");
    write_profile(&second, vec![MappingRule::note(60, key(0x42))]);

    let mut switch = MappingRule::note(36, KeyCombo::default());
    switch.profile_switch = Some(0);

    let config = AppConfig {
        profile_slots: vec![second.to_string_lossy().into_owned()],
        ..AppConfig::default()
    };
    let mut fixture = Fixture::new(config, &config_path);
    fixture.command(Command::AddMapping(switch));
    fixture.command(Command::AddMapping(MappingRule::note(60, key(0x41))));

    fixture.midi(MidiEvent::NoteOn {
        note: 36,
        velocity: 100,
    });

    let rules = fixture.service.store().list();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].key, key(0x42));
    assert!(fixture.sink.is_empty(), "profile switch must not type anything");
    assert_eq!(
        fixture.service.config().last_profile,
        second.to_string_lossy()
    );
    assert!(fixture.drain().iter().any(|n| matches!(
        n,
        Notification::ProfileChanged { path } if *path == second.to_string_lossy()
    )));

    cleanup(&[&config_path, &second]);
}

#[test]
fn test_unassigned_slot_keeps_rules() {
    let config_path = get_test_file_path("unassigned_config", "toml");
    let mut switch = MappingRule::note(36, KeyCombo::default());
    switch.profile_switch = Some(3);

    let mut fixture = Fixture::new(AppConfig::default(), &config_path);
    fixture.command(Command::AddMapping(switch));
    fixture.midi(MidiEvent::NoteOn {
        note: 36,
        velocity: 100,
    });

    assert_eq!(fixture.service.store().len(), 1);
    assert!(fixture.sink.is_empty());

    cleanup(&[&config_path]);
}

#[test]
fn test_focus_loads_bound_profile_once() {
    let config_path = get_test_file_path("focus_config", "toml");
    let bound = get_test_file_path("focus_bound", "json");
    write_profile(
        &bound,
        vec![
            MappingRule::note(60, key(0x43)),
            MappingRule::note(62, key(0x44)),
        ],
    );

    let mut config = AppConfig::default();
    config
        .app_bindings
        .insert("Code.exe".to_string(), bound.to_string_lossy().into_owned());
    let mut fixture = Fixture::new(config, &config_path);

    let code = AppContext::new("Code.exe", "main.rs");
    fixture.context.update(code.clone());
    fixture.service.handle_input(ServiceInput::Focus(code));
    assert_eq!(fixture.service.store().len(), 2);

    // Same app again: the user's edits since the switch are kept.
    fixture.command(Command::DeleteMapping(0));
    let code_again = AppContext::new("Code.exe", "lib.rs");
    fixture.context.update(code_again.clone());
    fixture.service.handle_input(ServiceInput::Focus(code_again));
    assert_eq!(fixture.service.store().len(), 1);

    // Case matters: "code.exe" has no binding.
    fixture
        .service
        .handle_input(ServiceInput::Focus(AppContext::new("code.exe", "")));
    assert_eq!(fixture.service.store().len(), 1);

    cleanup(&[&config_path, &bound]);
}

#[test]
fn test_app_switching_disabled_ignores_focus() {
    let config_path = get_test_file_path("no_switching_config", "toml");
    let bound = get_test_file_path("no_switching_bound", "json");
    write_profile(&bound, vec![MappingRule::note(60, key(0x43))]);

    let mut config = AppConfig {
        app_switching: false,
        ..AppConfig::default()
    };
    config
        .app_bindings
        .insert("Code.exe".to_string(), bound.to_string_lossy().into_owned());
    let mut fixture = Fixture::new(config, &config_path);

    fixture
        .service
        .handle_input(ServiceInput::Focus(AppContext::new("Code.exe", "")));
    assert!(fixture.service.store().is_empty());
    assert!(fixture.drain().iter().any(|n| matches!(
        n,
        Notification::AppChanged { process_name, .. } if process_name == "Code.exe"
    )));

    cleanup(&[&config_path, &bound]);
}

#[test]
fn test_bind_current_app_persists() {
    let config_path = get_test_file_path("bind_config", "toml");
    let mut fixture = Fixture::new(AppConfig::default(), &config_path);

    fixture.command(Command::BindCurrentApp(PathBuf::from("ignored.json")));
    assert!(fixture.service.config().app_bindings.is_empty());

    fixture.context.update(AppContext::new("Photoshop.exe", "Untitled-1"));
    fixture.command(Command::BindCurrentApp(PathBuf::from("photo.json")));

    let saved = AppConfig::load_from_file(&config_path).expect("Failed to reload config");
    assert_eq!(
        saved.app_bindings.get("Photoshop.exe").map(String::as_str),
        Some("photo.json")
    );

    cleanup(&[&config_path]);
}

#[test]
fn test_mapping_commands_round_trip_through_profile() {
    let config_path = get_test_file_path("commands_config", "toml");
    let profile = get_test_file_path("commands_profile", "json");
    let mut fixture = Fixture::new(AppConfig::default(), &config_path);

    fixture.command(Command::AddMapping(MappingRule::note(60, key(0x41))));
    fixture.command(Command::AddMapping(MappingRule::chord(&[64, 60], key(0x42))));
    fixture.command(Command::UpdateMapping {
        index: 0,
        patch: RulePatch {
            number: Some(61),
            ..RulePatch::default()
        },
    });
    // Out of range: reported, not applied.
    fixture.command(Command::DeleteMapping(9));
    fixture.command(Command::SaveProfile(profile.clone()));
    fixture.command(Command::ClearMappings);
    assert!(fixture.service.store().is_empty());

    fixture.command(Command::LoadProfile(profile.clone()));
    let rules = fixture.service.store().list();
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].number, 61);
    assert_eq!(rules[1].chord_notes.as_slice(), &[60, 64]);

    let saved = AppConfig::load_from_file(&config_path).expect("Failed to reload config");
    assert_eq!(saved.last_profile, profile.to_string_lossy());

    cleanup(&[&config_path, &profile]);
}

#[test]
fn test_missing_profile_keeps_rules() {
    let config_path = get_test_file_path("missing_config", "toml");
    let mut fixture = Fixture::new(AppConfig::default(), &config_path);
    fixture.command(Command::AddMapping(MappingRule::note(60, key(0x41))));

    fixture.command(Command::LoadProfile(get_test_file_path("does_not_exist", "json")));
    assert_eq!(fixture.service.store().len(), 1);
    assert!(fixture.service.config().last_profile.is_empty());

    cleanup(&[&config_path]);
}

#[test]
fn test_note_mapping_types_through_service() {
    let config_path = get_test_file_path("typing_config", "toml");
    let mut fixture = Fixture::new(AppConfig::default(), &config_path);
    fixture.command(Command::AddMapping(MappingRule::note(
        60,
        KeyCombo::new(0x43, Modifiers::CTRL),
    )));

    fixture.midi(MidiEvent::NoteOn {
        note: 60,
        velocity: 90,
    });
    fixture.midi(MidiEvent::NoteOff { note: 60 });

    assert_eq!(
        fixture.sink.take(),
        vec![
            SyntheticInput::Key { vk: 0x11, down: true },
            SyntheticInput::Key { vk: 0x43, down: true },
            SyntheticInput::Key { vk: 0x43, down: false },
            SyntheticInput::Key { vk: 0x11, down: false },
        ]
    );

    cleanup(&[&config_path]);
}

#[test]
fn test_update_config_applies_settings() {
    let config_path = get_test_file_path("update_config", "toml");
    let mut fixture = Fixture::new(AppConfig::default(), &config_path);

    let updated = AppConfig {
        chord_window_ms: 0,
        velocity_zones: false,
        ..AppConfig::default()
    };
    fixture.command(Command::UpdateConfig(Box::new(updated)));

    let settings = fixture.service.engine().settings();
    assert_eq!(settings.timing.chord_window.as_millis(), 10);
    assert!(!settings.velocity_zones);
    assert_eq!(fixture.service.config().chord_window_ms, 10);

    cleanup(&[&config_path]);
}

#[test]
fn test_simulate_text_and_shutdown() {
    let config_path = get_test_file_path("text_config", "toml");
    let mut fixture = Fixture::new(AppConfig::default(), &config_path);

    fixture.command(Command::SimulateText("hi".to_string()));
    assert_eq!(
        fixture.sink.take(),
        vec![SyntheticInput::Text('h'), SyntheticInput::Text('i')]
    );

    assert!(
        fixture
            .service
            .handle_input(ServiceInput::Command(Command::Shutdown))
            .is_break()
    );

    cleanup(&[&config_path]);
}
