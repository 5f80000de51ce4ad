use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use std::{fs, path::Path};

use crate::engine::EngineSettings;
use crate::gesture::GestureTiming;
use crate::mapping::ProfileSlots;

pub const DEFAULT_CONFIG_FILE: &str = "Config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub last_port: String,
    #[serde(default)]
    pub last_profile: String,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    #[serde(default = "default_true")]
    pub app_switching: bool,
    #[serde(default = "default_true")]
    pub velocity_zones: bool,
    #[serde(default)]
    pub minimize_to_tray: bool,
    #[serde(default)]
    pub ai_api_key: String,
    #[serde(default = "default_prompt_template")]
    pub ai_prompt_template: String,
    #[serde(default = "default_chord_window")]
    pub chord_window_ms: u64,
    #[serde(default = "default_gesture_window")]
    pub gesture_window_ms: u64,
    #[serde(default = "default_hold_threshold")]
    pub hold_threshold_ms: u64,
    #[serde(default = "default_learn_grace")]
    pub learn_grace_ms: u64,
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub profile_slots: Vec<String>,
    /// Process name -> profile path, loaded when that process gains focus.
    #[serde(default)]
    pub app_bindings: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}
fn default_prompt_template() -> String {
    "{prompt}".to_string()
}
fn default_chord_window() -> u64 {
    60
}
fn default_gesture_window() -> u64 {
    300
}
fn default_hold_threshold() -> u64 {
    800
}
fn default_learn_grace() -> u64 {
    200
}
fn default_reconnect_interval() -> u64 {
    3000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            last_port: String::new(),
            last_profile: String::new(),
            auto_reconnect: true,
            app_switching: true,
            velocity_zones: true,
            minimize_to_tray: false,
            ai_api_key: String::new(),
            ai_prompt_template: default_prompt_template(),
            chord_window_ms: default_chord_window(),
            gesture_window_ms: default_gesture_window(),
            hold_threshold_ms: default_hold_threshold(),
            learn_grace_ms: default_learn_grace(),
            reconnect_interval_ms: default_reconnect_interval(),
            log_level: default_log_level(),
            profile_slots: Vec::new(),
            app_bindings: BTreeMap::new(),
        }
    }
}

/// TOML string literal with escaping.
fn quote(s: &str) -> String {
    toml::Value::String(s.to_string()).to_string()
}

impl AppConfig {
    /// Load config from file, or create default if not exists
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if !path.as_ref().exists() {
            let default_config = Self::default();
            default_config.save_to_file(&path)?;
            return Ok(default_config);
        }
        Self::load_from_file(path)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut config: AppConfig = toml::from_str(&content)?;
        config.validate();
        Ok(config)
    }

    /// Clamps timings into workable ranges.
    pub fn validate(&mut self) {
        self.chord_window_ms = self.chord_window_ms.clamp(10, 1000);
        self.gesture_window_ms = self.gesture_window_ms.clamp(50, 2000);
        if self.hold_threshold_ms < self.gesture_window_ms {
            self.hold_threshold_ms = self.gesture_window_ms;
        }
        self.learn_grace_ms = self.learn_grace_ms.min(5000);
        if self.reconnect_interval_ms < 500 {
            self.reconnect_interval_ms = 500;
        }
        if self.ai_prompt_template.is_empty() {
            self.ai_prompt_template = default_prompt_template();
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let mut result = format!(
            "last_port = {}          # MIDI input reconnected on start\n\
             last_profile = {}       # Profile loaded on start\n\
             auto_reconnect = {}      # Reconnect when the last port reappears\n\
             app_switching = {}       # Load bound profiles when the foreground app changes\n\
             velocity_zones = {}      # Enforce soft/hard velocity zones on note rules\n\
             minimize_to_tray = {}   # Front-end hint, not used by the engine\n\
             ai_api_key = {}\n\
             ai_prompt_template = {}  # {{prompt}} is replaced with the rule's prompt\n\n\
             # Timing (ms)\n\
             chord_window_ms = {}        # Notes closer than this form a chord\n\
             gesture_window_ms = {}     # Double-tap window\n\
             hold_threshold_ms = {}     # Minimum press length for a long hold\n\
             learn_grace_ms = {}        # MIDI ignored right after learn starts\n\
             reconnect_interval_ms = {}\n\n\
             log_level = {}    # tracing filter, overridden by RUST_LOG\n\n",
            quote(&self.last_port),
            quote(&self.last_profile),
            self.auto_reconnect,
            self.app_switching,
            self.velocity_zones,
            self.minimize_to_tray,
            quote(&self.ai_api_key),
            quote(&self.ai_prompt_template),
            self.chord_window_ms,
            self.gesture_window_ms,
            self.hold_threshold_ms,
            self.learn_grace_ms,
            self.reconnect_interval_ms,
            quote(&self.log_level),
        );

        result.push_str("# Profile files addressable by profile-switch rules (slot 0 first)\n");
        let slots: Vec<String> = self.profile_slots.iter().map(|s| quote(s)).collect();
        result.push_str(&format!("profile_slots = [{}]\n\n", slots.join(", ")));

        result.push_str("# Per-application profiles: \"process.exe\" = \"profile.json\"\n");
        result.push_str("[app_bindings]\n");
        for (app, profile) in &self.app_bindings {
            result.push_str(&format!("{} = {}\n", quote(app), quote(profile)));
        }

        fs::write(path, result)?;
        Ok(())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            timing: GestureTiming {
                chord_window: Duration::from_millis(self.chord_window_ms),
                gesture_window: Duration::from_millis(self.gesture_window_ms),
                hold_threshold: Duration::from_millis(self.hold_threshold_ms),
            },
            learn_grace: Duration::from_millis(self.learn_grace_ms),
            velocity_zones: self.velocity_zones,
        }
    }

    pub fn profile_slots(&self) -> ProfileSlots {
        ProfileSlots::new(self.profile_slots.iter().map(PathBuf::from).collect())
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

}
