//! The control thread.
//!
//! Everything that mutates engine state funnels through one channel: MIDI
//! events from the driver callback, focus changes, captured keys and front
//! end commands. The loop sleeps until the next input or the engine's next
//! deadline, so chord and gesture timers never block the MIDI callback.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::context::{AppContext, ContextTracker};
use crate::engine::{Engine, HostRequest};
use crate::keys::Modifiers;
use crate::mapping::{MappingRule, MappingStore, RulePatch};
use crate::midi::{MidiInputManager, TimedMidiEvent, list_input_ports};
use crate::notify::{LogCategory, Notification, Notifier};
use crate::simulator::InputSimulator;

/// Requests from a front end.
#[derive(Debug, Clone)]
pub enum Command {
    RefreshPorts,
    Connect(String),
    Disconnect,
    StartLearn,
    CancelLearn,
    AddMapping(MappingRule),
    UpdateMapping { index: usize, patch: RulePatch },
    DeleteMapping(usize),
    ClearMappings,
    LoadProfile(PathBuf),
    SaveProfile(PathBuf),
    AssignSlot { slot: usize, path: PathBuf },
    /// Bind the current foreground process to a profile file.
    BindCurrentApp(PathBuf),
    UpdateConfig(Box<AppConfig>),
    SimulateText(String),
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum ServiceInput {
    Midi(TimedMidiEvent),
    /// Foreground changed; the tracker already holds the new snapshot.
    Focus(AppContext),
    /// Keyboard key seen while learn mode waits for an action key.
    Key { vk: u16, modifiers: Modifiers },
    Command(Command),
}

/// Cloneable sender into the control thread.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    sender: Sender<ServiceInput>,
}

impl ServiceHandle {
    pub fn send(&self, input: ServiceInput) -> bool {
        self.sender.send(input).is_ok()
    }

    pub fn command(&self, command: Command) -> bool {
        self.send(ServiceInput::Command(command))
    }

    pub fn sender(&self) -> Sender<ServiceInput> {
        self.sender.clone()
    }
}

pub struct Service {
    engine: Engine,
    config: AppConfig,
    config_path: PathBuf,
    midi: MidiInputManager,
    simulator: InputSimulator,
    notifier: Notifier,
    inputs: Receiver<ServiceInput>,
    handle: ServiceHandle,
    /// Process whose bound profile was loaded last.
    last_auto_app: Option<String>,
    /// Set by an explicit disconnect; auto-reconnect waits for a new connect.
    user_disconnected: bool,
    next_reconnect: Instant,
    #[cfg(windows)]
    key_capture: Option<crate::keyboard::KeyCaptureHook>,
}

impl Service {
    pub fn new(
        config: AppConfig,
        config_path: impl Into<PathBuf>,
        context: Arc<ContextTracker>,
        simulator: InputSimulator,
        notifier: Notifier,
    ) -> Self {
        let (sender, inputs) = unbounded();
        let store = Arc::new(MappingStore::new());
        let mut engine = Engine::new(
            store,
            context,
            simulator.clone(),
            notifier.clone(),
            config.engine_settings(),
        );
        engine.set_profile_slots(config.profile_slots());

        Self {
            engine,
            next_reconnect: Instant::now() + config.reconnect_interval(),
            config,
            config_path: config_path.into(),
            midi: MidiInputManager::new(),
            simulator,
            notifier,
            inputs,
            handle: ServiceHandle { sender },
            last_auto_app: None,
            user_disconnected: false,
            #[cfg(windows)]
            key_capture: None,
        }
    }

    pub fn handle(&self) -> ServiceHandle {
        self.handle.clone()
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<MappingStore> {
        self.engine.store()
    }

    /// Restores the last profile and port.
    pub fn startup(&mut self) {
        if !self.config.last_profile.is_empty() {
            let path = PathBuf::from(&self.config.last_profile);
            self.load_profile(&path);
        }
        self.refresh_ports();
        if !self.config.last_port.is_empty() {
            let port = self.config.last_port.clone();
            self.connect(&port);
        }
        self.notifier.status("Ready");
    }

    /// Runs until `Shutdown` or until every handle is dropped.
    pub fn run(mut self) {
        info!("Control loop started");
        loop {
            let deadline = match self.engine.next_deadline() {
                Some(due) => due.min(self.next_reconnect),
                None => self.next_reconnect,
            };
            match self.inputs.recv_deadline(deadline) {
                Ok(input) => {
                    if self.handle_input(input).is_break() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            let now = Instant::now();
            self.poll(now);
            if now >= self.next_reconnect {
                self.reconnect_tick();
                self.next_reconnect = now + self.config.reconnect_interval();
            }
        }
        self.shutdown();
    }

    /// Fires due timers and serves whatever the engine asked of the host.
    pub fn poll(&mut self, now: Instant) {
        self.engine.poll_timers(now);
        self.serve_requests();
        self.sync_key_capture();
    }

    pub fn handle_input(&mut self, input: ServiceInput) -> ControlFlow<()> {
        match input {
            ServiceInput::Midi(timed) => self.engine.handle_event(timed.event, timed.at),
            ServiceInput::Focus(context) => self.on_focus(context),
            ServiceInput::Key { vk, modifiers } => {
                self.engine.capture_key(vk, modifiers);
            }
            ServiceInput::Command(Command::Shutdown) => return ControlFlow::Break(()),
            ServiceInput::Command(command) => self.on_command(command),
        }
        self.serve_requests();
        self.sync_key_capture();
        ControlFlow::Continue(())
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::RefreshPorts => self.refresh_ports(),
            Command::Connect(port) => {
                self.user_disconnected = false;
                self.connect(&port);
            }
            Command::Disconnect => {
                self.user_disconnected = true;
                self.disconnect("Disconnected.");
            }
            Command::StartLearn => {
                self.engine.start_learn(Instant::now());
            }
            Command::CancelLearn => {
                self.engine.cancel_learn();
            }
            Command::AddMapping(rule) => {
                let description = rule.to_string();
                match self.store().add(rule) {
                    Ok(_) => {
                        self.notifier
                            .log(LogCategory::Mapping, format!("Added: {}", description));
                        self.publish_mappings();
                    }
                    Err(e) => self
                        .notifier
                        .log(LogCategory::Error, format!("Could not add mapping: {}", e)),
                }
            }
            Command::UpdateMapping { index, patch } => match self.store().update(index, patch) {
                Ok(()) => self.publish_mappings(),
                Err(e) => self
                    .notifier
                    .log(LogCategory::Error, format!("Could not update mapping: {}", e)),
            },
            Command::DeleteMapping(index) => match self.store().remove_at(index) {
                Ok(rule) => {
                    self.notifier
                        .log(LogCategory::Mapping, format!("Deleted: {}", rule));
                    self.publish_mappings();
                }
                Err(e) => self
                    .notifier
                    .log(LogCategory::Error, format!("Could not delete mapping: {}", e)),
            },
            Command::ClearMappings => {
                self.store().clear();
                self.notifier.log(LogCategory::Mapping, "All mappings cleared");
                self.publish_mappings();
            }
            Command::LoadProfile(path) => {
                self.load_profile(&path);
            }
            Command::SaveProfile(path) => self.save_profile(&path),
            Command::AssignSlot { slot, path } => {
                if slot >= self.config.profile_slots.len() {
                    self.config.profile_slots.resize(slot + 1, String::new());
                }
                self.config.profile_slots[slot] = path.to_string_lossy().into_owned();
                self.engine.set_profile_slots(self.config.profile_slots());
                self.notifier.log(
                    LogCategory::System,
                    format!("Profile #{} -> {}", slot + 1, path.display()),
                );
                self.save_config();
            }
            Command::BindCurrentApp(path) => {
                let app = self.engine.context().process_name();
                if app.is_empty() {
                    self.notifier
                        .log(LogCategory::Warning, "No foreground application to bind");
                    return;
                }
                let profile = path.to_string_lossy().into_owned();
                self.notifier.log(
                    LogCategory::System,
                    format!("Bound {} -> {}", app, profile),
                );
                self.config.app_bindings.insert(app, profile);
                self.save_config();
            }
            Command::UpdateConfig(config) => {
                let mut config = *config;
                config.validate();
                self.engine.set_settings(config.engine_settings());
                self.engine.set_profile_slots(config.profile_slots());
                self.config = config;
                self.save_config();
            }
            Command::SimulateText(text) => {
                self.simulator.type_text(&text);
            }
            Command::Shutdown => {}
        }
    }

    fn on_focus(&mut self, context: AppContext) {
        self.notifier.send(Notification::AppChanged {
            process_name: context.process_name.clone(),
            window_title: context.window_title.clone(),
        });
        if !self.config.app_switching {
            return;
        }
        let Some(profile) = self.config.app_bindings.get(&context.process_name).cloned() else {
            return;
        };
        if self.last_auto_app.as_deref() == Some(context.process_name.as_str()) {
            return;
        }
        self.notifier.log(
            LogCategory::System,
            format!("Auto-switching profile for {}", context.process_name),
        );
        if self.load_profile(Path::new(&profile)) {
            self.last_auto_app = Some(context.process_name);
        }
    }

    fn serve_requests(&mut self) {
        for request in self.engine.drain_requests() {
            match request {
                HostRequest::SwitchProfile(slot) => {
                    let Some(path) = self.engine.profile_slots().get(slot).map(Path::to_path_buf)
                    else {
                        continue;
                    };
                    if path.as_os_str().is_empty() {
                        self.notifier.log(
                            LogCategory::Warning,
                            format!("Profile #{} has no file assigned", slot + 1),
                        );
                        continue;
                    }
                    self.load_profile(&path);
                }
            }
        }
    }

    /// Replaces the store from `path`. A failure leaves the rules as they
    /// were and is reported as a log line.
    fn load_profile(&mut self, path: &Path) -> bool {
        match self.store().load(path) {
            Ok(count) => {
                let name = path.to_string_lossy().into_owned();
                self.notifier.log(
                    LogCategory::System,
                    format!("Loaded profile: {} ({} mappings)", name, count),
                );
                self.publish_mappings();
                self.notifier
                    .send(Notification::ProfileChanged { path: name.clone() });
                if self.config.last_profile != name {
                    self.config.last_profile = name;
                    self.save_config();
                }
                true
            }
            Err(e) => {
                self.notifier.log(
                    LogCategory::Error,
                    format!("Failed to load profile {}: {}", path.display(), e),
                );
                false
            }
        }
    }

    fn save_profile(&mut self, path: &Path) {
        match self.store().save(path) {
            Ok(()) => {
                let name = path.to_string_lossy().into_owned();
                self.notifier
                    .log(LogCategory::System, format!("Saved profile: {}", name));
                self.config.last_profile = name;
                self.save_config();
            }
            Err(e) => self.notifier.log(
                LogCategory::Error,
                format!("Failed to save profile {}: {}", path.display(), e),
            ),
        }
    }

    fn publish_mappings(&self) {
        self.notifier.send(Notification::Mappings(self.store().list()));
    }

    fn save_config(&self) {
        if let Err(e) = self.config.save_to_file(&self.config_path) {
            warn!(path = %self.config_path.display(), error = %e, "Failed to save configuration");
        }
    }

    fn refresh_ports(&self) {
        match list_input_ports() {
            Ok(ports) => {
                debug!(count = ports.len(), "MIDI ports scanned");
                self.notifier.send(Notification::Ports(ports));
            }
            Err(e) => self
                .notifier
                .log(LogCategory::Error, format!("Could not list MIDI ports: {}", e)),
        }
    }

    fn connect(&mut self, port: &str) -> bool {
        self.engine.cancel_pending();
        let sender = self.handle.sender();
        let result = self.midi.connect(port, move |event| {
            let _ = sender.send(ServiceInput::Midi(event));
        });
        match result {
            Ok(()) => {
                self.notifier
                    .log(LogCategory::System, format!("Connected to: {}", port));
                self.notifier.status("Connected.");
                self.notifier.send(Notification::Connection {
                    connected: true,
                    port: Some(port.to_string()),
                });
                if self.config.last_port != port {
                    self.config.last_port = port.to_string();
                    self.save_config();
                }
                true
            }
            Err(e) => {
                self.notifier.log(
                    LogCategory::Error,
                    format!("Failed to connect to {}: {}", port, e),
                );
                false
            }
        }
    }

    /// Closes the port and cancels everything in flight.
    fn disconnect(&mut self, status: &str) {
        self.engine.cancel_pending();
        if self.midi.disconnect() {
            self.notifier.log(LogCategory::System, status);
        }
        self.notifier.status(status);
        self.notifier.send(Notification::Connection {
            connected: false,
            port: None,
        });
    }

    fn reconnect_tick(&mut self) {
        let ports = match list_input_ports() {
            Ok(ports) => ports,
            Err(e) => {
                debug!(error = %e, "Port scan failed");
                return;
            }
        };

        if let Some(current) = self.midi.port_name() {
            if !ports.iter().any(|p| p == current) {
                self.notifier
                    .log(LogCategory::Warning, format!("Device lost: {}", current));
                self.disconnect("Device lost. Waiting to reconnect...");
            }
            return;
        }

        if !self.config.auto_reconnect || self.user_disconnected || self.config.last_port.is_empty()
        {
            return;
        }
        let last_port = self.config.last_port.clone();
        if ports.contains(&last_port) {
            info!(port = %last_port, "Auto-reconnecting");
            if self.connect(&last_port) && !self.config.last_profile.is_empty() {
                let profile = PathBuf::from(&self.config.last_profile);
                self.load_profile(&profile);
            }
        }
    }

    #[cfg(windows)]
    fn sync_key_capture(&mut self) {
        use crate::keyboard::KeyCaptureHook;
        use crate::learn::LearnPhase;

        let wanted = matches!(self.engine.learn_phase(), LearnPhase::AwaitingAction { .. });
        match (wanted, self.key_capture.is_some()) {
            (true, false) => match KeyCaptureHook::start(self.handle.sender()) {
                Ok(hook) => self.key_capture = Some(hook),
                Err(e) => {
                    error!(error = %e, "Failed to install keyboard capture hook");
                    self.engine.cancel_learn();
                }
            },
            (false, true) => self.key_capture = None,
            _ => {}
        }
    }

    #[cfg(not(windows))]
    fn sync_key_capture(&mut self) {}

    fn shutdown(&mut self) {
        info!("Control loop stopping");
        self.engine.cancel_pending();
        self.midi.disconnect();
        #[cfg(windows)]
        {
            self.key_capture = None;
        }
        self.save_config();
        if self.inputs.is_empty() {
            return;
        }
        error!(pending = self.inputs.len(), "Inputs dropped at shutdown");
    }
}
