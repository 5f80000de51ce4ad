use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use miditypist::config::{AppConfig, DEFAULT_CONFIG_FILE};
use miditypist::context::ContextTracker;
use miditypist::notify::{LogCategory, Notification, Notifier};
use miditypist::service::Service;
use miditypist::simulator::InputSimulator;

fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    // Load config or create default if not exists
    let config = AppConfig::load_or_create(&config_path)?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(config = %config_path.display(), "Starting");

    let (notifier, notifications) = Notifier::channel();
    thread::Builder::new()
        .name("notifications".to_string())
        .spawn(move || {
            for notification in notifications {
                report(notification);
            }
        })?;

    let context = Arc::new(ContextTracker::new());
    let mut service = Service::new(
        config,
        config_path,
        Arc::clone(&context),
        InputSimulator::platform(),
        notifier,
    );

    #[cfg(windows)]
    let _foreground = {
        miditypist::signal::set_control_ctrl_handler(service.handle().sender())?;
        match miditypist::foreground::ForegroundWatcher::start(context, service.handle().sender()) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(error = %e, "Per-application profiles disabled");
                None
            }
        }
    };
    #[cfg(not(windows))]
    {
        drop(context);
        warn!("No input injection or focus tracking on this platform; actions are only logged");
    }

    service.startup();
    service.run();
    info!("Stopped");
    Ok(())
}

/// Console front end: notifications become log lines.
fn report(notification: Notification) {
    match notification {
        Notification::Log { category, text } => match category {
            LogCategory::Error => error!(target: "miditypist::ui", "{}", text),
            LogCategory::Warning => warn!(target: "miditypist::ui", "{}", text),
            _ => info!(target: "miditypist::ui", ?category, "{}", text),
        },
        Notification::Status(text) => info!(target: "miditypist::ui", "Status: {}", text),
        Notification::Ports(ports) => {
            info!(target: "miditypist::ui", "MIDI inputs: {}", ports.join(", "))
        }
        Notification::Mappings(rules) => {
            info!(target: "miditypist::ui", count = rules.len(), "Mappings updated");
            for (index, rule) in rules.iter().enumerate() {
                info!(target: "miditypist::ui", "  {:>3}: {}", index, rule);
            }
        }
        Notification::AiPrompt(prompt) => {
            info!(target: "miditypist::ui", "AI prompt requested: {}", prompt)
        }
        other => tracing::debug!(target: "miditypist::ui", ?other),
    }
}
