//! Foreground application tracking.
//!
//! The focus watcher replaces the snapshot whenever the foreground window
//! changes; the dispatcher reads it on every event without taking a lock.

use std::sync::atomic::Ordering;

use scc::{AtomicShared, Guard, Shared, Tag};

/// The foreground process name and window title.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppContext {
    pub process_name: String,
    pub window_title: String,
}

impl AppContext {
    pub fn new(process_name: impl Into<String>, window_title: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
            window_title: window_title.into(),
        }
    }
}

/// Latest-wins holder for the current `AppContext`.
pub struct ContextTracker {
    current: AtomicShared<AppContext>,
}

impl Default for ContextTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextTracker {
    pub fn new() -> Self {
        Self {
            current: AtomicShared::from(Shared::new(AppContext::default())),
        }
    }

    /// Publishes a new foreground context. Returns `false` when it equals the
    /// current one.
    pub fn update(&self, context: AppContext) -> bool {
        {
            let guard = Guard::new();
            if let Some(current) = self.current.load(Ordering::Acquire, &guard).as_ref()
                && *current == context
            {
                return false;
            }
        }
        let _ = self
            .current
            .swap((Some(Shared::new(context)), Tag::None), Ordering::Release);
        true
    }

    /// Runs `f` against the current context without copying it.
    #[inline]
    pub fn with<R>(&self, f: impl FnOnce(&AppContext) -> R) -> R {
        let guard = Guard::new();
        match self.current.load(Ordering::Acquire, &guard).as_ref() {
            Some(context) => f(context),
            None => f(&AppContext::default()),
        }
    }

    pub fn snapshot(&self) -> AppContext {
        self.with(AppContext::clone)
    }

    pub fn process_name(&self) -> String {
        self.with(|context| context.process_name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_default_context_is_empty() {
        let tracker = ContextTracker::new();
        assert_eq!(tracker.snapshot(), AppContext::default());
    }

    #[test]
    fn test_update_replaces_snapshot() {
        let tracker = ContextTracker::new();
        assert!(tracker.update(AppContext::new("code.exe", "main.rs")));
        assert!(!tracker.update(AppContext::new("code.exe", "main.rs")));
        assert!(tracker.update(AppContext::new("chrome.exe", "Docs")));

        assert_eq!(tracker.process_name(), "chrome.exe");
        tracker.with(|ctx| assert_eq!(ctx.window_title, "Docs"));
    }

    #[test]
    fn test_concurrent_readers_see_whole_snapshots() {
        let tracker = Arc::new(ContextTracker::new());
        let writer = {
            let tracker = tracker.clone();
            thread::spawn(move || {
                for i in 0..200 {
                    tracker.update(AppContext::new(format!("app{i}.exe"), format!("title{i}")));
                }
            })
        };

        for _ in 0..200 {
            tracker.with(|ctx| {
                let app = ctx.process_name.trim_start_matches("app").trim_end_matches(".exe");
                let title = ctx.window_title.trim_start_matches("title");
                assert_eq!(app, title);
            });
        }
        writer.join().unwrap();
    }
}
