//! Mapping rules and the ordered, persistent rule store.

mod profile;
mod tests;
mod types;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::{Error, Result};

pub use profile::{RuleRecord, parse_profile, render_profile};
pub use types::*;

/// Ordered collection of mapping rules.
///
/// Readers take a cheap `Arc` snapshot and iterate without holding the lock;
/// writers copy-on-write under the single store mutex.
#[derive(Debug, Default)]
pub struct MappingStore {
    rules: Mutex<Arc<Vec<MappingRule>>>,
}

impl MappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<MappingRule>) -> Self {
        let store = Self::new();
        store.replace(rules);
        store
    }

    /// Appends a rule, returning its index.
    pub fn add(&self, mut rule: MappingRule) -> Result<usize> {
        rule.normalize();
        rule.validate().map_err(Error::InvalidRule)?;

        let mut rules = self.rules.lock();
        let rules = Arc::make_mut(&mut rules);
        rules.push(rule);
        Ok(rules.len() - 1)
    }

    /// Applies a sparse patch to the rule at `index`.
    pub fn update(&self, index: usize, patch: RulePatch) -> Result<()> {
        let mut rules = self.rules.lock();
        let len = rules.len();
        let Some(current) = rules.get(index) else {
            return Err(Error::IndexOutOfRange { index, len });
        };

        let mut edited = current.clone();
        patch.apply_to(&mut edited);
        edited.normalize();
        edited.validate().map_err(Error::InvalidRule)?;

        Arc::make_mut(&mut rules)[index] = edited;
        Ok(())
    }

    pub fn remove_at(&self, index: usize) -> Result<MappingRule> {
        let mut rules = self.rules.lock();
        let len = rules.len();
        if index >= len {
            return Err(Error::IndexOutOfRange { index, len });
        }
        Ok(Arc::make_mut(&mut rules).remove(index))
    }

    pub fn clear(&self) {
        *self.rules.lock() = Arc::new(Vec::new());
    }

    /// Swaps the whole rule set.
    pub fn replace(&self, mut rules: Vec<MappingRule>) {
        for rule in &mut rules {
            rule.normalize();
        }
        *self.rules.lock() = Arc::new(rules);
    }

    /// Cloned copy of the rules, for display.
    pub fn list(&self) -> Vec<MappingRule> {
        self.snapshot().as_ref().clone()
    }

    /// Shared view of the current rules.
    #[inline]
    pub fn snapshot(&self) -> Arc<Vec<MappingRule>> {
        Arc::clone(&self.rules.lock())
    }

    pub fn len(&self) -> usize {
        self.rules.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replaces the store with the profile at `path`. On any failure the
    /// current rules stay untouched.
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let path = path.as_ref();
        let rules = fs::read_to_string(path)
            .map_err(Error::from)
            .and_then(|content| parse_profile(&content).map_err(Error::from));

        match rules {
            Ok(rules) => {
                let count = rules.len();
                self.replace(rules);
                info!(path = %path.display(), count, "Profile loaded");
                Ok(count)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Profile load failed");
                Err(e)
            }
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let snapshot = self.snapshot();
        let json = render_profile(&snapshot)?;
        fs::write(path, json)?;
        info!(path = %path.display(), count = snapshot.len(), "Profile saved");
        Ok(())
    }
}

/// Profile files addressable by slot index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileSlots {
    paths: Vec<PathBuf>,
}

impl ProfileSlots {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    pub fn get(&self, slot: usize) -> Option<&Path> {
        self.paths.get(slot).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}
