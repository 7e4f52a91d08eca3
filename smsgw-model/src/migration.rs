//! Versioned record migration.
//!
//! Each step accepts records of exactly one version and produces exactly
//! one other version. Steps work on an isolated snapshot: the new record
//! starts empty and only what a step copies or sets is carried forward.
//!
//! Forward steps run on load, taking a stored record up to the model's
//! current version. Reverse steps run on store when a lower store version
//! is configured for the model (mixed-version rollouts), and on load if a
//! record was written by a newer release.

use crate::value::{Record, VERSION_KEY, version_label};
use crate::{ModelError, ModelResult};
use serde_json::{Map, Value as Json};
use std::collections::{BTreeMap, BTreeSet};

/// A single migration step.
pub type MigrationStep = fn(&mut MigrationData) -> ModelResult<()>;

#[derive(Clone, Copy)]
struct Step {
    target: Option<u32>,
    run: MigrationStep,
}

/// Snapshot handed to a migration step: the old record, read-only, and the
/// new record under construction.
#[derive(Debug)]
pub struct MigrationData {
    old_version: Option<u32>,
    new_version: Option<u32>,
    old: Record,
    new: Record,
}

impl MigrationData {
    fn new(old: Record, new_version: Option<u32>) -> Self {
        Self {
            old_version: old.version(),
            new_version,
            old,
            new: Record::new(),
        }
    }

    #[must_use]
    pub fn old_version(&self) -> Option<u32> {
        self.old_version
    }

    #[must_use]
    pub fn new_version(&self) -> Option<u32> {
        self.new_version
    }

    #[must_use]
    pub fn old_data(&self) -> &Map<String, Json> {
        &self.old.data
    }

    #[must_use]
    pub fn old_value(&self, key: &str) -> Option<&Json> {
        self.old.data.get(key)
    }

    /// Values written under `index` in the old record.
    #[must_use]
    pub fn old_index(&self, index: &str) -> Vec<String> {
        self.old.index_values(index).map(str::to_string).collect()
    }

    #[must_use]
    pub fn old_indexes(&self) -> &BTreeSet<(String, String)> {
        &self.old.indexes
    }

    #[must_use]
    pub fn new_data(&self) -> &Map<String, Json> {
        &self.new.data
    }

    pub fn set_value(&mut self, key: &str, value: impl Into<Json>) {
        self.new.data.insert(key.to_string(), value.into());
    }

    pub fn add_index(&mut self, index: &str, value: &str) {
        self.new.add_index(index, value);
    }

    /// Copies the listed keys unchanged. Keys absent from the old record are
    /// skipped.
    pub fn copy_values(&mut self, keys: &[&str]) {
        for key in keys {
            if let Some(value) = self.old.data.get(*key) {
                self.new.data.insert((*key).to_string(), value.clone());
            }
        }
    }

    /// Copies every key starting with one of `prefixes`.
    pub fn copy_dynamic_values(&mut self, prefixes: &[&str]) {
        for (key, value) in &self.old.data {
            if prefixes.iter().any(|p| key.starts_with(p)) {
                self.new.data.insert(key.clone(), value.clone());
            }
        }
    }

    /// Copies every entry of the listed indexes.
    pub fn copy_indexes(&mut self, indexes: &[&str]) {
        for (name, value) in &self.old.indexes {
            if indexes.contains(&name.as_str()) {
                self.new.indexes.insert((name.clone(), value.clone()));
            }
        }
    }

    fn finish(mut self) -> Record {
        self.new.data.remove(VERSION_KEY);
        self.new.set_version(self.new_version);
        self.new
    }
}

/// The forward and reverse steps registered for one model.
#[derive(Clone, Default)]
pub struct Migrator {
    forward: BTreeMap<Option<u32>, Step>,
    reverse: BTreeMap<Option<u32>, Step>,
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("forward", &self.forward.keys().collect::<Vec<_>>())
            .field("reverse", &self.reverse.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Migrator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the step taking `from` (None = unversioned) to `to`.
    #[must_use]
    pub fn forward(mut self, from: Option<u32>, to: u32, run: MigrationStep) -> Self {
        self.forward.insert(from, Step { target: Some(to), run });
        self
    }

    /// Registers the step taking `from` back down to `to`.
    #[must_use]
    pub fn reverse(mut self, from: u32, to: Option<u32>, run: MigrationStep) -> Self {
        self.reverse.insert(Some(from), Step { target: to, run });
        self
    }

    /// Rejects steps that do not move in their declared direction, or
    /// forward steps past the model's version.
    pub(crate) fn check(&self, model: &str, version: Option<u32>) -> ModelResult<()> {
        for (from, step) in &self.forward {
            if step.target <= *from || step.target > version {
                return Err(ModelError::schema(format!(
                    "{model}: forward migration {} -> {} is out of order",
                    version_label(*from),
                    version_label(step.target)
                )));
            }
        }
        for (from, step) in &self.reverse {
            if step.target >= *from || *from > version {
                return Err(ModelError::schema(format!(
                    "{model}: reverse migration {} -> {} is out of order",
                    version_label(*from),
                    version_label(step.target)
                )));
            }
        }
        Ok(())
    }

    /// Applies steps until `record` is at `target`. Returns the migrated
    /// record and the versions it passed through, in order.
    pub fn migrate(
        &self,
        model: &str,
        mut record: Record,
        target: Option<u32>,
    ) -> ModelResult<(Record, Vec<Option<u32>>)> {
        let mut path = Vec::new();
        let mut current = record.stored_version()?;
        while current != target {
            let step = if current < target {
                self.forward.get(&current)
            } else {
                self.reverse.get(&current)
            };
            let step = step.copied().ok_or_else(|| no_migrators(model, current))?;
            let overshoots = if current < target {
                step.target > target
            } else {
                step.target < target
            };
            if overshoots {
                return Err(ModelError::Migration(format!(
                    "migrating {model} from version {} skips past version {}",
                    version_label(current),
                    version_label(target)
                )));
            }
            let mut data = MigrationData::new(record, step.target);
            (step.run)(&mut data)?;
            record = data.finish();
            current = step.target;
            path.push(current);
        }
        Ok((record, path))
    }
}

pub(crate) fn no_migrators(model: &str, version: Option<u32>) -> ModelError {
    ModelError::Migration(format!(
        "No migrators defined for {model} version {}",
        version_label(version)
    ))
}

/// Migrates `record` of `model` to `target` using `migrator`, failing if
/// the versions differ and no migrator is registered.
pub fn migrate_record(
    model: &str,
    migrator: Option<&Migrator>,
    record: Record,
    target: Option<u32>,
) -> ModelResult<(Record, Vec<Option<u32>>)> {
    let version = record.stored_version()?;
    if version == target {
        return Ok((record, Vec::new()));
    }
    match migrator {
        Some(migrator) => migrator.migrate(model, record, target),
        None => Err(no_migrators(model, version)),
    }
}
