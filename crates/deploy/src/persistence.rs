//! Idempotent writes into the config store.

use std::io::Write;

use anyhow::{Context, Result};

use crate::{
    error::PersistenceConflict,
    store::{ConfigStore, is_valid_key},
};

/// Result of an append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The key was absent and has been appended.
    Written,
    /// The key already existed; nothing was written.
    Skipped(PersistenceConflict),
}

impl WriteOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, WriteOutcome::Written)
    }
}

pub struct PersistenceWriter;

impl PersistenceWriter {
    /// Append `key=value` unless `key` is already recorded.
    ///
    /// The backing file is re-read first so a key added by hand since the
    /// store was loaded is honoured. An existing key is never overwritten.
    pub fn append(
        store: &mut ConfigStore,
        key: &str,
        value: &str,
        section: Option<&str>,
    ) -> Result<WriteOutcome> {
        if !is_valid_key(key) {
            anyhow::bail!("`{}` is not a valid config store key", key);
        }
        store.reload()?;

        if let Some(existing) = store.get(key) {
            let conflict = PersistenceConflict {
                key: key.to_string(),
                existing: existing.to_string(),
                attempted: value.to_string(),
            };
            tracing::warn!(
                key,
                existing = %conflict.existing,
                attempted = %conflict.attempted,
                "Key already recorded in config store, leaving it untouched"
            );
            return Ok(WriteOutcome::Skipped(conflict));
        }

        if let Some(path) = store.path() {
            let needs_newline = match std::fs::read(path) {
                Ok(bytes) => bytes.last().is_some_and(|&b| b != b'\n'),
                Err(_) => false,
            };

            let mut record = String::new();
            if needs_newline {
                record.push('\n');
            }
            if let Some(section) = section {
                record.push_str(&format!("\n# ===== {} =====\n", section));
            }
            record.push_str(&format!("{}={}\n", key, value));

            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open config store {}", path.display()))?;
            file.write_all(record.as_bytes())
                .with_context(|| format!("Failed to append to config store {}", path.display()))?;
            file.sync_all()
                .with_context(|| format!("Failed to flush config store {}", path.display()))?;
        }

        store.push_appended(key, value);
        tracing::info!(key, value, "Recorded in config store");
        Ok(WriteOutcome::Written)
    }
}
