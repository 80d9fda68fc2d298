//! The config store: a line-oriented `KEY=VALUE` file of produced addresses
//! and scalar parameters, shared by every unit of a run.
//!
//! The file is meant to be read by humans too, so comments and section
//! headers are allowed anywhere. Only [`crate::PersistenceWriter`] adds keys;
//! nothing in this crate ever rewrites or removes an existing line.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

/// Ordered key/value snapshot of the store, optionally backed by a file.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl ConfigStore {
    /// An empty store that lives only in memory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Build an in-memory store from `(key, value)` pairs. Later duplicates are ignored.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut store = Self::default();
        for (key, value) in pairs {
            store.insert_parsed(key.into(), value.into());
        }
        store
    }

    /// Load the store from `path`. A missing file is an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut store = Self {
            path: Some(path),
            ..Default::default()
        };
        store.reload()?;
        Ok(store)
    }

    /// Re-read the backing file, picking up lines appended by hand since the last read.
    pub fn reload(&mut self) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };

        let content = if path.exists() {
            std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config store {}", path.display()))?
        } else {
            tracing::debug!(
                path = %path.display(),
                "Config store does not exist yet, starting empty"
            );
            String::new()
        };

        self.entries.clear();
        self.index.clear();
        self.parse_into(&content);
        Ok(())
    }

    /// Parse store content without a backing file.
    pub fn parse(content: &str) -> Self {
        let mut store = Self::default();
        store.parse_into(content);
        store
    }

    fn parse_into(&mut self, content: &str) {
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let line = line.strip_prefix("export ").unwrap_or(line);
            let Some((key, value)) = line.split_once('=') else {
                tracing::warn!(line = lineno + 1, "Ignoring config store line without `=`");
                continue;
            };

            let key = key.trim();
            if key.is_empty() {
                tracing::warn!(line = lineno + 1, "Ignoring config store line with an empty key");
                continue;
            }

            if self.index.contains_key(key) {
                tracing::warn!(
                    key,
                    line = lineno + 1,
                    "Duplicate config store key, keeping the first occurrence"
                );
                continue;
            }

            self.insert_parsed(key.to_string(), unquote(value.trim()).to_string());
        }
    }

    fn insert_parsed(&mut self, key: String, value: String) {
        if self.index.contains_key(&key) {
            return;
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
    }

    /// Record a key that was just appended to the backing file.
    pub(crate) fn push_appended(&mut self, key: &str, value: &str) {
        self.insert_parsed(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.index
            .get(key)
            .map(|&i| self.entries[i].1.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Entries in the order they appear in the store.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Whether `key` reads back as itself: `[A-Za-z_][A-Za-z0-9_]*`.
///
/// Anything else (padding, an `export ` prefix, a leading `#`) would be
/// rewritten or dropped by the parser.
pub fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Strip one pair of matching surrounding quotes.
fn unquote(value: &str) -> &str {
    for quote in ['"', '\'', '`'] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}
