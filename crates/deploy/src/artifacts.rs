//! Creation bytecode lookup.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use alloy_core::primitives::Bytes;
use anyhow::{Context, Result};
use serde::Deserialize;

/// Provides the creation bytecode of a contract by name.
pub trait ArtifactSource {
    fn creation_code(&self, contract: &str) -> Result<Bytes>;
}

impl ArtifactSource for HashMap<String, Bytes> {
    fn creation_code(&self, contract: &str) -> Result<Bytes> {
        self.get(contract)
            .cloned()
            .with_context(|| format!("No creation code registered for `{}`", contract))
    }
}

/// Hardhat compilation output, `artifacts/**/<Contract>.json`.
#[derive(Debug, Clone)]
pub struct HardhatArtifacts {
    root: PathBuf,
}

#[derive(Deserialize)]
struct HardhatArtifact {
    bytecode: String,
}

impl HardhatArtifacts {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn find(&self, contract: &str) -> Result<PathBuf> {
        let file_name = format!("{}.json", contract);
        let mut found = Vec::new();
        collect_matches(&self.root, &file_name, &mut found)
            .with_context(|| format!("Failed to scan artifacts in {}", self.root.display()))?;

        match found.len() {
            0 => anyhow::bail!("No artifact `{}` under {}", file_name, self.root.display()),
            1 => Ok(found.remove(0)),
            _ => {
                found.sort();
                anyhow::bail!(
                    "Artifact `{}` is ambiguous: {}",
                    file_name,
                    found
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            }
        }
    }
}

fn collect_matches(dir: &Path, file_name: &str, found: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            // compiler inputs, not artifacts
            if path.file_name().is_some_and(|n| n == "build-info") {
                continue;
            }
            collect_matches(&path, file_name, found)?;
        } else if path.file_name().is_some_and(|n| n == file_name) {
            found.push(path);
        }
    }
    Ok(())
}

impl ArtifactSource for HardhatArtifacts {
    fn creation_code(&self, contract: &str) -> Result<Bytes> {
        let path = self.find(contract)?;
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read artifact {}", path.display()))?;
        let artifact: HardhatArtifact = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse artifact {}", path.display()))?;

        let bytecode = artifact.bytecode.trim();
        let hex_code = bytecode.strip_prefix("0x").unwrap_or(bytecode);
        if hex_code.is_empty() {
            anyhow::bail!("`{}` has no creation code (abstract contract or interface?)", contract);
        }

        let code = hex::decode(hex_code).with_context(|| {
            format!(
                "Artifact {} has invalid bytecode (unlinked library?)",
                path.display()
            )
        })?;

        tracing::debug!(contract, path = %path.display(), size = code.len(), "Loaded artifact");
        Ok(code.into())
    }
}
