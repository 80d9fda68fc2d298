//! Deployment records: one JSON entry per confirmed module creation, kept in
//! `deployments.json` next to the config store.

use std::path::{Path, PathBuf};

use alloy_core::primitives::{Address, B256};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Immutable record of one successful module creation.
///
/// Created exactly once per confirmed creation transaction and appended to
/// the [`RecordStore`] before the produced address is written to the config store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub unit: String,
    pub address: Address,
    pub deployer: Address,
    pub network: String,
    pub chain_id: u64,
    pub tx_hash: B256,
    pub block_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<B256>,
    pub gas_budget: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<u64>,
    /// SHA-256 of the ABI-encoded constructor arguments.
    pub args_digest: String,
    pub timestamp: DateTime<Utc>,
}

/// Compute the hex SHA-256 digest of encoded constructor arguments.
///
/// Lets an operator tell whether a recorded unit was created with the
/// arguments the current descriptor would produce.
pub fn args_digest(encoded_args: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(encoded_args);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RecordFile {
    #[serde(default)]
    deployments: Vec<DeploymentRecord>,
}

/// Durable list of [`DeploymentRecord`]s, kept as pretty JSON.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    path: Option<PathBuf>,
    records: Vec<DeploymentRecord>,
}

impl RecordStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the record file. A missing file is an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| {
                    format!("Failed to read deployment records from {}", path.display())
                })?;
            let file: RecordFile = serde_json::from_str(&content)
                .context("Failed to parse deployment records JSON")?;
            file.deployments
        } else {
            Vec::new()
        };

        Ok(Self {
            path: Some(path),
            records,
        })
    }

    /// Append `record` and persist the whole file.
    pub fn append(&mut self, record: DeploymentRecord) -> Result<()> {
        self.records.push(record);
        if let Some(path) = &self.path {
            Self::save_to_file(path, &self.records)?;
        }
        Ok(())
    }

    fn save_to_file(path: &Path, records: &[DeploymentRecord]) -> Result<()> {
        let json = serde_json::to_string_pretty(&RecordFile {
            deployments: records.to_vec(),
        })
        .context("Failed to serialize deployment records")?;

        // replaced atomically
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write deployment records to {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move deployment records to {}", path.display()))?;
        Ok(())
    }

    pub fn records(&self) -> &[DeploymentRecord] {
        &self.records
    }

    /// Records of `unit` on `chain_id`, oldest first.
    pub fn find<'a>(
        &'a self,
        unit: &'a str,
        chain_id: u64,
    ) -> impl Iterator<Item = &'a DeploymentRecord> + 'a {
        self.records
            .iter()
            .filter(move |r| r.unit == unit && r.chain_id == chain_id)
    }
}
