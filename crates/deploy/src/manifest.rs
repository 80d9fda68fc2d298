//! The run manifest (`Forgeline.toml`): target network, allow-list, store
//! locations, executor settings, policy and the deployment units.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};

use crate::{
    executor::ExecutorConfig,
    network::{AllowList, NetworkProfile},
    orchestrator::RunPolicy,
    unit::DeploymentUnit,
};

/// The default name of the run manifest.
pub const MANIFEST_FILENAME: &str = "Forgeline.toml";

/// Default config store file.
pub const DEFAULT_STORE_FILENAME: &str = ".env";

/// Default deployment record file, next to the config store.
pub const DEFAULT_RECORDS_FILENAME: &str = "deployments.json";

/// Where a run reads and writes its state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// The config store file.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// The deployment record file. Defaults to `deployments.json` next to the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records: Option<PathBuf>,
    /// Root of the compiled artifacts.
    #[serde(default = "default_artifacts_path")]
    pub artifacts: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from(DEFAULT_STORE_FILENAME)
}

fn default_artifacts_path() -> PathBuf {
    PathBuf::from("artifacts")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            records: None,
            artifacts: default_artifacts_path(),
        }
    }
}

impl StoreConfig {
    pub fn records_path(&self) -> PathBuf {
        match &self.records {
            Some(path) => path.clone(),
            None => self
                .path
                .parent()
                .unwrap_or(Path::new(""))
                .join(DEFAULT_RECORDS_FILENAME),
        }
    }

    /// Rebase relative paths onto `base`.
    pub fn rebase(&mut self, base: &Path) {
        let rebase = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        rebase(&mut self.path);
        rebase(&mut self.artifacts);
        if let Some(records) = self.records.as_mut() {
            rebase(records);
        }
    }
}

/// Everything a run needs besides the chain endpoint and signing identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// The network this run targets.
    pub network: NetworkProfile,
    /// Networks a run may target.
    #[serde(default)]
    pub allow: AllowList,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub policy: RunPolicy,
    /// Deployment units, in declaration order.
    #[serde(default, rename = "unit")]
    pub units: Vec<DeploymentUnit>,
}

/// Prefix of environment variables overriding manifest fields.
pub const ENV_PREFIX: &str = "FORGELINE_";

impl Manifest {
    /// Resolve `path` to a manifest file; a directory means its `Forgeline.toml`.
    pub fn locate(path: &Path) -> Result<PathBuf> {
        if !path.exists() {
            anyhow::bail!("Manifest file or directory not found: {}", path.display());
        }
        Ok(if path.is_dir() {
            path.join(MANIFEST_FILENAME)
        } else {
            path.to_path_buf()
        })
    }

    /// Load the manifest from a TOML file, overlaid with `FORGELINE_<SECTION>__<KEY>`
    /// environment variables (e.g. `FORGELINE_EXECUTOR__CONFIRMATIONS=3`).
    ///
    /// Relative store paths are taken relative to the manifest's directory.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let manifest_path = Self::locate(path)?;
        let mut manifest: Self = Figment::new()
            .merge(Toml::file(&manifest_path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Failed to load manifest {}", manifest_path.display()))?;

        if let Some(base) = manifest_path.parent() {
            manifest.store.rebase(base);
        }
        tracing::info!(
            path = %manifest_path.display(),
            network = %manifest.network.name,
            units = manifest.units.len(),
            "Manifest loaded"
        );
        Ok(manifest)
    }
}
