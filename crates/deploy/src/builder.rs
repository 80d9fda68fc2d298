//! Builder module for creating an [`Orchestrator`].
//!
//! This module provides the [`OrchestratorBuilder`] struct which assembles an
//! [`Orchestrator`] from a chain client, an artifact source and the run's
//! configuration, loading the on-disk stores when paths are given.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::{
    ArtifactSource, ChainClient, ConfigStore, ExecutorConfig, ExternalInputs, Manifest,
    Orchestrator, RecordStore, RunPolicy,
    network::{AllowList, NetworkProfile},
};

/// Where the config store and record store come from.
#[derive(Debug, Clone)]
enum StoreSource<T> {
    /// Load from (and persist to) a file.
    Path(PathBuf),
    /// Use the given store as is.
    Loaded(T),
}

/// Builder for creating an [`Orchestrator`].
///
/// # Example
///
/// ```no_run
/// use forgeline_deploy::{
///     AllowList, HardhatArtifacts, JsonRpcClient, NetworkProfile, OrchestratorBuilder,
/// };
///
/// # async fn example() -> anyhow::Result<()> {
/// let client = JsonRpcClient::new("http://localhost:8545".parse()?, Default::default())?;
/// let _orchestrator = OrchestratorBuilder::new(client, HardhatArtifacts::new("artifacts"))
///     .network(NetworkProfile { name: "sepolia".into(), chain_id: 11155111, production: false })
///     .allow_list(AllowList::chain_ids([11155111]))
///     .store_path(".env")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct OrchestratorBuilder<C, A> {
    client: C,
    artifacts: A,
    /// The target network (required).
    network: Option<NetworkProfile>,
    /// Allow-list; empty rejects every network.
    allow_list: AllowList,
    store: Option<StoreSource<ConfigStore>>,
    records: Option<StoreSource<RecordStore>>,
    externals: ExternalInputs,
    executor: ExecutorConfig,
    policy: RunPolicy,
}

impl<C: ChainClient, A: ArtifactSource> OrchestratorBuilder<C, A> {
    pub fn new(client: C, artifacts: A) -> Self {
        Self {
            client,
            artifacts,
            network: None,
            allow_list: AllowList::default(),
            store: None,
            records: None,
            externals: ExternalInputs::default(),
            executor: ExecutorConfig::default(),
            policy: RunPolicy::default(),
        }
    }

    /// Take network, allow-list, store paths, executor settings and policy from `manifest`.
    pub fn manifest(self, manifest: &Manifest) -> Self {
        self.network(manifest.network.clone())
            .allow_list(manifest.allow.clone())
            .store_path(manifest.store.path.clone())
            .records_path(manifest.store.records_path())
            .executor(manifest.executor.clone())
            .policy(manifest.policy)
    }

    pub fn network(mut self, network: NetworkProfile) -> Self {
        self.network = Some(network);
        self
    }

    pub fn allow_list(mut self, allow_list: AllowList) -> Self {
        self.allow_list = allow_list;
        self
    }

    /// Load the config store from `path`; produced addresses are appended to it.
    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store = Some(StoreSource::Path(path.into()));
        self
    }

    pub fn store(mut self, store: ConfigStore) -> Self {
        self.store = Some(StoreSource::Loaded(store));
        self
    }

    /// Load deployment records from `path`.
    pub fn records_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.records = Some(StoreSource::Path(path.into()));
        self
    }

    pub fn records(mut self, records: RecordStore) -> Self {
        self.records = Some(StoreSource::Loaded(records));
        self
    }

    pub fn externals(mut self, externals: ExternalInputs) -> Self {
        self.externals = externals;
        self
    }

    pub fn executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    pub fn policy(mut self, policy: RunPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Build the [`Orchestrator`].
    ///
    /// Stores default to in-memory when no path or store was given.
    pub fn build(self) -> Result<Orchestrator<C, A>> {
        let network = self
            .network
            .context("A target network is required to build an orchestrator")?;

        let store = match self.store {
            Some(StoreSource::Path(path)) => ConfigStore::load(&path)
                .with_context(|| format!("Failed to load config store {}", path.display()))?,
            Some(StoreSource::Loaded(store)) => store,
            None => ConfigStore::in_memory(),
        };

        let records = match self.records {
            Some(StoreSource::Path(path)) => RecordStore::load(&path)
                .with_context(|| format!("Failed to load deployment records {}", path.display()))?,
            Some(StoreSource::Loaded(records)) => records,
            None => RecordStore::in_memory(),
        };

        tracing::debug!(
            network = %network.name,
            chain_id = network.chain_id,
            stored_keys = store.len(),
            records = records.records().len(),
            "Building orchestrator"
        );

        Ok(Orchestrator {
            client: self.client,
            artifacts: self.artifacts,
            network,
            allow_list: self.allow_list,
            store,
            records,
            externals: self.externals,
            executor: self.executor,
            policy: self.policy,
        })
    }
}
