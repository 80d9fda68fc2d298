//! forgeline-deploy - Deployment orchestration for interdependent on-chain modules.
//!
//! This crate resolves each module's inputs from a shared config store,
//! creates the module, records the produced address, and runs its post-deploy
//! wiring, sequencing modules along their dependency graph.

mod actions;
pub use actions::{ActionContext, ActionEntry, ActionReport, ActionStatus, PostDeployActionsRunner};

mod artifacts;
pub use artifacts::{ArtifactSource, HardhatArtifacts};

mod builder;
pub use builder::OrchestratorBuilder;

mod chain;
pub use chain::{ChainClient, Receipt, TxRequest};

mod error;
pub use error::{
    DeployError, GasEstimationFallback, IssueKind, PartialDeploymentError, PersistenceConflict,
    UnsafeNetworkError, ValidationError, ValidationIssue,
};

mod estimator;
pub use estimator::{BudgetSource, Estimator, ResourceBudget, scale_estimate};

mod executor;
pub use executor::{
    ConfirmationElapsed, CreationCode, DEFAULT_CONFIRMATION_TIMEOUT, DEFAULT_CONFIRMATIONS,
    DEFAULT_POLL_INTERVAL, Executor, ExecutorConfig, wait_for_confirmation,
};

mod fs;
pub use fs::RunLock;

mod graph;
pub use graph::topological_order;

mod manifest;
pub use manifest::{
    DEFAULT_RECORDS_FILENAME, DEFAULT_STORE_FILENAME, ENV_PREFIX, MANIFEST_FILENAME, Manifest,
    StoreConfig,
};

mod network;
pub use network::{AllowList, AllowedNetwork, NetworkGuard, NetworkProfile};

mod orchestrator;
pub use orchestrator::{
    Orchestrator, Plan, PlannedStep, RunError, RunPolicy, RunReport, UnitReport, UnitStatus,
};

mod persistence;
pub use persistence::{PersistenceWriter, WriteOutcome};

mod record;
pub use record::{DeploymentRecord, RecordStore, args_digest};

mod resolver;
pub use resolver::{
    ExternalInputs, ResolveContext, ResolvedParam, ResolvedParams, ResolvedValue, Resolver, clean,
    parse_address, validate_value,
};

pub mod rpc;
pub use rpc::JsonRpcClient;

mod store;
pub use store::{ConfigStore, is_valid_key};

mod unit;
pub use unit::{
    AddressArg, ConstructorParam, DEFAULT_GAS_FALLBACK, DEFAULT_GAS_MULTIPLIER, DeploymentUnit,
    GasPolicy, ParamSource, ParamType, PostDeployAction, RoleId, action_input_name,
};
