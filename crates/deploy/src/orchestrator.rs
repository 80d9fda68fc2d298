//! Composes the pipeline stages and sequences units across the dependency graph.

use alloy_core::primitives::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    actions::{ActionContext, ActionReport, PostDeployActionsRunner},
    artifacts::ArtifactSource,
    chain::{ChainClient, TxRequest},
    error::{
        DeployError, GasEstimationFallback, IssueKind, PartialDeploymentError, PersistenceConflict,
        ValidationError, ValidationIssue,
    },
    estimator::{BudgetSource, Estimator, ResourceBudget},
    executor::{Executor, ExecutorConfig},
    graph::topological_order,
    network::{AllowList, NetworkGuard, NetworkProfile},
    persistence::{PersistenceWriter, WriteOutcome},
    record::{DeploymentRecord, RecordStore},
    resolver::{ExternalInputs, ResolveContext, ResolvedParams, Resolver, parse_address},
    store::{ConfigStore, is_valid_key},
    unit::{ConstructorParam, DeploymentUnit, PostDeployAction},
};

/// Run-wide policy switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunPolicy {
    /// Treat a failed post-deploy action as fatal to the whole run.
    #[serde(default)]
    pub halt_on_partial: bool,
    /// Re-run the (idempotent) wiring of units that are already recorded.
    #[serde(default = "default_resume_wiring")]
    pub resume_wiring: bool,
}

fn default_resume_wiring() -> bool {
    true
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            halt_on_partial: false,
            resume_wiring: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitStatus {
    /// Created in this run.
    Deployed,
    /// Its output key was already recorded; nothing was created.
    AlreadyDeployed,
}

/// Outcome of one unit's pipeline.
#[derive(Debug, Clone)]
pub struct UnitReport {
    pub unit: String,
    pub address: Address,
    pub status: UnitStatus,
    pub record: Option<DeploymentRecord>,
    pub budget: Option<ResourceBudget>,
    pub persistence: Option<WriteOutcome>,
    /// Empty when wiring was not run.
    pub actions: ActionReport,
}

/// Everything a run did, in execution order.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub units: Vec<UnitReport>,
    pub partial: Vec<PartialDeploymentError>,
    pub fallbacks: Vec<GasEstimationFallback>,
    pub conflicts: Vec<PersistenceConflict>,
}

impl RunReport {
    pub fn unit(&self, name: &str) -> Option<&UnitReport> {
        self.units.iter().find(|u| u.unit == name)
    }

    /// Units created in this run.
    pub fn deployed(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter(|u| u.status == UnitStatus::Deployed)
    }

    pub fn is_fully_wired(&self) -> bool {
        self.partial.is_empty()
    }
}

/// A fatal error, along with what the run completed before it.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunError {
    #[source]
    pub error: DeployError,
    pub completed: RunReport,
}

impl RunError {
    fn new(error: DeployError, completed: RunReport) -> Self {
        tracing::error!(unit = ?error.unit(), %error, "Run halted");
        Self { error, completed }
    }
}

/// Which units a [`Plan`] would deploy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedStep {
    Deploy { unit: String, output_key: String },
    AlreadyDeployed { unit: String, address: String },
}

/// Ordered dry run; nothing is broadcast.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub steps: Vec<PlannedStep>,
    /// Units whose inputs do not validate against the current store.
    pub invalid: Vec<ValidationError>,
}

/// Drives units through guard, resolution, estimation, creation, persistence
/// and wiring.
///
/// Units share one signing identity and run strictly one after another.
pub struct Orchestrator<C, A> {
    pub(crate) client: C,
    pub(crate) artifacts: A,
    pub(crate) network: NetworkProfile,
    pub(crate) allow_list: AllowList,
    pub(crate) store: ConfigStore,
    pub(crate) records: RecordStore,
    pub(crate) externals: ExternalInputs,
    pub(crate) executor: ExecutorConfig,
    pub(crate) policy: RunPolicy,
}

impl<C: ChainClient, A: ArtifactSource> Orchestrator<C, A> {
    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Deploy `units` in dependency order.
    ///
    /// Halts at the first fatal error. Post-deploy failures are collected in
    /// the report unless the policy says otherwise.
    pub async fn run(&mut self, units: &[DeploymentUnit]) -> Result<RunReport, RunError> {
        let mut report = RunReport::default();

        if let Err(e) = self.preflight(units).await {
            return Err(RunError::new(e, report));
        }
        let order = match topological_order(units) {
            Ok(order) => order,
            Err(e) => return Err(RunError::new(e, report)),
        };

        tracing::info!(
            network = %self.network.name,
            chain_id = self.network.chain_id,
            deployer = %self.client.deployer(),
            units = order.len(),
            "Starting deployment run"
        );

        for unit in order {
            if let Err(e) = self.run_unit(unit, &mut report).await {
                return Err(RunError::new(e, report));
            }
        }

        tracing::info!(
            deployed = report.deployed().count(),
            partial = report.partial.len(),
            "Deployment run finished"
        );
        Ok(report)
    }

    /// Order `units` and validate each against the current store without
    /// touching the chain.
    ///
    /// Store inputs produced by an earlier unit of the same plan are assumed
    /// to become available.
    pub fn plan(&self, units: &[DeploymentUnit]) -> Result<Plan, DeployError> {
        NetworkGuard::validate(&self.network, &self.allow_list)?;
        check_declarations(units)?;
        let order = topological_order(units)?;

        let mut plan = Plan::default();
        let mut upcoming = self.store.clone();
        for unit in order {
            let ctx = ResolveContext {
                store: &upcoming,
                externals: &self.externals,
                deployer: self.client.deployer(),
            };

            // Mirrors `run_unit`: a recorded unit only resolves what its resumed wiring reads.
            let resolved = if let Some(existing) = self.store.get(&unit.output_key) {
                plan.steps.push(PlannedStep::AlreadyDeployed {
                    unit: unit.name.clone(),
                    address: existing.to_string(),
                });
                match recorded_address(unit, existing) {
                    Err(e) => Err(e),
                    Ok(_) if self.policy.resume_wiring => {
                        Resolver::resolve(&unit.name, &action_inputs(unit), ctx).map(drop)
                    }
                    Ok(_) => Ok(()),
                }
            } else {
                plan.steps.push(PlannedStep::Deploy {
                    unit: unit.name.clone(),
                    output_key: unit.output_key.clone(),
                });
                Resolver::resolve_unit(unit, ctx).map(drop)
            };
            if let Err(e) = resolved {
                plan.invalid.push(e);
            }

            if !upcoming.contains(&unit.output_key) {
                upcoming.push_appended(&unit.output_key, &Address::ZERO.to_checksum(None));
            }
        }
        Ok(plan)
    }

    /// Checks that need no transaction: guard, gas policies, then the
    /// endpoint's chain identity.
    async fn preflight(&self, units: &[DeploymentUnit]) -> Result<(), DeployError> {
        NetworkGuard::validate(&self.network, &self.allow_list)?;
        check_declarations(units)?;

        let reported = self
            .client
            .chain_id()
            .await
            .map_err(|e| DeployError::Transport {
                stage: "network identity check",
                reason: format!("{:#}", e),
            })?;
        NetworkGuard::verify_identity(&self.network, reported)?;
        Ok(())
    }

    async fn run_unit(
        &mut self,
        unit: &DeploymentUnit,
        report: &mut RunReport,
    ) -> Result<(), DeployError> {
        if let Some(existing) = self.store.get(&unit.output_key) {
            let existing = existing.to_string();
            return self.resume_unit(unit, &existing, report).await;
        }

        let params = Resolver::resolve_unit(unit, self.resolve_context())?;
        tracing::info!(unit = %unit.name, params = params.len(), "Parameters validated");

        let bytecode = self
            .artifacts
            .creation_code(unit.contract_name())
            .map_err(|e| DeployError::Artifact {
                unit: unit.name.clone(),
                reason: format!("{:#}", e),
            })?;
        let code = Executor::creation_code(unit, &bytecode, &params)?;

        let tx = TxRequest::create(self.client.deployer(), code.data.clone());
        let budget = Estimator::estimate(&self.client, &unit.name, &unit.gas, &tx).await;
        if let BudgetSource::Fallback(fallback) = &budget.source {
            report.fallbacks.push(fallback.clone());
        }

        let record = Executor::deploy(
            &self.client,
            unit,
            &code,
            &budget,
            &self.network,
            &self.executor,
        )
        .await?;
        let address = record.address;

        let persistence_failed = |reason: anyhow::Error| DeployError::Persistence {
            unit: unit.name.clone(),
            address,
            reason: format!("{:#}", reason),
        };
        self.records.append(record.clone()).map_err(persistence_failed)?;
        let outcome = PersistenceWriter::append(
            &mut self.store,
            &unit.output_key,
            &address.to_checksum(None),
            Some(unit.section_name()),
        )
        .map_err(persistence_failed)?;
        if let WriteOutcome::Skipped(conflict) = &outcome {
            report.conflicts.push(conflict.clone());
        }

        let actions = self.wire(unit, address, &params).await;
        let partial = self.partial_error(unit, address, Some(&record), &actions);

        report.units.push(UnitReport {
            unit: unit.name.clone(),
            address,
            status: UnitStatus::Deployed,
            record: Some(record),
            budget: Some(budget),
            persistence: Some(outcome),
            actions,
        });
        self.surface_partial(partial, report)
    }

    /// The unit's output key is already recorded: validate it and, if the
    /// policy allows, complete its wiring.
    async fn resume_unit(
        &mut self,
        unit: &DeploymentUnit,
        existing: &str,
        report: &mut RunReport,
    ) -> Result<(), DeployError> {
        let address = recorded_address(unit, existing)?;

        tracing::info!(
            unit = %unit.name,
            %address,
            key = %unit.output_key,
            "Already deployed, skipping creation"
        );

        let mut actions = ActionReport::default();
        let mut partial = None;
        if self.policy.resume_wiring && !unit.actions.is_empty() {
            let params =
                Resolver::resolve(&unit.name, &action_inputs(unit), self.resolve_context())?;
            actions = self.wire(unit, address, &params).await;
            partial = self.partial_error(unit, address, None, &actions);
        }

        report.units.push(UnitReport {
            unit: unit.name.clone(),
            address,
            status: UnitStatus::AlreadyDeployed,
            record: None,
            budget: None,
            persistence: None,
            actions,
        });
        self.surface_partial(partial, report)
    }

    async fn wire(
        &self,
        unit: &DeploymentUnit,
        address: Address,
        params: &ResolvedParams,
    ) -> ActionReport {
        if unit.actions.is_empty() {
            return ActionReport::default();
        }
        PostDeployActionsRunner::run(
            &self.client,
            &unit.actions,
            ActionContext {
                unit: &unit.name,
                target: address,
                params,
                gas: &unit.gas,
                executor: &self.executor,
            },
        )
        .await
    }

    fn partial_error(
        &self,
        unit: &DeploymentUnit,
        address: Address,
        record: Option<&DeploymentRecord>,
        actions: &ActionReport,
    ) -> Option<PartialDeploymentError> {
        let (failed_action, reason) = actions.failure()?;
        Some(PartialDeploymentError {
            unit: unit.name.clone(),
            address,
            failed_action: failed_action.to_string(),
            reason: reason.to_string(),
            record: record.cloned(),
            report: actions.clone(),
        })
    }

    fn surface_partial(
        &self,
        partial: Option<PartialDeploymentError>,
        report: &mut RunReport,
    ) -> Result<(), DeployError> {
        let Some(partial) = partial else {
            return Ok(());
        };
        if self.policy.halt_on_partial {
            return Err(partial.into());
        }
        tracing::warn!(
            unit = %partial.unit,
            address = %partial.address,
            action = %partial.failed_action,
            reason = %partial.reason,
            "Unit deployed but not fully wired, continuing"
        );
        report.partial.push(partial);
        Ok(())
    }

    fn resolve_context(&self) -> ResolveContext<'_> {
        ResolveContext {
            store: &self.store,
            externals: &self.externals,
            deployer: self.client.deployer(),
        }
    }
}

/// The address recorded under a unit's output key.
fn recorded_address(unit: &DeploymentUnit, existing: &str) -> Result<Address, ValidationError> {
    parse_address(existing).map_err(|reason| ValidationError {
        unit: unit.name.clone(),
        issues: vec![ValidationIssue {
            param: unit.output_key.clone(),
            kind: IssueKind::Malformed {
                expected: "address".to_string(),
                found: existing.to_string(),
                reason,
            },
        }],
    })
}

/// Inputs of every post-deploy action, without the constructor parameters.
fn action_inputs(unit: &DeploymentUnit) -> Vec<ConstructorParam> {
    unit.actions
        .iter()
        .enumerate()
        .flat_map(|(i, action)| action.inputs(i))
        .collect()
}

/// Declaration checks that need neither store nor chain: the gas multiplier,
/// an output key the store can read back, and an idempotency predicate on
/// every initializer.
fn check_declarations(units: &[DeploymentUnit]) -> Result<(), DeployError> {
    for unit in units {
        let mut issues = Vec::new();
        if !(unit.gas.multiplier.is_finite() && unit.gas.multiplier > 1.0) {
            issues.push(ValidationIssue {
                param: "gas.multiplier".to_string(),
                kind: IssueKind::Declaration(format!(
                    "multiplier must be greater than 1, got {}",
                    unit.gas.multiplier
                )),
            });
        }
        if !is_valid_key(&unit.output_key) {
            issues.push(ValidationIssue {
                param: "output_key".to_string(),
                kind: IssueKind::Declaration(format!(
                    "`{}` is not a valid config store key",
                    unit.output_key
                )),
            });
        }
        for (index, action) in unit.actions.iter().enumerate() {
            if let PostDeployAction::Initialize { skip_if: None, .. } = action {
                issues.push(ValidationIssue {
                    param: format!("actions.{}", index),
                    kind: IssueKind::Declaration(format!(
                        "`{}` needs a `skip_if` view so reruns do not call it twice",
                        action.label()
                    )),
                });
            }
        }
        if !issues.is_empty() {
            return Err(ValidationError {
                unit: unit.name.clone(),
                issues,
            }
            .into());
        }
    }
    Ok(())
}
