//! Error taxonomy of the deployment pipeline.
//!
//! Fatal errors halt the whole run and are returned as [`DeployError`].
//! Non-fatal conditions ([`GasEstimationFallback`], [`PersistenceConflict`],
//! [`PartialDeploymentError`]) are logged and surfaced in the run report.

use std::{fmt, time::Duration};

use alloy_core::primitives::{Address, B256};
use thiserror::Error;

use crate::{actions::ActionReport, record::DeploymentRecord};

/// Why a single parameter failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueKind {
    /// No value under the lookup key.
    Missing { origin: &'static str, key: String },
    /// A value exists but is empty after cleaning.
    Empty { origin: &'static str, key: String },
    /// A value exists but does not match the declared type.
    Malformed { expected: String, found: String, reason: String },
    /// The declaration itself is unusable (e.g. no lookup key on an action argument).
    Declaration(String),
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueKind::Missing { origin, key } => write!(f, "missing {} key `{}`", origin, key),
            IssueKind::Empty { origin, key } => {
                write!(f, "empty value for {} key `{}`", origin, key)
            }
            IssueKind::Malformed {
                expected,
                found,
                reason,
            } => write!(f, "expected {}, got `{}`: {}", expected, found, reason),
            IssueKind::Declaration(reason) => write!(f, "invalid declaration: {}", reason),
        }
    }
}

/// A single offending parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// The parameter name as declared on the unit.
    pub param: String,
    pub kind: IssueKind,
}

impl ValidationIssue {
    pub fn is_missing(&self) -> bool {
        matches!(self.kind, IssueKind::Missing { .. } | IssueKind::Empty { .. })
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self.kind, IssueKind::Malformed { .. })
    }
}

/// Every invalid or missing parameter of a unit, sorted by parameter name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub unit: String,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    /// Names of the offending parameters.
    pub fn params(&self) -> impl Iterator<Item = &str> {
        self.issues.iter().map(|issue| issue.param.as_str())
    }

    /// Lookup keys that were missing from their source.
    pub fn missing_keys(&self) -> impl Iterator<Item = &str> {
        self.issues.iter().filter_map(|issue| match &issue.kind {
            IssueKind::Missing { key, .. } | IssueKind::Empty { key, .. } => Some(key.as_str()),
            _ => None,
        })
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} invalid parameter(s) for unit `{}`",
            self.issues.len(),
            self.unit
        )?;
        for issue in &self.issues {
            write!(f, "; {}: {}", issue.param, issue.kind)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// The target network failed the allow-list or identity check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("refusing to deploy to network `{network}` (chain id {chain_id}): {reason}")]
pub struct UnsafeNetworkError {
    pub network: String,
    pub chain_id: u64,
    pub reason: String,
}

/// Simulation failed and the unit's fallback budget was used instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasEstimationFallback {
    pub unit: String,
    pub fallback: u64,
    pub reason: String,
}

/// A write targeted a key that is already recorded; the store was left untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceConflict {
    pub key: String,
    pub existing: String,
    pub attempted: String,
}

/// A unit was deployed but one of its post-deploy actions failed.
#[derive(Debug, Clone, Error)]
#[error("unit `{unit}` deployed at {address} but wiring stopped at `{failed_action}`: {reason}")]
pub struct PartialDeploymentError {
    pub unit: String,
    pub address: Address,
    pub failed_action: String,
    pub reason: String,
    /// Present when the unit was created in this run.
    pub record: Option<DeploymentRecord>,
    pub report: ActionReport,
}

/// Fatal errors; any of them halts the run.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    UnsafeNetwork(#[from] UnsafeNetworkError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("dependency graph error: {0}")]
    Graph(String),

    #[error("failed to load creation code for unit `{unit}`: {reason}")]
    Artifact { unit: String, reason: String },

    #[error("failed to encode parameter `{param}` of unit `{unit}`: {reason}")]
    Encoding {
        unit: String,
        param: String,
        reason: String,
    },

    #[error("failed to broadcast creation transaction for unit `{unit}`: {reason}")]
    Broadcast { unit: String, reason: String },

    #[error("creation of unit `{unit}` reverted in transaction {tx_hash}: {reason}")]
    DeploymentReverted {
        unit: String,
        tx_hash: B256,
        reason: String,
    },

    #[error(
        "no confirmation for unit `{unit}` after {waited:?}; transaction {tx_hash} may still land"
    )]
    ConfirmationTimeout {
        unit: String,
        tx_hash: B256,
        waited: Duration,
    },

    #[error("unit `{unit}` is deployed at {address} but could not be recorded: {reason}")]
    Persistence {
        unit: String,
        address: Address,
        reason: String,
    },

    #[error(transparent)]
    PartialDeployment(#[from] PartialDeploymentError),

    #[error("transport error during {stage}: {reason}")]
    Transport { stage: &'static str, reason: String },
}

impl DeployError {
    /// Name of the unit the error belongs to, if any.
    pub fn unit(&self) -> Option<&str> {
        match self {
            DeployError::Validation(err) => Some(&err.unit),
            DeployError::PartialDeployment(err) => Some(&err.unit),
            DeployError::Artifact { unit, .. }
            | DeployError::Encoding { unit, .. }
            | DeployError::Broadcast { unit, .. }
            | DeployError::DeploymentReverted { unit, .. }
            | DeployError::ConfirmationTimeout { unit, .. }
            | DeployError::Persistence { unit, .. } => Some(unit),
            DeployError::UnsafeNetwork(_)
            | DeployError::Graph(_)
            | DeployError::Transport { .. } => None,
        }
    }
}
