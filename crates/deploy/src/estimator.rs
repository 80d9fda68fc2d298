//! Gas budget estimation with a fixed fallback.

use crate::{
    chain::{ChainClient, TxRequest},
    error::GasEstimationFallback,
    unit::GasPolicy,
};

/// Where a budget came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BudgetSource {
    /// Simulated estimate, before scaling.
    Estimated { raw: u64 },
    Fallback(GasEstimationFallback),
}

/// The gas limit a transaction is submitted with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBudget {
    pub gas_limit: u64,
    pub source: BudgetSource,
}

impl ResourceBudget {
    pub fn is_fallback(&self) -> bool {
        matches!(self.source, BudgetSource::Fallback(_))
    }
}

/// Scale a raw estimate by `multiplier`, rounding down.
///
/// The result is always strictly above `raw`, even when rounding would
/// swallow the margin on very small estimates. `None` when no `u64` above
/// `raw` can hold the scaled value.
pub fn scale_estimate(raw: u64, multiplier: f64) -> Option<u64> {
    let scaled = (raw as f64 * multiplier).floor();
    // `u64::MAX as f64` rounds up to 2^64, the first value that does not fit.
    if !scaled.is_finite() || scaled >= u64::MAX as f64 {
        return None;
    }
    let floor = raw.checked_add(1)?;
    Some((scaled as u64).max(floor))
}

pub struct Estimator;

impl Estimator {
    /// Estimate the budget for `tx` under `policy`.
    ///
    /// Never fails: a simulation revert, a transport error or an estimate
    /// too large to scale falls back to `policy.fallback` and is logged.
    pub async fn estimate<C: ChainClient>(
        client: &C,
        unit: &str,
        policy: &GasPolicy,
        tx: &TxRequest,
    ) -> ResourceBudget {
        let raw = match client.estimate_gas(tx).await {
            Ok(raw) => raw,
            Err(err) => return Self::fallback(unit, policy, format!("{:#}", err)),
        };
        let Some(gas_limit) = scale_estimate(raw, policy.multiplier) else {
            return Self::fallback(
                unit,
                policy,
                format!("estimate {} cannot be scaled by {}", raw, policy.multiplier),
            );
        };

        tracing::info!(unit, raw, gas_limit, multiplier = policy.multiplier, "Estimated gas");
        ResourceBudget {
            gas_limit,
            source: BudgetSource::Estimated { raw },
        }
    }

    fn fallback(unit: &str, policy: &GasPolicy, reason: String) -> ResourceBudget {
        tracing::warn!(
            unit,
            fallback = policy.fallback,
            %reason,
            "Gas estimation failed, using fallback budget"
        );
        ResourceBudget {
            gas_limit: policy.fallback,
            source: BudgetSource::Fallback(GasEstimationFallback {
                unit: unit.to_string(),
                fallback: policy.fallback,
                reason,
            }),
        }
    }
}
