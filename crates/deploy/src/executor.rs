//! Module creation and confirmation tracking.

use std::time::Duration;

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{B256, Bytes},
};
use serde::{Deserialize, Serialize};

use crate::{
    chain::{ChainClient, Receipt, TxRequest},
    error::DeployError,
    estimator::ResourceBudget,
    network::NetworkProfile,
    record::{DeploymentRecord, args_digest},
    resolver::ResolvedParams,
    unit::DeploymentUnit,
};

/// Default number of blocks a transaction must be buried under, inclusive.
pub const DEFAULT_CONFIRMATIONS: u64 = 1;

/// Default time to wait for confirmation.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Default interval between receipt polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How transactions are awaited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Confirmation depth; 1 means "included".
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_confirmations() -> u64 {
    DEFAULT_CONFIRMATIONS
}

fn default_timeout_secs() -> u64 {
    DEFAULT_CONFIRMATION_TIMEOUT.as_secs()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            confirmations: DEFAULT_CONFIRMATIONS,
            timeout_secs: default_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Creation code of a unit together with its encoded constructor arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationCode {
    pub data: Bytes,
    pub encoded_args: Vec<u8>,
}

/// The confirmation wait ran out. The transaction may still land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationElapsed {
    pub waited: Duration,
}

/// Poll for the receipt of `tx_hash` until it has `config.confirmations`
/// confirmations or `config.timeout()` elapses.
///
/// Transport errors while polling are treated as transient. A failed
/// receipt is returned as soon as it is included.
pub async fn wait_for_confirmation<C: ChainClient>(
    client: &C,
    tx_hash: B256,
    config: &ExecutorConfig,
) -> Result<Receipt, ConfirmationElapsed> {
    let depth = config.confirmations.max(1);
    let poll = async {
        loop {
            match client.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) if !receipt.success || depth == 1 => return receipt,
                Ok(Some(receipt)) => match client.block_number().await {
                    Ok(head) if head.saturating_sub(receipt.block_number) + 1 >= depth => {
                        return receipt;
                    }
                    Ok(head) => {
                        tracing::trace!(
                            %tx_hash,
                            head,
                            included = receipt.block_number,
                            "Waiting for confirmations"
                        );
                    }
                    Err(e) => {
                        tracing::trace!(
                            %tx_hash,
                            error = %e,
                            "Block number query failed, retrying..."
                        );
                    }
                },
                Ok(None) => {
                    tracing::trace!(%tx_hash, "Transaction not yet included");
                }
                Err(e) => {
                    tracing::trace!(%tx_hash, error = %e, "Receipt query failed, retrying...");
                }
            }

            tokio::time::sleep(config.poll_interval()).await;
        }
    };

    tokio::time::timeout(config.timeout(), poll)
        .await
        .map_err(|_| ConfirmationElapsed {
            waited: config.timeout(),
        })
}

pub struct Executor;

impl Executor {
    /// Append the ABI-encoded constructor arguments to `bytecode`.
    pub fn creation_code(
        unit: &DeploymentUnit,
        bytecode: &[u8],
        params: &ResolvedParams,
    ) -> Result<CreationCode, DeployError> {
        let args = params
            .constructor_args(unit)
            .map(|param| {
                param.value.to_sol_value().map_err(|reason| DeployError::Encoding {
                    unit: unit.name.clone(),
                    param: param.key.clone(),
                    reason,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let encoded_args = if args.is_empty() {
            Vec::new()
        } else {
            DynSolValue::Tuple(args).abi_encode_params()
        };

        let mut data = bytecode.to_vec();
        data.extend_from_slice(&encoded_args);

        Ok(CreationCode {
            data: data.into(),
            encoded_args,
        })
    }

    /// Submit the creation transaction and wait for it to be confirmed.
    ///
    /// The unit counts as deployed once this returns a record. A revert or a
    /// timeout leaves nothing recorded; after a timeout the transaction may
    /// still confirm and has to be reconciled by hand.
    pub async fn deploy<C: ChainClient>(
        client: &C,
        unit: &DeploymentUnit,
        code: &CreationCode,
        budget: &ResourceBudget,
        network: &NetworkProfile,
        config: &ExecutorConfig,
    ) -> Result<DeploymentRecord, DeployError> {
        let tx = TxRequest::create(client.deployer(), code.data.clone()).with_gas(budget.gas_limit);

        let tx_hash = client
            .send_transaction(&tx)
            .await
            .map_err(|e| DeployError::Broadcast {
                unit: unit.name.clone(),
                reason: format!("{:#}", e),
            })?;

        tracing::info!(
            unit = %unit.name,
            %tx_hash,
            gas_limit = budget.gas_limit,
            "Creation transaction broadcast"
        );

        let receipt = wait_for_confirmation(client, tx_hash, config)
            .await
            .map_err(|elapsed| DeployError::ConfirmationTimeout {
                unit: unit.name.clone(),
                tx_hash,
                waited: elapsed.waited,
            })?;

        if !receipt.success {
            return Err(DeployError::DeploymentReverted {
                unit: unit.name.clone(),
                tx_hash,
                reason: format!("transaction failed in block {}", receipt.block_number),
            });
        }

        let Some(address) = receipt.contract_address else {
            return Err(DeployError::DeploymentReverted {
                unit: unit.name.clone(),
                tx_hash,
                reason: "receipt carries no contract address".to_string(),
            });
        };

        tracing::info!(
            unit = %unit.name,
            %address,
            block = receipt.block_number,
            gas_used = ?receipt.gas_used,
            "Unit deployed"
        );

        Ok(DeploymentRecord {
            unit: unit.name.clone(),
            address,
            deployer: client.deployer(),
            network: network.name.clone(),
            chain_id: network.chain_id,
            tx_hash,
            block_number: receipt.block_number,
            block_hash: receipt.block_hash,
            gas_budget: budget.gas_limit,
            gas_used: receipt.gas_used,
            args_digest: args_digest(&code.encoded_args),
            timestamp: chrono::Utc::now(),
        })
    }
}
