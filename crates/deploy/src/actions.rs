//! Ordered post-deploy wiring.
//!
//! Each action is guarded by an idempotency predicate read from chain state.
//! The runner stops at the first failure and never retracts what already ran.

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue},
    primitives::{Address, B256, Bytes, keccak256},
};
use alloy_sol_types::{SolCall, sol};

use crate::{
    chain::{ChainClient, TxRequest},
    estimator::Estimator,
    executor::{ExecutorConfig, wait_for_confirmation},
    resolver::{ResolvedParams, ResolvedValue},
    unit::{ConstructorParam, GasPolicy, PostDeployAction, action_input_name},
};

sol! {
    function grantRole(bytes32 role, address account) external;
    function hasRole(bytes32 role, address account) external view returns (bool);
    function transferOwnership(address newOwner) external;
    function owner() external view returns (address);
}

/// What happened to one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionStatus {
    Completed { tx_hash: B256 },
    /// The predicate already held on chain.
    Skipped,
    Failed { reason: String },
    /// An earlier action failed.
    NotAttempted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionEntry {
    pub label: String,
    pub status: ActionStatus,
}

/// Per-action outcome of a wiring run, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionReport {
    pub entries: Vec<ActionEntry>,
}

impl ActionReport {
    /// The first failed action and its reason.
    pub fn failure(&self) -> Option<(&str, &str)> {
        self.entries.iter().find_map(|entry| match &entry.status {
            ActionStatus::Failed { reason } => Some((entry.label.as_str(), reason.as_str())),
            _ => None,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(|entry| {
            matches!(
                entry.status,
                ActionStatus::Completed { .. } | ActionStatus::Skipped
            )
        })
    }

    pub fn completed(&self) -> impl Iterator<Item = &ActionEntry> {
        self.entries
            .iter()
            .filter(|entry| matches!(entry.status, ActionStatus::Completed { .. }))
    }

    pub fn skipped(&self) -> impl Iterator<Item = &ActionEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.status == ActionStatus::Skipped)
    }
}

/// State check deciding whether an action is already done.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    HasRole { role: B256, account: Address },
    OwnerIs(Address),
    /// Zero-argument view returning `bool`.
    View(Bytes),
}

#[derive(Debug, Clone)]
struct PreparedCall {
    calldata: Bytes,
    predicate: Predicate,
}

/// Everything an action run needs besides the actions themselves.
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    pub unit: &'a str,
    pub target: Address,
    pub params: &'a ResolvedParams,
    pub gas: &'a GasPolicy,
    pub executor: &'a ExecutorConfig,
}

pub struct PostDeployActionsRunner;

impl PostDeployActionsRunner {
    /// Run `actions` in order against `ctx.target`.
    pub async fn run<C: ChainClient>(
        client: &C,
        actions: &[PostDeployAction],
        ctx: ActionContext<'_>,
    ) -> ActionReport {
        let mut report = ActionReport::default();
        let mut halted = false;

        for (index, action) in actions.iter().enumerate() {
            let label = action.label();
            let status = if halted {
                ActionStatus::NotAttempted
            } else {
                let status = Self::run_one(client, index, action, &label, ctx).await;
                if let ActionStatus::Failed { reason } = &status {
                    tracing::warn!(
                        unit = ctx.unit,
                        action = %label,
                        %reason,
                        "Post-deploy action failed, stopping wiring"
                    );
                    halted = true;
                }
                status
            };
            report.entries.push(ActionEntry { label, status });
        }

        report
    }

    async fn run_one<C: ChainClient>(
        client: &C,
        index: usize,
        action: &PostDeployAction,
        label: &str,
        ctx: ActionContext<'_>,
    ) -> ActionStatus {
        let call = match prepare(index, action, ctx.params) {
            Ok(call) => call,
            Err(reason) => return ActionStatus::Failed { reason },
        };

        match predicate_holds(client, ctx.target, &call.predicate).await {
            Ok(true) => {
                tracing::info!(unit = ctx.unit, action = %label, "Already applied, skipping");
                return ActionStatus::Skipped;
            }
            Ok(false) => {}
            Err(reason) => {
                return ActionStatus::Failed {
                    reason: format!("idempotency check failed: {}", reason),
                };
            }
        }

        let tx = TxRequest::call(client.deployer(), ctx.target, call.calldata);
        let budget = Estimator::estimate(client, ctx.unit, ctx.gas, &tx).await;
        let tx = tx.with_gas(budget.gas_limit);

        let tx_hash = match client.send_transaction(&tx).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => {
                return ActionStatus::Failed {
                    reason: format!("broadcast failed: {:#}", e),
                };
            }
        };

        match wait_for_confirmation(client, tx_hash, ctx.executor).await {
            Ok(receipt) if receipt.success => {
                tracing::info!(
                    unit = ctx.unit,
                    action = %label,
                    %tx_hash,
                    "Post-deploy action confirmed"
                );
                ActionStatus::Completed { tx_hash }
            }
            Ok(_) => ActionStatus::Failed {
                reason: format!("reverted in transaction {}", tx_hash),
            },
            Err(elapsed) => ActionStatus::Failed {
                reason: format!(
                    "no confirmation after {:?}; transaction {} may still land",
                    elapsed.waited, tx_hash
                ),
            },
        }
    }
}

fn prepare(
    index: usize,
    action: &PostDeployAction,
    params: &ResolvedParams,
) -> Result<PreparedCall, String> {
    let address_input = |arg: &str| -> Result<Address, String> {
        let name = action_input_name(index, arg);
        params
            .get(&name)
            .ok_or_else(|| format!("input `{}` was not resolved", name))?
            .as_address()
    };

    match action {
        PostDeployAction::GrantRole { role, .. } => {
            let role = role.to_b256();
            let account = address_input("grantee")?;
            Ok(PreparedCall {
                calldata: grantRoleCall { role, account }.abi_encode().into(),
                predicate: Predicate::HasRole { role, account },
            })
        }
        PostDeployAction::TransferOwnership { .. } => {
            let new_owner = address_input("new_owner")?;
            Ok(PreparedCall {
                calldata: transferOwnershipCall { newOwner: new_owner }.abi_encode().into(),
                predicate: Predicate::OwnerIs(new_owner),
            })
        }
        PostDeployAction::Initialize {
            signature,
            args,
            skip_if,
        } => {
            let view = skip_if
                .as_deref()
                .ok_or_else(|| format!("`{}` declares no `skip_if` view", signature))?;
            Ok(PreparedCall {
                calldata: encode_call(signature, index, args, params)?,
                predicate: Predicate::View(view_calldata(view)),
            })
        }
    }
}

async fn predicate_holds<C: ChainClient>(
    client: &C,
    target: Address,
    predicate: &Predicate,
) -> Result<bool, String> {
    let data: Bytes = match predicate {
        Predicate::HasRole { role, account } => hasRoleCall {
            role: *role,
            account: *account,
        }
        .abi_encode()
        .into(),
        Predicate::OwnerIs(_) => ownerCall {}.abi_encode().into(),
        Predicate::View(data) => data.clone(),
    };

    let output = client
        .call(&TxRequest::call(client.deployer(), target, data))
        .await
        .map_err(|e| format!("{:#}", e))?;

    match predicate {
        Predicate::HasRole { .. } | Predicate::View(_) => decode_bool(&output),
        Predicate::OwnerIs(expected) => {
            let current = ownerCall::abi_decode_returns(&output, true)
                .map_err(|e| format!("cannot decode owner(): {}", e))?
                ._0;
            Ok(current == *expected)
        }
    }
}

fn decode_bool(output: &[u8]) -> Result<bool, String> {
    match DynSolType::Bool.abi_decode(output) {
        Ok(DynSolValue::Bool(value)) => Ok(value),
        Ok(other) => Err(format!("expected bool, got {:?}", other)),
        Err(e) => Err(format!("cannot decode bool: {}", e)),
    }
}

/// Calldata of a zero-argument view, given as `name` or `name()`.
fn view_calldata(view: &str) -> Bytes {
    let view = view.trim();
    let signature = if view.ends_with(')') {
        view.to_string()
    } else {
        format!("{}()", view)
    };
    Bytes::copy_from_slice(&keccak256(signature.as_bytes())[..4])
}

/// Split `name(t1,t2)` into its argument types.
fn signature_types(signature: &str) -> Result<Vec<DynSolType>, String> {
    let open = signature
        .find('(')
        .ok_or_else(|| format!("`{}` is not a function signature", signature))?;
    let inner = signature[open..]
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| format!("`{}` is not a function signature", signature))?;

    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    DynSolType::parse(&format!("({})", inner))
        .map_err(|e| format!("cannot parse `{}`: {}", signature, e))
        .and_then(|ty| match ty {
            DynSolType::Tuple(types) => Ok(types),
            other => Ok(vec![other]),
        })
}

/// Fit a resolved value to the type a signature expects.
fn coerce(value: &ResolvedValue, ty: &DynSolType) -> Result<DynSolValue, String> {
    let value = value.to_sol_value()?;
    match (ty, value) {
        (DynSolType::Address, v @ DynSolValue::Address(_))
        | (DynSolType::String, v @ DynSolValue::String(_))
        | (DynSolType::Bytes, v @ DynSolValue::Bytes(_)) => Ok(v),
        (DynSolType::Uint(bits), DynSolValue::Uint(v, _)) => {
            if v.bit_len() > *bits {
                return Err(format!("{} does not fit in uint{}", v, bits));
            }
            Ok(DynSolValue::Uint(v, *bits))
        }
        (DynSolType::FixedBytes(size), DynSolValue::Bytes(bytes)) => {
            if bytes.len() != *size {
                return Err(format!("expected {} bytes, got {}", size, bytes.len()));
            }
            let mut word = B256::ZERO;
            word[..*size].copy_from_slice(&bytes);
            Ok(DynSolValue::FixedBytes(word, *size))
        }
        (ty, value) => Err(format!("cannot pass {:?} as {}", value, ty)),
    }
}

fn encode_call(
    signature: &str,
    index: usize,
    args: &[ConstructorParam],
    params: &ResolvedParams,
) -> Result<Bytes, String> {
    let types = signature_types(signature)?;
    if types.len() != args.len() {
        return Err(format!(
            "`{}` takes {} argument(s), {} declared",
            signature,
            types.len(),
            args.len()
        ));
    }

    let values = args
        .iter()
        .zip(&types)
        .map(|(arg, ty)| {
            let name = action_input_name(index, &arg.key);
            let value = params
                .get(&name)
                .ok_or_else(|| format!("input `{}` was not resolved", name))?;
            coerce(value, ty).map_err(|reason| format!("argument `{}`: {}", arg.key, reason))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut calldata = keccak256(signature.replace(' ', "").as_bytes())[..4].to_vec();
    if !values.is_empty() {
        calldata.extend(DynSolValue::Tuple(values).abi_encode_params());
    }
    Ok(calldata.into())
}
