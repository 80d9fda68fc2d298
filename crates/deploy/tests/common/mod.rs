//! Shared fixtures for the orchestrator tests.
//!
//! [`MockChain`] is an in-memory ledger for one signing identity. It mimics
//! just enough of AccessControl / Ownable modules to exercise the wiring
//! predicates, and can be told to fail specific stages.

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Mutex,
};

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, B256, Bytes},
};
use alloy_sol_types::{SolCall, sol};
use anyhow::Result;
use forgeline_deploy::{
    AllowList, ChainClient, ExecutorConfig, NetworkProfile, Orchestrator, OrchestratorBuilder,
    Receipt, RunPolicy, TxRequest,
};
use tempdir::TempDir;

sol! {
    function grantRole(bytes32 role, address account) external;
    function hasRole(bytes32 role, address account) external view returns (bool);
    function transferOwnership(address newOwner) external;
    function owner() external view returns (address);
}

pub const DEPLOYER: Address = Address::repeat_byte(0xde);
pub const CHAIN_ID: u64 = 11155111;
pub const BYTECODE: [u8; 4] = [0x60, 0x80, 0x60, 0x40];

/// Address of the `n`th module the mock creates (0xaaaa…, 0xabab…, …).
pub fn created_address(n: u8) -> Address {
    Address::repeat_byte(0xaa + n)
}

#[derive(Debug, Default)]
struct MockState {
    calls: usize,
    sent: Vec<TxRequest>,
    creations: u8,
    block: u64,
    receipts: HashMap<B256, Receipt>,
    roles: HashSet<(Address, B256, Address)>,
    owners: HashMap<Address, Address>,
    initialized: HashSet<Address>,
    estimate: Option<u64>,
    reported_chain_id: Option<u64>,
    failing_selectors: HashSet<[u8; 4]>,
    revert_creation: bool,
    never_confirm: bool,
    mine_on_poll: bool,
}

#[derive(Debug)]
pub struct MockChain {
    deployer: Address,
    state: Mutex<MockState>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            deployer: DEPLOYER,
            state: Mutex::new(MockState {
                estimate: Some(1_000_000),
                ..Default::default()
            }),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        let mut state = self.state.lock().expect("mock state poisoned");
        f(&mut state)
    }

    /// Every simulation fails.
    pub fn failing_estimates(self) -> Self {
        self.with_state(|s| s.estimate = None);
        self
    }

    pub fn reporting_chain_id(self, chain_id: u64) -> Self {
        self.with_state(|s| s.reported_chain_id = Some(chain_id));
        self
    }

    pub fn reverting_creations(self) -> Self {
        self.with_state(|s| s.revert_creation = true);
        self
    }

    /// Transactions are accepted but never included.
    pub fn never_confirming(self) -> Self {
        self.with_state(|s| s.never_confirm = true);
        self
    }

    /// Every head query mines an empty block, so confirmations accumulate
    /// while a caller polls.
    pub fn mining_on_poll(self) -> Self {
        self.with_state(|s| s.mine_on_poll = true);
        self
    }

    /// Calls with this selector revert.
    pub fn fail_selector(&self, selector: [u8; 4]) {
        self.with_state(|s| s.failing_selectors.insert(selector));
    }

    pub fn clear_failures(&self) {
        self.with_state(|s| s.failing_selectors.clear());
    }

    /// Number of client calls of any kind.
    pub fn calls(&self) -> usize {
        self.with_state(|s| s.calls)
    }

    /// Current head block.
    pub fn head(&self) -> u64 {
        self.with_state(|s| s.block)
    }

    pub fn sent(&self) -> Vec<TxRequest> {
        self.with_state(|s| s.sent.clone())
    }

    pub fn creations(&self) -> Vec<TxRequest> {
        self.sent().into_iter().filter(|tx| tx.to.is_none()).collect()
    }

    pub fn has_role(&self, target: Address, role: B256, account: Address) -> bool {
        self.with_state(|s| s.roles.contains(&(target, role, account)))
    }

    pub fn owner_of(&self, target: Address) -> Option<Address> {
        self.with_state(|s| s.owners.get(&target).copied())
    }

    pub fn is_initialized(&self, target: Address) -> bool {
        self.with_state(|s| s.initialized.contains(&target))
    }

    fn execute(&self, state: &mut MockState, tx: &TxRequest) -> (bool, Option<Address>) {
        let Some(target) = tx.to else {
            if state.revert_creation {
                return (false, None);
            }
            let address = created_address(state.creations);
            state.creations += 1;
            state.owners.insert(address, self.deployer);
            return (true, Some(address));
        };

        let Some(selector) = tx.data.get(..4).and_then(|s| <[u8; 4]>::try_from(s).ok()) else {
            return (false, None);
        };
        if state.failing_selectors.contains(&selector) {
            return (false, None);
        }

        if selector == grantRoleCall::SELECTOR {
            match grantRoleCall::abi_decode(&tx.data, true) {
                Ok(call) => {
                    state.roles.insert((target, call.role, call.account));
                }
                Err(_) => return (false, None),
            }
        } else if selector == transferOwnershipCall::SELECTOR {
            match transferOwnershipCall::abi_decode(&tx.data, true) {
                Ok(call) if state.owners.get(&target) == Some(&tx.from) => {
                    state.owners.insert(target, call.newOwner);
                }
                _ => return (false, None),
            }
        } else {
            state.initialized.insert(target);
        }
        (true, None)
    }
}

impl ChainClient for MockChain {
    fn deployer(&self) -> Address {
        self.deployer
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(self.with_state(|s| {
            s.calls += 1;
            s.reported_chain_id.unwrap_or(CHAIN_ID)
        }))
    }

    async fn estimate_gas(&self, _tx: &TxRequest) -> Result<u64> {
        self.with_state(|s| {
            s.calls += 1;
            s.estimate
        })
        .ok_or_else(|| anyhow::anyhow!("execution reverted"))
    }

    async fn send_transaction(&self, tx: &TxRequest) -> Result<B256> {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.calls += 1;
        state.sent.push(tx.clone());
        state.block += 1;

        let tx_hash = B256::with_last_byte(state.sent.len() as u8);
        let (success, contract_address) = self.execute(&mut state, tx);

        if !state.never_confirm {
            let receipt = Receipt {
                tx_hash,
                success,
                block_number: state.block,
                block_hash: Some(B256::repeat_byte(0xbb)),
                contract_address,
                gas_used: Some(21_000),
            };
            state.receipts.insert(tx_hash, receipt);
        }
        Ok(tx_hash)
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<Receipt>> {
        Ok(self.with_state(|s| {
            s.calls += 1;
            s.receipts.get(&tx_hash).cloned()
        }))
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.with_state(|s| {
            s.calls += 1;
            if s.mine_on_poll {
                s.block += 1;
            }
            s.block
        }))
    }

    async fn call(&self, tx: &TxRequest) -> Result<Bytes> {
        let target = tx.to.ok_or_else(|| anyhow::anyhow!("call without target"))?;
        self.with_state(|s| -> Result<Bytes> {
            s.calls += 1;
            let selector = tx.data.get(..4).unwrap_or_default();
            let output = if selector == hasRoleCall::SELECTOR.as_slice() {
                let call = hasRoleCall::abi_decode(&tx.data, true)?;
                DynSolValue::Bool(s.roles.contains(&(target, call.role, call.account))).abi_encode()
            } else if selector == ownerCall::SELECTOR.as_slice() {
                let owner = s.owners.get(&target).copied().unwrap_or_default();
                DynSolValue::Address(owner).abi_encode()
            } else {
                DynSolValue::Bool(s.initialized.contains(&target)).abi_encode()
            };
            Ok(output.into())
        })
    }
}

/// A unit creation code registry covering `names`.
pub fn artifacts(names: &[&str]) -> HashMap<String, Bytes> {
    names
        .iter()
        .map(|name| (name.to_string(), Bytes::from_static(&BYTECODE)))
        .collect()
}

pub fn sepolia() -> NetworkProfile {
    NetworkProfile {
        name: "sepolia".to_string(),
        chain_id: CHAIN_ID,
        production: false,
    }
}

pub fn fast_executor() -> ExecutorConfig {
    ExecutorConfig {
        confirmations: 1,
        timeout_secs: 1,
        poll_interval_ms: 10,
    }
}

/// On-disk store and record files in a fresh temp dir.
pub struct TestContext {
    pub dir: TempDir,
}

impl TestContext {
    pub fn new(prefix: &str) -> Self {
        Self {
            dir: TempDir::new(prefix).expect("Failed to create temp dir"),
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.dir.path().join(".env")
    }

    pub fn records_path(&self) -> PathBuf {
        self.dir.path().join("deployments.json")
    }

    pub fn seed_store(&self, content: &str) {
        std::fs::write(self.store_path(), content).expect("Failed to seed store");
    }

    pub fn store_content(&self) -> Option<String> {
        read_optional(&self.store_path())
    }

    pub fn orchestrator<'a>(
        &self,
        chain: &'a MockChain,
        names: &[&str],
        policy: RunPolicy,
    ) -> Orchestrator<&'a MockChain, HashMap<String, Bytes>> {
        OrchestratorBuilder::new(chain, artifacts(names))
            .network(sepolia())
            .allow_list(AllowList::chain_ids([CHAIN_ID]))
            .store_path(self.store_path())
            .records_path(self.records_path())
            .externals(forgeline_deploy::ExternalInputs::from_pairs([(
                "DAO_ADDRESS",
                "0x00000000000000000000000000000000000000d0",
            )]))
            .executor(fast_executor())
            .policy(policy)
            .build()
            .expect("Failed to build orchestrator")
    }
}

fn read_optional(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok()
}

/// Initialize tracing for tests (idempotent).
pub fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init()
        .ok();
}
