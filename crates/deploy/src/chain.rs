//! The seam between the pipeline and the ledger.
//!
//! Signing and transport are out of scope for the pipeline; it only needs a
//! client that can simulate, submit and observe transactions for one signing
//! identity. [`crate::rpc::JsonRpcClient`] implements it over JSON-RPC.

use std::future::Future;

use alloy_core::primitives::{Address, B256, Bytes};
use anyhow::Result;

/// A transaction to simulate or submit. `to = None` creates a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub from: Address,
    pub to: Option<Address>,
    pub data: Bytes,
    pub gas: Option<u64>,
}

impl TxRequest {
    pub fn create(from: Address, data: Bytes) -> Self {
        Self {
            from,
            to: None,
            data,
            gas: None,
        }
    }

    pub fn call(from: Address, to: Address, data: Bytes) -> Self {
        Self {
            from,
            to: Some(to),
            data,
            gas: None,
        }
    }

    pub fn with_gas(mut self, gas: u64) -> Self {
        self.gas = Some(gas);
        self
    }
}

/// Inclusion receipt of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: B256,
    pub success: bool,
    pub block_number: u64,
    pub block_hash: Option<B256>,
    pub contract_address: Option<Address>,
    pub gas_used: Option<u64>,
}

/// Ledger client for a single signing identity.
///
/// Transactions of one identity are sequence-numbered, so callers submit
/// them one at a time and wait for each before sending the next.
pub trait ChainClient {
    /// The signing identity transactions are sent from.
    fn deployer(&self) -> Address;

    fn chain_id(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Simulate `tx` and return the gas it would use.
    fn estimate_gas(&self, tx: &TxRequest) -> impl Future<Output = Result<u64>> + Send;

    /// Broadcast `tx`, returning its hash once the node accepted it.
    fn send_transaction(&self, tx: &TxRequest) -> impl Future<Output = Result<B256>> + Send;

    /// `None` while the transaction is not yet included.
    fn transaction_receipt(
        &self,
        tx_hash: B256,
    ) -> impl Future<Output = Result<Option<Receipt>>> + Send;

    fn block_number(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Execute a read-only call against the latest state.
    fn call(&self, tx: &TxRequest) -> impl Future<Output = Result<Bytes>> + Send;
}

impl<T: ChainClient + Sync> ChainClient for &T {
    fn deployer(&self) -> Address {
        (**self).deployer()
    }

    fn chain_id(&self) -> impl Future<Output = Result<u64>> + Send {
        (**self).chain_id()
    }

    fn estimate_gas(&self, tx: &TxRequest) -> impl Future<Output = Result<u64>> + Send {
        (**self).estimate_gas(tx)
    }

    fn send_transaction(&self, tx: &TxRequest) -> impl Future<Output = Result<B256>> + Send {
        (**self).send_transaction(tx)
    }

    fn transaction_receipt(
        &self,
        tx_hash: B256,
    ) -> impl Future<Output = Result<Option<Receipt>>> + Send {
        (**self).transaction_receipt(tx_hash)
    }

    fn block_number(&self) -> impl Future<Output = Result<u64>> + Send {
        (**self).block_number()
    }

    fn call(&self, tx: &TxRequest) -> impl Future<Output = Result<Bytes>> + Send {
        (**self).call(tx)
    }
}
