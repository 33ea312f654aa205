//! Network clients: the collaborator that submits transactions and reports their outcome.

mod memory;
mod rpc;

use std::future::Future;

use alloy_core::primitives::{Address, Bytes};

pub use memory::{Fault, InMemoryNetwork, LedgerEvent, TxKind};
pub use rpc::JsonRpcNetwork;

use crate::types::TxHandle;

/// A transaction ready for submission. Creation when `to` is unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub from: Address,
    pub to: Option<Address>,
    pub data: Bytes,
    pub nonce: u64,
}

/// Receipt of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub block_number: u64,
    pub contract_address: Option<Address>,
    pub success: bool,
}

/// Observed state of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Mined(TxReceipt),
}

/// Errors surfaced by a [`NetworkClient`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum NetworkError {
    /// The network refused the transaction (funds, nonce, gas...).
    #[error("transaction rejected: {0}")]
    Rejected(String),
    /// The node refused the transaction because execution would revert.
    #[error("execution reverted: {0}")]
    Reverted(String),
    /// The node could not be reached or answered garbage.
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<anyhow::Error> for NetworkError {
    fn from(err: anyhow::Error) -> Self {
        Self::Transport(format!("{err:#}"))
    }
}

/// Transaction submission and observation against one chain.
///
/// Implementations never encode or sign on behalf of the caller beyond what the
/// request carries, and never retry submissions.
pub trait NetworkClient: Send + Sync {
    /// Submit a transaction, returning its handle once the network accepted it.
    fn submit(
        &self,
        tx: TxRequest,
    ) -> impl Future<Output = Result<TxHandle, NetworkError>> + Send;

    /// Look up the current status of a transaction.
    fn transaction_status(
        &self,
        tx: TxHandle,
    ) -> impl Future<Output = Result<TxStatus, NetworkError>> + Send;

    /// The latest block number.
    fn block_number(&self) -> impl Future<Output = Result<u64, NetworkError>> + Send;

    /// The next nonce for `account`, including pending transactions.
    fn pending_nonce(
        &self,
        account: Address,
    ) -> impl Future<Output = Result<u64, NetworkError>> + Send;
}
