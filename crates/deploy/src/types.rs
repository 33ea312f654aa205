//! Value types shared by the factory, the proxy protocol and the orchestrator.

use alloy_core::primitives::{Address, B256};
use derive_more::{Deref, Display, From};
use serde::{Deserialize, Serialize};

/// Opaque reference to a submitted transaction (its hash).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Deref, Display, From, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TxHandle(pub B256);

/// How a contract is published on-chain.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DeploymentMode {
    /// The contract is deployed as-is and its constructor runs.
    #[default]
    Direct,
    /// An implementation is deployed behind an upgradeable proxy and initialized once.
    Proxied,
}

/// The step of a deployment run a failure is attributed to.
///
/// Each step names the state the run was trying to reach.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
pub enum DeployStep {
    /// Validation, before any transaction is submitted.
    Start,
    /// The single deployment of a direct run.
    Deployed,
    ImplementationDeployed,
    ProxyDeployed,
    Initialized,
}

/// Addresses already confirmed on-chain when a run stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialAddresses {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implementation: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<Address>,
}

impl PartialAddresses {
    /// Returns true when nothing has been confirmed yet.
    pub fn is_empty(&self) -> bool {
        self.contract.is_none() && self.implementation.is_none() && self.proxy.is_none()
    }
}

/// A submitted contract creation, owned by the run that created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDeployment {
    tx: TxHandle,
    contract_address: Option<Address>,
}

impl PendingDeployment {
    pub(crate) fn new(tx: TxHandle) -> Self {
        Self {
            tx,
            contract_address: None,
        }
    }

    /// The creation transaction.
    pub fn tx(&self) -> TxHandle {
        self.tx
    }

    /// The deployed address, unset until the creation is confirmed.
    pub fn contract_address(&self) -> Option<Address> {
        self.contract_address
    }

    pub(crate) fn mark_confirmed(&mut self, address: Address) {
        debug_assert!(self.contract_address.is_none(), "deployment confirmed twice");
        self.contract_address = Some(address);
    }
}

/// A confirmed function call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Confirmation {
    pub tx: TxHandle,
    pub block_number: u64,
}

/// The terminal output of a successful run.
///
/// A proxied result always carries the implementation address; a direct result never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeploymentResult {
    final_address: Address,
    mode: DeploymentMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    implementation_address: Option<Address>,
}

impl DeploymentResult {
    pub(crate) fn direct(address: Address) -> Self {
        Self {
            final_address: address,
            mode: DeploymentMode::Direct,
            implementation_address: None,
        }
    }

    pub(crate) fn proxied(implementation: Address, proxy: Address) -> Self {
        Self {
            final_address: proxy,
            mode: DeploymentMode::Proxied,
            implementation_address: Some(implementation),
        }
    }

    /// The user-facing address: the contract itself, or the proxy.
    pub fn final_address(&self) -> Address {
        self.final_address
    }

    pub fn mode(&self) -> DeploymentMode {
        self.mode
    }

    pub fn implementation_address(&self) -> Option<Address> {
        self.implementation_address
    }
}
