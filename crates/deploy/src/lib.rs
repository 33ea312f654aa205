//! stagehand-deploy - Contract deployment library.
//!
//! This crate deploys compiled contracts either directly or behind an upgradeable
//! proxy followed by a one-time initializer call, confirming every transaction before
//! the next one is submitted.

mod artifact;
pub use artifact::{ArtifactError, ContractArtifact, ContractRegistry};

mod cancel;
pub use cancel::{CancelHandle, CancelToken, cancellation};

mod config;
pub use config::{
    CONFIG_FILENAME, ConfirmationConfig, ENV_PREFIX, NetworkConfig, ProxyConfig, Secret,
    StagehandConfig, expand_env,
};

mod confirm;
pub use confirm::{
    ConfirmationPolicy, ConfirmationTimeout, DEFAULT_POLL_INTERVAL_MS, DEFAULT_TIMEOUT_SECS,
    wait_for_receipt,
};

mod error;
pub use error::{DeployError, ErrorKind};

mod factory;
pub use factory::{ContractFactory, FactoryContext, FactoryError};

pub mod network;
pub use network::{InMemoryNetwork, JsonRpcNetwork, NetworkClient, NetworkError};

mod nonce;
pub use nonce::AccountQueues;

mod orchestrator;
pub use orchestrator::{DEFAULT_PROXY_CONTRACT, Orchestrator};

mod protocol;
pub use protocol::{ProxyDeployment, ProxyInitializer, ProxyState};

mod spec;
pub use spec::{DEFAULT_INITIALIZER, DeploymentSpec};

mod types;
pub use types::{
    Confirmation, DeployStep, DeploymentMode, DeploymentResult, PartialAddresses,
    PendingDeployment, TxHandle,
};

mod wallet;
pub use wallet::{LegacyTransaction, Wallet};
