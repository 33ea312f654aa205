//! The input of a deployment run.

use serde::{Deserialize, Serialize};

use crate::{error::DeployError, types::DeploymentMode};

/// Default name of the one-time initializer of proxied contracts.
pub const DEFAULT_INITIALIZER: &str = "initialize";

fn default_initializer() -> String {
    DEFAULT_INITIALIZER.to_string()
}

/// What to deploy and how. Not modified once a run starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    /// Name of the contract artifact.
    pub contract_name: String,
    #[serde(default)]
    pub mode: DeploymentMode,
    /// Constructor arguments, direct mode only.
    #[serde(default)]
    pub constructor_args: Vec<String>,
    /// Initializer arguments, proxied mode only.
    #[serde(default)]
    pub initializer_args: Vec<String>,
    #[serde(default = "default_initializer")]
    pub initializer_name: String,
}

impl DeploymentSpec {
    /// Deploy `contract_name` as-is.
    pub fn direct(contract_name: impl Into<String>, constructor_args: Vec<String>) -> Self {
        Self {
            contract_name: contract_name.into(),
            mode: DeploymentMode::Direct,
            constructor_args,
            initializer_args: Vec::new(),
            initializer_name: default_initializer(),
        }
    }

    /// Deploy `contract_name` behind a proxy and call `initialize(initializer_args)`.
    pub fn proxied(contract_name: impl Into<String>, initializer_args: Vec<String>) -> Self {
        Self {
            contract_name: contract_name.into(),
            mode: DeploymentMode::Proxied,
            constructor_args: Vec::new(),
            initializer_args,
            initializer_name: default_initializer(),
        }
    }

    /// Use a different initializer function.
    pub fn with_initializer(mut self, name: impl Into<String>) -> Self {
        self.initializer_name = name.into();
        self
    }

    /// Check the fields that do not depend on artifacts.
    pub fn validate(&self) -> Result<(), DeployError> {
        if self.contract_name.trim().is_empty() {
            return Err(DeployError::configuration("contract name is empty"));
        }

        match self.mode {
            DeploymentMode::Direct if !self.initializer_args.is_empty() => {
                Err(DeployError::configuration(
                    "initializer arguments are only valid for proxied deployments",
                ))
            }
            DeploymentMode::Direct => Ok(()),
            DeploymentMode::Proxied if !self.constructor_args.is_empty() => {
                Err(DeployError::configuration(
                    "proxied implementations are deployed without constructor arguments",
                ))
            }
            DeploymentMode::Proxied if self.initializer_name.trim().is_empty() => {
                Err(DeployError::configuration("initializer name is empty"))
            }
            DeploymentMode::Proxied if self.initializer_args.is_empty() => {
                Err(DeployError::configuration(format!(
                    "proxied deployment of {} requires initializer arguments for `{}`",
                    self.contract_name, self.initializer_name
                )))
            }
            DeploymentMode::Proxied => Ok(()),
        }
    }
}
