//! Stagehand configuration: networks, signer, confirmation policy and artifact location.
//!
//! Layered with figment: built-in defaults, then the TOML file, then `STAGEHAND_*`
//! environment variables (`__` separates nested keys, e.g.
//! `STAGEHAND_NETWORKS__RINKEBY__URL`).

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    confirm::{ConfirmationPolicy, DEFAULT_POLL_INTERVAL_MS, DEFAULT_TIMEOUT_SECS},
    orchestrator::DEFAULT_PROXY_CONTRACT,
    wallet::Wallet,
};

/// The default name for the stagehand configuration file.
pub const CONFIG_FILENAME: &str = "Stagehand.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "STAGEHAND_";

/// Replace every `${VAR}` in `value` with the variable's value.
pub fn expand_env(value: &str) -> Result<String> {
    let mut expanded = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        expanded.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .with_context(|| format!("Unterminated `${{` in `{value}`"))?;
        let name = &after[..end];
        let var = std::env::var(name)
            .with_context(|| format!("Environment variable `{name}` is not set"))?;
        expanded.push_str(&var);
        rest = &after[end + 1..];
    }

    expanded.push_str(rest);
    Ok(expanded)
}

/// A configuration value that must not be printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// One target network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// JSON-RPC endpoint. May reference environment variables as `${VAR}`.
    pub url: String,
    /// Expected chain id, checked against the endpoint before deploying.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    /// Signing account, unlocked on the endpoint. Ignored for signing when
    /// `private_key` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<Address>,
    /// Hex private key transactions are signed with locally. May reference `${VAR}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<Secret>,
}

impl NetworkConfig {
    pub fn rpc_url(&self) -> Result<Url> {
        let url = expand_env(&self.url)?;
        Url::parse(&url).with_context(|| format!("Invalid RPC URL `{}`", self.url))
    }

    /// The local signer, when a `private_key` is configured.
    pub fn wallet(&self) -> Result<Option<Wallet>> {
        self.private_key
            .as_ref()
            .map(|key| Wallet::from_hex(&expand_env(key.expose())?))
            .transpose()
    }

    /// The address transactions are sent from.
    ///
    /// Derived from `private_key` when present, in which case `account` must match it.
    pub fn signer_address(&self) -> Result<Address> {
        let derived = self.wallet()?.map(|wallet| wallet.address());

        match (derived, self.account) {
            (Some(derived), Some(account)) if derived != account => anyhow::bail!(
                "Configured account {account} does not match the private key ({derived})"
            ),
            (Some(address), _) | (None, Some(address)) => Ok(address),
            (None, None) => anyhow::bail!("Network has neither `account` nor `private_key`"),
        }
    }
}

/// Confirmation waiting, in config units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub confirmations: u64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            confirmations: 1,
        }
    }
}

impl ConfirmationConfig {
    pub fn policy(&self) -> ConfirmationPolicy {
        ConfirmationPolicy {
            timeout: Duration::from_secs(self.timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            confirmations: self.confirmations.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Artifact deployed in front of proxied implementations.
    pub contract: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            contract: DEFAULT_PROXY_CONTRACT.to_string(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagehandConfig {
    /// Network used when none is named explicitly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_network: Option<String>,
    pub networks: BTreeMap<String, NetworkConfig>,
    pub confirmation: ConfirmationConfig,
    pub proxy: ProxyConfig,
    /// Directory of compiled contract artifacts.
    pub artifacts: PathBuf,
}

impl Default for StagehandConfig {
    fn default() -> Self {
        Self {
            default_network: None,
            networks: BTreeMap::new(),
            confirmation: ConfirmationConfig::default(),
            proxy: ProxyConfig::default(),
            artifacts: PathBuf::from("artifacts"),
        }
    }
}

impl StagehandConfig {
    /// Load the configuration.
    ///
    /// With an explicit `path` (a file, or a directory holding [`CONFIG_FILENAME`]) the
    /// file must exist. Without one, `./Stagehand.toml` is used if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) if !path.exists() => {
                anyhow::bail!("Configuration file or directory not found: {}", path.display())
            }
            Some(path) if path.is_dir() => path.join(CONFIG_FILENAME),
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(CONFIG_FILENAME),
        };

        let config = Self::figment(&file)
            .extract::<Self>()
            .with_context(|| format!("Failed to load configuration from {}", file.display()))?;

        tracing::debug!(
            path = %file.display(),
            networks = config.networks.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    fn figment(file: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Resolve the network to deploy to: `name`, else `default_network`, else the only
    /// configured network.
    pub fn network(&self, name: Option<&str>) -> Result<(&str, &NetworkConfig)> {
        let name = match name.or(self.default_network.as_deref()) {
            Some(name) => name,
            None if self.networks.len() == 1 => {
                let (name, network) = self
                    .networks
                    .iter()
                    .next()
                    .context("No network configured")?;
                return Ok((name.as_str(), network));
            }
            None if self.networks.is_empty() => anyhow::bail!("No network configured"),
            None => anyhow::bail!(
                "Several networks configured ({}), pick one with --network",
                self.network_names().join(", ")
            ),
        };

        self.networks
            .get_key_value(name)
            .map(|(name, network)| (name.as_str(), network))
            .with_context(|| {
                format!(
                    "Unknown network `{name}` (configured: {})",
                    self.network_names().join(", ")
                )
            })
    }

    fn network_names(&self) -> Vec<&str> {
        self.networks.keys().map(String::as_str).collect()
    }
}
