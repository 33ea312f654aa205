use std::path::PathBuf;

use clap::Parser;
use stagehand_deploy::{DEFAULT_INITIALIZER, DeployError, DeploymentMode, DeploymentSpec, expand_env};
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(
    author,
    version,
    about = "Deploy contracts directly or behind an upgradeable proxy"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "STAGEHAND_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Name of the contract artifact to deploy.
    #[arg(env = "STAGEHAND_CONTRACT")]
    pub contract: String,

    /// Deploy the contract as-is, or behind a proxy followed by an initializer call.
    #[arg(short, long, env = "STAGEHAND_MODE", default_value_t = DeploymentMode::Direct)]
    pub mode: DeploymentMode,

    /// A constructor argument (direct mode). Repeat for each argument, in order.
    ///
    /// Values of the form `${VAR}` are read from the environment.
    #[arg(long = "arg", value_name = "VALUE")]
    pub args: Vec<String>,

    /// An initializer argument (proxied mode). Repeat for each argument, in order.
    ///
    /// Values of the form `${VAR}` are read from the environment.
    #[arg(long = "init-arg", value_name = "VALUE")]
    pub init_args: Vec<String>,

    /// The one-time initializer called through the proxy.
    #[arg(long, env = "STAGEHAND_INITIALIZER", default_value = DEFAULT_INITIALIZER)]
    pub initializer: String,

    /// The configured network to deploy to.
    ///
    /// Defaults to `default_network` from the configuration, or the only configured network.
    #[arg(short, long, env = "STAGEHAND_NETWORK")]
    pub network: Option<String>,

    /// Path to the configuration file, or a directory holding `Stagehand.toml`.
    #[arg(short, long, env = "STAGEHAND_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory of compiled artifacts. Overrides `artifacts` from the configuration.
    #[arg(long, env = "STAGEHAND_ARTIFACTS")]
    pub artifacts: Option<PathBuf>,

    /// Run against an in-memory ledger instead of the configured network.
    #[arg(long, env = "STAGEHAND_DRY_RUN")]
    pub dry_run: bool,

    /// Print the result as JSON.
    #[arg(long, env = "STAGEHAND_JSON")]
    pub json: bool,
}

impl Cli {
    /// The deployment requested on the command line, with `${VAR}` values expanded.
    pub fn deployment_spec(&self) -> Result<DeploymentSpec, DeployError> {
        Ok(DeploymentSpec {
            contract_name: self.contract.clone(),
            mode: self.mode,
            constructor_args: expand_all(&self.args)?,
            initializer_args: expand_all(&self.init_args)?,
            initializer_name: self.initializer.clone(),
        })
    }
}

fn expand_all(values: &[String]) -> Result<Vec<String>, DeployError> {
    values
        .iter()
        .map(|value| expand_env(value))
        .collect::<anyhow::Result<_>>()
        .map_err(|e| DeployError::configuration(format!("{e:#}")))
}
