//! stagehand deploys compiled contracts, directly or behind an upgradeable proxy.

mod cli;

use std::{process::ExitCode, sync::Arc};

use alloy_core::primitives::Address;
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};

use cli::Cli;
use stagehand_deploy::{
    AccountQueues, CancelToken, ContractRegistry, DeployError, DeployStep, DeploymentMode, DeploymentResult,
    DeploymentSpec, ErrorKind, InMemoryNetwork, JsonRpcNetwork, Orchestrator, StagehandConfig,
    cancellation,
};

/// Signer used by dry runs when the configuration names none.
const DRY_RUN_SIGNER: Address = Address::repeat_byte(0x5a);

#[tokio::main]
async fn main() -> ExitCode {
    // `.env` values fill the environment before flags and `${VAR}` are resolved.
    let dotenv = dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize the logger. Stdout is reserved for the result.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .with_writer(std::io::stderr)
        .init();

    if let Some(path) = dotenv {
        tracing::debug!(path = %path.display(), "Loaded environment file");
    }

    let (handle, token) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping before the next submission...");
            handle.cancel();
        }
    });

    match run(&cli, &token).await {
        Ok(result) => {
            println!("{}", render(&result, cli.json));
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{}", err.to_json());
            ExitCode::from(exit_code(err.kind))
        }
    }
}

async fn run(cli: &Cli, cancel: &CancelToken) -> Result<DeploymentResult, DeployError> {
    let spec = cli.deployment_spec()?;
    let config = StagehandConfig::load(cli.config.as_deref()).map_err(configuration)?;

    let artifacts = cli.artifacts.as_ref().unwrap_or(&config.artifacts);
    let registry = ContractRegistry::load_dir(artifacts).map_err(configuration)?;
    let policy = config.confirmation.policy();
    let queues = Arc::new(AccountQueues::new());

    if cli.dry_run {
        let signer = config
            .network(cli.network.as_deref())
            .and_then(|(_, network)| network.signer_address())
            .unwrap_or(DRY_RUN_SIGNER);
        tracing::info!(signer = %signer, "Dry run against an in-memory ledger");

        let network = dry_run_network(&registry, &spec);
        let orchestrator = Orchestrator::new(network, registry, signer, queues)
            .with_policy(policy)
            .with_proxy_contract(config.proxy.contract.clone());
        return orchestrator.run_with_cancel(&spec, cancel).await;
    }

    let (name, network_config) = config
        .network(cli.network.as_deref())
        .map_err(configuration)?;
    let signer = network_config.signer_address().map_err(configuration)?;
    let url = network_config.rpc_url().map_err(configuration)?;
    let mut network = JsonRpcNetwork::new(url).map_err(configuration)?;
    if let Some(wallet) = network_config.wallet().map_err(configuration)? {
        network = network.with_wallet(wallet);
    }

    if let Some(expected) = network_config.chain_id {
        check_chain_id(&network, expected).await?;
    }

    tracing::info!(
        network = name,
        url = %network.url(),
        signer = %signer,
        local_signing = network.wallet_address().is_some(),
        "Using network"
    );

    let orchestrator = Orchestrator::new(network, registry, signer, queues)
        .with_policy(policy)
        .with_proxy_contract(config.proxy.contract.clone());
    orchestrator.run_with_cancel(&spec, cancel).await
}

/// A fresh ledger on which the requested initializer only succeeds once per proxy.
fn dry_run_network(registry: &ContractRegistry, spec: &DeploymentSpec) -> InMemoryNetwork {
    let network = InMemoryNetwork::new();
    if spec.mode != DeploymentMode::Proxied {
        return network;
    }

    let selector = registry.get(&spec.contract_name).and_then(|artifact| {
        artifact.selector(&spec.initializer_name, spec.initializer_args.len())
    });
    if let Some(selector) = selector {
        network.guard_initializer(selector);
    }
    network
}

async fn check_chain_id(network: &JsonRpcNetwork, expected: u64) -> Result<(), DeployError> {
    let actual = network.chain_id().await.map_err(|e| {
        DeployError::new(
            DeployStep::Start,
            ErrorKind::SubmissionError,
            format!("failed to query chain id from {}: {e}", network.url()),
        )
    })?;

    if actual != expected {
        return Err(DeployError::configuration(format!(
            "{} serves chain {actual}, configuration expects {expected}",
            network.url()
        )));
    }
    Ok(())
}

fn configuration(err: anyhow::Error) -> DeployError {
    DeployError::configuration(format!("{err:#}"))
}

fn render(result: &DeploymentResult, json: bool) -> String {
    if json {
        return serde_json::to_string_pretty(result)
            .unwrap_or_else(|_| result.final_address().to_string());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(["Field", "Value"]);
    table.add_row(["Mode".to_string(), result.mode().to_string()]);
    table.add_row(["Address".to_string(), result.final_address().to_string()]);
    if let Some(implementation) = result.implementation_address() {
        table.add_row(["Implementation".to_string(), implementation.to_string()]);
    }
    table.to_string()
}

/// Process exit status for a failed run.
fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::ConfigurationError => 2,
        ErrorKind::Cancelled => 130,
        ErrorKind::SubmissionError
        | ErrorKind::ConfirmationTimeout
        | ErrorKind::InitializationError => 1,
    }
}
