//! Integration tests for stagehand-deploy.
//!
//! Every run goes through the in-memory ledger: artifacts are written to a temporary
//! directory, loaded back through the registry and deployed end to end.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use alloy_core::primitives::Address;
use stagehand_deploy::{
    AccountQueues, CancelHandle, CancelToken, ConfirmationPolicy, ContractRegistry, DeployError,
    DeployStep, DeploymentMode, DeploymentSpec, ErrorKind, FactoryContext, FactoryError,
    InMemoryNetwork, NetworkClient, NetworkError, Orchestrator, PartialAddresses, TxHandle,
    cancellation,
    network::{Fault, LedgerEvent, TxKind, TxRequest, TxStatus},
};
use tempdir::TempDir;

const SIGNER: Address = Address::repeat_byte(0x5e);
const ADMIN: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
const BASE_URI: &str = "ipfs://base/";

const TOKEN: &str = r#"{
    "_format": "hh-sol-artifact-1",
    "contractName": "Token",
    "sourceName": "contracts/Token.sol",
    "abi": [
        {"type": "constructor", "inputs": [], "stateMutability": "nonpayable"},
        {"type": "function", "name": "totalSupply", "inputs": [],
         "outputs": [{"name": "", "type": "uint256"}], "stateMutability": "view"}
    ],
    "bytecode": "0x6080604052348015600f57600080fd5b50",
    "deployedBytecode": "0x6080604052",
    "linkReferences": {},
    "deployedLinkReferences": {}
}"#;

const LAND: &str = r#"{
    "_format": "hh-sol-artifact-1",
    "contractName": "Land",
    "sourceName": "contracts/Land.sol",
    "abi": [
        {"type": "function", "name": "initialize", "stateMutability": "nonpayable",
         "inputs": [{"name": "adminSigner", "type": "address"}, {"name": "uri", "type": "string"}],
         "outputs": []},
        {"type": "function", "name": "uri", "stateMutability": "view",
         "inputs": [{"name": "id", "type": "uint256"}],
         "outputs": [{"name": "", "type": "string"}]}
    ],
    "bytecode": "0x608060405234801561001057600080fd5b50",
    "deployedBytecode": "0x6080604052",
    "linkReferences": {},
    "deployedLinkReferences": {}
}"#;

const PROXY: &str = r#"{
    "_format": "hh-sol-artifact-1",
    "contractName": "ERC1967Proxy",
    "sourceName": "@openzeppelin/contracts/proxy/ERC1967/ERC1967Proxy.sol",
    "abi": [
        {"type": "constructor", "stateMutability": "payable", "inputs": [
            {"name": "implementation", "type": "address"},
            {"name": "_data", "type": "bytes"}
        ]},
        {"type": "fallback", "stateMutability": "payable"}
    ],
    "bytecode": "0x60806040526040516104",
    "deployedBytecode": "0x6080604052",
    "linkReferences": {},
    "deployedLinkReferences": {}
}"#;

/// Test setup: compiled artifacts on disk, a fresh ledger and the process-wide
/// account queues every orchestrator built from it shares.
struct TestContext {
    _dir: TempDir,
    registry: ContractRegistry,
    network: InMemoryNetwork,
    queues: Arc<AccountQueues>,
}

impl TestContext {
    fn new() -> Self {
        Self::with_network(InMemoryNetwork::new())
    }

    fn with_network(network: InMemoryNetwork) -> Self {
        let dir = TempDir::new("stagehand-it").unwrap();
        for (path, json) in [
            ("contracts/Token.sol/Token.json", TOKEN),
            ("contracts/Land.sol/Land.json", LAND),
            ("@openzeppelin/ERC1967Proxy.sol/ERC1967Proxy.json", PROXY),
        ] {
            let path = dir.path().join(path);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, json).unwrap();
        }

        let registry = ContractRegistry::load_dir(dir.path()).unwrap();
        let initialize = registry
            .get("Land")
            .and_then(|land| land.selector("initialize", 2))
            .unwrap();
        network.guard_initializer(initialize);

        Self {
            _dir: dir,
            registry,
            network,
            queues: Arc::new(AccountQueues::new()),
        }
    }

    fn orchestrator(&self) -> Orchestrator<InMemoryNetwork> {
        self.orchestrator_on(self.network.clone())
    }

    fn orchestrator_on<N: NetworkClient>(&self, network: N) -> Orchestrator<N> {
        Orchestrator::new(network, self.registry.clone(), SIGNER, self.queues.clone())
            .with_policy(policy())
    }
}

fn policy() -> ConfirmationPolicy {
    ConfirmationPolicy {
        timeout: Duration::from_millis(200),
        poll_interval: Duration::from_millis(1),
        confirmations: 1,
    }
}

fn land_spec() -> DeploymentSpec {
    DeploymentSpec::proxied("Land", vec![ADMIN.to_string(), BASE_URI.to_string()])
}

fn submitted_txs(network: &InMemoryNetwork) -> Vec<TxHandle> {
    network
        .events()
        .into_iter()
        .filter_map(|event| match event {
            LedgerEvent::Submitted { tx, .. } => Some(tx),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_direct_deploy() {
    let ctx = TestContext::new();
    let result = ctx
        .orchestrator()
        .run(&DeploymentSpec::direct("Token", vec![]))
        .await
        .unwrap();

    assert_eq!(result.mode(), DeploymentMode::Direct);
    assert_eq!(result.final_address(), SIGNER.create(0));
    assert_eq!(result.implementation_address(), None);
    assert!(ctx.network.has_code(result.final_address()));
    assert_eq!(ctx.network.submitted(), vec![TxKind::Create]);
}

#[tokio::test]
async fn test_proxied_deploy() {
    let ctx = TestContext::new();
    let result = ctx.orchestrator().run(&land_spec()).await.unwrap();

    let implementation = SIGNER.create(0);
    let proxy = SIGNER.create(1);
    assert_eq!(result.mode(), DeploymentMode::Proxied);
    assert_eq!(result.final_address(), proxy);
    assert_eq!(result.implementation_address(), Some(implementation));
    assert_ne!(result.final_address(), implementation);

    let selector = ctx.registry.get("Land").unwrap().selector("initialize", 2);
    assert_eq!(
        ctx.network.submitted(),
        vec![
            TxKind::Create,
            TxKind::Create,
            TxKind::Call {
                to: proxy,
                selector
            },
        ]
    );
}

#[tokio::test]
async fn test_result_json() {
    let ctx = TestContext::new();
    let result = ctx.orchestrator().run(&land_spec()).await.unwrap();
    let json = serde_json::to_value(result).unwrap();
    assert_eq!(json["mode"], "proxied");
    assert!(json["final_address"].is_string());
    assert!(json["implementation_address"].is_string());
}

#[tokio::test]
async fn test_proxy_submission_rejected() {
    let ctx = TestContext::new();
    ctx.network
        .inject(1, Fault::Reject("insufficient funds for gas".into()));

    let err = ctx.orchestrator().run(&land_spec()).await.unwrap_err();
    assert_eq!(err.step, DeployStep::ProxyDeployed);
    assert_eq!(err.kind, ErrorKind::SubmissionError);
    assert_eq!(
        err.partial_addresses,
        PartialAddresses {
            implementation: Some(SIGNER.create(0)),
            ..Default::default()
        }
    );
    assert_eq!(ctx.network.submitted(), vec![TxKind::Create]);
}

#[tokio::test]
async fn test_confirmation_timeout_reports_handle() {
    let ctx = TestContext::new();
    ctx.network.inject(0, Fault::NeverConfirm);

    let err = ctx
        .orchestrator()
        .run(&DeploymentSpec::direct("Token", vec![]))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ConfirmationTimeout);
    assert_eq!(err.step, DeployStep::Deployed);
    assert_eq!(err.tx, submitted_txs(&ctx.network).first().copied());
    assert!(err.partial_addresses.is_empty());
}

#[tokio::test]
async fn test_initializer_timeout_keeps_both_addresses() {
    let ctx = TestContext::new();
    ctx.network.inject(2, Fault::NeverConfirm);

    let err = ctx.orchestrator().run(&land_spec()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ConfirmationTimeout);
    assert_eq!(err.step, DeployStep::Initialized);
    assert_eq!(err.tx, submitted_txs(&ctx.network).get(2).copied());
    assert_eq!(err.partial_addresses.implementation, Some(SIGNER.create(0)));
    assert_eq!(err.partial_addresses.proxy, Some(SIGNER.create(1)));
}

#[tokio::test]
async fn test_second_initializer_call_fails() {
    let ctx = TestContext::new();
    let result = ctx.orchestrator().run(&land_spec()).await.unwrap();

    let (policy, cancel) = (policy(), CancelToken::never());
    let land = ctx.registry.get("Land").unwrap();
    let factory = FactoryContext {
        network: &ctx.network,
        queues: &ctx.queues,
        signer: SIGNER,
        policy: &policy,
        cancel: &cancel,
    }
    .factory(land);

    let args = [ADMIN.to_string(), BASE_URI.to_string()];
    let err = factory
        .invoke(result.final_address(), "initialize", &args)
        .await
        .unwrap_err();
    assert!(matches!(err, FactoryError::Reverted { .. }));

    let err = DeployError::from_factory(DeployStep::Initialized, err, Default::default());
    assert_eq!(err.kind, ErrorKind::InitializationError);
}

#[tokio::test]
async fn test_initializer_refused_by_node() {
    let ctx = TestContext::new();
    ctx.network.inject(
        2,
        Fault::RevertOnSubmit(
            "execution reverted: Initializable: contract is already initialized".into(),
        ),
    );

    let err = ctx.orchestrator().run(&land_spec()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InitializationError);
    assert_eq!(err.step, DeployStep::Initialized);
    assert_eq!(err.partial_addresses.proxy, Some(SIGNER.create(1)));
}

#[tokio::test]
async fn test_proxy_waits_for_implementation_confirmation() {
    let ctx = TestContext::with_network(InMemoryNetwork::new().with_latency(5));
    ctx.orchestrator().run(&land_spec()).await.unwrap();

    let events = ctx.network.events();
    let position = |predicate: &dyn Fn(&LedgerEvent) -> bool| {
        events.iter().position(predicate).unwrap()
    };
    let txs = submitted_txs(&ctx.network);

    for step in 1..3 {
        let previous_mined =
            position(&|e| matches!(e, LedgerEvent::Mined { tx, .. } if *tx == txs[step - 1]));
        let submitted =
            position(&|e| matches!(e, LedgerEvent::Submitted { index, .. } if *index == step));
        assert!(
            previous_mined < submitted,
            "transaction {step} submitted before its predecessor was mined"
        );
    }
}

#[tokio::test]
async fn test_cancel_before_start_has_no_effect() {
    let ctx = TestContext::new();
    let (handle, token) = cancellation();
    handle.cancel();

    let err = ctx
        .orchestrator()
        .run_with_cancel(&land_spec(), &token)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert!(err.partial_addresses.is_empty());
    assert!(ctx.network.events().is_empty());
}

/// Cancels the run once a given number of transactions have been seen mined.
struct CancelAfterMined {
    inner: InMemoryNetwork,
    handle: CancelHandle,
    after: usize,
    mined: AtomicUsize,
}

impl NetworkClient for CancelAfterMined {
    async fn submit(&self, tx: TxRequest) -> Result<TxHandle, NetworkError> {
        self.inner.submit(tx).await
    }

    async fn transaction_status(&self, tx: TxHandle) -> Result<TxStatus, NetworkError> {
        let status = self.inner.transaction_status(tx).await?;
        if matches!(status, TxStatus::Mined(_))
            && self.mined.fetch_add(1, Ordering::SeqCst) + 1 == self.after
        {
            self.handle.cancel();
        }
        Ok(status)
    }

    async fn block_number(&self) -> Result<u64, NetworkError> {
        self.inner.block_number().await
    }

    async fn pending_nonce(&self, account: Address) -> Result<u64, NetworkError> {
        self.inner.pending_nonce(account).await
    }
}

#[tokio::test]
async fn test_cancel_mid_run_reports_partial_state() {
    let ctx = TestContext::new();
    let (handle, token) = cancellation();
    let network = CancelAfterMined {
        inner: ctx.network.clone(),
        handle,
        after: 1,
        mined: AtomicUsize::new(0),
    };

    let err = ctx
        .orchestrator_on(network)
        .run_with_cancel(&land_spec(), &token)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert_eq!(err.step, DeployStep::ProxyDeployed);
    assert_eq!(err.partial_addresses.implementation, Some(SIGNER.create(0)));
    assert_eq!(ctx.network.submitted(), vec![TxKind::Create]);
}

#[tokio::test]
async fn test_concurrent_runs_share_the_nonce_sequence() {
    let ctx = TestContext::with_network(InMemoryNetwork::new().with_latency(2));
    let first = ctx.orchestrator();
    let second = ctx.orchestrator();

    let (token_spec, land_spec) = (DeploymentSpec::direct("Token", vec![]), land_spec());
    let (token, land) = tokio::join!(first.run(&token_spec), second.run(&land_spec));
    let (token, land) = (token.unwrap(), land.unwrap());

    assert_eq!(ctx.network.max_in_flight(SIGNER), 1);
    assert_eq!(ctx.network.submitted().len(), 4);
    let mut addresses = vec![
        token.final_address(),
        land.final_address(),
        land.implementation_address().unwrap(),
    ];
    addresses.sort();
    addresses.dedup();
    assert_eq!(addresses.len(), 3);
}

#[tokio::test]
async fn test_unknown_contract() {
    let ctx = TestContext::new();
    let err = ctx
        .orchestrator()
        .run(&DeploymentSpec::direct("Missing", vec![]))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ConfigurationError);
    assert_eq!(err.step, DeployStep::Start);
    assert!(ctx.network.events().is_empty());
}

#[tokio::test]
async fn test_proxied_without_initializer_arguments() {
    let ctx = TestContext::new();
    let err = ctx
        .orchestrator()
        .run(&DeploymentSpec::proxied("Land", vec![]))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ConfigurationError);
    assert!(ctx.network.events().is_empty());
}

#[tokio::test]
async fn test_error_json_shape() {
    let ctx = TestContext::new();
    ctx.network.inject(1, Fault::Reject("nonce conflict".into()));
    let err = ctx.orchestrator().run(&land_spec()).await.unwrap_err();

    let json: serde_json::Value = serde_json::from_str(&err.to_json()).unwrap();
    assert_eq!(json["step"], "ProxyDeployed");
    assert_eq!(json["kind"], "SubmissionError");
    assert!(json["partial_addresses"]["implementation"].is_string());
    assert!(json["partial_addresses"].get("proxy").is_none());
}
