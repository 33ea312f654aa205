//! Deployment orchestrator: one run from a [`DeploymentSpec`] to a [`DeploymentResult`].

use std::sync::Arc;

use alloy_core::{dyn_abi::DynSolValue, primitives::Address};

use crate::{
    artifact::{ArtifactError, ContractArtifact, ContractRegistry},
    cancel::CancelToken,
    confirm::ConfirmationPolicy,
    error::DeployError,
    factory::{FactoryContext, FactoryError},
    network::NetworkClient,
    nonce::AccountQueues,
    protocol::ProxyInitializer,
    spec::DeploymentSpec,
    types::{DeployStep, DeploymentMode, DeploymentResult, PartialAddresses},
};

/// Default artifact deployed in front of proxied implementations.
pub const DEFAULT_PROXY_CONTRACT: &str = "ERC1967Proxy";

/// Artifacts resolved and checked for one run.
enum Plan<'a> {
    Direct {
        artifact: &'a ContractArtifact,
    },
    Proxied {
        implementation: &'a ContractArtifact,
        proxy: &'a ContractArtifact,
    },
}

/// Runs deployments against one network for one signing account.
///
/// Holds no state across runs besides the account queues. Every orchestrator submitting
/// from the same account in a process must be given the same [`AccountQueues`].
pub struct Orchestrator<N> {
    network: N,
    registry: ContractRegistry,
    signer: Address,
    queues: Arc<AccountQueues>,
    policy: ConfirmationPolicy,
    proxy_contract: String,
}

impl<N: NetworkClient> Orchestrator<N> {
    pub fn new(
        network: N,
        registry: ContractRegistry,
        signer: Address,
        queues: Arc<AccountQueues>,
    ) -> Self {
        Self {
            network,
            registry,
            signer,
            queues,
            policy: ConfirmationPolicy::default(),
            proxy_contract: DEFAULT_PROXY_CONTRACT.to_string(),
        }
    }

    pub fn with_policy(mut self, policy: ConfirmationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Use another artifact as proxy. Its constructor must take `(address, bytes)`.
    pub fn with_proxy_contract(mut self, name: impl Into<String>) -> Self {
        self.proxy_contract = name.into();
        self
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn registry(&self) -> &ContractRegistry {
        &self.registry
    }

    pub fn signer(&self) -> Address {
        self.signer
    }

    /// Run a deployment that cannot be cancelled.
    pub async fn run(&self, spec: &DeploymentSpec) -> Result<DeploymentResult, DeployError> {
        self.run_with_cancel(spec, &CancelToken::never()).await
    }

    /// Run a deployment, checking `cancel` before every submission.
    ///
    /// Everything that can be checked offline is checked before the first network call.
    pub async fn run_with_cancel(
        &self,
        spec: &DeploymentSpec,
        cancel: &CancelToken,
    ) -> Result<DeploymentResult, DeployError> {
        let plan = self.prepare(spec).inspect_err(|e| {
            tracing::error!(contract = %spec.contract_name, error = %e, "Invalid deployment");
        })?;

        tracing::info!(
            contract = %spec.contract_name,
            mode = %spec.mode,
            signer = %self.signer,
            "Starting deployment..."
        );

        let ctx = FactoryContext {
            network: &self.network,
            queues: &self.queues,
            signer: self.signer,
            policy: &self.policy,
            cancel,
        };

        let result = match plan {
            Plan::Direct { artifact } => {
                if cancel.is_cancelled() {
                    return Err(DeployError::cancelled(
                        DeployStep::Deployed,
                        PartialAddresses::default(),
                    ));
                }

                let fail = |e: FactoryError| {
                    DeployError::from_factory(DeployStep::Deployed, e, PartialAddresses::default())
                };
                let factory = ctx.factory(artifact);
                let mut pending = factory.deploy(&spec.constructor_args).await.map_err(fail)?;
                let address = factory.confirm(&mut pending).await.map_err(fail)?;
                DeploymentResult::direct(address)
            }
            Plan::Proxied {
                implementation,
                proxy,
            } => {
                let deployment = ProxyInitializer::new(
                    ctx.factory(implementation),
                    ctx.factory(proxy),
                    &spec.initializer_name,
                    &spec.initializer_args,
                    cancel,
                )
                .run()
                .await?;
                DeploymentResult::proxied(deployment.implementation, deployment.proxy)
            }
        };

        tracing::info!(
            contract = %spec.contract_name,
            address = %result.final_address(),
            "Deployment complete"
        );

        Ok(result)
    }

    fn prepare<'a>(&'a self, spec: &DeploymentSpec) -> Result<Plan<'a>, DeployError> {
        spec.validate()?;

        let artifact = self.artifact(&spec.contract_name)?;
        let invalid = |e: ArtifactError| DeployError::configuration(e.to_string());

        match spec.mode {
            DeploymentMode::Direct => {
                artifact
                    .encode_deploy(&spec.constructor_args)
                    .map_err(invalid)?;
                Ok(Plan::Direct { artifact })
            }
            DeploymentMode::Proxied => {
                artifact.encode_deploy(&[]).map_err(invalid)?;
                artifact
                    .encode_call(&spec.initializer_name, &spec.initializer_args)
                    .map_err(invalid)?;

                let proxy = self.artifact(&self.proxy_contract)?;
                proxy
                    .encode_deploy_values(&[
                        DynSolValue::Address(Address::ZERO),
                        DynSolValue::Bytes(Vec::new()),
                    ])
                    .map_err(invalid)?;

                Ok(Plan::Proxied {
                    implementation: artifact,
                    proxy,
                })
            }
        }
    }

    fn artifact(&self, name: &str) -> Result<&ContractArtifact, DeployError> {
        self.registry.get(name).ok_or_else(|| {
            DeployError::configuration(format!(
                "unknown contract `{name}` ({} artifact(s) loaded)",
                self.registry.len()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ErrorKind, network::InMemoryNetwork};

    const SIGNER: Address = Address::repeat_byte(0x5e);

    const TOKEN: &str = r#"{
        "contractName": "Token",
        "abi": [{"type": "constructor", "stateMutability": "nonpayable",
                 "inputs": [{"name": "supply", "type": "uint256"}]}],
        "bytecode": "0x6080"
    }"#;

    const LAND: &str = r#"{
        "contractName": "Land",
        "abi": [{"type": "function", "name": "initialize", "stateMutability": "nonpayable",
                 "inputs": [{"name": "admin", "type": "address"}], "outputs": []}],
        "bytecode": "0x6080"
    }"#;

    const PROXY_WITHOUT_DATA: &str = r#"{
        "contractName": "ERC1967Proxy",
        "abi": [{"type": "constructor", "stateMutability": "nonpayable",
                 "inputs": [{"name": "implementation", "type": "address"}]}],
        "bytecode": "0x6080"
    }"#;

    fn orchestrator(artifacts: &[&str]) -> Orchestrator<InMemoryNetwork> {
        let mut registry = ContractRegistry::new();
        for json in artifacts {
            registry.insert(ContractArtifact::from_json(json, "unnamed").unwrap());
        }
        Orchestrator::new(
            InMemoryNetwork::new(),
            registry,
            SIGNER,
            Arc::new(AccountQueues::new()),
        )
    }

    #[tokio::test]
    async fn test_direct_deploy() {
        let orchestrator = orchestrator(&[TOKEN]);
        let result = orchestrator
            .run(&DeploymentSpec::direct("Token", vec!["1000".into()]))
            .await
            .unwrap();
        assert_eq!(result.mode(), DeploymentMode::Direct);
        assert_eq!(result.final_address(), SIGNER.create(0));
        assert_eq!(result.implementation_address(), None);
    }

    #[tokio::test]
    async fn test_orchestrators_sharing_queues_serialize_submissions() {
        let mut registry = ContractRegistry::new();
        registry.insert(ContractArtifact::from_json(TOKEN, "Token").unwrap());
        let network = InMemoryNetwork::new().with_latency(2);
        let queues = Arc::new(AccountQueues::new());

        let a = Orchestrator::new(network.clone(), registry.clone(), SIGNER, queues.clone());
        let b = Orchestrator::new(network.clone(), registry, SIGNER, queues);
        let spec = DeploymentSpec::direct("Token", vec!["1".into()]);
        let (a, b) = tokio::join!(a.run(&spec), b.run(&spec));

        let mut addresses = vec![a.unwrap().final_address(), b.unwrap().final_address()];
        addresses.sort();
        assert_eq!(addresses, {
            let mut expected = vec![SIGNER.create(0), SIGNER.create(1)];
            expected.sort();
            expected
        });
        assert_eq!(network.max_in_flight(SIGNER), 1);
    }

    #[tokio::test]
    async fn test_bad_constructor_argument_fails_offline() {
        let orchestrator = orchestrator(&[TOKEN]);
        let err = orchestrator
            .run(&DeploymentSpec::direct("Token", vec!["lots".into()]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConfigurationError);
        assert_eq!(err.step, DeployStep::Start);
        assert!(orchestrator.network().events().is_empty());
    }

    #[tokio::test]
    async fn test_missing_proxy_artifact() {
        let orchestrator = orchestrator(&[LAND]);
        let err = orchestrator
            .run(&DeploymentSpec::proxied("Land", vec![SIGNER.to_string()]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConfigurationError);
        assert!(err.message.contains(DEFAULT_PROXY_CONTRACT));
        assert!(orchestrator.network().events().is_empty());
    }

    #[tokio::test]
    async fn test_incompatible_proxy_artifact() {
        let orchestrator = orchestrator(&[LAND, PROXY_WITHOUT_DATA]);
        let err = orchestrator
            .run(&DeploymentSpec::proxied("Land", vec![SIGNER.to_string()]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConfigurationError);
        assert!(orchestrator.network().events().is_empty());
    }

    #[tokio::test]
    async fn test_implementation_with_constructor_arguments_is_rejected() {
        let orchestrator = orchestrator(&[TOKEN, PROXY_WITHOUT_DATA]);
        let spec = DeploymentSpec {
            initializer_name: "mint".into(),
            ..DeploymentSpec::proxied("Token", vec!["1".into()])
        };
        let err = orchestrator.run(&spec).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConfigurationError);
        assert!(orchestrator.network().events().is_empty());
    }
}
