//! Upgradeable deployment: implementation, proxy, then a one-time initializer call.
//!
//! The three transactions are submitted strictly in order, each confirmed before the
//! next one is built, since every step needs the address produced by the previous one.

use alloy_core::{dyn_abi::DynSolValue, primitives::Address};

use crate::{
    cancel::CancelToken,
    error::DeployError,
    factory::{ContractFactory, FactoryError},
    network::NetworkClient,
    types::{Confirmation, DeployStep, PartialAddresses},
};

/// Outcome of a completed proxied deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyDeployment {
    pub implementation: Address,
    pub proxy: Address,
    /// The initializer transaction.
    pub initializer: Confirmation,
}

/// Progress of a [`ProxyInitializer`].
#[derive(Debug, Clone, strum::Display)]
pub enum ProxyState {
    Start,
    ImplementationDeployed {
        implementation: Address,
    },
    ProxyDeployed {
        implementation: Address,
        proxy: Address,
    },
    Initialized(ProxyDeployment),
    Done(ProxyDeployment),
    /// Terminal. The error names the step that failed and what was confirmed before it.
    Failed(DeployError),
}

impl ProxyState {
    /// Addresses confirmed so far.
    pub fn partial_addresses(&self) -> PartialAddresses {
        match self {
            Self::Start => PartialAddresses::default(),
            Self::ImplementationDeployed { implementation } => PartialAddresses {
                implementation: Some(*implementation),
                ..Default::default()
            },
            Self::ProxyDeployed {
                implementation,
                proxy,
            } => PartialAddresses {
                implementation: Some(*implementation),
                proxy: Some(*proxy),
                ..Default::default()
            },
            Self::Initialized(deployment) | Self::Done(deployment) => PartialAddresses {
                implementation: Some(deployment.implementation),
                proxy: Some(deployment.proxy),
                ..Default::default()
            },
            Self::Failed(error) => error.partial_addresses,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Failed(_))
    }
}

/// Drives one implementation + proxy + initializer deployment.
///
/// The state is kept across calls to [`ProxyInitializer::run`]: once the initializer
/// has been submitted it is never submitted again by this instance, whatever the outcome.
pub struct ProxyInitializer<'a, N> {
    implementation: ContractFactory<'a, N>,
    proxy: ContractFactory<'a, N>,
    initializer: &'a str,
    args: &'a [String],
    cancel: &'a CancelToken,
    state: ProxyState,
}

impl<'a, N: NetworkClient> ProxyInitializer<'a, N> {
    /// `implementation` is deployed without constructor arguments; `proxy` must take
    /// `(address implementation, bytes data)`.
    pub fn new(
        implementation: ContractFactory<'a, N>,
        proxy: ContractFactory<'a, N>,
        initializer: &'a str,
        args: &'a [String],
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            implementation,
            proxy,
            initializer,
            args,
            cancel,
            state: ProxyState::Start,
        }
    }

    pub fn state(&self) -> &ProxyState {
        &self.state
    }

    /// Advance until `Done` or `Failed`.
    pub async fn run(&mut self) -> Result<ProxyDeployment, DeployError> {
        loop {
            let next = match &self.state {
                ProxyState::Done(deployment) => return Ok(*deployment),
                ProxyState::Failed(error) => return Err(error.clone()),
                ProxyState::Start => self.deploy_implementation().await,
                ProxyState::ImplementationDeployed { implementation } => {
                    self.deploy_proxy(*implementation).await
                }
                ProxyState::ProxyDeployed {
                    implementation,
                    proxy,
                } => self.initialize(*implementation, *proxy).await,
                ProxyState::Initialized(deployment) => Ok(ProxyState::Done(*deployment)),
            };
            let next = next.unwrap_or_else(ProxyState::Failed);

            tracing::debug!(
                contract = %self.implementation.artifact().name,
                from = %self.state,
                to = %next,
                "Proxy deployment advanced"
            );
            self.state = next;
        }
    }

    fn ensure_not_cancelled(&self, step: DeployStep) -> Result<(), DeployError> {
        if self.cancel.is_cancelled() {
            tracing::warn!(step = %step, "Run cancelled before submission");
            return Err(DeployError::cancelled(step, self.state.partial_addresses()));
        }
        Ok(())
    }

    async fn deploy_implementation(&self) -> Result<ProxyState, DeployError> {
        let step = DeployStep::ImplementationDeployed;
        self.ensure_not_cancelled(step)?;

        let fail =
            |e: FactoryError| DeployError::from_factory(step, e, self.state.partial_addresses());
        let mut pending = self.implementation.deploy(&[]).await.map_err(fail)?;
        let implementation = self
            .implementation
            .confirm(&mut pending)
            .await
            .map_err(fail)?;

        Ok(ProxyState::ImplementationDeployed { implementation })
    }

    async fn deploy_proxy(&self, implementation: Address) -> Result<ProxyState, DeployError> {
        let step = DeployStep::ProxyDeployed;
        self.ensure_not_cancelled(step)?;

        let fail =
            |e: FactoryError| DeployError::from_factory(step, e, self.state.partial_addresses());
        let constructor = [
            DynSolValue::Address(implementation),
            DynSolValue::Bytes(Vec::new()),
        ];
        let mut pending = self.proxy.deploy_values(&constructor).await.map_err(fail)?;
        let proxy = self.proxy.confirm(&mut pending).await.map_err(fail)?;

        Ok(ProxyState::ProxyDeployed {
            implementation,
            proxy,
        })
    }

    async fn initialize(
        &self,
        implementation: Address,
        proxy: Address,
    ) -> Result<ProxyState, DeployError> {
        let step = DeployStep::Initialized;
        self.ensure_not_cancelled(step)?;

        // The implementation's ABI is called through the proxy's address.
        let initializer = self
            .implementation
            .invoke(proxy, self.initializer, self.args)
            .await
            .map_err(|e| DeployError::from_factory(step, e, self.state.partial_addresses()))?;

        tracing::info!(
            proxy = %proxy,
            function = self.initializer,
            tx = %initializer.tx,
            "Proxy initialized"
        );

        Ok(ProxyState::Initialized(ProxyDeployment {
            implementation,
            proxy,
            initializer,
        }))
    }
}
