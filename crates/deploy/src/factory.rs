//! Contract factory: binds an artifact to a network, a signer and a confirmation policy.

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, Bytes},
};

use crate::{
    artifact::{ArtifactError, ContractArtifact},
    cancel::CancelToken,
    confirm::{ConfirmationPolicy, wait_for_receipt},
    network::{NetworkClient, NetworkError, TxReceipt},
    nonce::AccountQueues,
    types::{Confirmation, PendingDeployment, TxHandle},
};

/// Failure of a single factory operation.
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error(transparent)]
    Encoding(#[from] ArtifactError),
    #[error(transparent)]
    Submission(#[from] NetworkError),
    #[error("transaction {tx} reverted")]
    Reverted { tx: TxHandle },
    #[error("transaction {tx} mined without a contract address")]
    MissingAddress { tx: TxHandle },
    #[error("transaction {tx} not confirmed in time")]
    Timeout { tx: TxHandle },
}

/// The chain-side collaborators of one run, shared by all of its factories.
pub struct FactoryContext<'a, N> {
    pub network: &'a N,
    pub queues: &'a AccountQueues,
    pub signer: Address,
    pub policy: &'a ConfirmationPolicy,
    pub cancel: &'a CancelToken,
}

impl<N> Clone for FactoryContext<'_, N> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<N> Copy for FactoryContext<'_, N> {}

impl<'a, N: NetworkClient> FactoryContext<'a, N> {
    /// Bind an artifact to this context.
    pub fn factory(self, artifact: &'a ContractArtifact) -> ContractFactory<'a, N> {
        ContractFactory { artifact, ctx: self }
    }
}

/// Deploys and calls one contract.
pub struct ContractFactory<'a, N> {
    artifact: &'a ContractArtifact,
    ctx: FactoryContext<'a, N>,
}

impl<N: NetworkClient> ContractFactory<'_, N> {
    pub fn artifact(&self) -> &ContractArtifact {
        self.artifact
    }

    /// Submit a creation transaction with the given constructor arguments.
    pub async fn deploy(&self, args: &[String]) -> Result<PendingDeployment, FactoryError> {
        let data = self.artifact.encode_deploy(args)?;
        self.submit_creation(data).await
    }

    /// Same as [`Self::deploy`] with constructor arguments that are already typed.
    pub async fn deploy_values(
        &self,
        values: &[DynSolValue],
    ) -> Result<PendingDeployment, FactoryError> {
        let data = self.artifact.encode_deploy_values(values)?;
        self.submit_creation(data).await
    }

    /// Wait for a pending deployment and return the contract address.
    ///
    /// Resolves the deployment at most once; later calls return the recorded address.
    pub async fn confirm(&self, pending: &mut PendingDeployment) -> Result<Address, FactoryError> {
        if let Some(address) = pending.contract_address() {
            return Ok(address);
        }

        let tx = pending.tx();
        let receipt = self.wait(tx).await?;
        let address = receipt
            .contract_address
            .ok_or(FactoryError::MissingAddress { tx })?;
        pending.mark_confirmed(address);

        tracing::info!(
            contract = %self.artifact.name,
            address = %address,
            block = receipt.block_number,
            "Contract deployed"
        );

        Ok(address)
    }

    /// Call `function(args)` on `address` using this artifact's ABI and wait for it.
    pub async fn invoke(
        &self,
        address: Address,
        function: &str,
        args: &[String],
    ) -> Result<Confirmation, FactoryError> {
        let data = self.artifact.encode_call(function, args)?;
        let tx = self
            .ctx
            .queues
            .submit(self.ctx.network, self.ctx.signer, Some(address), data)
            .await?;

        tracing::info!(
            contract = %self.artifact.name,
            function,
            target = %address,
            tx = %tx,
            "Call submitted"
        );

        let receipt = self.wait(tx).await?;
        Ok(Confirmation {
            tx,
            block_number: receipt.block_number,
        })
    }

    async fn submit_creation(&self, data: Bytes) -> Result<PendingDeployment, FactoryError> {
        let tx = self
            .ctx
            .queues
            .submit(self.ctx.network, self.ctx.signer, None, data)
            .await?;

        tracing::info!(
            contract = %self.artifact.name,
            tx = %tx,
            "Deployment submitted"
        );

        Ok(PendingDeployment::new(tx))
    }

    async fn wait(&self, tx: TxHandle) -> Result<TxReceipt, FactoryError> {
        let receipt = wait_for_receipt(self.ctx.network, tx, self.ctx.policy, self.ctx.cancel)
            .await
            .map_err(|timeout| {
                tracing::warn!(tx = %tx, timeout = ?timeout.timeout, "Confirmation timed out");
                FactoryError::Timeout { tx }
            })?;

        if !receipt.success {
            tracing::warn!(tx = %tx, block = receipt.block_number, "Transaction reverted");
            return Err(FactoryError::Reverted { tx });
        }

        Ok(receipt)
    }
}
