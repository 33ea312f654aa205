//! JSON-RPC network client for Ethereum-compatible endpoints.

use std::time::Duration;

use alloy_core::primitives::{Address, B256, U64, U128, U256};
use anyhow::Context;
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::sync::OnceCell;
use url::Url;

use super::{NetworkClient, NetworkError, TxReceipt, TxRequest, TxStatus};
use crate::{
    types::TxHandle,
    wallet::{LegacyTransaction, Wallet},
};

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Retries of a read-only call before a transport failure is surfaced.
const READ_RETRIES: usize = 3;

/// Failure of a single JSON-RPC round trip.
#[derive(Debug, thiserror::Error)]
enum RpcFailure {
    /// The node answered with an error object.
    #[error("RPC error: {0}")]
    Node(String),
    #[error("{0:#}")]
    Transport(anyhow::Error),
}

impl From<RpcFailure> for NetworkError {
    fn from(err: RpcFailure) -> Self {
        match err {
            RpcFailure::Node(message) if message.to_lowercase().contains("revert") => {
                NetworkError::Reverted(message)
            }
            RpcFailure::Node(message) => NetworkError::Rejected(message),
            RpcFailure::Transport(err) => NetworkError::from(err),
        }
    }
}

/// Classify a failed send. The node may have accepted a transaction whose response
/// never arrived.
fn send_failure(err: RpcFailure) -> NetworkError {
    match err {
        RpcFailure::Transport(err) => NetworkError::Transport(format!(
            "{err:#}; outcome unknown, the transaction may have been accepted: \
             check the account nonce before retrying"
        )),
        node => node.into(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    block_number: U64,
    contract_address: Option<Address>,
    /// Absent on pre-Byzantium chains.
    status: Option<U64>,
}

/// [`NetworkClient`] over HTTP JSON-RPC.
///
/// With a [`Wallet`], transactions are signed locally and sent through
/// `eth_sendRawTransaction`. Without one they go through `eth_sendTransaction`, so the
/// endpoint must be able to sign for the sending account (a dev node, an impersonating
/// fork or a signing proxy).
#[derive(Debug, Clone)]
pub struct JsonRpcNetwork {
    client: reqwest::Client,
    url: Url,
    wallet: Option<Wallet>,
    /// Chain id signed into every transaction, fetched once.
    signing_chain_id: OnceCell<u64>,
    /// First delay between read attempts.
    retry_delay: Duration,
}

impl JsonRpcNetwork {
    /// Create a client for the given endpoint.
    pub fn new(url: Url) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            url,
            wallet: None,
            signing_chain_id: OnceCell::new(),
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    /// Sign submissions locally with `wallet`.
    pub fn with_wallet(mut self, wallet: Wallet) -> Self {
        self.wallet = Some(wallet);
        self
    }

    /// First delay between read attempts. Later ones grow exponentially.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The account submissions are signed for, when signing locally.
    pub fn wallet_address(&self) -> Option<Address> {
        self.wallet.as_ref().map(Wallet::address)
    }

    /// The chain ID reported by the endpoint.
    pub async fn chain_id(&self) -> Result<u64, NetworkError> {
        let id: U64 = self.read("eth_chainId", vec![]).await?;
        Ok(id.to())
    }

    /// Make a JSON-RPC call and deserialize the result.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, RpcFailure> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": 1
            }))
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", method))
            .map_err(RpcFailure::Transport)?;

        let result: Value = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", method))
            .map_err(RpcFailure::Transport)?;

        if let Some(error) = result.get("error") {
            return Err(RpcFailure::Node(
                error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
            ));
        }

        let result_value = result
            .get("result")
            .cloned()
            .context("No result in response")
            .map_err(RpcFailure::Transport)?;

        serde_json::from_value(result_value)
            .with_context(|| format!("Failed to deserialize {} result", method))
            .map_err(RpcFailure::Transport)
    }

    /// A read-only call, retried with backoff on transport failures.
    async fn read<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Vec<Value>,
    ) -> Result<T, NetworkError> {
        (|| self.call::<T>(method, params.clone()))
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(self.retry_delay)
                    .with_max_times(READ_RETRIES),
            )
            .when(|err| matches!(err, RpcFailure::Transport(_)))
            .notify(|err, delay| {
                tracing::warn!(method, error = %err, ?delay, "RPC read failed, retrying...");
            })
            .await
            .map_err(NetworkError::from)
    }

    /// Let the endpoint sign: `eth_sendTransaction`.
    async fn send_unsigned(&self, tx: &TxRequest) -> Result<B256, NetworkError> {
        let mut request = transaction_object(tx);
        request["nonce"] = serde_json::json!(format!("0x{:x}", tx.nonce));

        self.call("eth_sendTransaction", vec![request])
            .await
            .map_err(send_failure)
    }

    /// Sign locally and submit through `eth_sendRawTransaction`.
    async fn send_signed(&self, wallet: &Wallet, tx: &TxRequest) -> Result<B256, NetworkError> {
        if wallet.address() != tx.from {
            return Err(NetworkError::Rejected(format!(
                "no key for {}, the configured key signs for {}",
                tx.from,
                wallet.address()
            )));
        }

        let chain_id = self
            .signing_chain_id
            .get_or_try_init(|| self.chain_id())
            .await
            .copied()?;
        let gas_price: U128 = self.read("eth_gasPrice", vec![]).await?;
        // Reverting executions are refused here, before anything is sent.
        let estimate: U64 = self
            .read("eth_estimateGas", vec![transaction_object(tx)])
            .await?;

        let signed = LegacyTransaction {
            chain_id,
            nonce: tx.nonce,
            gas_price: gas_price.to(),
            gas_limit: with_headroom(estimate.to()),
            to: tx.to,
            value: U256::ZERO,
            data: tx.data.clone(),
        };
        let raw = wallet
            .sign(&signed)
            .map_err(|e| NetworkError::Rejected(format!("{e:#}")))?;

        self.call("eth_sendRawTransaction", vec![serde_json::json!(raw)])
            .await
            .map_err(send_failure)
    }
}

/// `from`, `to` and `data` of a transaction, as JSON-RPC expects them.
fn transaction_object(tx: &TxRequest) -> Value {
    let mut object = serde_json::json!({
        "from": tx.from,
        "data": tx.data,
    });
    if let Some(to) = tx.to {
        object["to"] = serde_json::json!(to);
    }
    object
}

/// Gas limit for an estimate, leaving a fifth on top for state drift.
fn with_headroom(estimate: u64) -> u64 {
    estimate.saturating_add(estimate / 5)
}

impl NetworkClient for JsonRpcNetwork {
    async fn submit(&self, tx: TxRequest) -> Result<TxHandle, NetworkError> {
        let hash = match &self.wallet {
            Some(wallet) => self.send_signed(wallet, &tx).await?,
            None => self.send_unsigned(&tx).await?,
        };
        Ok(TxHandle(hash))
    }

    async fn transaction_status(&self, tx: TxHandle) -> Result<TxStatus, NetworkError> {
        let receipt: Option<RpcReceipt> = self
            .read("eth_getTransactionReceipt", vec![serde_json::json!(tx.0)])
            .await?;

        Ok(match receipt {
            None => TxStatus::Pending,
            Some(receipt) => TxStatus::Mined(TxReceipt {
                block_number: receipt.block_number.to(),
                contract_address: receipt.contract_address,
                success: receipt.status.is_none_or(|status| status == U64::from(1)),
            }),
        })
    }

    async fn block_number(&self) -> Result<u64, NetworkError> {
        let number: U64 = self.read("eth_blockNumber", vec![]).await?;
        Ok(number.to())
    }

    async fn pending_nonce(&self, account: Address) -> Result<u64, NetworkError> {
        let nonce: U64 = self
            .read(
                "eth_getTransactionCount",
                vec![serde_json::json!(account), serde_json::json!("pending")],
            )
            .await?;
        Ok(nonce.to())
    }
}
