//! Waiting for submitted transactions to confirm.

use std::time::Duration;

use crate::{
    cancel::CancelToken,
    network::{NetworkClient, TxReceipt, TxStatus},
    types::TxHandle,
};

/// Default bound on a single confirmation wait.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
/// Default interval between receipt polls.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// How long and how deep to wait for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Blocks the receipt must be buried under, counting its own.
    pub confirmations: u64,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            confirmations: 1,
        }
    }
}

/// The wait exceeded [`ConfirmationPolicy::timeout`]. The transaction may still confirm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("transaction {tx} not confirmed within {timeout:?}")]
pub struct ConfirmationTimeout {
    pub tx: TxHandle,
    pub timeout: Duration,
}

/// Poll until `tx` is mined and buried deep enough, or the policy's timeout elapses.
///
/// Cancellation does not interrupt the wait: a submitted transaction cannot be
/// recalled, so its outcome is still awaited.
pub async fn wait_for_receipt<N: NetworkClient>(
    network: &N,
    tx: TxHandle,
    policy: &ConfirmationPolicy,
    cancel: &CancelToken,
) -> Result<TxReceipt, ConfirmationTimeout> {
    tokio::time::timeout(policy.timeout, poll_receipt(network, tx, policy, cancel))
        .await
        .map_err(|_| ConfirmationTimeout {
            tx,
            timeout: policy.timeout,
        })
}

async fn poll_receipt<N: NetworkClient>(
    network: &N,
    tx: TxHandle,
    policy: &ConfirmationPolicy,
    cancel: &CancelToken,
) -> TxReceipt {
    let mut warned_cancel = false;

    loop {
        if cancel.is_cancelled() && !warned_cancel {
            tracing::warn!(tx = %tx, "Cancellation requested, waiting for in-flight transaction");
            warned_cancel = true;
        }

        match network.transaction_status(tx).await {
            Ok(TxStatus::Mined(receipt)) if !receipt.success || policy.confirmations <= 1 => {
                return receipt;
            }
            Ok(TxStatus::Mined(receipt)) => match network.block_number().await {
                Ok(head) if head + 1 >= receipt.block_number + policy.confirmations => {
                    return receipt;
                }
                Ok(head) => {
                    tracing::trace!(
                        tx = %tx,
                        mined_at = receipt.block_number,
                        head,
                        "Waiting for more confirmations..."
                    );
                }
                Err(e) => tracing::warn!(error = %e, tx = %tx, "Failed to read block number"),
            },
            Ok(TxStatus::Pending) => {
                tracing::trace!(tx = %tx, "Transaction pending...");
            }
            Err(e) => {
                tracing::warn!(error = %e, tx = %tx, "Receipt lookup failed, retrying...");
            }
        }

        tokio::time::sleep(policy.poll_interval).await;
    }
}
