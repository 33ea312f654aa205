//! Per-account submission queues.
//!
//! The signing account's nonce sequence is shared by every run in the process. Each
//! account gets its own async lock holding the next nonce to use; a submission holds
//! the lock from nonce allocation until the network accepted or refused it, so at most
//! one submission per account is ever in flight.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use alloy_core::primitives::{Address, Bytes};

use crate::{
    network::{NetworkClient, NetworkError, TxRequest},
    types::TxHandle,
};

#[derive(Debug, Default)]
struct AccountSlot {
    /// Unset until the first submission, and after a refused one.
    next_nonce: Option<u64>,
}

/// Nonce allocation keyed by signing account.
#[derive(Debug, Default)]
pub struct AccountQueues {
    slots: Mutex<HashMap<Address, Arc<tokio::sync::Mutex<AccountSlot>>>>,
}

impl AccountQueues {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, account: Address) -> Arc<tokio::sync::Mutex<AccountSlot>> {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.entry(account).or_default().clone()
    }

    /// Allocate the next nonce for `from` and submit, waiting for the account's turn.
    pub async fn submit<N: NetworkClient>(
        &self,
        network: &N,
        from: Address,
        to: Option<Address>,
        data: Bytes,
    ) -> Result<TxHandle, NetworkError> {
        let slot = self.slot(from);
        let mut slot = slot.lock().await;

        let nonce = match slot.next_nonce {
            Some(nonce) => nonce,
            None => network.pending_nonce(from).await?,
        };

        match network
            .submit(TxRequest {
                from,
                to,
                data,
                nonce,
            })
            .await
        {
            Ok(tx) => {
                slot.next_nonce = Some(nonce + 1);
                tracing::debug!(account = %from, nonce, tx = %tx, "Transaction submitted");
                Ok(tx)
            }
            Err(err) => {
                // The network's view may have diverged; resync on the next submission.
                slot.next_nonce = None;
                Err(err)
            }
        }
    }
}
