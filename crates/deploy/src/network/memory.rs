//! In-memory ledger used for dry runs and tests.
//!
//! The ledger executes transactions when they are submitted and reveals the outcome
//! once the transaction has been polled often enough. Contract addresses follow the
//! CREATE rule (sender, nonce), so a dry run reports the addresses a fresh chain
//! would assign.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use alloy_core::primitives::{Address, FixedBytes, keccak256};

use super::{NetworkClient, NetworkError, TxReceipt, TxRequest, TxStatus};
use crate::types::TxHandle;

/// A fault scripted for a given submission (counted from zero, rejected ones included).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Refuse the submission with the given reason.
    Reject(String),
    /// Refuse the submission because execution would revert.
    RevertOnSubmit(String),
    /// Accept, then mine with a failed status.
    Revert,
    /// Accept and never mine.
    NeverConfirm,
    /// Mine after the given number of status polls.
    ConfirmAfter(u32),
}

/// What a submitted transaction does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    Create,
    Call {
        to: Address,
        selector: Option<FixedBytes<4>>,
    },
}

/// Ordered record of everything the ledger observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    Submitted {
        index: usize,
        tx: TxHandle,
        from: Address,
        nonce: u64,
        kind: TxKind,
    },
    Rejected {
        index: usize,
        from: Address,
        reason: String,
    },
    Mined {
        tx: TxHandle,
        block_number: u64,
        success: bool,
    },
}

#[derive(Debug)]
struct Entry {
    polls_remaining: Option<u32>,
    success: bool,
    contract_address: Option<Address>,
    receipt: Option<TxReceipt>,
}

#[derive(Debug, Default)]
struct Ledger {
    height: u64,
    latency: u32,
    submissions: usize,
    nonces: HashMap<Address, u64>,
    faults: HashMap<usize, Fault>,
    txs: HashMap<TxHandle, Entry>,
    code: HashSet<Address>,
    guarded: HashSet<FixedBytes<4>>,
    initialized: HashSet<(Address, FixedBytes<4>)>,
    in_flight: HashMap<Address, usize>,
    max_in_flight: HashMap<Address, usize>,
    events: Vec<LedgerEvent>,
}

impl Ledger {
    fn enter(&mut self, account: Address) {
        let count = self.in_flight.entry(account).or_default();
        *count += 1;
        let current = *count;
        let max = self.max_in_flight.entry(account).or_default();
        *max = (*max).max(current);
    }

    fn leave(&mut self, account: Address) {
        if let Some(count) = self.in_flight.get_mut(&account) {
            *count = count.saturating_sub(1);
        }
    }

    fn accept(&mut self, tx: TxRequest) -> Result<TxHandle, NetworkError> {
        let index = self.submissions;
        self.submissions += 1;

        let fault = self.faults.remove(&index);
        let expected = self.nonces.get(&tx.from).copied().unwrap_or_default();

        let refusal = match &fault {
            Some(Fault::Reject(reason)) => Some(NetworkError::Rejected(reason.clone())),
            Some(Fault::RevertOnSubmit(reason)) => Some(NetworkError::Reverted(reason.clone())),
            _ if tx.nonce < expected => Some(NetworkError::Rejected("nonce too low".into())),
            _ if tx.nonce > expected => Some(NetworkError::Rejected("nonce too high".into())),
            _ => None,
        };
        if let Some(err) = refusal {
            self.events.push(LedgerEvent::Rejected {
                index,
                from: tx.from,
                reason: err.to_string(),
            });
            return Err(err);
        }

        self.nonces.insert(tx.from, expected + 1);

        let mut key = tx.from.to_vec();
        key.extend_from_slice(&tx.nonce.to_be_bytes());
        let handle = TxHandle(keccak256(&key));

        let kind = match tx.to {
            None => TxKind::Create,
            Some(to) => TxKind::Call {
                to,
                selector: tx.data.get(..4).map(FixedBytes::<4>::from_slice),
            },
        };

        let mut success = fault != Some(Fault::Revert);
        let mut contract_address = None;
        match kind {
            TxKind::Create if success => {
                let address = tx.from.create(tx.nonce);
                self.code.insert(address);
                contract_address = Some(address);
            }
            TxKind::Create => {}
            TxKind::Call { to, selector } => {
                success &= self.code.contains(&to);
                if let Some(selector) = selector.filter(|s| self.guarded.contains(s)) {
                    // Initializers are one-shot per contract.
                    success &= self.initialized.insert((to, selector));
                }
            }
        }

        let polls_remaining = match fault {
            Some(Fault::NeverConfirm) => None,
            Some(Fault::ConfirmAfter(polls)) => Some(polls),
            _ => Some(self.latency),
        };

        self.txs.insert(
            handle,
            Entry {
                polls_remaining,
                success,
                contract_address,
                receipt: None,
            },
        );
        self.events.push(LedgerEvent::Submitted {
            index,
            tx: handle,
            from: tx.from,
            nonce: tx.nonce,
            kind,
        });

        Ok(handle)
    }

    fn poll(&mut self, tx: TxHandle) -> Result<TxStatus, NetworkError> {
        let Some(entry) = self.txs.get_mut(&tx) else {
            return Err(NetworkError::Transport(format!("unknown transaction {tx}")));
        };

        if let Some(receipt) = entry.receipt {
            return Ok(TxStatus::Mined(receipt));
        }

        match entry.polls_remaining.as_mut() {
            None => return Ok(TxStatus::Pending),
            Some(0) => {}
            Some(remaining) => {
                *remaining -= 1;
                return Ok(TxStatus::Pending);
            }
        }

        self.height += 1;
        let receipt = TxReceipt {
            block_number: self.height,
            contract_address: entry.contract_address.filter(|_| entry.success),
            success: entry.success,
        };
        entry.receipt = Some(receipt);
        self.events.push(LedgerEvent::Mined {
            tx,
            block_number: receipt.block_number,
            success: receipt.success,
        });

        Ok(TxStatus::Mined(receipt))
    }
}

/// A simulated chain shared by clones.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNetwork {
    ledger: Arc<Mutex<Ledger>>,
}

impl InMemoryNetwork {
    /// A ledger that mines every transaction on its first status poll.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mine transactions only after `polls` pending answers.
    pub fn with_latency(self, polls: u32) -> Self {
        self.ledger().latency = polls;
        self
    }

    /// Script a fault for the submission at `index`.
    pub fn inject(&self, index: usize, fault: Fault) {
        self.ledger().faults.insert(index, fault);
    }

    /// Make calls with this selector succeed only once per contract.
    pub fn guard_initializer(&self, selector: FixedBytes<4>) {
        self.ledger().guarded.insert(selector);
    }

    /// Every event recorded so far, in order.
    pub fn events(&self) -> Vec<LedgerEvent> {
        self.ledger().events.clone()
    }

    /// Accepted submissions, in order.
    pub fn submitted(&self) -> Vec<TxKind> {
        self.ledger()
            .events
            .iter()
            .filter_map(|event| match event {
                LedgerEvent::Submitted { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect()
    }

    /// Whether a contract lives at `address`.
    pub fn has_code(&self, address: Address) -> bool {
        self.ledger().code.contains(&address)
    }

    /// The highest number of simultaneous submissions observed for `account`.
    pub fn max_in_flight(&self, account: Address) -> usize {
        self.ledger()
            .max_in_flight
            .get(&account)
            .copied()
            .unwrap_or_default()
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl NetworkClient for InMemoryNetwork {
    async fn submit(&self, tx: TxRequest) -> Result<TxHandle, NetworkError> {
        let from = tx.from;
        self.ledger().enter(from);
        tokio::task::yield_now().await;

        let mut ledger = self.ledger();
        ledger.leave(from);
        ledger.accept(tx)
    }

    async fn transaction_status(&self, tx: TxHandle) -> Result<TxStatus, NetworkError> {
        self.ledger().poll(tx)
    }

    /// Each observation of the head advances the simulated chain by one block.
    async fn block_number(&self) -> Result<u64, NetworkError> {
        let mut ledger = self.ledger();
        ledger.height += 1;
        Ok(ledger.height)
    }

    async fn pending_nonce(&self, account: Address) -> Result<u64, NetworkError> {
        Ok(self
            .ledger()
            .nonces
            .get(&account)
            .copied()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::primitives::Bytes;

    const ALICE: Address = Address::repeat_byte(0xa1);

    fn create(nonce: u64) -> TxRequest {
        TxRequest {
            from: ALICE,
            to: None,
            data: Bytes::from_static(&[0x60, 0x80]),
            nonce,
        }
    }

    #[tokio::test]
    async fn test_create_address_follows_sender_and_nonce() {
        let network = InMemoryNetwork::new();
        let tx = network.submit(create(0)).await.unwrap();
        let TxStatus::Mined(receipt) = network.transaction_status(tx).await.unwrap() else {
            panic!("expected the transaction to be mined");
        };
        assert!(receipt.success);
        assert_eq!(receipt.contract_address, Some(ALICE.create(0)));
        assert!(network.has_code(ALICE.create(0)));
    }

    #[tokio::test]
    async fn test_nonce_is_enforced() {
        let network = InMemoryNetwork::new();
        assert!(matches!(
            network.submit(create(1)).await,
            Err(NetworkError::Rejected(reason)) if reason == "nonce too high"
        ));
        network.submit(create(0)).await.unwrap();
        assert!(matches!(
            network.submit(create(0)).await,
            Err(NetworkError::Rejected(reason)) if reason == "nonce too low"
        ));
        assert_eq!(network.pending_nonce(ALICE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_latency_and_never_confirm() {
        let network = InMemoryNetwork::new().with_latency(2);
        network.inject(1, Fault::NeverConfirm);

        let slow = network.submit(create(0)).await.unwrap();
        assert_eq!(network.transaction_status(slow).await.unwrap(), TxStatus::Pending);
        assert_eq!(network.transaction_status(slow).await.unwrap(), TxStatus::Pending);
        assert!(matches!(
            network.transaction_status(slow).await.unwrap(),
            TxStatus::Mined(_)
        ));

        let stuck = network.submit(create(1)).await.unwrap();
        for _ in 0..10 {
            assert_eq!(network.transaction_status(stuck).await.unwrap(), TxStatus::Pending);
        }
    }

    #[tokio::test]
    async fn test_guarded_initializer_reverts_second_time() {
        let network = InMemoryNetwork::new();
        let selector = FixedBytes::<4>::from([0x81, 0x29, 0xfc, 0x1c]);
        network.guard_initializer(selector);

        network.submit(create(0)).await.unwrap();
        let target = ALICE.create(0);
        let call = |nonce| TxRequest {
            from: ALICE,
            to: Some(target),
            data: Bytes::from(selector.to_vec()),
            nonce,
        };

        let first = network.submit(call(1)).await.unwrap();
        let second = network.submit(call(2)).await.unwrap();
        let success = |status: TxStatus| matches!(status, TxStatus::Mined(TxReceipt { success: true, .. }));
        assert!(success(network.transaction_status(first).await.unwrap()));
        assert!(!success(network.transaction_status(second).await.unwrap()));
    }
}
