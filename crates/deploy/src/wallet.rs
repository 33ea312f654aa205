//! Local signing for endpoints that do not hold the sender's key.
//!
//! Transactions are signed as EIP-155 legacy transactions, which every EVM chain
//! accepts, and submitted raw.

use std::fmt;

use alloy_core::{
    primitives::{Address, B256, Bytes, U256, keccak256},
    rlp::{EMPTY_STRING_CODE, Encodable, Header},
};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use anyhow::Context;

/// An unsigned legacy transaction bound to a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    /// Contract creation when unset.
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
}

impl LegacyTransaction {
    fn encode_fields(&self, out: &mut Vec<u8>) {
        self.nonce.encode(out);
        self.gas_price.encode(out);
        self.gas_limit.encode(out);
        match &self.to {
            Some(to) => to.encode(out),
            None => out.push(EMPTY_STRING_CODE),
        }
        self.value.encode(out);
        self.data.encode(out);
    }

    /// `rlp([nonce, gasPrice, gas, to, value, data, chainId, 0, 0])`.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut fields = Vec::new();
        self.encode_fields(&mut fields);
        self.chain_id.encode(&mut fields);
        0u8.encode(&mut fields);
        0u8.encode(&mut fields);
        rlp_list(&fields)
    }

    pub fn signing_hash(&self) -> B256 {
        keccak256(self.signing_payload())
    }
}

fn rlp_list(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 9);
    Header {
        list: true,
        payload_length: payload.len(),
    }
    .encode(&mut out);
    out.extend_from_slice(payload);
    out
}

/// A private key held in memory.
#[derive(Clone)]
pub struct Wallet {
    signer: PrivateKeySigner,
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &format_args!("{}", self.address()))
            .finish_non_exhaustive()
    }
}

impl Wallet {
    /// Parse a hex private key, with or without `0x`.
    pub fn from_hex(key: &str) -> anyhow::Result<Self> {
        let bytes = hex::decode(key.trim().trim_start_matches("0x"))
            .context("Private key is not valid hex")?;
        let signer = PrivateKeySigner::from_slice(&bytes)
            .map_err(|e| anyhow::anyhow!("Invalid private key: {e}"))?;
        Ok(Self { signer })
    }

    pub fn address(&self) -> Address {
        Address::from(self.signer.address().0.0)
    }

    /// Sign `tx` and return its raw encoding, ready for `eth_sendRawTransaction`.
    pub fn sign(&self, tx: &LegacyTransaction) -> anyhow::Result<Bytes> {
        let digest: [u8; 32] = tx.signing_hash().0;
        let signature = self
            .signer
            .sign_hash_sync(&digest.into())
            .context("Failed to sign transaction")?;

        // r || s || v, with v either the parity bit or 27 + parity.
        let raw = signature.as_bytes();
        let parity = u64::from(matches!(raw[64], 1 | 28));

        let mut fields = Vec::new();
        tx.encode_fields(&mut fields);
        (tx.chain_id * 2 + 35 + parity).encode(&mut fields);
        U256::from_be_slice(&raw[..32]).encode(&mut fields);
        U256::from_be_slice(&raw[32..64]).encode(&mut fields);
        Ok(rlp_list(&fields).into())
    }
}
