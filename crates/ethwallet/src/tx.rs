//! Legacy (type 0) value transfers: build, sign, encode.

use crate::{
    amount::{parse_ether, parse_gwei},
    errors::WalletError,
    key::KeyMaterial,
};
use alloy::{
    consensus::{SignableTransaction as _, TxEnvelope, TxLegacy},
    eips::eip2718::Encodable2718 as _,
    primitives::{Address, Bytes, Signature, TxKind, B256, U256},
    signers::SignerSync as _,
};
use eyre::Context as _;
use std::str::FromStr as _;

/// A fully-specified, unsigned value transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub nonce: u64,
    pub sender: Address,
    pub recipient: Address,
    /// Wei.
    pub value: U256,
    pub gas_limit: u64,
    /// Wei per gas.
    pub gas_price: u128,
    /// EIP-155 replay protection when set.
    pub chain_id: Option<u64>,
}

impl TransactionRequest {
    #[must_use]
    pub const fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    fn to_legacy(&self) -> TxLegacy {
        TxLegacy {
            chain_id: self.chain_id,
            nonce: self.nonce,
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
            to: TxKind::Call(self.recipient),
            value: self.value,
            input: Bytes::new(),
        }
    }

    /// Keccak-256 of the RLP payload that gets signed.
    pub fn signature_hash(&self) -> B256 {
        self.to_legacy().signature_hash()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub request: TransactionRequest,
    pub signature: Signature,
    /// Transaction hash (keccak-256 of `raw`).
    pub hash: B256,
    /// Canonical RLP encoding, ready for `eth_sendRawTransaction`.
    pub raw: Bytes,
}

impl SignedTransaction {
    pub fn recover_sender(&self) -> eyre::Result<Address> {
        self.signature
            .recover_address_from_prehash(&self.request.signature_hash())
            .context("recover sender")
    }
}

/// Parse a recipient: `0x` followed by 40 hex digits.
///
/// All-lowercase and all-uppercase input is accepted as is; mixed case must carry a valid
/// EIP-55 checksum.
pub fn parse_address(input: &str) -> eyre::Result<Address> {
    let s = input.trim();
    let invalid = || WalletError::InvalidAddress(input.to_owned());
    let body = s.strip_prefix("0x").ok_or_else(invalid)?;
    if body.len() != 40 || !body.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid().into());
    }
    let has_lower = body.bytes().any(|b| b.is_ascii_lowercase());
    let has_upper = body.bytes().any(|b| b.is_ascii_uppercase());
    let parsed = if has_lower && has_upper {
        Address::parse_checksummed(s, None).ok()
    } else {
        Address::from_str(s).ok()
    };
    parsed.ok_or_else(|| invalid().into())
}

/// Assemble a transfer from user-facing units (ether and gwei decimal strings).
pub fn build_transaction(
    nonce: u64,
    sender: Address,
    recipient: &str,
    value_ether: &str,
    gas_limit: u64,
    gas_price_gwei: &str,
) -> eyre::Result<TransactionRequest> {
    let recipient = parse_address(recipient)?;
    let value = parse_ether(value_ether)?;
    let gas_price = parse_gwei(gas_price_gwei)?;
    if gas_limit == 0 {
        return Err(WalletError::amount("gas limit must be positive").into());
    }
    Ok(TransactionRequest {
        nonce,
        sender,
        recipient,
        value,
        gas_limit,
        gas_price,
        chain_id: None,
    })
}

/// Sign with RFC 6979 nonces; the same request and key always give the same bytes.
pub fn sign(request: &TransactionRequest, key: &KeyMaterial) -> eyre::Result<SignedTransaction> {
    if key.address() != request.sender {
        eyre::bail!(
            "signing key {} does not belong to sender {}",
            key.address(),
            request.sender
        );
    }
    let signer = key.signer()?;
    let legacy = request.to_legacy();
    let signature = signer
        .sign_hash_sync(&legacy.signature_hash())
        .context("sign legacy transaction")?;
    let signed = legacy.into_signed(signature);
    let hash = *signed.hash();
    let raw = Bytes::from(TxEnvelope::Legacy(signed).encoded_2718());
    Ok(SignedTransaction {
        request: request.clone(),
        signature,
        hash,
        raw,
    })
}
