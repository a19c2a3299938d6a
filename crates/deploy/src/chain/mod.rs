//! Chain provider capability.
//!
//! The deploy core only needs a handful of node operations: sending a
//! transaction signed by the node, polling receipts and the head block, and
//! reading code and storage. [`JsonRpcChain`] talks to a real node over
//! JSON-RPC; [`DevChain`] is an in-memory stand-in used by tests and dry runs.

use std::future::Future;

use alloy_core::primitives::{Address, B256, Bytes, TxHash, U256};
use anyhow::Result;
use serde::{Deserialize, Serialize};

mod dev;
mod rpc;

pub use dev::DevChain;
pub use rpc::{JsonRpcChain, json_rpc_call};

/// A transaction to be signed and broadcast by the node.
///
/// `to == None` is a contract creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub from: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    pub data: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
}

impl TransactionRequest {
    /// A contract creation transaction carrying `init_code`.
    pub fn create(from: Address, init_code: impl Into<Bytes>) -> Self {
        Self {
            from,
            to: None,
            data: init_code.into(),
            value: None,
        }
    }

    /// A call to `to` carrying `calldata`.
    pub fn call(from: Address, to: Address, calldata: impl Into<Bytes>) -> Self {
        Self {
            from,
            to: Some(to),
            data: calldata.into(),
            value: None,
        }
    }
}

/// The subset of a transaction receipt the deployers care about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: TxHash,
    #[serde(with = "quantity")]
    pub block_number: u64,
    #[serde(with = "quantity")]
    pub gas_used: u64,
    #[serde(with = "quantity")]
    pub status: u64,
    #[serde(default)]
    pub contract_address: Option<Address>,
}

impl TransactionReceipt {
    /// Whether the transaction executed without reverting.
    pub fn succeeded(&self) -> bool {
        self.status == 1
    }
}

/// Operations the deploy core needs from a chain node.
pub trait ChainProvider: Send + Sync {
    /// Submit a transaction for the node to sign and broadcast, returning its hash.
    fn send_transaction(
        &self,
        tx: TransactionRequest,
    ) -> impl Future<Output = Result<TxHash>> + Send;

    /// The receipt of `hash`, or `None` while it is still pending.
    fn transaction_receipt(
        &self,
        hash: TxHash,
    ) -> impl Future<Output = Result<Option<TransactionReceipt>>> + Send;

    /// The current head block number.
    fn block_number(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Deployed code at `address` (empty if none).
    fn code_at(&self, address: Address) -> impl Future<Output = Result<Bytes>> + Send;

    /// Raw storage slot `slot` of `address`.
    fn storage_at(&self, address: Address, slot: B256)
    -> impl Future<Output = Result<B256>> + Send;

    /// Balance of `address` in wei.
    fn balance(&self, address: Address) -> impl Future<Output = Result<U256>> + Send;

    /// Timestamp of the head block.
    fn block_timestamp(&self) -> impl Future<Output = Result<u64>> + Send;
}

/// Serde helpers for JSON-RPC hex quantities (`"0x1a"`).
pub(crate) mod quantity {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{value:#x}"))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Parse a `0x`-prefixed hex quantity.
    pub fn parse(s: &str) -> Result<u64, std::num::ParseIntError> {
        u64::from_str_radix(s.trim_start_matches("0x"), 16)
    }
}
