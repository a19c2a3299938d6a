//! Error types for the deployment core.
//!
//! Collaborators (chain providers, artifact loading, proxy plumbing) report
//! `anyhow` errors with context; the deploy/registry core classifies them into
//! the variants below so callers can tell a corrupt registry from a reverted
//! deployment.

use alloy_core::primitives::{Address, TxHash};
use thiserror::Error;

/// Errors raised by the address registry. All of them are fatal.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read registry for network {network}: {reason}")]
    Read { network: String, reason: String },

    #[error("failed to write registry for network {network}: {reason}")]
    Write { network: String, reason: String },

    #[error("invalid network name: {0:?}")]
    InvalidNetwork(String),
}

/// Errors raised while submitting a transaction and waiting for it to confirm.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("{label} was rejected: {reason}")]
    Rejected { label: String, reason: String },

    #[error("{label} reverted in transaction {hash}")]
    Reverted { label: String, hash: TxHash },

    #[error("timed out waiting for {confirmations} confirmations of {label} ({hash})")]
    Timeout {
        label: String,
        hash: TxHash,
        confirmations: u64,
    },

    #[error("failed to track {label} ({hash}): {reason}")]
    Tracking {
        label: String,
        hash: TxHash,
        reason: String,
    },
}

/// Errors raised by the plain and upgradeable deployers.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Contract creation or proxy initialization failed. The registry was not touched.
    #[error("deployment of {name} failed: {source:#}")]
    Deployment {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// Upgrading an existing proxy failed. The registry still holds the proxy address.
    #[error("upgrade of {name} at {proxy} failed: {source:#}")]
    Upgrade {
        name: String,
        proxy: Address,
        #[source]
        source: anyhow::Error,
    },

    /// The registry points at an address without contract code.
    #[error("registry entry {name} points at {proxy}, which has no contract code")]
    ProxyMissing { name: String, proxy: Address },

    /// The registry points at a contract whose ERC-1967 implementation slot is empty.
    #[error("registry entry {name} points at {proxy}, which is not an ERC-1967 proxy")]
    NotAProxy { name: String, proxy: Address },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors from a JSON-RPC endpoint.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The request never produced a usable HTTP response.
    #[error("{method} request failed: {source}")]
    Transport {
        method: String,
        #[source]
        source: reqwest::Error,
    },

    /// The node answered with a JSON-RPC error object.
    #[error("{method} returned error {code}: {message}")]
    Node {
        method: String,
        code: i64,
        message: String,
    },

    #[error("unexpected {method} result: {source}")]
    Decode {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

impl RpcError {
    /// Whether sending the same request again may succeed.
    ///
    /// Connection failures, timeouts, HTTP 429 and 5xx responses are transient,
    /// as are the node's rate-limit (-32005) and internal (-32603) errors.
    /// Everything else describes the request itself and fails again.
    pub fn is_transient(&self) -> bool {
        match self {
            RpcError::Transport { source, .. } => {
                !source.is_decode()
                    && source.status().is_none_or(|status| {
                        status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                    })
            }
            RpcError::Node { code, .. } => matches!(code, -32005 | -32603),
            RpcError::Decode { .. } => false,
        }
    }
}

/// Errors raised by the block explorer verification service.
///
/// These are logged by the deployers and never propagated.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("verification request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("explorer rejected verification: {0}")]
    Rejected(String),
}

/// Errors raised by the batch processor.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch size must be greater than zero")]
    ZeroBatchSize,

    #[error("input list {list} has {actual} items, expected {expected}")]
    LengthMismatch {
        list: usize,
        expected: usize,
        actual: usize,
    },

    #[error("handler failed on batch {batch}: {source:#}")]
    Handler {
        batch: usize,
        #[source]
        source: anyhow::Error,
    },
}
