//! Transaction submission and confirmation tracking.

use std::{future::Future, time::Duration};

use alloy_core::primitives::{Address, TxHash};

use crate::{
    chain::{ChainProvider, TransactionReceipt, TransactionRequest},
    error::TransactionError,
    retry::{DEFAULT_MAX_ATTEMPTS, with_read_retries},
};

/// Number of confirmations to wait for. The block including the transaction counts as the first.
pub const REQUIRED_CONFIRMATIONS: u64 = 2;

/// Default interval between receipt polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default upper bound on the time spent waiting for confirmations.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Tunables for [`TransactionSubmitter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitterConfig {
    /// Confirmations required before a transaction is considered final.
    pub confirmations: u64,
    /// Delay between receipt polls.
    pub poll_interval: Duration,
    /// Give up waiting for confirmations after this long.
    pub timeout: Duration,
    /// Attempts for each idempotent read made while polling.
    pub read_attempts: usize,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            confirmations: REQUIRED_CONFIRMATIONS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            read_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// A transaction that reached the required number of confirmations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedTransaction {
    pub label: String,
    pub hash: TxHash,
    pub receipt: TransactionReceipt,
}

impl ConfirmedTransaction {
    pub fn block_number(&self) -> u64 {
        self.receipt.block_number
    }

    pub fn gas_used(&self) -> u64 {
        self.receipt.gas_used
    }

    /// Address of the contract created by this transaction, if any.
    pub fn contract_address(&self) -> Option<Address> {
        self.receipt.contract_address
    }
}

/// Submits transactions and waits for them to be confirmed.
///
/// Submission itself is never retried: a rejected send may still have reached
/// the mempool. Only the receipt and head-block polling reads are retried.
#[derive(Debug, Clone)]
pub struct TransactionSubmitter<P> {
    provider: P,
    config: SubmitterConfig,
}

impl<P: ChainProvider> TransactionSubmitter<P> {
    pub fn new(provider: P, config: SubmitterConfig) -> Self {
        Self { provider, config }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn config(&self) -> &SubmitterConfig {
        &self.config
    }

    /// Build, send and confirm `tx`.
    pub async fn send(
        &self,
        tx: TransactionRequest,
        label: &str,
    ) -> Result<ConfirmedTransaction, TransactionError> {
        self.submit(self.provider.send_transaction(tx), label).await
    }

    /// Await a pending submission and wait for it to be confirmed.
    ///
    /// `pending` resolves to the transaction hash once the node accepted the
    /// transaction. An error from it is reported as [`TransactionError::Rejected`].
    pub async fn submit<F>(
        &self,
        pending: F,
        label: &str,
    ) -> Result<ConfirmedTransaction, TransactionError>
    where
        F: Future<Output = anyhow::Result<TxHash>>,
    {
        tracing::info!(label, "Sending {}...", label);

        let hash = pending.await.map_err(|e| TransactionError::Rejected {
            label: label.to_string(),
            reason: format!("{e:#}"),
        })?;

        tracing::debug!(label, %hash, "Transaction accepted, waiting for confirmations");

        let receipt = self.wait_for_confirmations(hash, label).await?;

        tracing::info!(
            label,
            %hash,
            block = receipt.block_number,
            gas_used = receipt.gas_used,
            "... Sent! {}",
            hash
        );

        Ok(ConfirmedTransaction {
            label: label.to_string(),
            hash,
            receipt,
        })
    }

    async fn wait_for_confirmations(
        &self,
        hash: TxHash,
        label: &str,
    ) -> Result<TransactionReceipt, TransactionError> {
        let confirmations = self.config.confirmations.max(1);
        let tracking = |e: anyhow::Error| TransactionError::Tracking {
            label: label.to_string(),
            hash,
            reason: format!("{e:#}"),
        };

        let wait = async {
            loop {
                let receipt = with_read_retries(label, self.config.read_attempts, || {
                    self.provider.transaction_receipt(hash)
                })
                .await
                .map_err(tracking)?;

                if let Some(receipt) = receipt {
                    if !receipt.succeeded() {
                        return Err(TransactionError::Reverted {
                            label: label.to_string(),
                            hash,
                        });
                    }

                    let head = with_read_retries(label, self.config.read_attempts, || {
                        self.provider.block_number()
                    })
                    .await
                    .map_err(tracking)?;

                    let confirmed = head.saturating_add(1).saturating_sub(receipt.block_number);
                    if confirmed >= confirmations {
                        return Ok(receipt);
                    }

                    tracing::debug!(
                        label,
                        %hash,
                        confirmed,
                        confirmations,
                        "Waiting for confirmations"
                    );
                }

                tokio::time::sleep(self.config.poll_interval).await;
            }
        };

        tokio::time::timeout(self.config.timeout, wait)
            .await
            .map_err(|_| TransactionError::Timeout {
                label: label.to_string(),
                hash,
                confirmations,
            })?
    }
}
