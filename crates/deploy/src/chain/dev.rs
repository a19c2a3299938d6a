//! In-memory development chain.
//!
//! `DevChain` does not execute EVM code. It tracks what the deploy core can
//! observe: nonces, created contracts (their init code stands in for runtime
//! code), receipts, and the ERC-1967 implementation slot of proxies it was
//! taught to recognise. Every transaction is mined into its own block and
//! every head query mines an empty block, so confirmation waits make progress.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use alloy_core::primitives::{Address, B256, Bytes, TxHash, U256, keccak256};

use super::{ChainProvider, TransactionReceipt, TransactionRequest};
use crate::proxy::{IMPLEMENTATION_SLOT, UPGRADE_SIGNATURE};

/// Base gas charged per transaction.
const BASE_GAS: u64 = 21_000;
/// Gas charged per calldata byte.
const GAS_PER_BYTE: u64 = 16;
/// Timestamp of the first block.
const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
/// Seconds between blocks.
const BLOCK_TIME: u64 = 2;

#[derive(Debug, Default)]
struct DevState {
    block_number: u64,
    nonces: HashMap<Address, u64>,
    code: HashMap<Address, Bytes>,
    storage: HashMap<(Address, B256), B256>,
    balances: HashMap<Address, U256>,
    receipts: HashMap<TxHash, TransactionReceipt>,
    sent: Vec<TransactionRequest>,
    proxy_bytecode: Option<Bytes>,
    reverting: HashSet<Address>,
    reject_sends: usize,
    fail_reads: usize,
}

/// In-memory chain used by tests and `--dry-run`.
///
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct DevChain {
    state: Arc<Mutex<DevState>>,
}

impl DevChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat creations whose init code starts with `bytecode` as ERC-1967 proxies:
    /// the first constructor word is recorded as the implementation.
    pub fn with_proxy_bytecode(self, bytecode: impl Into<Bytes>) -> Self {
        self.state().proxy_bytecode = Some(bytecode.into());
        self
    }

    /// Credit `address` with `amount` wei.
    pub fn fund(&self, address: Address, amount: U256) {
        self.state().balances.insert(address, amount);
    }

    /// Reject the next `count` submissions before they reach a block.
    pub fn reject_next_sends(&self, count: usize) {
        self.state().reject_sends = count;
    }

    /// Fail the next `count` read calls, as a flaky RPC endpoint would.
    pub fn fail_next_reads(&self, count: usize) {
        self.state().fail_reads = count;
    }

    /// Make every call to `address` revert.
    pub fn revert_calls_to(&self, address: Address) {
        self.state().reverting.insert(address);
    }

    /// Place `code` at `address` without a transaction.
    pub fn set_code(&self, address: Address, code: impl Into<Bytes>) {
        self.state().code.insert(address, code.into());
    }

    /// Every transaction that made it into a block, in order.
    pub fn sent_transactions(&self) -> Vec<TransactionRequest> {
        self.state().sent.clone()
    }

    /// Number of contract creations mined so far.
    pub fn creation_count(&self) -> usize {
        self.state().sent.iter().filter(|tx| tx.to.is_none()).count()
    }

    fn state(&self) -> MutexGuard<'_, DevState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read(&self) -> anyhow::Result<MutexGuard<'_, DevState>> {
        let mut state = self.state();
        if state.fail_reads > 0 {
            state.fail_reads -= 1;
            anyhow::bail!("connection reset by peer");
        }
        Ok(state)
    }
}

impl DevState {
    fn mine(&mut self, tx: TransactionRequest) -> TxHash {
        let nonce = self.nonces.entry(tx.from).or_default();
        let current = *nonce;
        *nonce += 1;

        self.block_number += 1;
        let hash = keccak256([tx.from.as_slice(), &current.to_be_bytes()[..], &b"tx"[..]].concat());
        let gas_used = BASE_GAS + GAS_PER_BYTE * tx.data.len() as u64;

        let (status, contract_address) = match tx.to {
            None => {
                let address = created_address(tx.from, current);
                self.record_proxy(address, &tx.data);
                self.code.insert(address, tx.data.clone());
                (1, Some(address))
            }
            Some(to) => (u64::from(self.apply_call(to, &tx.data)), None),
        };

        self.receipts.insert(
            hash,
            TransactionReceipt {
                transaction_hash: hash,
                block_number: self.block_number,
                gas_used,
                status,
                contract_address,
            },
        );
        self.sent.push(tx);

        hash
    }

    fn record_proxy(&mut self, address: Address, init_code: &[u8]) {
        let Some(bytecode) = &self.proxy_bytecode else {
            return;
        };
        let Some(args) = init_code.strip_prefix(&bytecode[..]) else {
            return;
        };
        if let Some(word) = args.get(..32) {
            self.storage
                .insert((address, IMPLEMENTATION_SLOT), B256::from_slice(word));
        }
    }

    /// Apply a call to `to`, returning whether it succeeded.
    fn apply_call(&mut self, to: Address, data: &[u8]) -> bool {
        if self.reverting.contains(&to) || !self.code.contains_key(&to) {
            return false;
        }

        let selector = keccak256(UPGRADE_SIGNATURE.as_bytes());
        if data.len() >= 36 && data[..4] == selector[..4] {
            let is_proxy = self.storage.contains_key(&(to, IMPLEMENTATION_SLOT));
            if !is_proxy {
                return false;
            }
            self.storage
                .insert((to, IMPLEMENTATION_SLOT), B256::from_slice(&data[4..36]));
        }

        true
    }
}

/// Deterministic stand-in for the CREATE address of `sender` at `nonce`.
fn created_address(sender: Address, nonce: u64) -> Address {
    let hash = keccak256([sender.as_slice(), &nonce.to_be_bytes()[..]].concat());
    Address::from_slice(&hash[12..])
}

impl ChainProvider for DevChain {
    async fn send_transaction(&self, tx: TransactionRequest) -> anyhow::Result<TxHash> {
        let mut state = self.state();
        if state.reject_sends > 0 {
            state.reject_sends -= 1;
            anyhow::bail!("transaction underpriced");
        }
        Ok(state.mine(tx))
    }

    async fn transaction_receipt(
        &self,
        hash: TxHash,
    ) -> anyhow::Result<Option<TransactionReceipt>> {
        Ok(self.read()?.receipts.get(&hash).cloned())
    }

    async fn block_number(&self) -> anyhow::Result<u64> {
        let mut state = self.read()?;
        state.block_number += 1;
        Ok(state.block_number)
    }

    async fn code_at(&self, address: Address) -> anyhow::Result<Bytes> {
        Ok(self.read()?.code.get(&address).cloned().unwrap_or_default())
    }

    async fn storage_at(&self, address: Address, slot: B256) -> anyhow::Result<B256> {
        Ok(self
            .read()?
            .storage
            .get(&(address, slot))
            .copied()
            .unwrap_or_default())
    }

    async fn balance(&self, address: Address) -> anyhow::Result<U256> {
        Ok(self
            .read()?
            .balances
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn block_timestamp(&self) -> anyhow::Result<u64> {
        Ok(GENESIS_TIMESTAMP + BLOCK_TIME * self.read()?.block_number)
    }
}
