//! Shared utilities for integration tests: an in-memory chain and a token artifact.

#![allow(dead_code)]

use async_trait::async_trait;
use contract_deployer::artifact::Artifact;
use contract_deployer::chain::{ChainClient, Receipt, ReceiptStatus};
use contract_deployer::config::DeployerConfig;
use contract_deployer::error::{DeployError, DeployResult};
use contract_deployer::tx::TxEnvelope;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::rlp::Rlp;
use ethers::utils::{get_contract_address, keccak256, parse_ether};
use std::collections::HashMap;
use std::sync::Mutex;

pub const CHAIN_ID: u64 = 31337;

pub const KEY_A: &str = "0x0000000000000000000000000000000000000000000000000000000000000001";
pub const KEY_B: &str = "0x0000000000000000000000000000000000000000000000000000000000000002";
pub const KEY_C: &str = "0x0000000000000000000000000000000000000000000000000000000000000003";

pub const TOKEN_ABI: &str = r#"[
    {"type":"constructor","inputs":[{"name":"initialSupply","type":"uint256"}],"stateMutability":"nonpayable"},
    {"type":"function","name":"transfer","inputs":[{"name":"to","type":"address"},{"name":"amount","type":"uint256"}],"outputs":[{"name":"","type":"bool"}],"stateMutability":"nonpayable"}
]"#;

pub fn token_artifact() -> Artifact {
    Artifact {
        contract_name: "MyToken".to_string(),
        abi: serde_json::from_str(TOKEN_ABI).unwrap(),
        bytecode: Bytes::from(vec![0x60, 0x80, 0x60, 0x40, 0x52]),
    }
}

/// Settings that keep polling and retries in the millisecond range
pub fn fast_config() -> DeployerConfig {
    DeployerConfig {
        max_concurrent_accounts: 3,
        max_submit_retries: 3,
        retry_delay_ms: 1,
        max_retry_delay_ms: 5,
        poll_interval_ms: 5,
        confirmation_timeout_ms: 100,
        ..DeployerConfig::default()
    }
}

/// How the fake chain answers receipt queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptMode {
    Confirm,
    Revert,
    /// Contract creations succeed, everything else reverts
    RevertCalls,
    /// Never produce a receipt
    Never,
}

#[derive(Debug, Clone)]
struct MinedTx {
    sender: Address,
    nonce: u64,
    to: Option<Address>,
}

#[derive(Default)]
struct State {
    balances: HashMap<Address, U256>,
    nonces: HashMap<Address, u64>,
    txs: HashMap<H256, MinedTx>,
    submit_calls: usize,
    lost_responses: usize,
    receipt_delays: HashMap<Address, u32>,
}

/// Single-node chain kept in memory.
///
/// Signed bytes are decoded and the sender recovered, so nonces and contract
/// addresses behave like a real node's.
pub struct FakeChain {
    mode: ReceiptMode,
    gas_price: U256,
    gas_estimate: U256,
    state: Mutex<State>,
}

impl FakeChain {
    pub fn new(mode: ReceiptMode) -> Self {
        Self {
            mode,
            gas_price: U256::from(1_000_000_000u64),
            gas_estimate: U256::from(100_000u64),
            state: Mutex::new(State::default()),
        }
    }

    pub fn fund(&self, address: Address, ether: &str) {
        let amount = parse_ether(ether).unwrap();
        self.state.lock().unwrap().balances.insert(address, amount);
    }

    /// Accept the next `count` submissions but fail their responses
    pub fn lose_responses(&self, count: usize) {
        self.state.lock().unwrap().lost_responses = count;
    }

    /// Answer the next `polls` receipt queries for `address` with nothing
    pub fn delay_receipts(&self, address: Address, polls: u32) {
        self.state.lock().unwrap().receipt_delays.insert(address, polls);
    }

    /// Distinct transactions accepted from `sender`
    pub fn transactions_from(&self, sender: Address) -> usize {
        self.state
            .lock()
            .unwrap()
            .txs
            .values()
            .filter(|tx| tx.sender == sender)
            .count()
    }

    pub fn submit_calls(&self) -> usize {
        self.state.lock().unwrap().submit_calls
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn chain_id(&self) -> DeployResult<u64> {
        Ok(CHAIN_ID)
    }

    async fn balance(&self, address: Address) -> DeployResult<U256> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .balances
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn gas_price(&self) -> DeployResult<U256> {
        Ok(self.gas_price)
    }

    async fn nonce(&self, address: Address) -> DeployResult<u64> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .nonces
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn estimate_gas(&self, _envelope: &TxEnvelope) -> DeployResult<U256> {
        Ok(self.gas_estimate)
    }

    async fn submit(&self, raw: Bytes) -> DeployResult<H256> {
        let hash = H256::from(keccak256(raw.as_ref()));
        let mut state = self.state.lock().unwrap();
        state.submit_calls += 1;

        if !state.txs.contains_key(&hash) {
            let (mut tx, signature) = TypedTransaction::decode_signed(&Rlp::new(raw.as_ref()))
                .map_err(|e| DeployError::Rejected(format!("undecodable transaction: {}", e)))?;
            tx.set_chain_id(CHAIN_ID);
            let sender = signature
                .recover(tx.sighash())
                .map_err(|e| DeployError::Rejected(format!("bad signature: {}", e)))?;

            let nonce = tx.nonce().map(|n| n.as_u64()).unwrap_or_default();
            let expected = state.nonces.get(&sender).copied().unwrap_or_default();
            if nonce != expected {
                return Err(DeployError::Rejected(format!(
                    "nonce {} does not match account nonce {}",
                    nonce, expected
                )));
            }

            state.nonces.insert(sender, expected + 1);
            state.txs.insert(
                hash,
                MinedTx {
                    sender,
                    nonce,
                    to: tx.to_addr().copied(),
                },
            );
        }

        if state.lost_responses > 0 {
            state.lost_responses -= 1;
            return Err(DeployError::transport("submit", "connection reset by peer"));
        }

        Ok(hash)
    }

    async fn receipt(&self, tx_hash: H256) -> DeployResult<Option<Receipt>> {
        if self.mode == ReceiptMode::Never {
            return Ok(None);
        }

        let mut state = self.state.lock().unwrap();
        let tx = match state.txs.get(&tx_hash) {
            Some(tx) => tx.clone(),
            None => return Ok(None),
        };

        if let Some(polls) = state.receipt_delays.get_mut(&tx.sender) {
            if *polls > 0 {
                *polls -= 1;
                return Ok(None);
            }
        }

        let success = match self.mode {
            ReceiptMode::Confirm => true,
            ReceiptMode::RevertCalls => tx.to.is_none(),
            ReceiptMode::Revert | ReceiptMode::Never => false,
        };

        Ok(Some(Receipt {
            tx_hash,
            status: if success {
                ReceiptStatus::Success
            } else {
                ReceiptStatus::Failure
            },
            contract_address: match (success, tx.to) {
                (true, None) => Some(get_contract_address(tx.sender, tx.nonce)),
                _ => None,
            },
            block_number: Some(tx.nonce + 1),
        }))
    }
}
