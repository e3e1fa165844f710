//! Chain module - the boundary to the EVM node
//!
//! This module provides:
//! - The `ChainClient` trait every orchestrator talks to
//! - Receipt types decoupled from the RPC library
//! - An HTTP implementation with multi-RPC failover

pub mod provider;

pub use provider::RpcChainClient;

use crate::error::DeployResult;
use crate::tx::TxEnvelope;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};
use serde::Serialize;

/// Execution outcome reported by a receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Success,
    Failure,
}

/// Chain-produced record of an included transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: H256,
    pub status: ReceiptStatus,
    pub contract_address: Option<Address>,
    pub block_number: Option<u64>,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Success
    }
}

impl From<TransactionReceipt> for Receipt {
    fn from(receipt: TransactionReceipt) -> Self {
        let status = if receipt.status == Some(1u64.into()) {
            ReceiptStatus::Success
        } else {
            ReceiptStatus::Failure
        };

        Self {
            tx_hash: receipt.transaction_hash,
            status,
            contract_address: receipt.contract_address,
            block_number: receipt.block_number.map(|b| b.as_u64()),
        }
    }
}

/// Read and submit operations against one chain.
///
/// Implementations are shared by every account pipeline, so all methods take
/// `&self`. Transport failures surface as `DeployError::Transport`; a node
/// refusing a transaction surfaces as `DeployError::Rejected`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> DeployResult<u64>;

    async fn balance(&self, address: Address) -> DeployResult<U256>;

    async fn gas_price(&self) -> DeployResult<U256>;

    /// Next nonce for `address`, counting pending transactions
    async fn nonce(&self, address: Address) -> DeployResult<u64>;

    async fn estimate_gas(&self, envelope: &TxEnvelope) -> DeployResult<U256>;

    /// Broadcast signed bytes; resubmitting identical bytes returns the same hash
    async fn submit(&self, raw: Bytes) -> DeployResult<H256>;

    async fn receipt(&self, tx_hash: H256) -> DeployResult<Option<Receipt>>;
}
