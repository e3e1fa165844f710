//! Error types for the contract deployer

use ethers::types::{Address, H256, U256};
use thiserror::Error;

/// Main error type for deployment operations
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid secret key: {0}")]
    InvalidKey(String),

    #[error("Invalid address {value}: {message}")]
    InvalidAddress { value: String, message: String },

    #[error("Invalid transaction intent: {0}")]
    InvalidIntent(String),

    #[error("Insufficient funds for {address:?}: have {have}, need {need}")]
    InsufficientFunds {
        address: Address,
        have: U256,
        need: U256,
    },

    #[error("Compilation of {contract} failed: {diagnostics}")]
    Compilation {
        contract: String,
        diagnostics: String,
    },

    #[error("Transport error during {operation}: {message}")]
    Transport { operation: String, message: String },

    #[error("Transaction rejected by node: {0}")]
    Rejected(String),

    #[error("Transaction {tx_hash:?} reverted in block {block_number:?}")]
    ExecutionReverted {
        tx_hash: H256,
        block_number: Option<u64>,
    },

    #[error("No receipt for {tx_hash:?} (nonce {nonce}) after {waited_ms}ms")]
    ConfirmationTimeout {
        tx_hash: H256,
        nonce: u64,
        waited_ms: u64,
    },

    #[error("Nonce {nonce} for {address:?} is still unresolved")]
    NonceTainted { address: Address, nonce: u64 },

    #[error("Step {step} needs a deployed contract but none was confirmed")]
    MissingDeployment { step: String },

    #[error("Batch cancelled before this account started")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployError {
    pub fn transport(operation: &str, err: impl std::fmt::Display) -> Self {
        DeployError::Transport {
            operation: operation.to_string(),
            message: err.to_string(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeployError::Transport { .. })
    }

    /// Errors that stop the whole batch before any account is processed
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            DeployError::Compilation { .. } | DeployError::Config(_)
        )
    }

    /// Stable short name used in reports and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            DeployError::Config(_) => "config",
            DeployError::InvalidKey(_) => "invalid_key",
            DeployError::InvalidAddress { .. } => "invalid_address",
            DeployError::InvalidIntent(_) => "invalid_intent",
            DeployError::InsufficientFunds { .. } => "insufficient_funds",
            DeployError::Compilation { .. } => "compilation_error",
            DeployError::Transport { .. } => "transport_error",
            DeployError::Rejected(_) => "rejected",
            DeployError::ExecutionReverted { .. } => "execution_reverted",
            DeployError::ConfirmationTimeout { .. } => "confirmation_timeout",
            DeployError::NonceTainted { .. } => "nonce_tainted",
            DeployError::MissingDeployment { .. } => "missing_deployment",
            DeployError::Cancelled => "cancelled",
            DeployError::Io(_) => "io",
            DeployError::Internal(_) => "internal",
        }
    }
}

/// Result type for deployer operations
pub type DeployResult<T> = Result<T, DeployError>;
