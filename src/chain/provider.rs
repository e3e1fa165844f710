//! Chain provider with multi-RPC support and automatic failover

use super::{ChainClient, Receipt};
use crate::config::ChainConfig;
use crate::error::{DeployError, DeployResult};
use crate::tx::TxEnvelope;

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError, RpcError};
use ethers::types::{Address, BlockNumber, Bytes, H256, U256};
use ethers::utils::keccak256;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Node error messages meaning the exact transaction is already in the pool
const ALREADY_KNOWN: [&str; 3] = ["already known", "known transaction", "already imported"];

/// Multi-provider wrapper with automatic failover
pub struct RpcChainClient {
    /// Chain configuration
    config: ChainConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl RpcChainClient {
    /// Create a new chain client
    pub fn new(config: ChainConfig) -> DeployResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for {}: {}", config.name, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(DeployError::Config(format!(
                "No valid RPC providers for {}",
                config.name
            )));
        }

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        if self.http_providers.len() < 2 {
            return;
        }
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("{} failover to provider {}", self.config.name, next);
    }

    /// Map a provider error, failing over on transport problems
    fn classify(&self, operation: &str, err: ProviderError) -> DeployError {
        match RpcError::as_error_response(&err) {
            Some(rpc) => DeployError::Rejected(rpc.message.clone()),
            None => {
                self.failover();
                DeployError::transport(operation, err)
            }
        }
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn chain_id(&self) -> DeployResult<u64> {
        self.http()
            .get_chainid()
            .await
            .map(|id| id.as_u64())
            .map_err(|e| self.classify("get chain id", e))
    }

    async fn balance(&self, address: Address) -> DeployResult<U256> {
        self.http()
            .get_balance(address, None)
            .await
            .map_err(|e| self.classify("get balance", e))
    }

    async fn gas_price(&self) -> DeployResult<U256> {
        self.http()
            .get_gas_price()
            .await
            .map_err(|e| self.classify("get gas price", e))
    }

    async fn nonce(&self, address: Address) -> DeployResult<u64> {
        self.http()
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await
            .map(|n| n.as_u64())
            .map_err(|e| self.classify("get nonce", e))
    }

    async fn estimate_gas(&self, envelope: &TxEnvelope) -> DeployResult<U256> {
        let tx = envelope.to_typed();
        self.http().estimate_gas(&tx, None).await.map_err(|e| {
            match RpcError::as_error_response(&e) {
                // Estimation reverts are reported by the node, not the transport
                Some(rpc) => DeployError::Rejected(format!("gas estimation: {}", rpc.message)),
                None => {
                    self.failover();
                    DeployError::transport("estimate gas", e)
                }
            }
        })
    }

    async fn submit(&self, raw: Bytes) -> DeployResult<H256> {
        let local_hash = H256::from(keccak256(&raw));

        match self.http().send_raw_transaction(raw).await {
            Ok(pending) => Ok(pending.tx_hash()),
            Err(e) => match RpcError::as_error_response(&e) {
                Some(rpc) => classify_submit_rejection(&rpc.message, local_hash),
                None => {
                    self.failover();
                    Err(DeployError::transport("send raw transaction", e))
                }
            },
        }
    }

    async fn receipt(&self, tx_hash: H256) -> DeployResult<Option<Receipt>> {
        self.http()
            .get_transaction_receipt(tx_hash)
            .await
            .map(|r| r.map(Receipt::from))
            .map_err(|e| self.classify("get transaction receipt", e))
    }
}

/// Node refusal of a raw transaction; a duplicate of bytes already in the
/// pool is accepted under the locally computed hash
fn classify_submit_rejection(message: &str, local_hash: H256) -> DeployResult<H256> {
    let lowered = message.to_lowercase();
    if ALREADY_KNOWN.iter().any(|m| lowered.contains(m)) {
        debug!("Transaction {:?} already known to node", local_hash);
        Ok(local_hash)
    } else {
        Err(DeployError::Rejected(message.to_string()))
    }
}
