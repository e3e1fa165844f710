//! Gas price and gas limit resolution

use super::TxEnvelope;
use crate::chain::ChainClient;
use crate::config::DeployerConfig;
use crate::error::DeployResult;

use ethers::types::U256;
use serde::Serialize;
use tracing::debug;

/// Gas price and limit authorized for one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct GasPolicy {
    pub price: U256,
    pub limit: U256,
}

impl GasPolicy {
    /// Upper bound on the fee the sender authorizes
    pub fn max_fee(&self) -> U256 {
        self.price.saturating_mul(self.limit)
    }
}

/// Where a transaction's gas limit comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasLimit {
    Fixed(U256),
    Estimate,
}

/// Gas estimator for transactions
#[derive(Debug, Clone)]
pub struct GasEstimator {
    /// Buffer percentage for estimated gas limits (e.g., 20 = 20% buffer)
    gas_limit_buffer_percent: u64,
    /// Buffer percentage for gas price
    gas_price_buffer_percent: u64,
}

impl GasEstimator {
    pub fn new(gas_limit_buffer_percent: u64, gas_price_buffer_percent: u64) -> Self {
        Self {
            gas_limit_buffer_percent,
            gas_price_buffer_percent,
        }
    }

    pub fn from_config(config: &DeployerConfig) -> Self {
        Self::new(
            config.gas_limit_buffer_percent,
            config.gas_price_buffer_percent,
        )
    }

    /// Current gas price with the configured buffer
    pub async fn gas_price(&self, client: &dyn ChainClient) -> DeployResult<U256> {
        let price = client.gas_price().await?;
        let buffered = with_buffer(price, self.gas_price_buffer_percent);
        debug!("Gas price {} (buffered {})", price, buffered);
        Ok(buffered)
    }

    /// Resolve the gas limit for an envelope whose other fields are final
    pub async fn gas_limit(
        &self,
        client: &dyn ChainClient,
        envelope: &TxEnvelope,
        limit: GasLimit,
    ) -> DeployResult<U256> {
        match limit {
            GasLimit::Fixed(limit) => Ok(limit),
            GasLimit::Estimate => {
                let estimate = client.estimate_gas(envelope).await?;
                let buffered = with_buffer(estimate, self.gas_limit_buffer_percent);
                debug!("Estimated gas {} (buffered {})", estimate, buffered);
                Ok(buffered)
            }
        }
    }

    /// Calculate total cost in wei, value included
    pub fn calculate_cost(gas: &GasPolicy, value: U256) -> U256 {
        gas.max_fee().saturating_add(value)
    }
}

impl Default for GasEstimator {
    fn default() -> Self {
        Self::new(20, 0)
    }
}

fn with_buffer(amount: U256, percent: u64) -> U256 {
    amount.saturating_add(amount.saturating_mul(U256::from(percent)) / U256::from(100u64))
}
