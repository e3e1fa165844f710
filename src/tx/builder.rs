//! Unsigned transaction assembly for the three supported intents

use super::gas::{GasEstimator, GasLimit, GasPolicy};
use super::nonce::NonceManager;
use crate::chain::ChainClient;
use crate::error::{DeployError, DeployResult};

use ethers::abi::{self, Token};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, U256};
use std::sync::Arc;
use tracing::{debug, warn};

/// What a transaction is meant to do
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Contract creation: bytecode followed by ABI-encoded constructor args
    Create {
        bytecode: Bytes,
        constructor_args: Vec<Token>,
    },
    /// Plain value and/or raw data transfer
    Transfer {
        to: Address,
        value: U256,
        data: Bytes,
    },
    /// Contract method call
    Call {
        contract: Address,
        selector: [u8; 4],
        args: Vec<Token>,
        value: U256,
    },
}

impl Intent {
    pub fn to(&self) -> Option<Address> {
        match self {
            Intent::Create { .. } => None,
            Intent::Transfer { to, .. } => Some(*to),
            Intent::Call { contract, .. } => Some(*contract),
        }
    }

    pub fn value(&self) -> U256 {
        match self {
            Intent::Create { .. } => U256::zero(),
            Intent::Transfer { value, .. } | Intent::Call { value, .. } => *value,
        }
    }

    /// Validate the intent and produce its calldata
    pub fn calldata(&self) -> DeployResult<Bytes> {
        match self {
            Intent::Create {
                bytecode,
                constructor_args,
            } => {
                if bytecode.is_empty() {
                    return Err(DeployError::InvalidIntent(
                        "contract creation needs non-empty bytecode".to_string(),
                    ));
                }
                let mut data = bytecode.to_vec();
                data.extend(abi::encode(constructor_args));
                Ok(data.into())
            }
            Intent::Transfer { data, .. } => Ok(data.clone()),
            Intent::Call {
                contract,
                selector,
                args,
                ..
            } => {
                if contract.is_zero() {
                    return Err(DeployError::InvalidAddress {
                        value: format!("{:?}", contract),
                        message: "cannot call the zero address".to_string(),
                    });
                }
                let mut data = selector.to_vec();
                data.extend(abi::encode(args));
                Ok(data.into())
            }
        }
    }
}

/// Unsigned transaction ready for signing
#[derive(Debug, Clone, PartialEq)]
pub struct TxEnvelope {
    pub from: Address,
    pub nonce: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
    pub gas: GasPolicy,
    pub chain_id: u64,
}

impl TxEnvelope {
    /// Legacy (EIP-155) transaction request for this envelope.
    ///
    /// A zero gas limit is left unset so the envelope can be used for
    /// estimation before the limit is known.
    pub fn to_typed(&self) -> TypedTransaction {
        let mut request = TransactionRequest::new()
            .from(self.from)
            .nonce(self.nonce)
            .value(self.value)
            .data(self.data.clone())
            .gas_price(self.gas.price)
            .chain_id(self.chain_id);

        if !self.gas.limit.is_zero() {
            request = request.gas(self.gas.limit);
        }
        if let Some(to) = self.to {
            request = request.to(to);
        }

        TypedTransaction::Legacy(request)
    }
}

/// Builds envelopes, reading gas, nonce and balance from the chain
pub struct TxBuilder {
    chain_id: u64,
    gas: GasEstimator,
    nonces: Arc<NonceManager>,
}

impl TxBuilder {
    pub fn new(chain_id: u64, gas: GasEstimator, nonces: Arc<NonceManager>) -> Self {
        Self {
            chain_id,
            gas,
            nonces,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn nonces(&self) -> &Arc<NonceManager> {
        &self.nonces
    }

    /// Build an envelope for `intent` sent from `from`.
    ///
    /// The balance check is advisory: it keeps obviously unfunded accounts
    /// from submitting, the chain still has the final word. On any failure
    /// after the nonce was allocated, the nonce is released.
    pub async fn build(
        &self,
        client: &dyn ChainClient,
        from: Address,
        intent: &Intent,
        gas_limit: GasLimit,
    ) -> DeployResult<TxEnvelope> {
        let data = intent.calldata()?;
        let price = self.gas.gas_price(client).await?;
        let nonce = self.nonces.allocate(client, from).await?;

        let envelope = TxEnvelope {
            from,
            nonce,
            to: intent.to(),
            value: intent.value(),
            data,
            gas: GasPolicy {
                price,
                limit: U256::zero(),
            },
            chain_id: self.chain_id,
        };

        match self.finalize(client, envelope, gas_limit).await {
            Ok(envelope) => {
                debug!(
                    "Built envelope nonce={} to={:?} gas_limit={} gas_price={}",
                    envelope.nonce, envelope.to, envelope.gas.limit, envelope.gas.price
                );
                Ok(envelope)
            }
            Err(e) => {
                self.nonces.release(from, nonce).await;
                Err(e)
            }
        }
    }

    async fn finalize(
        &self,
        client: &dyn ChainClient,
        mut envelope: TxEnvelope,
        gas_limit: GasLimit,
    ) -> DeployResult<TxEnvelope> {
        let balance = client.balance(envelope.from).await?;

        envelope.gas.limit = match self.gas.gas_limit(client, &envelope, gas_limit).await {
            Ok(limit) => limit,
            Err(e) => {
                // Nodes refuse to estimate for senders that cannot pay for a single unit of gas
                let floor = envelope.gas.price.saturating_add(envelope.value);
                if balance < floor {
                    debug!("Gas estimation for {:?} failed: {}", envelope.from, e);
                    warn!(
                        "Insufficient balance for {:?}: {} < {}",
                        envelope.from, balance, floor
                    );
                    return Err(DeployError::InsufficientFunds {
                        address: envelope.from,
                        have: balance,
                        need: floor,
                    });
                }
                return Err(e);
            }
        };

        let need = GasEstimator::calculate_cost(&envelope.gas, envelope.value);
        if balance < need {
            warn!(
                "Insufficient balance for {:?}: {} < {}",
                envelope.from, balance, need
            );
            return Err(DeployError::InsufficientFunds {
                address: envelope.from,
                have: balance,
                need,
            });
        }

        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;

    const GWEI: u64 = 1_000_000_000;

    fn funded_chain(balance: U256) -> MockChainClient {
        let mut client = MockChainClient::new();
        client.expect_gas_price().returning(|| Ok(U256::from(GWEI)));
        client.expect_nonce().returning(|_| Ok(3));
        client.expect_balance().returning(move |_| Ok(balance));
        client
    }

    fn builder() -> TxBuilder {
        TxBuilder::new(10143, GasEstimator::new(20, 0), Arc::new(NonceManager::new()))
    }

    fn create_intent() -> Intent {
        Intent::Create {
            bytecode: Bytes::from(vec![0x60, 0x80, 0x60, 0x40]),
            constructor_args: vec![Token::Uint(U256::from(1_000_000_000u64))],
        }
    }

    #[tokio::test]
    async fn test_back_to_back_builds_get_increasing_nonces() {
        let client = funded_chain(U256::exp10(20));
        let builder = builder();
        let from = Address::repeat_byte(0xaa);
        let fixed = GasLimit::Fixed(U256::from(2_000_000u64));

        let first = builder.build(&client, from, &create_intent(), fixed).await.unwrap();
        let second = builder.build(&client, from, &create_intent(), fixed).await.unwrap();

        assert_eq!(first.nonce, 3);
        assert_eq!(second.nonce, 4);
        assert_eq!(first.chain_id, 10143);
        assert_eq!(first.to, None);
    }

    #[tokio::test]
    async fn test_insufficient_funds_releases_nonce() {
        // 2M gas at 1 gwei needs 0.002 ether
        let client = funded_chain(U256::from(1_999_999u64 * GWEI));
        let builder = builder();
        let from = Address::repeat_byte(0xbb);
        let fixed = GasLimit::Fixed(U256::from(2_000_000u64));

        let err = builder.build(&client, from, &create_intent(), fixed).await.unwrap_err();
        match err {
            DeployError::InsufficientFunds { have, need, .. } => {
                assert!(have < need);
                assert_eq!(need, U256::from(2_000_000u64 * GWEI));
            }
            other => panic!("unexpected error: {other}"),
        }

        let rich = funded_chain(U256::exp10(20));
        let envelope = builder.build(&rich, from, &create_intent(), fixed).await.unwrap();
        assert_eq!(envelope.nonce, 3);
    }

    #[tokio::test]
    async fn test_transfer_value_counts_toward_funds() {
        let client = funded_chain(U256::from(21_000u64 * GWEI));
        let intent = Intent::Transfer {
            to: Address::repeat_byte(0x11),
            value: U256::one(),
            data: Bytes::default(),
        };
        let err = builder()
            .build(&client, Address::repeat_byte(0xcc), &intent, GasLimit::Fixed(21_000u64.into()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "insufficient_funds");
    }

    #[tokio::test]
    async fn test_estimated_limit_is_buffered() {
        let mut client = funded_chain(U256::exp10(20));
        client
            .expect_estimate_gas()
            .withf(|envelope| envelope.gas.limit.is_zero() && envelope.to.is_some())
            .returning(|_| Ok(U256::from(100_000u64)));

        let intent = Intent::Call {
            contract: Address::repeat_byte(0x22),
            selector: [0xa9, 0x05, 0x9c, 0xbb],
            args: vec![Token::Address(Address::repeat_byte(0x33)), Token::Uint(5u64.into())],
            value: U256::zero(),
        };
        let envelope = builder()
            .build(&client, Address::repeat_byte(0xdd), &intent, GasLimit::Estimate)
            .await
            .unwrap();

        assert_eq!(envelope.gas.limit, U256::from(120_000u64));
        assert_eq!(&envelope.data[..4], &[0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(envelope.data.len(), 4 + 64);
    }

    #[tokio::test]
    async fn test_failed_estimate_for_unfunded_sender_is_insufficient_funds() {
        let mut client = funded_chain(U256::zero());
        client.expect_estimate_gas().returning(|_| {
            Err(DeployError::Rejected(
                "gas estimation: insufficient funds for gas * price + value".to_string(),
            ))
        });
        let builder = builder();
        let from = Address::repeat_byte(0xee);

        let err = builder
            .build(&client, from, &create_intent(), GasLimit::Estimate)
            .await
            .unwrap_err();
        match err {
            DeployError::InsufficientFunds { have, need, .. } => {
                assert!(have.is_zero());
                assert_eq!(need, U256::from(GWEI));
            }
            other => panic!("unexpected error: {other}"),
        }

        // The nonce went back to the pool
        let funded = funded_chain(U256::exp10(20));
        let envelope = builder
            .build(&funded, from, &create_intent(), GasLimit::Fixed(U256::from(2_000_000u64)))
            .await
            .unwrap();
        assert_eq!(envelope.nonce, 3);
    }

    #[tokio::test]
    async fn test_failed_estimate_for_funded_sender_keeps_node_error() {
        let mut client = funded_chain(U256::exp10(20));
        client
            .expect_estimate_gas()
            .returning(|_| Err(DeployError::Rejected("execution reverted".to_string())));

        let err = builder()
            .build(&client, Address::repeat_byte(0xef), &create_intent(), GasLimit::Estimate)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "rejected");
    }

    #[tokio::test]
    async fn test_empty_bytecode_rejected_before_chain_reads() {
        let client = MockChainClient::new();
        let intent = Intent::Create {
            bytecode: Bytes::default(),
            constructor_args: vec![],
        };
        let err = builder()
            .build(&client, Address::repeat_byte(1), &intent, GasLimit::Estimate)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_intent");
    }

    #[test]
    fn test_create_calldata_appends_constructor_args() {
        let data = create_intent().calldata().unwrap();
        assert_eq!(&data[..4], &[0x60, 0x80, 0x60, 0x40]);
        assert_eq!(data.len(), 4 + 32);
    }
}
