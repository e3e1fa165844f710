//! Per-account transaction orchestration
//!
//! Every submitted transaction walks the same state machine:
//! `Built -> Signed -> Submitted -> Confirmed | Failed | TimedOut`.

use super::pipeline::Pipeline;
use super::retry::backoff_delay;
use crate::account::Account;
use crate::chain::{ChainClient, Receipt};
use crate::config::DeployerConfig;
use crate::error::{DeployError, DeployResult};
use crate::metrics;
use crate::tx::{GasEstimator, GasLimit, Intent, NonceManager, SignedTx, TxBuilder, TxSigner};

use ethers::types::{Address, H256};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Upper bound on a single submit call
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle of one submitted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxState {
    Built,
    Signed,
    Submitted,
    Confirmed,
    Failed,
    TimedOut,
}

/// What happened to one pipeline step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub name: String,
    /// `None` when the step failed before an envelope was built
    pub state: Option<TxState>,
    pub nonce: Option<u64>,
    pub tx_hash: Option<H256>,
    pub contract_address: Option<Address>,
    pub block_number: Option<u64>,
}

impl StepReport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: None,
            nonce: None,
            tx_hash: None,
            contract_address: None,
            block_number: None,
        }
    }
}

/// Steps run for one account and the error that stopped it, if any
#[derive(Debug, Default)]
pub struct PipelineOutcome {
    pub steps: Vec<StepReport>,
    /// Contract created by the latest confirmed deploy step
    pub contract_address: Option<Address>,
    pub error: Option<DeployError>,
}

/// Sequences build, sign, submit and confirmation for one account at a time
pub struct DeploymentOrchestrator {
    /// Shared chain access
    client: Arc<dyn ChainClient>,
    /// Envelope builder (owns the nonce manager)
    builder: TxBuilder,
    /// Configuration
    config: DeployerConfig,
}

impl DeploymentOrchestrator {
    /// Create an orchestrator, reading the chain id from the node
    pub async fn connect(client: Arc<dyn ChainClient>, config: DeployerConfig) -> DeployResult<Self> {
        let chain_id = client.chain_id().await?;
        info!("Connected to chain {}", chain_id);
        Ok(Self::new(client, chain_id, config))
    }

    pub fn new(client: Arc<dyn ChainClient>, chain_id: u64, config: DeployerConfig) -> Self {
        let builder = TxBuilder::new(
            chain_id,
            GasEstimator::from_config(&config),
            Arc::new(NonceManager::new()),
        );

        Self {
            client,
            builder,
            config,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.builder.chain_id()
    }

    pub fn nonces(&self) -> &Arc<NonceManager> {
        self.builder.nonces()
    }

    /// Run one transaction for `account` to a terminal state.
    ///
    /// `report` is updated as the transaction advances so callers keep the
    /// partial record when an error is returned.
    pub async fn execute(
        &self,
        account: &Account,
        intent: &Intent,
        gas_limit: GasLimit,
        report: &mut StepReport,
    ) -> DeployResult<Receipt> {
        let address = account.address();
        let client = self.client.as_ref();
        let nonces = self.builder.nonces();

        let envelope = self.builder.build(client, address, intent, gas_limit).await?;
        let nonce = envelope.nonce;
        report.nonce = Some(nonce);
        report.state = Some(TxState::Built);

        let signed = match TxSigner::sign(&envelope, account.secret()) {
            Ok(signed) => signed,
            Err(e) => {
                nonces.release(address, nonce).await;
                return Err(e);
            }
        };
        report.state = Some(TxState::Signed);
        report.tx_hash = Some(signed.hash());

        let tx_hash = match self.submit_with_retry(&signed).await {
            Ok(tx_hash) => tx_hash,
            Err(e) if e.is_retryable() => {
                // The bytes may have reached a node before the transport failed
                nonces.taint(address, nonce).await;
                return Err(e);
            }
            Err(e) => {
                if let Err(sync_err) = nonces.sync(client, address).await {
                    warn!("Nonce resync for {:?} failed: {}", address, sync_err);
                }
                return Err(e);
            }
        };

        if tx_hash != signed.hash() {
            warn!(
                "Node returned hash {:?}, expected {:?}",
                tx_hash,
                signed.hash()
            );
        }

        nonces.mark_pending(address, nonce, tx_hash).await;
        report.state = Some(TxState::Submitted);
        report.tx_hash = Some(tx_hash);
        metrics::record_tx_submitted();

        let started = Instant::now();
        match self.await_receipt(tx_hash).await {
            Some(receipt) => {
                nonces.confirm(address, nonce).await;
                metrics::record_tx_latency(started.elapsed().as_secs_f64());
                report.block_number = receipt.block_number;

                if receipt.is_success() {
                    report.state = Some(TxState::Confirmed);
                    report.contract_address = receipt.contract_address;
                    metrics::record_tx_confirmed();
                    info!(
                        "Transaction {:?} confirmed in block {:?}",
                        tx_hash, receipt.block_number
                    );
                    Ok(receipt)
                } else {
                    report.state = Some(TxState::Failed);
                    metrics::record_tx_reverted();
                    error!("Transaction {:?} reverted", tx_hash);
                    Err(DeployError::ExecutionReverted {
                        tx_hash,
                        block_number: receipt.block_number,
                    })
                }
            }
            None => {
                nonces.taint(address, nonce).await;
                report.state = Some(TxState::TimedOut);
                metrics::record_tx_timed_out();
                warn!(
                    "No receipt for {:?} after {}ms; it may still confirm",
                    tx_hash, self.config.confirmation_timeout_ms
                );
                Err(DeployError::ConfirmationTimeout {
                    tx_hash,
                    nonce,
                    waited_ms: self.config.confirmation_timeout_ms,
                })
            }
        }
    }

    /// Submit signed bytes, retrying transport failures with backoff.
    ///
    /// Identical bytes always carry the same hash, so a retry can never
    /// create a second transaction.
    async fn submit_with_retry(&self, signed: &SignedTx) -> DeployResult<H256> {
        let max_attempts = self.config.max_submit_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = match timeout(SUBMIT_TIMEOUT, self.client.submit(signed.raw().clone())).await
            {
                Ok(result) => result,
                Err(_) => Err(DeployError::transport(
                    "submit",
                    format!("no answer within {:?}", SUBMIT_TIMEOUT),
                )),
            };

            match result {
                Ok(tx_hash) => {
                    debug!(
                        "Transaction sent: {:?} (attempt {}/{})",
                        tx_hash, attempt, max_attempts
                    );
                    return Ok(tx_hash);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = backoff_delay(
                        attempt,
                        self.config.retry_delay_ms,
                        self.config.max_retry_delay_ms,
                    );
                    warn!(
                        "Submit attempt {}/{} failed: {}; retrying in {:?}",
                        attempt, max_attempts, e, delay
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Poll for a receipt until found or the confirmation deadline passes
    async fn await_receipt(&self, tx_hash: H256) -> Option<Receipt> {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let deadline = Duration::from_millis(self.config.confirmation_timeout_ms);

        let poll = async {
            loop {
                match self.client.receipt(tx_hash).await {
                    Ok(Some(receipt)) => return receipt,
                    Ok(None) => debug!("Receipt for {:?} not yet available", tx_hash),
                    Err(e) => warn!("Receipt query for {:?} failed: {}", tx_hash, e),
                }
                sleep(poll_interval).await;
            }
        };

        timeout(deadline, poll).await.ok()
    }

    /// Run every step of `pipeline` for `account`, stopping at the first
    /// step that does not reach `Confirmed`.
    pub async fn run_pipeline(&self, account: &Account, pipeline: &Pipeline) -> PipelineOutcome {
        let mut outcome = PipelineOutcome::default();

        for step in pipeline.steps() {
            let mut report = StepReport::new(&step.name);

            let result = match step.intent(outcome.contract_address) {
                Ok(intent) => {
                    info!("Starting {}", step.name);
                    self.execute(account, &intent, step.gas_limit, &mut report)
                        .await
                }
                Err(e) => Err(e),
            };
            outcome.steps.push(report);

            match result {
                Ok(receipt) if step.is_deploy() => match receipt.contract_address {
                    Some(contract) => {
                        info!("{} deployed at {:?}", step.name, contract);
                        outcome.contract_address = Some(contract);
                    }
                    None => {
                        outcome.error = Some(DeployError::Internal(format!(
                            "receipt {:?} of {} carries no contract address",
                            receipt.tx_hash, step.name
                        )));
                        break;
                    }
                },
                Ok(_) => {}
                Err(e) => {
                    warn!("{} failed: {}", step.name, e);
                    outcome.error = Some(e);
                    break;
                }
            }
        }

        outcome
    }
}
