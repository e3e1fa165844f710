//! Batch execution of a pipeline over many accounts

use super::engine::{DeploymentOrchestrator, StepReport};
use super::pipeline::Pipeline;
use crate::account::{scrub, Account};
use crate::error::DeployError;
use crate::metrics;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ethers::types::Address;
use futures::stream::{self, Stream, StreamExt};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, info_span, warn, Instrument};

/// Terminal record for one account of a batch
#[derive(Debug, Serialize)]
pub struct DeploymentResult {
    /// Position of the key in the input
    pub index: usize,
    /// Checksummed address, or a redacted label when the key never parsed
    pub account: String,
    pub address: Option<Address>,
    pub contract_address: Option<Address>,
    pub steps: Vec<StepReport>,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<DeployError>,
    pub finished_at: DateTime<Utc>,
}

impl DeploymentResult {
    fn failed(index: usize, account: String, address: Option<Address>, error: DeployError) -> Self {
        Self {
            index,
            account,
            address,
            contract_address: None,
            steps: Vec::new(),
            error: Some(error),
            finished_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Short outcome name: "success" or the error kind
    pub fn outcome(&self) -> &'static str {
        self.error.as_ref().map_or("success", DeployError::kind)
    }
}

fn serialize_error<S: Serializer>(error: &Option<DeployError>, serializer: S) -> Result<S::Ok, S::Error> {
    match error {
        None => serializer.serialize_none(),
        Some(error) => {
            let mut state = serializer.serialize_struct("Error", 2)?;
            state.serialize_field("kind", error.kind())?;
            state.serialize_field("message", &error.to_string())?;
            state.end()
        }
    }
}

/// Stops a batch from starting new account pipelines
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<RwLock<bool>>,
}

impl ShutdownHandle {
    pub async fn trigger(&self) {
        *self.flag.write().await = true;
        info!("Batch shutdown requested; in-flight accounts will finish");
    }

    pub async fn is_triggered(&self) -> bool {
        *self.flag.read().await
    }
}

/// One lock per address; a key listed twice runs its pipelines one after the other
type AccountLocks = Arc<DashMap<Address, Arc<Mutex<()>>>>;

/// Runs a pipeline for each account with bounded parallelism
pub struct BatchRunner {
    orchestrator: Arc<DeploymentOrchestrator>,
    max_concurrent: usize,
    shutdown: ShutdownHandle,
    locks: AccountLocks,
}

impl BatchRunner {
    pub fn new(orchestrator: Arc<DeploymentOrchestrator>, max_concurrent: usize) -> Self {
        Self {
            orchestrator,
            max_concurrent: max_concurrent.max(1),
            shutdown: ShutdownHandle::default(),
            locks: AccountLocks::default(),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Lazily run `pipeline` for every key, yielding one result per key in
    /// input order.
    ///
    /// Each account is isolated: its errors land in its own result. The
    /// stream is single-pass; a rerun needs a new call, which re-reads
    /// nonces from the chain.
    pub fn run(
        &self,
        keys: Vec<String>,
        pipeline: Arc<Pipeline>,
    ) -> impl Stream<Item = DeploymentResult> + Send + 'static {
        let orchestrator = self.orchestrator.clone();
        let shutdown = self.shutdown.clone();
        let locks = self.locks.clone();

        stream::iter(keys.into_iter().enumerate())
            .map(move |(index, key)| {
                process_account(
                    orchestrator.clone(),
                    shutdown.clone(),
                    locks.clone(),
                    pipeline.clone(),
                    index,
                    key,
                )
            })
            .buffered(self.max_concurrent)
    }

    /// Run the batch to completion
    pub async fn run_all(&self, keys: Vec<String>, pipeline: Arc<Pipeline>) -> Vec<DeploymentResult> {
        self.run(keys, pipeline).collect().await
    }
}

async fn process_account(
    orchestrator: Arc<DeploymentOrchestrator>,
    shutdown: ShutdownHandle,
    locks: AccountLocks,
    pipeline: Arc<Pipeline>,
    index: usize,
    mut key: String,
) -> DeploymentResult {
    let parsed = Account::from_hex(&key);
    scrub(&mut key);

    let result = match parsed {
        Err(e) => {
            warn!("Key #{} rejected: {}", index + 1, e);
            DeploymentResult::failed(index, format!("<invalid key #{}>", index + 1), None, e)
        }
        Ok(account) => {
            let label = account.checksummed();
            let lock = locks.entry(account.address()).or_default().value().clone();
            let _guard = lock.lock().await;

            if shutdown.is_triggered().await {
                DeploymentResult::failed(index, label, Some(account.address()), DeployError::Cancelled)
            } else {
                let span = info_span!("account", index, address = %label);
                let outcome = orchestrator
                    .run_pipeline(&account, &pipeline)
                    .instrument(span)
                    .await;

                DeploymentResult {
                    index,
                    account: label,
                    address: Some(account.address()),
                    contract_address: outcome.contract_address,
                    steps: outcome.steps,
                    error: outcome.error,
                    finished_at: Utc::now(),
                }
            }
        }
    };

    metrics::record_account_result(result.outcome());
    result
}
