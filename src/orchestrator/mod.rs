//! Deployment orchestration
//!
//! The orchestrator:
//! 1. Turns pipeline steps into transaction intents
//! 2. Drives each transaction from envelope to confirmed receipt
//! 3. Chains dependent steps on the contract address of a confirmed deploy
//! 4. Runs the pipeline across a batch of accounts, isolating failures

mod batch;
mod engine;
mod pipeline;
mod retry;

pub use batch::{BatchRunner, DeploymentResult, ShutdownHandle};
pub use engine::{DeploymentOrchestrator, PipelineOutcome, StepReport, TxState};
pub use pipeline::{Action, Pipeline, Step, Target};
pub use retry::backoff_delay;
