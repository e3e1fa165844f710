//! Contract deployer - compile, deploy and drive follow-up calls on an EVM chain
//!
//! The library is organised leaves first:
//! - `chain` and `artifact` are the boundaries to the node and the compiler
//! - `tx` builds, prices, numbers and signs transactions
//! - `orchestrator` runs pipelines of transactions per account and per batch

pub mod account;
pub mod artifact;
pub mod chain;
pub mod config;
pub mod error;
pub mod input;
pub mod metrics;
pub mod orchestrator;
pub mod report;
pub mod tx;

pub use account::{Account, SecretKey};
pub use error::{DeployError, DeployResult};
