//! Run report: one JSON entry per account

use crate::error::{DeployError, DeployResult};
use crate::orchestrator::DeploymentResult;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub run_id: Uuid,
    pub chain_id: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Count of accounts per outcome
    pub summary: BTreeMap<&'static str, usize>,
    pub results: &'a [DeploymentResult],
}

impl<'a> RunReport<'a> {
    pub fn new(
        run_id: Uuid,
        chain_id: u64,
        started_at: DateTime<Utc>,
        results: &'a [DeploymentResult],
    ) -> Self {
        Self {
            run_id,
            chain_id,
            started_at,
            finished_at: Utc::now(),
            summary: summarize(results),
            results,
        }
    }

    pub fn write_to(&self, path: &Path) -> DeployResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| DeployError::Internal(format!("report serialization failed: {}", e)))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

pub fn summarize(results: &[DeploymentResult]) -> BTreeMap<&'static str, usize> {
    let mut summary = BTreeMap::new();
    for result in results {
        *summary.entry(result.outcome()).or_insert(0) += 1;
    }
    summary
}
