//! Bulk stop/remove with per-item aggregation

use super::{ContainerManager, EngineOutcome};
use crate::error::Error;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Bulk operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkOperation {
    /// `stop` each container
    Stop,
    /// `rm` each container
    Remove,
}

/// Outcome for one container of a bulk request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkItemResult {
    /// Container name
    pub name: String,
    /// Engine outcome
    #[serde(flatten)]
    pub outcome: EngineOutcome,
}

/// Totals of a bulk request. `successful + failed == total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSummary {
    /// Items attempted
    pub total: usize,
    /// Items that succeeded
    pub successful: usize,
    /// Items that failed
    pub failed: usize,
}

/// Result of a bulk request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResult {
    /// True when every item succeeded
    pub success: bool,
    /// Per-item outcomes in request order
    pub results: Vec<BulkItemResult>,
    /// Totals; absent when the request was rejected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<BulkSummary>,
    /// Why the request was rejected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BulkResult {
    pub(super) fn rejected(error: &Error) -> Self {
        warn!(error = %error, "Bulk container request rejected");
        Self {
            success: false,
            results: Vec::new(),
            summary: None,
            error: Some(error.to_string()),
        }
    }

    pub(super) fn from_results(results: Vec<BulkItemResult>) -> Self {
        let successful = results.iter().filter(|r| r.outcome.success).count();
        let summary = BulkSummary {
            total: results.len(),
            successful,
            failed: results.len() - successful,
        };
        Self {
            success: summary.failed == 0,
            results,
            summary: Some(summary),
            error: None,
        }
    }
}

impl ContainerManager {
    /// Stop every named container concurrently.
    pub async fn stop_many(&self, names: &[String]) -> BulkResult {
        self.run_bulk(BulkOperation::Stop, names).await
    }

    /// Remove every named container concurrently.
    pub async fn remove_many(&self, names: &[String]) -> BulkResult {
        self.run_bulk(BulkOperation::Remove, names).await
    }

    /// Entry point for bridge requests carrying a JSON payload.
    ///
    /// Accepts a bare array of names or an object with a `names` array.
    /// Anything else is rejected without touching the engine.
    pub async fn handle_bulk(&self, operation: BulkOperation, payload: &serde_json::Value) -> BulkResult {
        let not_a_list = || Error::InvalidInput("expected a list of container names".into());
        let list = match payload {
            serde_json::Value::Array(items) => items,
            serde_json::Value::Object(map) => match map.get("names") {
                Some(serde_json::Value::Array(items)) => items,
                _ => return BulkResult::rejected(&not_a_list()),
            },
            _ => return BulkResult::rejected(&not_a_list()),
        };

        let names: Option<Vec<String>> = list
            .iter()
            .map(|item| item.as_str().map(String::from))
            .collect();
        match names {
            Some(names) => self.run_bulk(operation, &names).await,
            None => BulkResult::rejected(&Error::InvalidInput(
                "container names must be strings".into(),
            )),
        }
    }

    async fn run_bulk(&self, operation: BulkOperation, names: &[String]) -> BulkResult {
        if names.is_empty() {
            return BulkResult::rejected(&Error::InvalidInput(format!(
                "no container names provided for {operation:?}"
            )));
        }

        let results = join_all(names.iter().map(|name| async move {
            let outcome = match operation {
                BulkOperation::Stop => self.stop_one(name).await,
                BulkOperation::Remove => self.remove_one(name).await,
            };
            BulkItemResult {
                name: name.clone(),
                outcome,
            }
        }))
        .await;

        let result = BulkResult::from_results(results);
        if let Some(summary) = &result.summary {
            info!(
                ?operation,
                total = summary.total,
                successful = summary.successful,
                failed = summary.failed,
                "Bulk container operation finished"
            );
        }
        result
    }
}
