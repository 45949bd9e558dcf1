//! Per-step receipts emitted while applying a plan.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyPhase {
    Shadow,
    Target,
}

impl ApplyPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplyPhase::Shadow => "shadow",
            ApplyPhase::Target => "target",
        }
    }
}

impl fmt::Display for ApplyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReceipt {
    pub apply_id: Uuid,
    pub phase: ApplyPhase,
    pub step_index: usize,
    pub description: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepReceipt {
    /// Receipt as a single JSON line.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Receipts of one apply, logged as they are recorded.
#[derive(Debug)]
pub(crate) struct ReceiptLog {
    apply_id: Uuid,
    receipts: Vec<StepReceipt>,
}

impl ReceiptLog {
    pub(crate) fn new(apply_id: Uuid) -> Self {
        Self {
            apply_id,
            receipts: Vec::new(),
        }
    }

    pub(crate) fn record(
        &mut self,
        phase: ApplyPhase,
        step_index: usize,
        description: &str,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        status: StepStatus,
        error: Option<String>,
    ) {
        let receipt = StepReceipt {
            apply_id: self.apply_id,
            phase,
            step_index,
            description: description.to_string(),
            started_at,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            status,
            error,
        };
        match status {
            StepStatus::Succeeded => log::debug!("receipt {}", receipt.to_json()),
            StepStatus::Failed | StepStatus::TimedOut => log::warn!("receipt {}", receipt.to_json()),
        }
        self.receipts.push(receipt);
    }

    pub(crate) fn into_receipts(self) -> Vec<StepReceipt> {
        self.receipts
    }
}
