//! Output classification.
//!
//! Maps the protocol's raw event stream into the typed, size-bounded record
//! sequence returned to the caller. The mapping is total: every raw event has
//! exactly one record variant, emission order is preserved, and a cumulative
//! payload-byte budget bounds the result. Once the budget is reached,
//! classification stops, the truncation flag is set, and everything admitted
//! so far is still returned.
//!
//! Guest-level exceptions are `error` records inside an otherwise completed
//! result: a failing guest program is not a system failure.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::protocol::{RawEvent, RunOutcome, RunStatus};

/// One typed unit of captured execution output.
///
/// Serializes as `{"type": "text"|"error"|"image", "data": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum OutputRecord {
    /// Standard output text or an expression result.
    Text(String),
    /// Standard error text or a guest exception.
    Error(String),
    /// A rendered plot, base64-encoded.
    Image(String),
}

impl OutputRecord {
    /// Payload size in bytes.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        match self {
            Self::Text(data) | Self::Error(data) | Self::Image(data) => data.len(),
        }
    }
}

/// Terminal status of an execution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// The guest ran to completion (its code may still have raised; see
    /// `error` records).
    Completed,
    /// The execution deadline elapsed; records are partial.
    TimedOut,
    /// The sandbox's output stream was malformed or truncated.
    Failed,
}

/// The classified result of one execution request.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Output records in emission order.
    pub records: Vec<OutputRecord>,
    /// True if the output byte budget was reached.
    pub truncated: bool,
    /// How the execution ended.
    pub status: ExecutionStatus,
    /// Human-readable detail for `Failed` results.
    pub failure: Option<String>,
}

impl ExecutionResult {
    /// Total serialized payload bytes across all records.
    #[must_use]
    pub fn payload_bytes(&self) -> usize {
        self.records.iter().map(OutputRecord::payload_len).sum()
    }
}

/// Classifies a protocol outcome into an [`ExecutionResult`].
///
/// Runs on whatever was collected, whatever the protocol status: a timed-out
/// or failed run still yields its partial records.
#[must_use]
pub fn classify(outcome: RunOutcome, budget_bytes: usize) -> ExecutionResult {
    let mut records = Vec::new();
    let mut total: usize = 0;
    let mut truncated = outcome.capped;

    for event in outcome.events {
        let record = match event {
            RawEvent::Text { data } => OutputRecord::Text(data),
            RawEvent::Error { data } => OutputRecord::Error(data),
            RawEvent::Image { data } => OutputRecord::Image(data),
            // The marker is consumed by the protocol loop; tolerate one here
            // rather than misclassifying it.
            RawEvent::End => continue,
        };

        if total + record.payload_len() > budget_bytes {
            debug!(total, budget_bytes, "Output budget reached, truncating");
            truncated = true;
            break;
        }
        total += record.payload_len();
        records.push(record);
    }

    let (status, failure) = match outcome.status {
        RunStatus::Completed => (ExecutionStatus::Completed, None),
        RunStatus::TimedOut => (ExecutionStatus::TimedOut, None),
        RunStatus::Failed(e) => {
            warn!(error = %e, "Execution protocol failed");
            (ExecutionStatus::Failed, Some(e.to_string()))
        }
    };

    ExecutionResult {
        records,
        truncated,
        status,
        failure,
    }
}
