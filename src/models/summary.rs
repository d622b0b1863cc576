//! Run summary produced by the execution controller.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::{ErrorKind, HarnessError};

/// Outcome of one controller run.
///
/// Holds either the captured result value or the first error encountered,
/// never both.
#[derive(Debug)]
pub struct Summary {
    /// Unique identifier of the run.
    pub run_id: Uuid,
    /// When the run began.
    pub started_at: DateTime<Utc>,
    /// When the run finished (after the child was stopped).
    pub finished_at: DateTime<Utc>,
    outcome: std::result::Result<serde_json::Value, HarnessError>,
}

impl Summary {
    /// Seal a run outcome, stamping the finish time.
    #[must_use]
    pub fn new(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        outcome: std::result::Result<serde_json::Value, HarnessError>,
    ) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            outcome,
        }
    }

    /// Captured result value, when the run succeeded.
    #[must_use]
    pub fn result(&self) -> Option<&serde_json::Value> {
        self.outcome.as_ref().ok()
    }

    /// Captured error, when the run failed.
    #[must_use]
    pub fn error(&self) -> Option<&HarnessError> {
        self.outcome.as_ref().err()
    }

    /// Whether the run completed without error.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Consume the summary, yielding the outcome.
    ///
    /// # Errors
    ///
    /// Returns the captured [`HarnessError`] when the run failed.
    pub fn into_result(self) -> std::result::Result<serde_json::Value, HarnessError> {
        self.outcome
    }

    /// Serializable view for printing.
    #[must_use]
    pub fn report(&self) -> SummaryReport {
        SummaryReport {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: self.finished_at,
            result: self.result().cloned(),
            error: self.error().map(|err| ErrorReport {
                kind: err.kind(),
                message: err.to_string(),
            }),
        }
    }
}

/// JSON shape of a [`Summary`].
#[derive(Debug, Clone, Serialize)]
pub struct SummaryReport {
    /// Unique identifier of the run.
    pub run_id: Uuid,
    /// When the run began.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Result value; absent on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error descriptor; absent on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

/// Error descriptor inside a [`SummaryReport`].
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    /// Failure class.
    pub kind: ErrorKind,
    /// Rendered error message.
    pub message: String,
}
