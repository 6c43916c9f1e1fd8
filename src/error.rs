//! Fatal failures of an ingestion run.
//!
//! Row-level problems (bad year/month, non-numeric amounts) never surface here; they are
//! absorbed by the aggregator. Cancellation is not an error either.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    /// The byte source could not be opened, reported a failure status, or broke mid-read.
    #[error("failed to load CSV from {location}: {reason}")]
    Source { location: String, reason: String },

    /// The source cannot hand out its body incrementally.
    #[error("streaming not supported for {location}")]
    StreamingUnsupported { location: String },

    /// The header row lacks one or more required columns.
    #[error("CSV missing required columns: {}", .missing.join(", "))]
    Schema { missing: Vec<&'static str> },
}

impl IngestError {
    pub(crate) fn source_failure(location: impl Into<String>, reason: impl ToString) -> Self {
        IngestError::Source {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    /// Stable short label, one per fatal kind.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Source { .. } => "source",
            IngestError::StreamingUnsupported { .. } => "streaming_unsupported",
            IngestError::Schema { .. } => "schema",
        }
    }
}

pub type IngestResult<T> = Result<T, IngestError>;

/// Why a supervised load (retries plus timeout) produced no snapshot.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    /// An attempt ran past its time limit and was cancelled.
    #[error("gave up after {0:?}")]
    TimedOut(Duration),

    #[error("the run was cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_error_names_every_missing_column() {
        let err = IngestError::Schema {
            missing: vec!["supplier", "warehouse_sales"],
        };
        assert_eq!(
            err.to_string(),
            "CSV missing required columns: supplier, warehouse_sales"
        );
        assert_eq!(err.kind(), "schema");
    }

    #[test]
    fn source_error_carries_location() {
        let err = IngestError::source_failure("http://host/data.csv", "HTTP error: 404 Not Found");
        assert_eq!(
            err.to_string(),
            "failed to load CSV from http://host/data.csv: HTTP error: 404 Not Found"
        );
        assert_eq!(err.kind(), "source");
    }

    #[test]
    fn load_error_is_transparent_over_ingest_errors() {
        let err = LoadError::from(IngestError::StreamingUnsupported {
            location: "memory".into(),
        });
        assert_eq!(err.to_string(), "streaming not supported for memory");
        assert_eq!(
            LoadError::TimedOut(Duration::from_secs(3)).to_string(),
            "gave up after 3s"
        );
    }
}
