// src/process/mod.rs
pub mod aggregate;
pub mod coordinator;
pub mod lines;
pub mod tokenize;

pub use aggregate::{
    Aggregator, Bucket, ColumnIndex, MonthKey, ResultSnapshot, RowOutcome, UNKNOWN_SUPPLIER,
};
pub use coordinator::{
    ingest, load, CancelToken, IngestOptions, Progress, RetryPolicy, RunHandle, RunSlot,
    PROGRESS_EVERY_ROWS,
};
pub use lines::{LineSplitter, Utf8Decoder};
pub use tokenize::tokenize;
