//! Drives one ingestion run: source → line splitter → tokenizer → aggregator.
//!
//! The run is cooperatively scheduled. After each aggregated row, if at least `progress_every`
//! rows have been added since the last checkpoint, progress is reported and the task yields once.
//! Checkpoints fall between complete lines, never inside a line or a partial UTF-8 sequence, and
//! are the only suspension points besides waiting on the source. One final report always follows
//! the tail flush, even when it repeats the last checkpoint.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use futures_util::StreamExt;
use serde::Serialize;
use tokio::{
    sync::watch,
    task::{JoinError, JoinHandle},
};
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    error::{IngestError, IngestResult, LoadError},
    fetch::ByteSource,
    process::{aggregate::Aggregator, lines::LineSplitter, tokenize::tokenize, ResultSnapshot},
};

/// Rows between progress reports.
pub const PROGRESS_EVERY_ROWS: u64 = 5_000;

/// Snapshot of how far a run has got.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub bytes_read: u64,
    /// `0` when the source gave no length hint.
    pub total_bytes: u64,
    pub rows_read: u64,
}

impl Progress {
    /// Whole-number percentage of bytes read, capped at 100. `None` without a length hint.
    pub fn percent(&self) -> Option<u8> {
        if self.total_bytes == 0 {
            return None;
        }
        let pct = (self.bytes_read as f64 / self.total_bytes as f64 * 100.0).round();
        Some(pct.min(100.0) as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    pub progress_every: u64,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            progress_every: PROGRESS_EVERY_ROWS,
        }
    }
}

/// Cooperative cancellation flag shared between a run and whoever started it.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Stream `source`, aggregate every row, and return the finished snapshot.
///
/// Returns `Ok(None)` if `cancel` fires before completion; a cancelled run reports nothing
/// further through `on_progress` and never returns an error.
#[instrument(level = "info", skip_all, fields(source = %source.location()))]
pub async fn ingest<S, F>(
    source: &S,
    options: IngestOptions,
    cancel: &CancelToken,
    mut on_progress: F,
) -> IngestResult<Option<ResultSnapshot>>
where
    S: ByteSource,
    F: FnMut(Progress) + Send,
{
    let start = Instant::now();
    let every = options.progress_every.max(1);
    info!("starting ingestion");

    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(None),
        opened = source.open() => opened,
    };
    let opened = match opened {
        Ok(o) => o,
        Err(_) if cancel.is_cancelled() => return Ok(None),
        Err(e) => return Err(e),
    };
    let Some(mut body) = opened.body else {
        return Err(IngestError::StreamingUnsupported {
            location: source.location(),
        });
    };

    let mut splitter = LineSplitter::new();
    let mut agg = Aggregator::new();
    let mut progress = Progress {
        total_bytes: opened.total_bytes,
        ..Progress::default()
    };
    let mut last_checkpoint = 0u64;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(rows = agg.rows_read(), "cancelled");
                return Ok(None);
            }
            next = body.next() => next,
        };
        let Some(chunk) = next else { break };
        let chunk = match chunk {
            Ok(c) => c,
            Err(_) if cancel.is_cancelled() => return Ok(None),
            Err(e) => return Err(e),
        };

        progress.bytes_read += chunk.len() as u64;
        splitter.push(&chunk);
        while let Some(line) = splitter.next_line() {
            agg.ingest_row(&tokenize(&line))?;
            progress.rows_read = agg.rows_read();

            if progress.rows_read - last_checkpoint >= every {
                last_checkpoint = progress.rows_read;
                if cancel.is_cancelled() {
                    return Ok(None);
                }
                trace!(
                    bytes = progress.bytes_read,
                    rows = progress.rows_read,
                    pending = splitter.buffered(),
                    "checkpoint"
                );
                on_progress(progress);
                tokio::task::yield_now().await;
            }
        }
    }

    if let Some(tail) = splitter.finish() {
        trace!(len = tail.len(), "flushing unterminated last line");
        agg.ingest_row(&tokenize(&tail))?;
    }
    progress.rows_read = agg.rows_read();

    if cancel.is_cancelled() {
        return Ok(None);
    }
    on_progress(progress);

    let snapshot = agg.finalize();
    info!(
        rows = snapshot.rows_read(),
        skipped = snapshot.rows_skipped(),
        months = snapshot.month_keys().len(),
        suppliers = snapshot.suppliers().len(),
        bytes = progress.bytes_read,
        elapsed = ?start.elapsed(),
        "ingestion complete"
    );
    Ok(Some(snapshot))
}

/// A spawned ingestion run.
pub struct RunHandle {
    cancel: CancelToken,
    task: JoinHandle<IngestResult<Option<ResultSnapshot>>>,
}

impl RunHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run. A cancelled or aborted run yields `Ok(None)`.
    pub async fn join(self) -> IngestResult<Option<ResultSnapshot>> {
        flatten_join(self.task.await)
    }
}

fn flatten_join(
    joined: Result<IngestResult<Option<ResultSnapshot>>, JoinError>,
) -> IngestResult<Option<ResultSnapshot>> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Ok(None),
        Err(e) => std::panic::resume_unwind(e.into_panic()),
    }
}

/// Holds at most one in-flight run. Starting a new run cancels the previous one first, so two
/// runs never feed the same consumer.
#[derive(Default)]
pub struct RunSlot {
    current: Option<RunHandle>,
}

impl RunSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start<S, F>(&mut self, source: S, options: IngestOptions, on_progress: F)
    where
        S: ByteSource + 'static,
        F: FnMut(Progress) + Send + 'static,
    {
        self.cancel();
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { ingest(&source, options, &token, on_progress).await });
        self.current = Some(RunHandle { cancel, task });
    }

    pub fn is_running(&self) -> bool {
        self.current.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel and drop the current run, if any.
    pub fn cancel(&mut self) {
        if let Some(prev) = self.current.take() {
            debug!("cancelling previous run");
            prev.cancel();
        }
    }

    /// Wait for the current run and empty the slot. `None` if nothing was started.
    ///
    /// The run stays in the slot until it completes, so dropping this future (for example on a
    /// timeout) still leaves it reachable by [`cancel`](Self::cancel).
    pub async fn finish(&mut self) -> Option<IngestResult<Option<ResultSnapshot>>> {
        let handle = self.current.as_mut()?;
        let joined = (&mut handle.task).await;
        self.current = None;
        Some(flatten_join(joined))
    }
}

/// How [`load`] reacts to failing or slow sources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fresh restarts after a [`IngestError::Source`] failure. Each one reopens the source and
    /// aggregates from byte zero.
    pub retries: u32,
    /// Limit on each attempt. An attempt that runs out is cancelled and not retried.
    pub timeout: Option<Duration>,
}

/// Run ingestion to completion through a [`RunSlot`], opening a fresh source from `make_source`
/// for every attempt.
#[instrument(level = "debug", skip_all, fields(retries = policy.retries))]
pub async fn load<S, M, F>(
    mut make_source: M,
    options: IngestOptions,
    policy: RetryPolicy,
    on_progress: F,
) -> Result<ResultSnapshot, LoadError>
where
    S: ByteSource + 'static,
    M: FnMut() -> S,
    F: FnMut(Progress) + Send + Clone + 'static,
{
    let mut slot = RunSlot::new();
    let mut attempt = 0;

    loop {
        slot.start(make_source(), options, on_progress.clone());

        let outcome = match policy.timeout {
            Some(limit) => match tokio::time::timeout(limit, slot.finish()).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    slot.cancel();
                    return Err(LoadError::TimedOut(limit));
                }
            },
            None => slot.finish().await,
        };

        match outcome {
            Some(Ok(Some(snapshot))) => return Ok(snapshot),
            Some(Ok(None)) | None => return Err(LoadError::Cancelled),
            Some(Err(e @ IngestError::Source { .. })) if attempt < policy.retries => {
                attempt += 1;
                warn!(attempt, error = %e, "load failed; restarting from the beginning");
            }
            Some(Err(e)) => return Err(e.into()),
        }
    }
}
