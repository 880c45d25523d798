use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use super::progress::ProgressReporter;
use super::transform::{RecordTransformer, SimulatedLatency, TransformBackend};
use super::writer::{BatchSink, BoundedWriter, FileSink};
use crate::batch::{count_lines, BatchProcessor, LineSource};
use crate::config::Config;
use crate::record::{RecordValidator, UserValidator};
use crate::types::EtlError;

/// Where the driver is in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Reading,
    Transforming,
    WaitingForWriteSlot,
    Writing,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

/// Counters for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub batches_read: u64,
    pub lines_read: u64,
    pub batches_written: u64,
    pub records_written: u64,
    /// Invalid lines dropped under the skip policy.
    pub skipped: u64,
    /// Most writes that held a slot at the same time.
    pub peak_concurrent_writes: usize,
    pub elapsed: Duration,
}

type WriteOutcome = (u64, Result<usize, EtlError>);

/// Drives a run: read batch, transform batch, acquire write slot, write batch,
/// update progress, until the input is exhausted or a stage fails.
///
/// Batches are read and their writes issued in file order. The next batch is
/// read only after the current batch's write has been issued; writes run in
/// the background bounded by the slot pool. A failure stops the loop without
/// retry. Writes already issued are allowed to finish, so everything written
/// before the failing batch stays on disk.
pub struct Pipeline {
    config: Arc<Config>,
    validator: Arc<dyn RecordValidator>,
    backend: Arc<dyn TransformBackend>,
    sink: Arc<dyn BatchSink>,
    progress: ProgressReporter,
    state: watch::Sender<PipelineState>,
    history: Vec<PipelineState>,
}

impl Pipeline {
    /// Pipeline reading `config.input_path`, appending to `config.output_path`,
    /// with the simulated latency backend and no progress display.
    pub fn new(config: Config) -> Self {
        let backend = Arc::new(SimulatedLatency::new(config.transform_latency()));
        let sink = Arc::new(FileSink::new(config.output_path()));
        let (state, _) = watch::channel(PipelineState::Idle);

        Self {
            config: Arc::new(config),
            validator: Arc::new(UserValidator),
            backend,
            sink,
            progress: ProgressReporter::hidden(),
            state,
            history: vec![PipelineState::Idle],
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn TransformBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn RecordValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn BatchSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Receiver of the latest state. Intermediate states may be skipped; see
    /// [`Pipeline::history`] for the full sequence.
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Every state the last run went through, starting with `Idle`.
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    fn transition(&mut self, next: PipelineState) {
        if self.history.last() == Some(&next) {
            return;
        }
        trace!(state = ?next, "pipeline state");
        self.history.push(next);
        self.state.send_replace(next);
    }

    #[instrument(
        skip_all,
        fields(
            input = %self.config.input_path().display(),
            output = %self.config.output_path().display(),
            batch_size = self.config.batch_size(),
        )
    )]
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<RunSummary, EtlError> {
        self.progress.restart();
        self.history.clear();
        self.history.push(PipelineState::Idle);
        self.state.send_replace(PipelineState::Idle);

        let transformer =
            RecordTransformer::new(Arc::clone(&self.validator), Arc::clone(&self.backend));
        let processor = BatchProcessor::new(transformer, self.config.error_policy());
        let writer = Arc::new(BoundedWriter::new(
            Arc::clone(&self.sink),
            self.config.max_concurrent_writers(),
        ));

        let mut writes = WriteTracker::default();
        let mut summary = RunSummary::default();

        let driven = self
            .drive(cancel, &processor, &writer, &mut writes, &mut summary)
            .await;
        writes.drain(&mut summary).await;

        self.progress.close();
        summary.peak_concurrent_writes = writer.peak_in_flight();
        summary.elapsed = self.progress.elapsed();

        let outcome = match (driven, writes.into_failure()) {
            (Ok(()), None) => Ok(()),
            (Ok(()), Some((_, write_err))) => Err(write_err),
            (Err(drive_err), None) => Err(drive_err),
            (Err(drive_err), Some((index, write_err))) => {
                // Issued writes belong to batches read before the one the
                // driver stopped on, so a write failure with a known batch
                // happened to an earlier batch.
                if index < summary.batches_read {
                    warn!(error = %drive_err, batch = index, "reporting earlier write failure");
                    Err(write_err)
                } else {
                    Err(drive_err)
                }
            }
        };

        match outcome {
            Ok(()) => {
                self.transition(PipelineState::Done);
                info!(
                    batches = summary.batches_read,
                    lines = summary.lines_read,
                    records = summary.records_written,
                    skipped = summary.skipped,
                    elapsed_ms = summary.elapsed.as_millis() as u64,
                    "pipeline finished"
                );
                Ok(summary)
            }
            Err(e) => {
                self.transition(PipelineState::Failed);
                error!(
                    error = %e,
                    batches_read = summary.batches_read,
                    batches_written = summary.batches_written,
                    "pipeline failed"
                );
                Err(e)
            }
        }
    }

    async fn drive(
        &mut self,
        cancel: &CancellationToken,
        processor: &BatchProcessor,
        writer: &Arc<BoundedWriter>,
        writes: &mut WriteTracker,
        summary: &mut RunSummary,
    ) -> Result<(), EtlError> {
        self.transition(PipelineState::Reading);
        if self.config.count_total() {
            let total = count_lines(self.config.input_path()).await?;
            debug!(total, "counted input lines");
            self.progress.set_total(total);
        }

        let mut source =
            LineSource::open(self.config.input_path(), self.config.batch_size()).await?;

        loop {
            writes.reap(summary);
            if writes.failed() {
                // Reported once the in-flight writes have drained.
                return Ok(());
            }

            self.transition(PipelineState::Reading);
            let Some(batch) = source.next_batch(cancel).await? else {
                break;
            };
            summary.batches_read += 1;
            summary.lines_read += batch.len() as u64;
            self.progress.update(batch.len() as u64);

            self.transition(PipelineState::Transforming);
            let processed = processor.process_batch(cancel, &batch).await?;
            summary.skipped += processed.skipped as u64;

            self.transition(PipelineState::WaitingForWriteSlot);
            let slot = writer.acquire(cancel).await?;

            self.transition(PipelineState::Writing);
            let writer = Arc::clone(writer);
            let index = processed.index;
            writes
                .tasks
                .spawn(async move { (index, writer.write_with(slot, processed.lines).await) });
            debug!(batch = index, "write issued");
        }

        Ok(())
    }
}

/// Background writes of one run and the earliest batch whose write failed.
#[derive(Default)]
struct WriteTracker {
    tasks: JoinSet<WriteOutcome>,
    failure: Option<(u64, EtlError)>,
}

impl WriteTracker {
    fn failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Records writes that have already finished without waiting.
    fn reap(&mut self, summary: &mut RunSummary) {
        while let Some(joined) = self.tasks.try_join_next() {
            self.record(joined, summary);
        }
    }

    /// Waits for every issued write to settle.
    async fn drain(&mut self, summary: &mut RunSummary) {
        while let Some(joined) = self.tasks.join_next().await {
            self.record(joined, summary);
        }
    }

    fn record(&mut self, joined: Result<WriteOutcome, JoinError>, summary: &mut RunSummary) {
        let (index, err) = match joined {
            Ok((index, Ok(written))) => {
                summary.batches_written += 1;
                summary.records_written += written as u64;
                debug!(batch = index, records = written, "write completed");
                return;
            }
            Ok((index, Err(e))) => {
                error!(batch = index, error = %e, "write failed");
                (index, e)
            }
            Err(e) => (u64::MAX, EtlError::WriterTask(e.to_string())),
        };

        // Later failures are consequences of the earliest one.
        match &self.failure {
            Some((first, _)) if *first <= index => {}
            _ => self.failure = Some((index, err)),
        }
    }

    /// The earliest failed batch and its error, if any write failed.
    fn into_failure(self) -> Option<(u64, EtlError)> {
        self.failure
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod tests;
