use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{oneshot, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::types::EtlError;

/// Destination a batch of serialized lines is appended to.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Appends all `lines` as one contiguous write.
    async fn append(&self, lines: &[String]) -> Result<(), EtlError>;
}

/// Appends to a file opened in append mode, so earlier content is kept.
///
/// The handle is opened on the first append and shared behind a lock; two
/// appends never run against the file at the same time.
pub struct FileSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl BatchSink for FileSink {
    async fn append(&self, lines: &[String]) -> Result<(), EtlError> {
        let mut guard = self.file.lock().await;
        let mut file = match guard.take() {
            Some(file) => file,
            None => OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(|e| EtlError::io(&self.path, e))?,
        };

        let buf = lines.concat();
        file.write_all(buf.as_bytes())
            .await
            .map_err(|e| EtlError::io(&self.path, e))?;
        file.flush().await.map_err(|e| EtlError::io(&self.path, e))?;
        *guard = Some(file);
        Ok(())
    }
}

/// A permit from the write slot pool, held for the duration of one write.
///
/// Slots are chained in the order they were acquired: a slot's append starts
/// only after the previous slot has finished or was dropped. Dropping the slot
/// releases the permit and unblocks the next one on every exit path.
pub struct WriteSlot {
    _permit: OwnedSemaphorePermit,
    previous: Option<oneshot::Receiver<()>>,
    _done: oneshot::Sender<()>,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for WriteSlot {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Appends batches to a sink with at most `max_concurrent_writers` writes in flight.
///
/// Once an append fails, every later write is refused so the sink only ever
/// holds a prefix of the issued batches.
pub struct BoundedWriter {
    sink: Arc<dyn BatchSink>,
    slots: Arc<Semaphore>,
    tail: Mutex<Option<oneshot::Receiver<()>>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: AtomicUsize,
    poisoned: AtomicBool,
}

impl BoundedWriter {
    pub fn new(sink: Arc<dyn BatchSink>, max_concurrent_writers: usize) -> Self {
        Self {
            sink,
            slots: Arc::new(Semaphore::new(max_concurrent_writers.max(1))),
            tail: Mutex::new(None),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: AtomicUsize::new(0),
            poisoned: AtomicBool::new(false),
        }
    }

    /// Writer appending to the file at `path`.
    pub fn to_file(path: impl Into<PathBuf>, max_concurrent_writers: usize) -> Self {
        Self::new(Arc::new(FileSink::new(path)), max_concurrent_writers)
    }

    /// Slots not currently held.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Highest number of slots held at once since the writer was created.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Waits for a free write slot.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<WriteSlot, EtlError> {
        let permit = tokio::select! {
            _ = cancel.cancelled() => return Err(EtlError::Cancelled),
            permit = Arc::clone(&self.slots).acquire_owned() => permit
                .map_err(|_| EtlError::WriterTask("write slot pool closed".to_string()))?,
        };

        let (done, next) = oneshot::channel();
        let previous = self.tail.lock().await.replace(next);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        trace!(in_flight = now, "write slot acquired");

        Ok(WriteSlot {
            _permit: permit,
            previous,
            _done: done,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Appends `lines` while holding `slot`; the slot is released when this returns.
    pub async fn write_with(
        &self,
        mut slot: WriteSlot,
        lines: Vec<String>,
    ) -> Result<usize, EtlError> {
        if let Some(previous) = slot.previous.take() {
            // An error only means the previous slot was dropped without writing.
            let _ = previous.await;
        }
        if self.poisoned.load(Ordering::SeqCst) {
            return Err(EtlError::WriterTask(
                "refusing to write after an earlier write failed".to_string(),
            ));
        }
        if lines.is_empty() {
            return Ok(0);
        }

        if let Err(e) = self.sink.append(&lines).await {
            self.poisoned.store(true, Ordering::SeqCst);
            return Err(e);
        }
        debug!(lines = lines.len(), "batch appended");
        Ok(lines.len())
    }

    /// Acquires a slot and appends `lines` in one call.
    pub async fn write(
        &self,
        cancel: &CancellationToken,
        lines: Vec<String>,
    ) -> Result<usize, EtlError> {
        let slot = self.acquire(cancel).await?;
        self.write_with(slot, lines).await
    }
}
