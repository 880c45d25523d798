use futures::Stream;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::EtlError;

/// An ordered group of raw lines read together.
///
/// Lines keep their terminator exactly as read. The last batch of a file may
/// be shorter than the configured size but is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Zero-based position of the batch in the file.
    pub index: u64,
    /// One-based line number of `lines[0]`.
    pub first_line: u64,
    pub lines: Vec<String>,
}

impl Batch {
    #[inline]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Lazily reads a file and groups its lines into batches.
///
/// Chunking is by line count: every batch holds `chunk_size` lines except
/// possibly the last one.
pub struct LineSource {
    path: PathBuf,
    reader: BufReader<File>,
    chunk_size: usize,
    lines_read: u64,
    batches_read: u64,
    exhausted: bool,
}

impl LineSource {
    /// Opens `path` for reading. Fails with [`EtlError::Io`] if it cannot be opened.
    pub async fn open(path: impl AsRef<Path>, chunk_size: usize) -> Result<Self, EtlError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .await
            .map_err(|e| EtlError::io(&path, e))?;

        Ok(Self {
            path,
            reader: BufReader::new(file),
            chunk_size: chunk_size.max(1),
            lines_read: 0,
            batches_read: 0,
            exhausted: false,
        })
    }

    /// Total lines handed out so far.
    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    /// Reads up to `chunk_size` lines.
    ///
    /// Returns `Ok(None)` once the file is exhausted. A read error is returned
    /// as is; the lines gathered for the failing batch are not handed out.
    pub async fn next_batch(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Batch>, EtlError> {
        if cancel.is_cancelled() {
            return Err(EtlError::Cancelled);
        }
        if self.exhausted {
            return Ok(None);
        }

        let mut lines = Vec::with_capacity(self.chunk_size.min(4096));
        while lines.len() < self.chunk_size {
            let mut line = String::new();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(|e| EtlError::io(&self.path, e))?;
            if n == 0 {
                self.exhausted = true;
                break;
            }
            lines.push(line);
        }

        if lines.is_empty() {
            return Ok(None);
        }

        let batch = Batch {
            index: self.batches_read,
            first_line: self.lines_read + 1,
            lines,
        };
        self.batches_read += 1;
        self.lines_read += batch.len() as u64;

        debug!(
            batch = batch.index,
            lines = batch.len(),
            first_line = batch.first_line,
            "read batch"
        );
        Ok(Some(batch))
    }

    /// Turns the source into a lazy stream of batches that ends after the
    /// first error.
    pub fn into_stream(
        self,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<Batch, EtlError>> {
        futures::stream::unfold(Some(self), move |state| {
            let cancel = cancel.clone();
            async move {
                let mut source = state?;
                match source.next_batch(&cancel).await {
                    Ok(Some(batch)) => Some((Ok(batch), Some(source))),
                    Ok(None) => None,
                    Err(e) => Some((Err(e), None)),
                }
            }
        })
    }
}

/// Opens `path` and returns its batches as a lazy stream.
pub async fn produce(
    path: impl AsRef<Path>,
    chunk_size: usize,
    cancel: CancellationToken,
) -> Result<impl Stream<Item = Result<Batch, EtlError>>, EtlError> {
    Ok(LineSource::open(path, chunk_size).await?.into_stream(cancel))
}

/// Counts the lines in `path`, including a final line without a terminator.
pub async fn count_lines(path: impl AsRef<Path>) -> Result<u64, EtlError> {
    let path = path.as_ref();
    let file = File::open(path).await.map_err(|e| EtlError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut count = 0;

    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| EtlError::io(path, e))?;
        if n == 0 {
            return Ok(count);
        }
        count += 1;
    }
}
