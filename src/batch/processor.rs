use futures::{StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::source::Batch;
use crate::config::ErrorPolicy;
use crate::etl::RecordTransformer;
use crate::types::{EtlError, TransformError};

/// A batch after transformation: serialized lines in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedBatch {
    pub index: u64,
    pub lines: Vec<String>,
    /// Lines dropped under [`ErrorPolicy::Skip`].
    pub skipped: usize,
}

/// Fans a batch out to the transformer and gathers the results back in order.
///
/// Every line gets its own concurrent transformation; the batch size is the
/// only throttle.
#[derive(Clone)]
pub struct BatchProcessor {
    transformer: RecordTransformer,
    policy: ErrorPolicy,
}

impl BatchProcessor {
    pub fn new(transformer: RecordTransformer, policy: ErrorPolicy) -> Self {
        Self {
            transformer,
            policy,
        }
    }

    pub async fn process_batch(
        &self,
        cancel: &CancellationToken,
        batch: &Batch,
    ) -> Result<ProcessedBatch, EtlError> {
        let concurrency = batch.len().max(1);
        let transforms = futures::stream::iter(batch.lines.iter().enumerate()).map(
            |(offset, raw)| async move {
                let line_no = batch.first_line + offset as u64;
                self.transformer
                    .transform(cancel, raw)
                    .await
                    .map_err(|e| (line_no, e))
            },
        );

        match self.policy {
            ErrorPolicy::Abort => {
                let lines: Vec<String> = transforms
                    .buffered(concurrency)
                    .map_err(|(line, e)| into_fatal(line, e))
                    .try_collect()
                    .await?;
                Ok(ProcessedBatch {
                    index: batch.index,
                    lines,
                    skipped: 0,
                })
            }
            ErrorPolicy::Skip => {
                let results: Vec<_> = transforms.buffered(concurrency).collect().await;
                let mut lines = Vec::with_capacity(results.len());
                let mut skipped = 0;
                for result in results {
                    match result {
                        Ok(line) => lines.push(line),
                        Err((line, TransformError::Invalid(e))) => {
                            warn!(line, error = %e, "skipping invalid record");
                            skipped += 1;
                        }
                        Err((_, TransformError::Fatal(e))) => return Err(e),
                    }
                }
                Ok(ProcessedBatch {
                    index: batch.index,
                    lines,
                    skipped,
                })
            }
        }
    }
}

fn into_fatal(line: u64, err: TransformError) -> EtlError {
    match err {
        TransformError::Invalid(source) => EtlError::Validation { line, source },
        TransformError::Fatal(e) => e,
    }
}
