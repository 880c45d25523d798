use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::record::{split_fields, Record, RecordValidator, UserValidator};
use crate::types::{EtlError, TransformError};

/// The external dependency every record passes through after validation,
/// such as an enrichment lookup.
///
/// Called concurrently for every line of a batch.
#[async_trait]
pub trait TransformBackend: Send + Sync {
    async fn call(&self, cancel: &CancellationToken, record: Record) -> Result<Record, EtlError>;
}

/// Backend that stands in for a remote call by waiting a fixed latency.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedLatency {
    latency: Duration,
}

impl SimulatedLatency {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

impl Default for SimulatedLatency {
    fn default() -> Self {
        Self::new(Duration::from_millis(200))
    }
}

#[async_trait]
impl TransformBackend for SimulatedLatency {
    async fn call(&self, cancel: &CancellationToken, record: Record) -> Result<Record, EtlError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(EtlError::Cancelled),
            _ = tokio::time::sleep(self.latency) => Ok(record),
        }
    }
}

/// Zero-latency backend returning the record untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

#[async_trait]
impl TransformBackend for Passthrough {
    async fn call(&self, _cancel: &CancellationToken, record: Record) -> Result<Record, EtlError> {
        Ok(record)
    }
}

/// Converts one raw line into one serialized JSON line.
///
/// Holds no mutable state, so the same input always yields the same output.
#[derive(Clone)]
pub struct RecordTransformer {
    validator: Arc<dyn RecordValidator>,
    backend: Arc<dyn TransformBackend>,
}

impl RecordTransformer {
    pub fn new(
        validator: Arc<dyn RecordValidator>,
        backend: Arc<dyn TransformBackend>,
    ) -> Self {
        Self { validator, backend }
    }

    /// A [`UserValidator`] in front of `backend`.
    pub fn with_backend(backend: Arc<dyn TransformBackend>) -> Self {
        Self::new(Arc::new(UserValidator), backend)
    }

    pub async fn transform(
        &self,
        cancel: &CancellationToken,
        raw: &str,
    ) -> Result<String, TransformError> {
        let record = self.validator.validate(&split_fields(raw))?;
        let record = self.backend.call(cancel, record).await?;
        Ok(record.to_json_line().map_err(EtlError::from)?)
    }
}

impl Default for RecordTransformer {
    fn default() -> Self {
        Self::with_backend(Arc::new(SimulatedLatency::default()))
    }
}
