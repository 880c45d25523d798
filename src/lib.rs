//! # user-etl
//!
//! A concurrent, batched ETL for large newline-delimited user files, built on
//! Tokio.
//!
//! Each line `id,username,email,is_active,full_name` is validated into a
//! [`Record`](record::Record), passed through a transform backend and appended
//! to the output file as one JSON object per line.
//!
//! ## Features
//!
//! - **Line-count batching** of the input, read lazily
//! - **Fully concurrent transformation** within a batch, order preserved
//! - **Bounded writers**: a fixed pool of write slots, appends in batch order
//! - **Graceful cancellation** via `CancellationToken`
//! - **Progress accounting** with a pluggable display
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use user_etl::config::ConfigBuilder;
//! use user_etl::etl::Pipeline;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = ConfigBuilder::default()
//!     .input_path("users.txt")
//!     .batch_size(1000usize)
//!     .max_concurrent_writers(5usize)
//!     .build()?;
//!
//! let summary = Pipeline::new(config).run(&CancellationToken::new()).await?;
//! println!("wrote {} records", summary.records_written);
//! ```
//!
//! ## Modules
//!
//! - [`batch`] - Line source and batch fan-out/fan-in
//! - [`etl`] - Transformer, bounded writer, progress and the pipeline driver
//! - [`record`] - The user record and its validator

pub mod batch;
pub mod config;
pub mod etl;
pub mod logging;
pub mod record;
pub mod types;

pub use config::{Config, ConfigBuilder, ErrorPolicy};
pub use etl::{Pipeline, PipelineState, RunSummary};
pub use types::{EtlError, TransformError, ValidationError};
