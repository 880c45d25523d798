pub mod processor;
pub mod source;

pub use processor::{BatchProcessor, ProcessedBatch};
pub use source::{count_lines, produce, Batch, LineSource};
