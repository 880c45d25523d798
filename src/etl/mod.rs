pub mod pipeline;
pub mod progress;
pub mod transform;
pub mod writer;

pub use pipeline::{Pipeline, PipelineState, RunSummary};
pub use progress::{
    NoopDisplay, ProgressDisplay, ProgressReporter, ProgressState, TerminalDisplay,
};
pub use transform::{Passthrough, RecordTransformer, SimulatedLatency, TransformBackend};
pub use writer::{BatchSink, BoundedWriter, FileSink, WriteSlot};
