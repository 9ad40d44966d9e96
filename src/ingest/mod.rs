pub mod chunker;
pub mod manager;
pub mod pipeline;

pub use manager::{BatchSummary, IngestManager, IngestStatus};
pub use pipeline::{IngestOutcome, IngestPipeline, IngestReport, PipelineOptions};
