//! Safety validation: the bounded-latency multi-check pipeline and the
//! deterministic therapeutic-alignment scorer.

pub mod alignment;
pub mod pipeline;

pub use alignment::AlignmentScorer;
pub use pipeline::{PipelineOutcome, SafetyPipeline};
