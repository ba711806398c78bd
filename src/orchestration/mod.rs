pub mod pipeline_orchestrator;

pub use pipeline_orchestrator::{PipelineOrchestrator, PipelineParts};
