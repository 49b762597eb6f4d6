// Workflow orchestration - graph model, interpreter and pipeline variants
pub mod error;
pub mod executor;
pub mod graph;
pub mod map;
pub mod path;
pub mod pipelines;
pub mod router;
pub mod state;

pub use error::{GraphError, NodeError};
pub use executor::{ExecutionEngine, ExecutionOutcome, ExecutorConfig, TerminalStatus};
pub use graph::{PipelineGraph, PipelineGraphBuilder};
pub use pipelines::PipelineSet;
