//! Stage chaining: transcript → embedding → similarity → completed
//!
//! - [`executor`]: per-stage logic and failure semantics, written once
//! - [`runner`]: follow-up delivery as events or as direct calls
//! - [`orchestrator`]: starts a run, falling back to direct execution
//! - [`workers`]: consume loops feeding the executor from the log

pub mod executor;
pub mod orchestrator;
pub mod runner;
pub mod workers;

pub use executor::{Followup, StageExecutor, StageRequest, StageRunner};
pub use orchestrator::{PipelineOrchestrator, RunHandle, StartMode};
pub use runner::{DirectStageRunner, EventStageRunner};
pub use workers::{StageHandler, Workers};
