//! Pipeline stage runner
//!
//! Generic executor for post-processing stages:
//! - `StagePolicy`: attempts, backoff, per-attempt timeout, required/optional
//! - `StageGraph`: validated prerequisite graph
//! - `StageRunner`: retrying executor and dependency scheduler bounded by a
//!   global concurrency ceiling

mod graph;
mod policy;
mod result;
mod runner;
mod stage;

pub use graph::StageGraph;
pub use policy::{Backoff, StagePolicy, StageSpec};
pub use result::{StageResult, StageStatus};
pub use runner::{NoopObserver, PipelineOutcome, PipelineVerdict, StageObserver, StageRunner};
pub use stage::{SessionMeta, Stage, StageInput, StageOutput, StageSet};
