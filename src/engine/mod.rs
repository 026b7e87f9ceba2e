//! Recording engine adapter
//!
//! - `RecordingEngine`: command/status contract for an external recorder
//! - `EngineAdapter`: idempotent start, bounded stop with partial-artifact recovery
//! - `Artifact`: recorded media plus probed sidecar metadata
//! - `ProcessEngine`: engine that runs a capture command per session

pub mod adapter;
pub mod artifact;
pub mod backend;
pub mod process;

pub use adapter::{AdapterSettings, EngineAdapter, StopReport};
pub use artifact::{probe_artifact, Artifact};
pub use backend::{CaptureConfig, EngineHandle, EngineStatus, RecordingEngine};
pub use process::{ProcessEngine, ProcessEngineConfig};
