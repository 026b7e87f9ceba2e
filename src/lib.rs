pub mod app;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod http;
pub mod nats;
pub mod orchestrator;
pub mod pipeline;
pub mod providers;
pub mod registry;
pub mod session;
pub mod stages;

pub use app::{targets_from_config, App};
pub use config::Config;
pub use error::{EngineError, GraphError, OrchestratorError, SessionError, SessionWarning, StageError};
pub use http::{create_router, AppState};
pub use nats::{NatsClient, TransitionMessage};
pub use orchestrator::{Orchestrator, OrchestratorSettings, VoiceActivity};
pub use registry::Registry;
pub use session::{SessionSnapshot, SessionState, TransitionCause, TransitionEvent};
