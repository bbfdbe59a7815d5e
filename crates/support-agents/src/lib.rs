//! Support ticket orchestration on top of the `triage` core.

pub mod config;
pub mod fixtures;
pub mod logging;
pub mod orchestrator;

pub use config::{ConfigError, OrchestratorConfig};
pub use orchestrator::{Collaborators, Orchestrator, ProcessOutcome, ProcessRequest};
