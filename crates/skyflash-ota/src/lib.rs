//! Skyflash OTA - firmware update orchestration
//!
//! [`UpdateOrchestrator`] drives one update run at a time through device
//! detection, archive download and extraction, version comparison, payload
//! apply and cleanup, and reports phases, download progress and exactly one
//! terminal outcome per run.

pub mod error;
pub mod orchestrator;
pub mod run;

pub use error::OrchestratorError;
pub use orchestrator::{OrchestratorSettings, RunHandle, UpdateOrchestrator};
pub use run::{RunEvent, RunEventKind, RunPhase, UpdateRun};
