//! Errors returned by orchestrator calls (not run outcomes)

use thiserror::Error;

use crate::run::RunPhase;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrchestratorError {
    /// A run is active; the new run was rejected and the active one is untouched
    #[error("An update run is already in progress ({0})")]
    RunInProgress(RunPhase),
    /// Cancellation is only possible while downloading or extracting
    #[error("The update run cannot be cancelled while {0}")]
    NotCancellable(RunPhase),
}
