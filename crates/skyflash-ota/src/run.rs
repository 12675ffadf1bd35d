//! Run state and run events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skyflash_core::{FailureReason, RunOutcome, SuccessKind};
use std::fmt;
use uuid::Uuid;

/// Phase of an update run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "detail", rename_all = "snake_case")]
pub enum RunPhase {
    /// No run has been started yet
    Idle,
    /// Probing the connected device
    DetectingDevice,
    /// Downloading the update archive onto the device volume
    Downloading,
    /// Unpacking the archive and reading the contained version
    Extracting,
    /// Deciding whether the archive is newer than the device firmware
    ComparingVersions,
    /// Copying the payload onto the device
    Applying,
    /// Removing the archive and payload (best-effort)
    CleaningUp,
    Succeeded(SuccessKind),
    Failed(FailureReason),
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Succeeded(_) | RunPhase::Failed(_))
    }

    /// A run in this phase blocks a new `start()`
    pub fn is_active(&self) -> bool {
        !matches!(self, RunPhase::Idle) && !self.is_terminal()
    }

    /// Nothing has been written to the device besides the archive yet
    pub fn is_cancellable(&self) -> bool {
        matches!(self, RunPhase::Downloading | RunPhase::Extracting)
    }

    /// Terminal outcome, if this phase is terminal
    pub fn outcome(&self) -> Option<RunOutcome> {
        match self {
            RunPhase::Succeeded(kind) => Some(RunOutcome::Succeeded(*kind)),
            RunPhase::Failed(reason) => Some(RunOutcome::Failed(*reason)),
            _ => None,
        }
    }

    /// Failure reported when the run dies unexpectedly in this phase
    pub(crate) fn failure_reason(&self) -> FailureReason {
        match self {
            RunPhase::Idle | RunPhase::DetectingDevice => FailureReason::DeviceNotFound,
            RunPhase::Downloading => FailureReason::DownloadFailed,
            RunPhase::Extracting => FailureReason::ExtractFailed,
            RunPhase::ComparingVersions => FailureReason::VersionParseFailed,
            RunPhase::Applying | RunPhase::CleaningUp => FailureReason::ApplyFailed,
            RunPhase::Succeeded(_) => FailureReason::ApplyFailed,
            RunPhase::Failed(reason) => *reason,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Idle => f.write_str("idle"),
            RunPhase::DetectingDevice => f.write_str("detecting device"),
            RunPhase::Downloading => f.write_str("downloading"),
            RunPhase::Extracting => f.write_str("extracting"),
            RunPhase::ComparingVersions => f.write_str("comparing versions"),
            RunPhase::Applying => f.write_str("applying"),
            RunPhase::CleaningUp => f.write_str("cleaning up"),
            RunPhase::Succeeded(kind) => write!(f, "succeeded ({})", kind),
            RunPhase::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

/// State of the current (or last) update run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRun {
    /// `None` until the first run starts
    pub id: Option<Uuid>,
    pub phase: RunPhase,
    pub last_error: Option<FailureReason>,
    /// Collaborator message behind `last_error`, for logs
    pub error_detail: Option<String>,
    pub success_message: Option<String>,
    /// Download percentage in `[0, 100]`
    pub progress: Option<f32>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl UpdateRun {
    pub fn idle() -> Self {
        Self {
            id: None,
            phase: RunPhase::Idle,
            last_error: None,
            error_detail: None,
            success_message: None,
            progress: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub(crate) fn started(id: Uuid) -> Self {
        Self {
            id: Some(id),
            phase: RunPhase::DetectingDevice,
            started_at: Some(Utc::now()),
            ..Self::idle()
        }
    }

    pub fn outcome(&self) -> Option<RunOutcome> {
        self.phase.outcome()
    }

    /// User-facing message for the terminal phase
    pub fn user_message(&self) -> Option<&'static str> {
        self.outcome().map(|o| o.user_message())
    }

    pub(crate) fn finish(&mut self, outcome: RunOutcome, detail: Option<String>) {
        match outcome {
            RunOutcome::Succeeded(kind) => {
                self.phase = RunPhase::Succeeded(kind);
                self.success_message = Some(kind.user_message().to_string());
            }
            RunOutcome::Failed(reason) => {
                self.phase = RunPhase::Failed(reason);
                self.last_error = Some(reason);
                self.error_detail = detail;
            }
        }
        self.finished_at = Some(Utc::now());
    }
}

impl Default for UpdateRun {
    fn default() -> Self {
        Self::idle()
    }
}

/// Event published while a run progresses
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunEvent {
    pub run_id: Uuid,
    pub kind: RunEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RunEventKind {
    PhaseChanged(RunPhase),
    /// Download percentage, only while downloading
    Progress(f32),
    DownloadComplete,
    /// Sent exactly once per run
    Finished(RunOutcome),
}
