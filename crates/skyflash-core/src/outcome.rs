//! Terminal outcome taxonomy of an update run
//!
//! Every run ends in exactly one [`RunOutcome`]. Each variant maps to one
//! user-facing message (German, as shown in the vendor tools).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a run failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    DeviceNotFound,
    UnsupportedModel,
    DownloadFailed,
    ExtractFailed,
    VersionParseFailed,
    ApplyFailed,
    Cancelled,
}

impl FailureReason {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::DeviceNotFound => {
                "Skytraxx Vario konnte nicht gefunden werden. Ist es angeschlossen?"
            }
            Self::UnsupportedModel => {
                "Im Moment können nur Skytraxx 5 Mini Geräte aktualisiert werden."
            }
            Self::DownloadFailed => {
                "Fehler beim Herunterladen der Datei. Bist du mit dem Internet verbunden?"
            }
            Self::ExtractFailed => "Fehler beim Entpacken der Datei.",
            Self::VersionParseFailed => "Die Firmware-Version konnte nicht gelesen werden.",
            Self::ApplyFailed => "Das Update konnte nicht auf dein Vario übertragen werden.",
            Self::Cancelled => "Das Update wurde abgebrochen.",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DeviceNotFound => "device not found",
            Self::UnsupportedModel => "unsupported device model",
            Self::DownloadFailed => "download failed",
            Self::ExtractFailed => "extraction failed",
            Self::VersionParseFailed => "version parse failed",
            Self::ApplyFailed => "apply failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// How a run succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessKind {
    AlreadyUpToDate,
    UpdateApplied,
}

impl SuccessKind {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::AlreadyUpToDate => {
                "Dein Skytraxx Vario ist bereits auf dem neuesten Stand! Du kannst die App jetzt schließen."
            }
            Self::UpdateApplied => {
                "Dein Vario wurde erfolgreich aktualisiert! Du kannst die App jetzt schließen."
            }
        }
    }
}

impl fmt::Display for SuccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyUpToDate => f.write_str("already up to date"),
            Self::UpdateApplied => f.write_str("update applied"),
        }
    }
}

/// Terminal outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", content = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded(SuccessKind),
    Failed(FailureReason),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Succeeded(kind) => kind.user_message(),
            Self::Failed(reason) => reason.user_message(),
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded(kind) => write!(f, "succeeded: {}", kind),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}
