//! Update orchestrator
//!
//! Runs one update attempt at a time:
//! 1. Detect the device and check its model
//! 2. Download the update archive (cancellable, progress reported)
//! 3. Extract the archive and read its firmware version (cancellable)
//! 4. Compare versions
//! 5. Apply the payload if the archive is newer
//! 6. Clean up the archive and payload (best-effort)
//!
//! State lives in a single [`UpdateRun`] behind a `RwLock`; callers observe
//! it through [`UpdateOrchestrator::snapshot`] or the broadcast event stream.

use futures_util::FutureExt;
use skyflash_core::{
    ArchiveExtractor, ArchiveFetcher, DeviceInfo, DeviceProbe, DeviceUpdater, DownloadProgress,
    FailureReason, FirmwareVersion, RunOutcome, SuccessKind, SUPPORTED_MODEL,
};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::run::{RunEvent, RunEventKind, RunPhase, UpdateRun};

/// Capacity of the run event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Capacity of the fetcher's progress channel
const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// Archive published for the Skytraxx 5 mini
pub const DEFAULT_ARCHIVE_URL: &str =
    "https://www.skytraxx.org/skytraxx5mini/skytraxx5mini-essentials.tar";

/// Archive file name on the device volume
pub const DEFAULT_ARCHIVE_FILE_NAME: &str = "skytraxx_update.tar";

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub archive_url: String,
    pub archive_file_name: String,
    /// Only devices reporting exactly this model are updated
    pub supported_model: String,
    pub probe_timeout: Duration,
    pub fetch_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            archive_url: DEFAULT_ARCHIVE_URL.to_string(),
            archive_file_name: DEFAULT_ARCHIVE_FILE_NAME.to_string(),
            supported_model: SUPPORTED_MODEL.to_string(),
            probe_timeout: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(900),
        }
    }
}

struct RunState {
    run: UpdateRun,
    /// Set by an accepted `cancel()`, cleared by `start()`
    cancel_requested: bool,
    /// Wakes the run task out of a cancellable collaborator call
    cancel_tx: Option<watch::Sender<bool>>,
}

/// Everything the spawned run task needs
struct RunContext {
    settings: OrchestratorSettings,
    probe: Arc<dyn DeviceProbe>,
    fetcher: Arc<dyn ArchiveFetcher>,
    extractor: Arc<dyn ArchiveExtractor>,
    updater: Arc<dyn DeviceUpdater>,
    state: RwLock<RunState>,
    event_tx: broadcast::Sender<RunEvent>,
}

/// Why a run stopped short of a success outcome
struct Abort {
    reason: FailureReason,
    detail: Option<String>,
}

impl Abort {
    fn new(reason: FailureReason, detail: impl fmt::Display) -> Self {
        Self {
            reason,
            detail: Some(detail.to_string()),
        }
    }

    fn cancelled() -> Self {
        Self {
            reason: FailureReason::Cancelled,
            detail: None,
        }
    }
}

/// Firmware update orchestrator
#[derive(Clone)]
pub struct UpdateOrchestrator {
    ctx: Arc<RunContext>,
}

impl UpdateOrchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        probe: Arc<dyn DeviceProbe>,
        fetcher: Arc<dyn ArchiveFetcher>,
        extractor: Arc<dyn ArchiveExtractor>,
        updater: Arc<dyn DeviceUpdater>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            ctx: Arc::new(RunContext {
                settings,
                probe,
                fetcher,
                extractor,
                updater,
                state: RwLock::new(RunState {
                    run: UpdateRun::idle(),
                    cancel_requested: false,
                    cancel_tx: None,
                }),
                event_tx,
            }),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.ctx.settings
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.ctx.event_tx.subscribe()
    }

    /// Copy of the current run state
    pub async fn snapshot(&self) -> UpdateRun {
        self.ctx.state.read().await.run.clone()
    }

    /// Start a new update run.
    ///
    /// Fails with [`OrchestratorError::RunInProgress`] while another run has
    /// not reached a terminal phase; the active run is left untouched.
    pub async fn start(&self) -> Result<RunHandle, OrchestratorError> {
        let run_id = Uuid::new_v4();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        {
            let mut state = self.ctx.state.write().await;
            let phase = state.run.phase;
            if phase.is_active() {
                warn!(phase = %phase, "Rejected update start, a run is already in progress");
                return Err(OrchestratorError::RunInProgress(phase));
            }
            state.run = UpdateRun::started(run_id);
            state.cancel_requested = false;
            state.cancel_tx = Some(cancel_tx);
        }

        info!(run_id = %run_id, "Starting update run");
        self.ctx
            .emit(run_id, RunEventKind::PhaseChanged(RunPhase::DetectingDevice));

        let ctx = self.ctx.clone();
        let task = tokio::spawn(async move { ctx.execute(run_id, cancel_rx).await });

        Ok(RunHandle {
            run_id,
            task,
            ctx: self.ctx.clone(),
        })
    }

    /// Request cancellation of the active run.
    ///
    /// Accepted only while downloading or extracting. Once accepted the run
    /// ends in `Failed(Cancelled)` and never reaches the device-destructive
    /// phases, even if the in-flight call completes concurrently.
    pub async fn cancel(&self) -> Result<(), OrchestratorError> {
        let mut state = self.ctx.state.write().await;
        let phase = state.run.phase;
        if !phase.is_cancellable() {
            info!(phase = %phase, "Refused to cancel update run");
            return Err(OrchestratorError::NotCancellable(phase));
        }

        state.cancel_requested = true;
        if let Some(cancel_tx) = &state.cancel_tx {
            let _ = cancel_tx.send(true);
        }
        info!(run_id = ?state.run.id, phase = %phase, "Cancellation requested");
        Ok(())
    }
}

/// Handle to a spawned run
pub struct RunHandle {
    run_id: Uuid,
    task: JoinHandle<RunOutcome>,
    ctx: Arc<RunContext>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Wait for the run's terminal outcome
    pub async fn wait(self) -> RunOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(run_id = %self.run_id, error = %e, "Update task did not complete");
                let phase = self.ctx.state.read().await.run.phase;
                match phase.outcome() {
                    Some(outcome) => outcome,
                    None => {
                        self.ctx
                            .finish(
                                self.run_id,
                                RunOutcome::Failed(phase.failure_reason()),
                                Some(e.to_string()),
                            )
                            .await
                    }
                }
            }
        }
    }
}

impl RunContext {
    fn emit(&self, run_id: Uuid, kind: RunEventKind) {
        let _ = self.event_tx.send(RunEvent { run_id, kind });
    }

    async fn execute(&self, run_id: Uuid, cancel_rx: watch::Receiver<bool>) -> RunOutcome {
        let result = AssertUnwindSafe(self.drive(run_id, cancel_rx))
            .catch_unwind()
            .await;

        let (outcome, detail) = match result {
            Ok(Ok(kind)) => (RunOutcome::Succeeded(kind), None),
            Ok(Err(abort)) => (RunOutcome::Failed(abort.reason), abort.detail),
            Err(_) => {
                let phase = self.state.read().await.run.phase;
                error!(run_id = %run_id, phase = %phase, "Update run panicked");
                (
                    RunOutcome::Failed(phase.failure_reason()),
                    Some(format!("run panicked while {}", phase)),
                )
            }
        };

        self.finish(run_id, outcome, detail).await
    }

    async fn drive(
        &self,
        run_id: Uuid,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> Result<SuccessKind, Abort> {
        let device = self.detect_device(run_id).await?;

        self.enter(run_id, RunPhase::Downloading).await;
        self.download(run_id, &mut cancel_rx).await?;
        self.emit(run_id, RunEventKind::DownloadComplete);

        self.leave_cancellable(run_id, RunPhase::Extracting).await?;
        let raw_version = self.extract(run_id, &mut cancel_rx).await?;
        let update_version = parse_version(run_id, "archive", &raw_version)?;
        let device_version = parse_version(run_id, "device", &device.software_version)?;

        self.leave_cancellable(run_id, RunPhase::ComparingVersions)
            .await?;

        // Cleanup runs exactly once from here on, whatever apply does
        let pending = if update_version.is_newer_than(&device_version) {
            info!(
                run_id = %run_id,
                installed = %device_version,
                available = %update_version,
                "Newer firmware available"
            );
            self.enter(run_id, RunPhase::Applying).await;
            // Caught here so a panicking apply still reaches cleanup
            match AssertUnwindSafe(self.updater.apply()).catch_unwind().await {
                Ok(Ok(())) => Ok(SuccessKind::UpdateApplied),
                Ok(Err(e)) => {
                    error!(run_id = %run_id, error = %e, "Applying update failed");
                    Err(Abort::new(FailureReason::ApplyFailed, e))
                }
                Err(_) => {
                    error!(run_id = %run_id, "Applying update panicked");
                    Err(Abort::new(FailureReason::ApplyFailed, "apply panicked"))
                }
            }
        } else {
            info!(
                run_id = %run_id,
                installed = %device_version,
                available = %update_version,
                "Device firmware is up to date"
            );
            Ok(SuccessKind::AlreadyUpToDate)
        };

        self.enter(run_id, RunPhase::CleaningUp).await;
        let cleanup = self.updater.cleanup(&self.settings.archive_file_name);
        match AssertUnwindSafe(cleanup).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(run_id = %run_id, error = %e, "Cleanup failed"),
            Err(_) => warn!(run_id = %run_id, "Cleanup panicked"),
        }

        pending
    }

    async fn detect_device(&self, run_id: Uuid) -> Result<DeviceInfo, Abort> {
        let device = match timeout(self.settings.probe_timeout, self.probe.detect()).await {
            Ok(Ok(device)) => device,
            Ok(Err(e)) => {
                error!(run_id = %run_id, error = %e, "Device detection failed");
                return Err(Abort::new(FailureReason::DeviceNotFound, e));
            }
            Err(_) => {
                error!(run_id = %run_id, "Device detection timed out");
                return Err(Abort::new(
                    FailureReason::DeviceNotFound,
                    format!(
                        "device probe timed out after {:?}",
                        self.settings.probe_timeout
                    ),
                ));
            }
        };

        if !device.is_model(&self.settings.supported_model) {
            warn!(
                run_id = %run_id,
                model = %device.device_name,
                supported = %self.settings.supported_model,
                "Unsupported device model"
            );
            return Err(Abort::new(
                FailureReason::UnsupportedModel,
                format!("device reports model {:?}", device.device_name),
            ));
        }

        info!(
            run_id = %run_id,
            model = %device.device_name,
            version = %device.software_version,
            "Device detected"
        );
        Ok(device)
    }

    async fn download(
        &self,
        run_id: Uuid,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> Result<(), Abort> {
        let (progress_tx, mut progress_rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let fetch = timeout(
            self.settings.fetch_timeout,
            self.fetcher.fetch(
                &self.settings.archive_url,
                &self.settings.archive_file_name,
                progress_tx,
            ),
        );
        tokio::pin!(fetch);
        let cancelled = cancel_requested(cancel_rx);
        tokio::pin!(cancelled);

        info!(run_id = %run_id, url = %self.settings.archive_url, "Downloading update archive");

        let result = loop {
            tokio::select! {
                biased;
                _ = &mut cancelled => break None,
                Some(progress) = progress_rx.recv() => {
                    self.publish_progress(run_id, progress).await;
                }
                result = &mut fetch => break Some(result),
            }
        };

        match result {
            None => {
                info!(run_id = %run_id, "Download cancelled");
                Err(Abort::cancelled())
            }
            Some(Ok(Ok(()))) => {
                // Updates queued before completion still belong to this phase
                while let Ok(progress) = progress_rx.try_recv() {
                    self.publish_progress(run_id, progress).await;
                }
                info!(run_id = %run_id, "Download complete");
                Ok(())
            }
            Some(Ok(Err(e))) => {
                error!(run_id = %run_id, error = %e, "Download failed");
                Err(Abort::new(FailureReason::DownloadFailed, e))
            }
            Some(Err(_)) => {
                error!(run_id = %run_id, "Download timed out");
                Err(Abort::new(
                    FailureReason::DownloadFailed,
                    format!(
                        "download timed out after {:?}",
                        self.settings.fetch_timeout
                    ),
                ))
            }
        }
    }

    async fn extract(
        &self,
        run_id: Uuid,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> Result<String, Abort> {
        tokio::select! {
            biased;
            _ = cancel_requested(cancel_rx) => {
                info!(run_id = %run_id, "Extraction cancelled");
                Err(Abort::cancelled())
            }
            result = self.extractor.extract(&self.settings.archive_file_name) => {
                result.map_err(|e| {
                    error!(run_id = %run_id, error = %e, "Extraction failed");
                    Abort::new(FailureReason::ExtractFailed, e)
                })
            }
        }
    }

    async fn publish_progress(&self, run_id: Uuid, progress: DownloadProgress) {
        let Some(percent) = progress.percentage() else {
            return;
        };

        {
            let mut state = self.state.write().await;
            if state.run.phase != RunPhase::Downloading {
                return;
            }
            state.run.progress = Some(percent);
        }

        debug!(
            run_id = %run_id,
            downloaded = progress.downloaded,
            total = progress.total,
            percent,
            "Download progress"
        );
        self.emit(run_id, RunEventKind::Progress(percent));
    }

    async fn enter(&self, run_id: Uuid, phase: RunPhase) {
        self.state.write().await.run.phase = phase;
        info!(run_id = %run_id, phase = %phase, "Update phase changed");
        self.emit(run_id, RunEventKind::PhaseChanged(phase));
    }

    /// Move out of a cancellable phase unless cancellation was accepted.
    ///
    /// Checked under the same lock `cancel()` takes, so an accepted cancel
    /// can never be followed by a device-destructive phase.
    async fn leave_cancellable(&self, run_id: Uuid, next: RunPhase) -> Result<(), Abort> {
        {
            let mut state = self.state.write().await;
            if state.cancel_requested {
                return Err(Abort::cancelled());
            }
            state.run.phase = next;
        }
        info!(run_id = %run_id, phase = %next, "Update phase changed");
        self.emit(run_id, RunEventKind::PhaseChanged(next));
        Ok(())
    }

    async fn finish(
        &self,
        run_id: Uuid,
        outcome: RunOutcome,
        detail: Option<String>,
    ) -> RunOutcome {
        let (outcome, detail) = {
            let mut state = self.state.write().await;
            // An accepted cancel wins over whatever the in-flight call returned
            let (outcome, detail) = if state.cancel_requested {
                (RunOutcome::Failed(FailureReason::Cancelled), None)
            } else {
                (outcome, detail)
            };
            state.run.finish(outcome, detail.clone());
            state.cancel_tx = None;
            (outcome, detail)
        };

        match outcome {
            RunOutcome::Succeeded(kind) => {
                info!(run_id = %run_id, result = %kind, "Update run succeeded");
            }
            RunOutcome::Failed(reason) => {
                warn!(
                    run_id = %run_id,
                    reason = %reason,
                    detail = detail.as_deref().unwrap_or(""),
                    "Update run failed"
                );
            }
        }

        let phase = match outcome {
            RunOutcome::Succeeded(kind) => RunPhase::Succeeded(kind),
            RunOutcome::Failed(reason) => RunPhase::Failed(reason),
        };
        self.emit(run_id, RunEventKind::PhaseChanged(phase));
        self.emit(run_id, RunEventKind::Finished(outcome));
        outcome
    }
}

/// Resolves once cancellation is requested; never resolves otherwise
async fn cancel_requested(cancel_rx: &mut watch::Receiver<bool>) {
    if cancel_rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn parse_version(run_id: Uuid, source: &str, raw: &str) -> Result<FirmwareVersion, Abort> {
    raw.parse::<FirmwareVersion>().map_err(|e| {
        error!(run_id = %run_id, source, raw, error = %e, "Invalid firmware version");
        Abort::new(
            FailureReason::VersionParseFailed,
            format!("{} version: {}", source, e),
        )
    })
}
