//! Orchestrator behaviour against scripted fake collaborators

use async_trait::async_trait;
use skyflash_core::{
    ArchiveExtractor, ArchiveFetcher, BackendError, BackendResult, DeviceInfo, DeviceProbe,
    DeviceUpdater, DownloadProgress, FailureReason, RunOutcome, SuccessKind,
};
use skyflash_ota::{
    OrchestratorError, OrchestratorSettings, RunEvent, RunEventKind, RunPhase,
    UpdateOrchestrator,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};

#[derive(Default)]
struct Calls {
    detect: AtomicUsize,
    fetch: AtomicUsize,
    extract: AtomicUsize,
    apply: AtomicUsize,
    cleanup: AtomicUsize,
}

impl Calls {
    fn counts(&self) -> [usize; 5] {
        [
            self.detect.load(Ordering::SeqCst),
            self.fetch.load(Ordering::SeqCst),
            self.extract.load(Ordering::SeqCst),
            self.apply.load(Ordering::SeqCst),
            self.cleanup.load(Ordering::SeqCst),
        ]
    }
}

/// Behaviour of every collaborator for one test
struct Script {
    /// `None` makes the probe fail
    device: Option<(&'static str, &'static str)>,
    probe_delay: Option<Duration>,
    progress: Vec<DownloadProgress>,
    fetch_ok: bool,
    fetch_delay: Option<Duration>,
    fetch_gate: Option<Arc<Notify>>,
    /// `None` makes extraction fail
    extracted: Option<&'static str>,
    extract_gate: Option<Arc<Notify>>,
    extract_panics: bool,
    apply_ok: bool,
    apply_gate: Option<Arc<Notify>>,
    apply_panics: bool,
    cleanup_ok: bool,
    cleanup_panics: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            device: Some(("5mini", "120")),
            probe_delay: None,
            progress: Vec::new(),
            fetch_ok: true,
            fetch_delay: None,
            fetch_gate: None,
            extracted: Some("130"),
            extract_gate: None,
            extract_panics: false,
            apply_ok: true,
            apply_gate: None,
            apply_panics: false,
            cleanup_ok: true,
            cleanup_panics: false,
        }
    }
}

struct FakeDevice {
    script: Script,
    calls: Arc<Calls>,
}

#[async_trait]
impl DeviceProbe for FakeDevice {
    async fn detect(&self) -> BackendResult<DeviceInfo> {
        self.calls.detect.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.script.probe_delay {
            tokio::time::sleep(delay).await;
        }
        match self.script.device {
            Some((hw, sw)) => Ok(DeviceInfo::from_raw(hw, sw)),
            None => Err(BackendError::DeviceUnavailable("no volume".to_string())),
        }
    }
}

#[async_trait]
impl ArchiveFetcher for FakeDevice {
    async fn fetch(
        &self,
        _url: &str,
        _file_name: &str,
        progress: mpsc::Sender<DownloadProgress>,
    ) -> BackendResult<()> {
        self.calls.fetch.fetch_add(1, Ordering::SeqCst);
        for p in &self.script.progress {
            let _ = progress.try_send(*p);
        }
        if let Some(delay) = self.script.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(gate) = &self.script.fetch_gate {
            gate.notified().await;
        }
        if self.script.fetch_ok {
            Ok(())
        } else {
            Err(BackendError::Http("503 Service Unavailable".to_string()))
        }
    }
}

#[async_trait]
impl ArchiveExtractor for FakeDevice {
    async fn extract(&self, _tar_path: &str) -> BackendResult<String> {
        self.calls.extract.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.script.extract_gate {
            gate.notified().await;
        }
        if self.script.extract_panics {
            panic!("tar reader blew up");
        }
        self.script
            .extracted
            .map(str::to_string)
            .ok_or_else(|| BackendError::InvalidData("not a tar archive".to_string()))
    }
}

#[async_trait]
impl DeviceUpdater for FakeDevice {
    async fn apply(&self) -> BackendResult<()> {
        self.calls.apply.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.script.apply_gate {
            gate.notified().await;
        }
        if self.script.apply_panics {
            panic!("copy loop blew up");
        }
        if self.script.apply_ok {
            Ok(())
        } else {
            Err(BackendError::Io(std::io::Error::other("disk full")))
        }
    }

    async fn cleanup(&self, _tar_path: &str) -> BackendResult<()> {
        self.calls.cleanup.fetch_add(1, Ordering::SeqCst);
        if self.script.cleanup_panics {
            panic!("remove_dir_all blew up");
        }
        if self.script.cleanup_ok {
            Ok(())
        } else {
            Err(BackendError::Io(std::io::Error::other("permission denied")))
        }
    }
}

fn orchestrator(script: Script) -> (UpdateOrchestrator, Arc<Calls>) {
    let calls = Arc::new(Calls::default());
    let fake = Arc::new(FakeDevice {
        script,
        calls: calls.clone(),
    });
    let settings = OrchestratorSettings {
        probe_timeout: Duration::from_secs(1),
        fetch_timeout: Duration::from_secs(5),
        ..OrchestratorSettings::default()
    };
    let orchestrator =
        UpdateOrchestrator::new(settings, fake.clone(), fake.clone(), fake.clone(), fake);
    (orchestrator, calls)
}

async fn run_to_end(script: Script) -> (RunOutcome, [usize; 5]) {
    let (orchestrator, calls) = orchestrator(script);
    let outcome = orchestrator.start().await.unwrap().wait().await;
    (outcome, calls.counts())
}

async fn wait_for_phase(events: &mut broadcast::Receiver<RunEvent>, phase: RunPhase) {
    loop {
        let event = events.recv().await.unwrap();
        if event.kind == RunEventKind::PhaseChanged(phase) {
            return;
        }
    }
}

fn drain(events: &mut broadcast::Receiver<RunEvent>) -> Vec<RunEventKind> {
    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.kind);
    }
    kinds
}

#[tokio::test]
async fn test_newer_archive_is_applied() {
    let (outcome, calls) = run_to_end(Script::default()).await;

    assert_eq!(outcome, RunOutcome::Succeeded(SuccessKind::UpdateApplied));
    assert_eq!(calls, [1, 1, 1, 1, 1]);
}

#[tokio::test]
async fn test_older_archive_is_not_applied() {
    let (outcome, calls) = run_to_end(Script {
        extracted: Some("100"),
        ..Script::default()
    })
    .await;

    assert_eq!(outcome, RunOutcome::Succeeded(SuccessKind::AlreadyUpToDate));
    assert_eq!(calls, [1, 1, 1, 0, 1]);
}

#[tokio::test]
async fn test_equal_version_is_up_to_date() {
    let (outcome, calls) = run_to_end(Script {
        extracted: Some("120"),
        ..Script::default()
    })
    .await;

    assert_eq!(outcome, RunOutcome::Succeeded(SuccessKind::AlreadyUpToDate));
    assert_eq!(calls[3], 0);
}

#[tokio::test]
async fn test_probe_failure_is_device_not_found() {
    let (outcome, calls) = run_to_end(Script {
        device: None,
        ..Script::default()
    })
    .await;

    assert_eq!(outcome, RunOutcome::Failed(FailureReason::DeviceNotFound));
    assert_eq!(calls, [1, 0, 0, 0, 0]);
}

#[tokio::test(start_paused = true)]
async fn test_probe_timeout_is_device_not_found() {
    let (outcome, calls) = run_to_end(Script {
        probe_delay: Some(Duration::from_secs(60)),
        ..Script::default()
    })
    .await;

    assert_eq!(outcome, RunOutcome::Failed(FailureReason::DeviceNotFound));
    assert_eq!(calls, [1, 0, 0, 0, 0]);
}

#[tokio::test]
async fn test_unsupported_model_touches_nothing() {
    for model in ["5", "", "5MINI"] {
        let (outcome, calls) = run_to_end(Script {
            device: Some((model, "120")),
            ..Script::default()
        })
        .await;

        assert_eq!(outcome, RunOutcome::Failed(FailureReason::UnsupportedModel));
        assert_eq!(calls, [1, 0, 0, 0, 0], "model {:?}", model);
    }
}

#[tokio::test]
async fn test_fetch_failure_skips_extract_and_apply() {
    let (outcome, calls) = run_to_end(Script {
        fetch_ok: false,
        ..Script::default()
    })
    .await;

    assert_eq!(outcome, RunOutcome::Failed(FailureReason::DownloadFailed));
    assert_eq!(calls, [1, 1, 0, 0, 0]);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_timeout_is_download_failed() {
    let (outcome, calls) = run_to_end(Script {
        fetch_delay: Some(Duration::from_secs(3600)),
        ..Script::default()
    })
    .await;

    assert_eq!(outcome, RunOutcome::Failed(FailureReason::DownloadFailed));
    assert_eq!(calls, [1, 1, 0, 0, 0]);
}

#[tokio::test]
async fn test_extract_failure() {
    let (outcome, calls) = run_to_end(Script {
        extracted: None,
        ..Script::default()
    })
    .await;

    assert_eq!(outcome, RunOutcome::Failed(FailureReason::ExtractFailed));
    assert_eq!(calls, [1, 1, 1, 0, 0]);
}

#[tokio::test]
async fn test_unparsable_archive_version_is_not_zero() {
    for raw in ["abc", "", "12a"] {
        let (outcome, calls) = run_to_end(Script {
            extracted: Some(raw),
            ..Script::default()
        })
        .await;

        assert_eq!(
            outcome,
            RunOutcome::Failed(FailureReason::VersionParseFailed),
            "version {:?}",
            raw
        );
        assert_eq!(calls[3], 0);
    }
}

#[tokio::test]
async fn test_unparsable_device_version() {
    let (outcome, calls) = run_to_end(Script {
        device: Some(("5mini", "build-abc")),
        ..Script::default()
    })
    .await;

    assert_eq!(outcome, RunOutcome::Failed(FailureReason::VersionParseFailed));
    assert_eq!(calls[3], 0);
}

#[tokio::test]
async fn test_padded_versions_are_compared_numerically() {
    let (outcome, _) = run_to_end(Script {
        device: Some(("5mini", "build-99")),
        extracted: Some("100\0\0\0\0\0\0\0\0\0"),
        ..Script::default()
    })
    .await;

    assert_eq!(outcome, RunOutcome::Succeeded(SuccessKind::UpdateApplied));
}

#[tokio::test]
async fn test_apply_failure_still_cleans_up() {
    let (outcome, calls) = run_to_end(Script {
        apply_ok: false,
        ..Script::default()
    })
    .await;

    assert_eq!(outcome, RunOutcome::Failed(FailureReason::ApplyFailed));
    assert_eq!(calls, [1, 1, 1, 1, 1]);
}

#[tokio::test]
async fn test_panicking_apply_still_cleans_up() {
    let (outcome, calls) = run_to_end(Script {
        apply_panics: true,
        ..Script::default()
    })
    .await;

    assert_eq!(outcome, RunOutcome::Failed(FailureReason::ApplyFailed));
    assert_eq!(calls, [1, 1, 1, 1, 1]);
}

#[tokio::test]
async fn test_panicking_extract_maps_to_phase_failure() {
    let (orchestrator, calls) = orchestrator(Script {
        extract_panics: true,
        ..Script::default()
    });
    let outcome = orchestrator.start().await.unwrap().wait().await;

    assert_eq!(outcome, RunOutcome::Failed(FailureReason::ExtractFailed));
    assert_eq!(calls.apply.load(Ordering::SeqCst), 0);
    assert_eq!(calls.cleanup.load(Ordering::SeqCst), 0);

    let run = orchestrator.snapshot().await;
    assert_eq!(run.phase, RunPhase::Failed(FailureReason::ExtractFailed));
    assert!(run.finished_at.is_some());
    // The orchestrator stays usable after a panicked run
    assert!(orchestrator.start().await.is_ok());
}

#[tokio::test]
async fn test_panicking_cleanup_keeps_outcome() {
    let (outcome, calls) = run_to_end(Script {
        cleanup_panics: true,
        ..Script::default()
    })
    .await;

    assert_eq!(outcome, RunOutcome::Succeeded(SuccessKind::UpdateApplied));
    assert_eq!(calls, [1, 1, 1, 1, 1]);
}

#[tokio::test]
async fn test_cleanup_failure_never_changes_outcome() {
    let (outcome, calls) = run_to_end(Script {
        cleanup_ok: false,
        ..Script::default()
    })
    .await;
    assert_eq!(outcome, RunOutcome::Succeeded(SuccessKind::UpdateApplied));
    assert_eq!(calls[4], 1);

    let (outcome, _) = run_to_end(Script {
        cleanup_ok: false,
        extracted: Some("100"),
        ..Script::default()
    })
    .await;
    assert_eq!(outcome, RunOutcome::Succeeded(SuccessKind::AlreadyUpToDate));

    let (outcome, _) = run_to_end(Script {
        cleanup_ok: false,
        apply_ok: false,
        ..Script::default()
    })
    .await;
    assert_eq!(outcome, RunOutcome::Failed(FailureReason::ApplyFailed));
}

#[tokio::test]
async fn test_phase_sequence_and_single_finish_event() {
    let (orchestrator, _) = orchestrator(Script::default());
    let mut events = orchestrator.subscribe();

    let outcome = orchestrator.start().await.unwrap().wait().await;
    let kinds = drain(&mut events);

    let phases: Vec<RunPhase> = kinds
        .iter()
        .filter_map(|k| match k {
            RunEventKind::PhaseChanged(p) => Some(*p),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            RunPhase::DetectingDevice,
            RunPhase::Downloading,
            RunPhase::Extracting,
            RunPhase::ComparingVersions,
            RunPhase::Applying,
            RunPhase::CleaningUp,
            RunPhase::Succeeded(SuccessKind::UpdateApplied),
        ]
    );

    let finished: Vec<&RunEventKind> = kinds
        .iter()
        .filter(|k| matches!(k, RunEventKind::Finished(_)))
        .collect();
    assert_eq!(finished, vec![&RunEventKind::Finished(outcome)]);
    assert_eq!(kinds.last(), Some(&RunEventKind::Finished(outcome)));
    assert!(kinds.contains(&RunEventKind::DownloadComplete));
}

#[tokio::test]
async fn test_progress_is_clamped_and_skips_unknown_total() {
    let (orchestrator, _) = orchestrator(Script {
        progress: vec![
            DownloadProgress::new(0, 0),
            DownloadProgress::new(0, 4096),
            DownloadProgress::new(200, 0),
            DownloadProgress::new(200, 50),
            DownloadProgress::new(200, 500),
        ],
        ..Script::default()
    });
    let mut events = orchestrator.subscribe();

    orchestrator.start().await.unwrap().wait().await;
    let kinds = drain(&mut events);

    let percents: Vec<f32> = kinds
        .iter()
        .filter_map(|k| match k {
            RunEventKind::Progress(p) => Some(*p),
            _ => None,
        })
        .collect();
    assert_eq!(percents, vec![0.0, 25.0, 100.0]);

    // Progress only ever appears between entering and leaving Downloading
    let downloading = kinds
        .iter()
        .position(|k| *k == RunEventKind::PhaseChanged(RunPhase::Downloading))
        .unwrap();
    let complete = kinds
        .iter()
        .position(|k| *k == RunEventKind::DownloadComplete)
        .unwrap();
    for (i, kind) in kinds.iter().enumerate() {
        if matches!(kind, RunEventKind::Progress(_)) {
            assert!(i > downloading && i < complete);
        }
    }
}

#[tokio::test]
async fn test_start_while_active_is_rejected() {
    let gate = Arc::new(Notify::new());
    let (orchestrator, calls) = orchestrator(Script {
        fetch_gate: Some(gate.clone()),
        ..Script::default()
    });
    let mut events = orchestrator.subscribe();

    let handle = orchestrator.start().await.unwrap();
    wait_for_phase(&mut events, RunPhase::Downloading).await;
    let before = orchestrator.snapshot().await;

    let err = orchestrator.start().await.err().unwrap();
    assert_eq!(err, OrchestratorError::RunInProgress(RunPhase::Downloading));
    assert_eq!(orchestrator.snapshot().await, before);

    gate.notify_one();
    let outcome = handle.wait().await;
    assert_eq!(outcome, RunOutcome::Succeeded(SuccessKind::UpdateApplied));
    assert_eq!(calls.counts(), [1, 1, 1, 1, 1]);
}

#[tokio::test]
async fn test_cancel_during_download() {
    let gate = Arc::new(Notify::new());
    let (orchestrator, calls) = orchestrator(Script {
        fetch_gate: Some(gate),
        ..Script::default()
    });
    let mut events = orchestrator.subscribe();

    let handle = orchestrator.start().await.unwrap();
    wait_for_phase(&mut events, RunPhase::Downloading).await;
    orchestrator.cancel().await.unwrap();

    let outcome = handle.wait().await;
    assert_eq!(outcome, RunOutcome::Failed(FailureReason::Cancelled));
    let [detect, _, extract, apply, cleanup] = calls.counts();
    assert_eq!((detect, extract, apply, cleanup), (1, 0, 0, 0));

    let run = orchestrator.snapshot().await;
    assert_eq!(run.phase, RunPhase::Failed(FailureReason::Cancelled));
    assert_eq!(run.last_error, Some(FailureReason::Cancelled));
}

#[tokio::test]
async fn test_cancel_during_extract_wins_over_completion() {
    let gate = Arc::new(Notify::new());
    let (orchestrator, calls) = orchestrator(Script {
        extract_gate: Some(gate.clone()),
        ..Script::default()
    });
    let mut events = orchestrator.subscribe();

    let handle = orchestrator.start().await.unwrap();
    wait_for_phase(&mut events, RunPhase::Extracting).await;
    orchestrator.cancel().await.unwrap();
    gate.notify_one();

    let outcome = handle.wait().await;
    assert_eq!(outcome, RunOutcome::Failed(FailureReason::Cancelled));
    let [_, _, _, apply, cleanup] = calls.counts();
    assert_eq!((apply, cleanup), (0, 0));
}

#[tokio::test]
async fn test_cancel_during_apply_is_refused() {
    let gate = Arc::new(Notify::new());
    let (orchestrator, calls) = orchestrator(Script {
        apply_gate: Some(gate.clone()),
        ..Script::default()
    });
    let mut events = orchestrator.subscribe();

    let handle = orchestrator.start().await.unwrap();
    wait_for_phase(&mut events, RunPhase::Applying).await;

    let err = orchestrator.cancel().await.err().unwrap();
    assert_eq!(err, OrchestratorError::NotCancellable(RunPhase::Applying));

    gate.notify_one();
    let outcome = handle.wait().await;
    assert_eq!(outcome, RunOutcome::Succeeded(SuccessKind::UpdateApplied));
    assert_eq!(calls.counts(), [1, 1, 1, 1, 1]);
}

#[tokio::test]
async fn test_cancel_when_idle_or_finished_is_refused() {
    let (orchestrator, _) = orchestrator(Script::default());
    assert_eq!(
        orchestrator.cancel().await,
        Err(OrchestratorError::NotCancellable(RunPhase::Idle))
    );

    orchestrator.start().await.unwrap().wait().await;
    assert_eq!(
        orchestrator.cancel().await,
        Err(OrchestratorError::NotCancellable(RunPhase::Succeeded(
            SuccessKind::UpdateApplied
        )))
    );
}

#[tokio::test]
async fn test_new_run_after_terminal_resets_state() {
    let (orchestrator, calls) = orchestrator(Script {
        progress: vec![DownloadProgress::new(100, 100)],
        ..Script::default()
    });

    let first = orchestrator.start().await.unwrap();
    let first_id = first.run_id();
    first.wait().await;
    let run = orchestrator.snapshot().await;
    assert_eq!(run.progress, Some(100.0));
    assert_eq!(
        run.success_message.as_deref(),
        Some(SuccessKind::UpdateApplied.user_message())
    );
    assert!(run.finished_at.is_some());

    let second = orchestrator.start().await.unwrap();
    let second_id = second.run_id();
    assert_ne!(second_id, first_id);
    let fresh = orchestrator.snapshot().await;
    assert_eq!(fresh.id, Some(second_id));
    assert!(fresh.success_message.is_none());
    assert!(fresh.finished_at.is_none());

    second.wait().await;
    assert_eq!(calls.counts(), [2, 2, 2, 2, 2]);
    assert_eq!(orchestrator.snapshot().await.id, Some(second_id));
}
