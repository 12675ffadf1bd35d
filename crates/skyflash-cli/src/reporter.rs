//! Terminal rendering of run events

use skyflash_ota::{RunEvent, RunEventKind, RunPhase};
use std::io::Write;
use tokio::sync::broadcast;
use tracing::debug;

/// Line shown when a phase starts
fn phase_line(phase: RunPhase) -> Option<&'static str> {
    match phase {
        RunPhase::DetectingDevice => Some("Suche Skytraxx Vario..."),
        RunPhase::Downloading => Some("Lade Update herunter..."),
        RunPhase::Extracting => Some("Entpacke Update..."),
        RunPhase::ComparingVersions => Some("Vergleiche Firmware-Versionen..."),
        RunPhase::Applying => Some("Übertrage Update auf das Vario..."),
        RunPhase::CleaningUp => Some("Räume auf..."),
        // Terminal phases are reported by the caller with the outcome message
        RunPhase::Idle | RunPhase::Succeeded(_) | RunPhase::Failed(_) => None,
    }
}

/// Whole-percent steps only, so a fast link does not flood the terminal
fn progress_step(percent: f32, last: &mut Option<u32>) -> Option<u32> {
    let step = percent.floor() as u32;
    if *last == Some(step) {
        return None;
    }
    *last = Some(step);
    Some(step)
}

/// Print run events until the run finishes
pub async fn report(mut events: broadcast::Receiver<RunEvent>) {
    let mut last_step = None;
    let mut stdout = std::io::stdout();

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Reporter lagged behind run events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event.kind {
            RunEventKind::PhaseChanged(phase) => {
                if let Some(line) = phase_line(phase) {
                    println!("{}", line);
                }
            }
            RunEventKind::Progress(percent) => {
                if let Some(step) = progress_step(percent, &mut last_step) {
                    print!("\r  {:>3}%", step);
                    let _ = stdout.flush();
                }
            }
            RunEventKind::DownloadComplete => {
                if last_step.is_some() {
                    println!();
                }
            }
            RunEventKind::Finished(_) => break,
        }
    }
}
