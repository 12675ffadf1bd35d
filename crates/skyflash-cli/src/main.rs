//! Skyflash - firmware updater for the Skytraxx 5 mini vario
//!
//! Runs one update against the connected vario, probes it, or serves update
//! archives for offline testing.

mod config;
mod reporter;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use skyflash_core::{BackendResponse, DeviceProbe, FailureReason};
use skyflash_device::VolumeProbe;
use skyflash_ota::{OrchestratorError, RunPhase, UpdateOrchestrator};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// How long the reporter may take to print the last events of a run
const REPORTER_GRACE: Duration = Duration::from_secs(1);

/// Exit code after Ctrl-C, as shells report SIGINT
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// What a Ctrl-C does, given the orchestrator's answer to `cancel()`
#[derive(Debug, PartialEq)]
enum Interrupt {
    /// The run will end as cancelled
    Cancelling,
    /// Nothing on the device has been touched yet; leave right away
    Exit,
    /// The run is past the point where it can be stopped
    TooLate,
    /// No run left to stop
    Ignore,
}

fn interrupt_action(result: &Result<(), OrchestratorError>) -> Interrupt {
    match result {
        Ok(()) => Interrupt::Cancelling,
        Err(OrchestratorError::NotCancellable(phase)) => match phase {
            RunPhase::DetectingDevice => Interrupt::Exit,
            RunPhase::ComparingVersions | RunPhase::Applying | RunPhase::CleaningUp => {
                Interrupt::TooLate
            }
            RunPhase::Idle
            | RunPhase::Downloading
            | RunPhase::Extracting
            | RunPhase::Succeeded(_)
            | RunPhase::Failed(_) => Interrupt::Ignore,
        },
        Err(OrchestratorError::RunInProgress(_)) => Interrupt::Ignore,
    }
}

/// Translate Ctrl-C presses into cancellation requests until the task is aborted
async fn handle_interrupts(orchestrator: UpdateOrchestrator) {
    while tokio::signal::ctrl_c().await.is_ok() {
        let result = orchestrator.cancel().await;
        if let Err(e) = &result {
            warn!(error = %e, "Cancellation refused");
        }
        match interrupt_action(&result) {
            Interrupt::Cancelling => println!("\nUpdate wird abgebrochen..."),
            Interrupt::Exit => {
                println!("\nUpdate abgebrochen.");
                std::process::exit(INTERRUPTED_EXIT_CODE);
            }
            Interrupt::TooLate => {
                println!("\nDas Update kann jetzt nicht mehr abgebrochen werden.")
            }
            Interrupt::Ignore => {}
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "skyflash")]
#[command(about = "Firmware updater for the Skytraxx 5 mini vario")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "skyflash.toml", global = true)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Update archive URL (overrides the config file)
    #[arg(long, global = true)]
    url: Option<String>,

    /// Mount path of the vario (overrides the config file)
    #[arg(long, global = true)]
    mount: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Update the connected vario (default)
    Update,
    /// Show model and firmware version of the connected vario
    Info {
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write a configuration file with default values
    InitConfig,
    /// Serve update archives from a folder over HTTP
    Serve {
        /// Folder to serve
        #[arg(short, long)]
        folder: Option<PathBuf>,
        /// Bind address
        #[arg(short, long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Skyflash v{}", env!("CARGO_PKG_VERSION"));

    let command = args.command.unwrap_or(Command::Update);
    if let Command::InitConfig = command {
        return init_config(&args.config);
    }

    let mut config = config::load_config(&args.config)?;
    if let Some(url) = args.url {
        config.archive.url = url;
    }
    if let Some(mount) = args.mount {
        config.device.mount_path = Some(mount);
    }

    match command {
        Command::Update => update(&config).await,
        Command::Info { json } => device_info(&config, json).await,
        Command::Serve { folder, bind } => {
            let folder = folder.unwrap_or_else(|| config.server.folder.clone());
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            server::run(&folder, &bind).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::InitConfig => init_config(&args.config),
    }
}

fn init_config(path: &std::path::Path) -> Result<ExitCode> {
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    config::save_default_config(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(ExitCode::SUCCESS)
}

/// Run one update, cancelling on Ctrl-C where the run allows it
async fn update(config: &config::Config) -> Result<ExitCode> {
    let orchestrator = config.build_orchestrator()?;
    info!(
        url = %config.archive.url,
        volume = %config.device.volume_label,
        "Configuration loaded"
    );

    let events = orchestrator.subscribe();
    let handle = orchestrator.start().await?;
    let reporter = tokio::spawn(reporter::report(events));

    let interrupt = tokio::spawn(handle_interrupts(orchestrator.clone()));

    let outcome = handle.wait().await;
    interrupt.abort();
    let _ = tokio::time::timeout(REPORTER_GRACE, reporter).await;

    println!("{}", outcome.user_message());
    if outcome.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        let run = orchestrator.snapshot().await;
        if let Some(detail) = run.error_detail {
            eprintln!("({})", detail);
        }
        Ok(ExitCode::FAILURE)
    }
}

/// Probe the vario without changing anything
async fn device_info(config: &config::Config, json: bool) -> Result<ExitCode> {
    let probe = VolumeProbe::new(config.volume());
    let response = BackendResponse::from(probe.detect().await);
    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    }

    // The human output reads the same response the JSON output shows
    let detail = response.error.clone();
    let code = match response.into_result() {
        Ok(device) => {
            if !json {
                println!("Modell:   {}", device.device_name);
                println!("Firmware: {}", device.software_version);
                if !device.is_model(&config.device.supported_model) {
                    println!("{}", FailureReason::UnsupportedModel.user_message());
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            if !json {
                println!("{}", FailureReason::DeviceNotFound.user_message());
                eprintln!("({})", detail.unwrap_or_else(|| e.to_string()));
            }
            ExitCode::FAILURE
        }
    };
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyflash_core::SuccessKind;

    #[test]
    fn test_interrupt_while_detecting_exits() {
        let refused = Err(OrchestratorError::NotCancellable(RunPhase::DetectingDevice));
        assert_eq!(interrupt_action(&refused), Interrupt::Exit);
    }

    #[test]
    fn test_interrupt_after_download_is_too_late() {
        for phase in [
            RunPhase::ComparingVersions,
            RunPhase::Applying,
            RunPhase::CleaningUp,
        ] {
            let refused = Err(OrchestratorError::NotCancellable(phase));
            assert_eq!(interrupt_action(&refused), Interrupt::TooLate, "{}", phase);
        }
    }

    #[test]
    fn test_interrupt_without_active_run_is_silent() {
        for phase in [
            RunPhase::Idle,
            RunPhase::Succeeded(SuccessKind::AlreadyUpToDate),
            RunPhase::Failed(FailureReason::Cancelled),
        ] {
            let refused = Err(OrchestratorError::NotCancellable(phase));
            assert_eq!(interrupt_action(&refused), Interrupt::Ignore, "{}", phase);
        }
    }

    #[test]
    fn test_accepted_interrupt_cancels() {
        assert_eq!(interrupt_action(&Ok(())), Interrupt::Cancelling);
    }
}
