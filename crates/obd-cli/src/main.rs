//! ELM327 OBD-II Diagnostics - Main Entry Point

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use obd_cli::{
    emit, format_freeze_frames, format_samples, format_trouble_info, format_valid_pids,
    init_logging,
};
use obd_protocol::{ConnectStatus, Elm327Config, ObdClient};
use obd_scheduler::{jobs, AcquisitionConfig, AcquisitionLoop, TransactionGate};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "obd-diag")]
#[command(author, version, about = "ELM327 OBD-II diagnostics")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "OBD_DIAG_CONFIG")]
    config: Option<PathBuf>,

    /// Serial port, overrides the configuration
    #[arg(short, long)]
    port: Option<String>,

    /// Vehicle trouble code file
    #[arg(long)]
    vehicle: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show adapter identification and status
    Info,

    /// List the PIDs the vehicle supports
    Pids {
        /// Enumerate a freeze frame instead of live data
        #[arg(long)]
        frame: Option<u8>,
    },

    /// Read PID values
    Read {
        /// PID keys such as 010C or 0902
        #[arg(required = true)]
        keys: Vec<String>,

        /// Freeze frame index for mode 02 keys
        #[arg(long)]
        frame: Option<u8>,
    },

    /// Show MIL status with stored and pending trouble codes
    Codes,

    /// Clear trouble codes and stored values
    Clear {
        /// Confirm clearing
        #[arg(long)]
        yes: bool,
    },

    /// Read every stored freeze frame
    Freeze,

    /// Read vehicle information (mode 09)
    Vehicle,

    /// Poll live data until interrupted
    Watch {
        /// PID keys to poll; all supported mode 01 PIDs when empty
        keys: Vec<String>,

        /// Pause between polls in milliseconds
        #[arg(long, default_value = "100")]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        Elm327Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging(cli.verbose || config.debug)?;

    info!("=== ELM327 Diagnostics v{} ===", env!("CARGO_PKG_VERSION"));

    if let Some(port) = cli.port {
        config.serial_port = port;
    }
    if let Some(vehicle) = cli.vehicle {
        config.vehicle_profile = Some(vehicle);
    }
    if matches!(cli.command, Commands::Clear { yes: false }) {
        bail!("Clearing trouble codes also erases freeze frames; pass --yes to confirm");
    }

    let mut client = ObdClient::new(config);
    let status = client.connect().await;
    let report = client.init_report();
    if !report.is_empty() {
        eprint!("{}", report);
    }
    if status != ConnectStatus::Success {
        bail!("Connection failed ({:?}, state {:?})", status, client.state());
    }
    info!(
        "Connected: MIL {}, {} stored codes",
        if client.mil_on() { "on" } else { "off" },
        client.stored_code_count()
    );

    let json = cli.json;
    match cli.command {
        Commands::Info => {
            let info = client.diagnostic_info().await;
            emit(json, &info, &info.to_string())?;
        }
        Commands::Pids { frame } => {
            let pids = client.valid_pids(frame).await;
            emit(json, &pids, &format_valid_pids(&pids))?;
        }
        Commands::Read { keys, frame } => {
            if let Some(frame) = frame {
                client.valid_pids(Some(frame)).await;
            }
            let samples = jobs::selected_data(&mut client, &keys, frame).await;
            emit(json, &samples, &format_samples(&samples))?;
        }
        Commands::Codes => {
            let info = jobs::trouble_info(&mut client).await?;
            emit(json, &info, &format_trouble_info(&info))?;
        }
        Commands::Clear { .. } => {
            let info = jobs::clear_trouble_info(&mut client).await?;
            emit(json, &info, &format_trouble_info(&info))?;
        }
        Commands::Freeze => {
            let frames = jobs::freeze_frame_data(&mut client).await;
            emit(json, &frames, &format_freeze_frames(&frames))?;
        }
        Commands::Vehicle => {
            let samples = jobs::vehicle_data(&mut client).await;
            emit(json, &samples, &format_samples(&samples))?;
        }
        Commands::Watch { keys, interval_ms } => {
            let config = AcquisitionConfig {
                idle_interval_ms: interval_ms,
                keys,
            };
            return watch(client, config, json).await;
        }
    }

    client.close().await;
    Ok(())
}

/// Stream live samples until Ctrl-C
async fn watch(client: ObdClient, config: AcquisitionConfig, json: bool) -> Result<()> {
    let acquisition = Arc::new(AcquisitionLoop::new(TransactionGate::new(client), config));
    let (sample_tx, mut sample_rx) = mpsc::channel(16);

    let runner = {
        let acquisition = acquisition.clone();
        tokio::spawn(async move { acquisition.run(sample_tx).await })
    };
    acquisition.go();

    loop {
        tokio::select! {
            batch = sample_rx.recv() => match batch {
                Some(samples) => {
                    if json {
                        println!("{}", serde_json::to_string(&samples)?);
                    } else {
                        print!("{}", format_samples(&samples));
                        println!();
                    }
                }
                None => break,
            },
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Interrupted");
                break;
            }
        }
    }

    acquisition.stop();
    drop(sample_rx);
    runner.await.context("Acquisition loop failed")?;
    Ok(())
}
