//! KML Hub CLI: uploads KML/KMZ files through the proxy service.
//!
//! Reads client settings from the environment (KMLHUB_API_URL or API_URL,
//! TRANSFER_MODE, PROCESSING_TRIGGER_URL, STATUS_URL, ...).

use anyhow::Context;
use clap::{Parser, Subcommand};
use kmlhub_cli::{format_bytes, init_tracing, read_local_file};
use kmlhub_client::UploadOrchestrator;
use kmlhub_core::config::{ClientConfig, TransferMode};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "kmlhub", about = "Upload KML/KMZ files for analysis")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file and trigger processing
    Upload {
        /// Path to the .kml or .kmz file
        file: std::path::PathBuf,
        /// Send the bytes through the proxy instead of straight to storage
        #[arg(long)]
        relay: bool,
        /// Follow the analysis until it finishes
        #[arg(long)]
        watch: bool,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check a file against the upload rules without sending it
    Validate {
        /// Path to the file
        file: std::path::PathBuf,
    },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize response")?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env().context(
        "Failed to load client configuration. Set KMLHUB_API_URL (or API_URL)",
    )?;

    match cli.command {
        Commands::Upload {
            file,
            relay,
            watch,
            json,
        } => {
            if relay {
                config.transfer_mode = TransferMode::Relay;
            }
            let local = read_local_file(&file).await?;
            let orchestrator = UploadOrchestrator::from_config(&config)?;

            orchestrator
                .select_file(local.file_name.clone(), local.mime_type.clone(), local.data)
                .await?;

            let mut last_percentage = None;
            let outcome = orchestrator
                .start_upload(|progress| {
                    if !json && last_percentage != Some(progress.percentage) {
                        last_percentage = Some(progress.percentage);
                        eprintln!(
                            "uploading {:>3}%  {} / {}",
                            progress.percentage,
                            format_bytes(progress.bytes_sent),
                            format_bytes(progress.bytes_total)
                        );
                    }
                })
                .await;

            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(e) => {
                    if json {
                        print_json(&orchestrator.state())?;
                    }
                    return Err(e.into());
                }
            };

            if json {
                print_json(&serde_json::json!({
                    "fileKey": outcome.file_key,
                    "trackingId": outcome.tracking_id,
                    "state": orchestrator.state(),
                }))?;
            } else {
                println!("{}", orchestrator.state());
            }

            if watch {
                let mut handle = orchestrator
                    .watch_analysis(orchestrator.status_source())
                    .await?;
                while let Some(record) = handle.next().await {
                    if json {
                        print_json(&record)?;
                    } else {
                        println!(
                            "analysis {}: {:?} {}%",
                            record.tracking_id, record.status, record.progress_percent
                        );
                        if let Some(summary) = &record.result_summary {
                            print_json(summary)?;
                        }
                        if let Some(error) = &record.error {
                            println!("analysis error: {}", error);
                        }
                    }
                }
            }
        }
        Commands::Validate { file } => {
            let local = read_local_file(&file).await?;
            let request = local.request();
            match config.validator().validate(&request) {
                Ok(()) => println!(
                    "{} ({}) is valid for upload",
                    request.file_name,
                    format_bytes(request.size_bytes)
                ),
                Err(e) => return Err(e).context(format!("{} is not uploadable", request.file_name)),
            }
        }
    }

    Ok(())
}
