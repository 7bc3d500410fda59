//! CLI for the subforge transcription service.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use subforge_core::config;
use subforge_core::studio::Studio;

use commands::{run_add, run_cancel, run_cleanup, run_config, run_status, run_workers, AddArgs};

/// Top-level CLI for subforge.
#[derive(Debug, Parser)]
#[command(name = "subforge")]
#[command(about = "subforge: speech-to-subtitle job runner", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Submit a media file for transcription.
    Add {
        /// WAV file to transcribe.
        file: PathBuf,
        /// Spoken language: auto, zh, en or ja.
        #[arg(long, default_value = "auto")]
        language: String,
        /// Recognition model.
        #[arg(long, default_value = "nova-2-general")]
        model: String,
        /// Recognition options as a JSON object (see `subforge config`).
        #[arg(long, value_name = "JSON")]
        options: Option<String>,
        /// Name used for the download (defaults to the file name).
        #[arg(long)]
        name: Option<String>,
    },

    /// Run queued jobs until the queue is empty.
    Run {
        /// Jobs executed in parallel (default: job_workers from config).
        #[arg(long, value_name = "N")]
        jobs: Option<usize>,
    },

    /// Show one job (incremental log) or list all jobs.
    Status {
        /// Job identifier; omit to list every job.
        id: Option<String>,
        /// Only show log lines after this sequence number.
        #[arg(long, default_value = "0", value_name = "SEQ")]
        since: u64,
        /// Print the raw status JSON.
        #[arg(long)]
        json: bool,
    },

    /// Cancel a queued or running job.
    Cancel {
        /// Job identifier.
        id: String,
    },

    /// Print supported languages, models and option ranges as JSON.
    Config,

    /// Remove finished jobs past their retention.
    Cleanup,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let studio = Studio::open(cfg).await?;

        match cli.command {
            CliCommand::Add {
                file,
                language,
                model,
                options,
                name,
            } => {
                let args = AddArgs {
                    file,
                    language,
                    model,
                    options,
                    name,
                };
                run_add(&studio, args).await?
            }
            CliCommand::Run { jobs } => run_workers(&studio, jobs).await?,
            CliCommand::Status { id, since, json } => run_status(&studio, id.as_deref(), since, json)?,
            CliCommand::Cancel { id } => run_cancel(&studio, &id).await?,
            CliCommand::Config => run_config(&studio)?,
            CliCommand::Cleanup => run_cleanup(&studio).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
