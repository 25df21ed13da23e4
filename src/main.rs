//! # `digest` CLI
//!
//! Thin command-line front end over the [`repo_digest`] pipeline.
//!
//! ## Usage
//!
//! ```bash
//! digest ingest .                                   # local directory → digest.txt
//! digest ingest owner/repo -o -                     # print to stdout
//! digest ingest https://github.com/owner/repo/tree/main/src --json
//! digest sweep                                      # remove stale temp checkouts
//! digest sweep --watch                              # keep sweeping until Ctrl-C
//! ```
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`.

use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use repo_digest::config;
use repo_digest::janitor::{spawn_sweeper, Janitor};
use repo_digest::{ingest, ErrorKind, IngestError, IngestOptions};

/// Turn a Git repository or local directory into a text digest.
#[derive(Parser)]
#[command(name = "digest", version, about)]
struct Cli {
    /// Path to configuration file (TOML). Defaults apply when it is missing.
    #[arg(long, global = true, default_value = "./config/digest.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a local path or remote repository.
    Ingest {
        /// Local directory, repository URL, or `owner/repo` slug.
        #[arg(default_value = ".")]
        source: String,

        /// Output file; `-` writes the digest to stdout.
        #[arg(short, long, default_value = "digest.txt")]
        output: String,

        /// Branch to fetch, overriding any ref in the source.
        #[arg(long)]
        branch: Option<String>,

        /// Print the summary and stats as JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Remove temp checkouts older than the configured TTL.
    Sweep {
        /// Keep sweeping on the configured interval until interrupted.
        #[arg(long)]
        watch: bool,
    },
}

fn exit_code(err: &IngestError) -> i32 {
    match err.kind() {
        ErrorKind::InvalidSource | ErrorKind::RootNotFound | ErrorKind::SubpathNotFound => 2,
        _ if err.is_retryable() => 75,
        _ => 1,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config_or_default(&cli.config)?;
    let janitor = Janitor::from_config(&cfg.temp);

    match cli.command {
        Commands::Ingest {
            source,
            output,
            branch,
            json,
        } => {
            let to_stdout = output == "-";
            let options = IngestOptions {
                from_web: false,
                branch,
                output: (!to_stdout).then(|| PathBuf::from(&output)),
            };

            let ingestion = match ingest(&source, &options, &cfg, &janitor).await {
                Ok(ingestion) => ingestion,
                Err(err) => {
                    eprintln!("Error [{}]: {}", err.kind().as_str(), err);
                    std::process::exit(exit_code(&err));
                }
            };

            if json {
                let report = serde_json::json!({
                    "id": ingestion.query.id,
                    "source": ingestion.query.url.clone().unwrap_or_else(|| {
                        ingestion.query.local_path.display().to_string()
                    }),
                    "branch": ingestion.query.branch,
                    "commit": ingestion.query.commit,
                    "stats": ingestion.stats,
                    "summary": ingestion.digest.summary,
                    "output": options.output,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if to_stdout {
                print!("{}", ingestion.digest.file_body());
            } else {
                println!("Analysis complete! Output written to: {}", output);
                println!();
                println!("Summary:");
                print!("{}", ingestion.digest.summary);
            }

            if let Some(err) = ingestion.write_error {
                eprintln!("Error [{}]: {}", err.kind().as_str(), err);
                std::process::exit(exit_code(&err));
            }
        }
        Commands::Sweep { watch } => {
            if watch {
                let handle = spawn_sweeper(janitor.clone(), cfg.temp.sweep_interval());
                tokio::signal::ctrl_c().await?;
                handle.abort();
                return Ok(());
            }

            let report = janitor.sweep(Utc::now());
            println!("sweep {}", janitor.root().display());
            println!("  scanned: {}", report.scanned);
            println!("  removed: {}", report.removed.len());
            for (path, err) in &report.failed {
                println!("  failed: {} ({})", path.display(), err);
            }
            println!("ok");
        }
    }

    Ok(())
}
