mod dedup;
mod enex;
mod extraction_log;
mod layout;
mod normalize;
mod pipeline;
mod remote;
mod settings;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};

use extraction_log::ExtractionLog;
use pipeline::RunOptions;
use remote::GoogleDrive;
use settings::Settings;

#[derive(Parser)]
#[command(
    name = "enex-sync",
    about = "Convert Evernote ENEX exports into a file tree and mirror it to Google Drive"
)]
struct Cli {
    /// Configuration file (default: ./enex-sync.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract every archive, update the extraction log, then upload
    Run {
        /// Directory holding the .enex files
        #[arg(short, long)]
        input_dir: Option<PathBuf>,
        /// Directory the notes are written to (must be empty or absent)
        #[arg(short, long = "output-directory")]
        output_dir: Option<PathBuf>,
        /// Extraction log file
        #[arg(short, long)]
        log_file: Option<PathBuf>,
        /// Extract only; skip the upload
        #[arg(short, long)]
        dry_run: bool,
        /// Hide the per-archive progress bar
        #[arg(long)]
        no_progress: bool,
    },
    /// Summarize an existing extraction log
    Stats {
        /// Extraction log file
        #[arg(short, long)]
        log_file: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Run {
            input_dir,
            output_dir,
            log_file,
            dry_run,
            no_progress,
        } => {
            let opts = RunOptions {
                input_dir: input_dir.unwrap_or(settings.input_dir),
                output_dir: output_dir.unwrap_or(settings.output_dir),
                log_file: log_file.unwrap_or(settings.log_file),
                dry_run,
                show_progress: !no_progress,
            };
            println!("Processing notes into: {}", opts.output_dir.display());
            if dry_run {
                println!("Dry run mode enabled: Google Drive syncing will be skipped.");
            }

            let drive = GoogleDrive::new(&settings.drive)?;
            let summary = pipeline::run(&opts, &drive)?;
            summary.print();
            Ok(())
        }
        Commands::Stats { log_file } => {
            let path = log_file.unwrap_or(settings.log_file);
            if !path.exists() {
                println!("No extraction log at {}.", path.display());
                return Ok(());
            }
            let log = ExtractionLog::load(&path)?;
            print_stats(&log);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn print_stats(log: &ExtractionLog) {
    println!(
        "{:<28} | {:>6} | {:>6} | {:<8}",
        "Notebook", "Ok", "Failed", "Archive"
    );
    println!("{}", "-".repeat(58));

    let (mut total_ok, mut total_failed) = (0usize, 0usize);
    for (notebook, entries) in log.notebooks() {
        let ok = entries.iter().filter(|e| e.is_success()).count();
        let failed = entries.len() - ok;
        let archive = if entries.iter().any(|e| e.is_archive_failure()) {
            "error"
        } else {
            "ok"
        };
        total_ok += ok;
        total_failed += failed;
        println!(
            "{:<28} | {:>6} | {:>6} | {:<8}",
            truncate(notebook, 28),
            ok,
            failed,
            archive
        );
    }

    println!(
        "\n{} ok, {} failed | {} unique files in hash index",
        total_ok,
        total_failed,
        log.hash_index().len()
    );
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max - 3).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
