use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;
use tracing::{info, warn};

use crate::dedup::{self, HashIndex};
use crate::enex::{self, Archive};
use crate::extraction_log::{ExtractionLog, OutcomeEntry};
use crate::layout;
use crate::normalize::{self, NormalizedNote};
use crate::remote::{AuthError, RemoteStore};

const ARCHIVE_EXTENSION: &str = "enex";

/// Conditions that stop a run outright.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("input directory {} does not exist", .0.display())]
    MissingInput(PathBuf),
    #[error("output directory {} already exists and is not empty", .0.display())]
    OutputNotEmpty(PathBuf),
    #[error("all {0} archive(s) failed to parse")]
    AllArchivesFailed(usize),
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub log_file: PathBuf,
    /// Extract and persist the log, but never touch the remote store.
    pub dry_run: bool,
    pub show_progress: bool,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunSummary {
    pub archives: usize,
    pub failed_archives: usize,
    pub notes: usize,
    pub written: usize,
    pub reused: usize,
    pub failures: usize,
    pub uploaded: bool,
}

impl RunSummary {
    pub fn print(&self) {
        println!(
            "Processed {} archives ({} failed), {} notes: {} files written, {} reused, {} failures.",
            self.archives, self.failed_archives, self.notes, self.written, self.reused, self.failures,
        );
    }
}

/// Extract every archive under `input_dir`, persist the log, then hand the
/// finished tree to `store` unless this is a dry run.
pub fn run<S: RemoteStore>(opts: &RunOptions, store: &S) -> Result<RunSummary> {
    if !opts.input_dir.is_dir() {
        return Err(RunError::MissingInput(opts.input_dir.clone()).into());
    }
    prepare_output_root(&opts.output_dir)?;

    let mut log = ExtractionLog::load(&opts.log_file)?;
    let files = list_archives(&opts.input_dir)?;
    let mut summary = RunSummary::default();

    if files.is_empty() {
        println!("No ENEX files found.");
        return Ok(summary);
    }

    for file in &files {
        process_archive(file, &opts.output_dir, &mut log, &mut summary, opts.show_progress);
    }

    log.persist(&opts.log_file)
        .with_context(|| format!("failed to persist {}", opts.log_file.display()))?;
    info!(
        path = %opts.log_file.display(),
        hashes = log.hash_index().len(),
        "extraction log saved"
    );

    if summary.failed_archives == summary.archives {
        return Err(RunError::AllArchivesFailed(summary.archives).into());
    }

    if opts.dry_run {
        println!("Dry run complete. No files were uploaded.");
        return Ok(summary);
    }

    let credential = store.authenticate().map_err(RunError::from)?;
    store
        .upload(&credential, &opts.output_dir)
        .with_context(|| format!("failed to upload {}", opts.output_dir.display()))?;
    summary.uploaded = true;
    Ok(summary)
}

/// The output root must be absent or empty; it is created if missing.
pub fn prepare_output_root(root: &Path) -> Result<()> {
    if root.exists() {
        let mut entries =
            fs::read_dir(root).with_context(|| format!("failed to list {}", root.display()))?;
        if entries.next().is_some() {
            return Err(RunError::OutputNotEmpty(root.to_path_buf()).into());
        }
    }
    fs::create_dir_all(root).with_context(|| format!("failed to create {}", root.display()))?;
    Ok(())
}

/// Archive files in `dir`, by case-insensitive extension, sorted by name.
pub fn list_archives(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let path = entry?.path();
        let is_archive = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION));
        if is_archive && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Run one archive through the pipeline and replace its notebook in `log`.
/// Nothing in here aborts the run.
pub fn process_archive(
    file: &Path,
    output_root: &Path,
    log: &mut ExtractionLog,
    summary: &mut RunSummary,
    show_progress: bool,
) {
    summary.archives += 1;

    let archive = match enex::load(file) {
        Ok(archive) => archive,
        Err(e) => {
            warn!(file = %file.display(), error = %e, "skipping archive");
            summary.failed_archives += 1;
            let notebook = e.archive().to_string();
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            log.replace_notebook(
                &notebook,
                vec![OutcomeEntry::archive_failed(&file_name, &notebook, &e)],
            );
            return;
        }
    };

    info!(notebook = %archive.name, notes = archive.notes.len(), "processing archive");
    let pb = if show_progress {
        ProgressBar::new(archive.notes.len() as u64)
    } else {
        ProgressBar::hidden()
    };
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{msg:20} [{bar:40.cyan/blue}] {pos}/{len}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(archive.name.clone());

    let mut entries = Vec::new();
    for record in &archive.notes {
        if let Some(note) = normalize::normalize(record) {
            summary.notes += 1;
            let before = entries.len();
            process_note(&archive, &note, output_root, log.hash_index_mut(), &mut entries, summary);
            summary.failures += entries[before..]
                .iter()
                .filter(|e: &&OutcomeEntry| !e.is_success())
                .count();
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    log.replace_notebook(&archive.name, entries);
}

fn process_note(
    archive: &Archive,
    note: &NormalizedNote,
    output_root: &Path,
    index: &mut HashIndex,
    entries: &mut Vec<OutcomeEntry>,
    summary: &mut RunSummary,
) {
    let file = archive.file_name.as_str();
    let notebook = archive.name.as_str();
    let dir = layout::note_dir(output_root, notebook, &note.file_stem);

    match &note.text {
        Some(Ok(text)) => {
            let proposed = layout::text_path(&dir, &note.file_stem);
            entries.push(materialize(
                text.as_bytes(),
                &proposed,
                index,
                summary,
                (file, notebook, note.title.as_str()),
            ));
        }
        Some(Err(e)) => {
            warn!(notebook, note = %note.title, error = %e, "note text skipped");
            entries.push(OutcomeEntry::note_failed(file, notebook, &note.title, e));
        }
        None => {}
    }

    let count = note.resources.len();
    for (idx, resource) in note.resources.iter().enumerate() {
        let position = idx + 1;
        let entry = match resource {
            Err(e) => OutcomeEntry::note_failed(file, notebook, &note.title, e),
            Ok(att) => {
                match layout::resource_path(&dir, &note.file_stem, position, count, &att.mime_type) {
                    Ok(proposed) => {
                        materialize(&att.data, &proposed, index, summary, (file, notebook, note.title.as_str()))
                    }
                    Err(e) => OutcomeEntry::note_failed(file, notebook, &note.title, e),
                }
            }
        };
        if !entry.is_success() {
            warn!(notebook, note = %note.title, resource = position, error = ?entry.error, "resource skipped");
        }
        entries.push(entry.for_resource(position));
    }
}

/// Write or reuse one payload and describe the result as a log entry.
fn materialize(
    payload: &[u8],
    proposed: &Path,
    index: &mut HashIndex,
    summary: &mut RunSummary,
    (file, notebook, title): (&str, &str, &str),
) -> OutcomeEntry {
    match dedup::resolve(payload, proposed, index) {
        Ok(resolved) => {
            if resolved.written {
                summary.written += 1;
            } else {
                summary.reused += 1;
            }
            OutcomeEntry::note_ok(file, notebook, title, &resolved.path, resolved.hash)
        }
        Err(e) => OutcomeEntry::note_failed(file, notebook, title, format!("{e:#}")),
    }
}
