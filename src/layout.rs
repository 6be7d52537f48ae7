use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Runs of reserved characters, swallowing dashes on either side so that
/// `A/B//C` and `A-/-B` come out as `A-B-C` and `A-B`.
static RESERVED_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"-*(?:[/\\:*?"<>|\x00-\x1f\x7f]-*)+"#).unwrap());

const SUBSTITUTE: &str = "-";
const MAX_COMPONENT_CHARS: usize = 120;
const FALLBACK_NAME: &str = "untitled";

#[derive(Debug, Error, PartialEq)]
pub enum LayoutError {
    #[error("Unknown MIME type '{0}'")]
    UnknownMime(String),
}

/// Turn a note title or notebook name into a single safe path component.
pub fn sanitize_component(raw: &str) -> String {
    let replaced = RESERVED_RUN_RE.replace_all(raw, SUBSTITUTE);
    let trimmed = replaced.trim_matches(|c: char| c == '.' || c.is_whitespace());
    let capped: String = trimmed.chars().take(MAX_COMPONENT_CHARS).collect();
    let capped = capped.trim_end_matches(|c: char| c == '.' || c.is_whitespace());
    if capped.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        capped.to_string()
    }
}

/// Canonical extension (without dot) for a declared MIME type.
pub fn extension_for_mime(mime: &str) -> Result<&'static str, LayoutError> {
    let essence = mime
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let ext = match essence.as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/gif" => "gif",
        "image/bmp" => "bmp",
        "image/webp" => "webp",
        "image/tiff" => "tiff",
        "image/svg+xml" => "svg",
        "image/heic" => "heic",
        "image/x-icon" | "image/vnd.microsoft.icon" => "ico",
        "application/pdf" => "pdf",
        "application/zip" => "zip",
        "application/json" => "json",
        "application/xml" | "text/xml" => "xml",
        "application/rtf" | "text/rtf" => "rtf",
        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "application/vnd.ms-powerpoint" => "ppt",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => "pptx",
        "application/vnd.oasis.opendocument.text" => "odt",
        "application/vnd.oasis.opendocument.spreadsheet" => "ods",
        "application/octet-stream" => "bin",
        "text/plain" => "txt",
        "text/html" => "html",
        "text/csv" => "csv",
        "text/markdown" => "md",
        "text/calendar" => "ics",
        "text/vcard" | "text/x-vcard" => "vcf",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/amr" => "amr",
        "audio/ogg" => "ogg",
        "audio/mp4" | "audio/x-m4a" | "audio/m4a" => "m4a",
        "audio/aac" => "aac",
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        "video/webm" => "webm",
        "video/mpeg" => "mpeg",
        _ => return Err(LayoutError::UnknownMime(mime.trim().to_string())),
    };
    Ok(ext)
}

/// Where one notebook's notes live.
pub fn notebook_dir(output_root: &Path, notebook: &str) -> PathBuf {
    output_root.join(sanitize_component(notebook))
}

/// Every note gets its own directory named after the sanitized title.
pub fn note_dir(output_root: &Path, notebook: &str, file_stem: &str) -> PathBuf {
    notebook_dir(output_root, notebook).join(file_stem)
}

pub fn text_path(note_dir: &Path, file_stem: &str) -> PathBuf {
    note_dir.join(format!("{file_stem}.txt"))
}

/// `title.ext` for a lone attachment, `title_<n>.ext` (1-based) otherwise.
pub fn resource_path(
    note_dir: &Path,
    file_stem: &str,
    position: usize,
    count: usize,
    mime: &str,
) -> Result<PathBuf, LayoutError> {
    let ext = extension_for_mime(mime)?;
    let name = if count > 1 {
        format!("{file_stem}_{position}.{ext}")
    } else {
        format!("{file_stem}.{ext}")
    };
    Ok(note_dir.join(name))
}

/// First path at or after `proposed` that is not already on disk:
/// `name.ext`, `name (2).ext`, `name (3).ext`, ...
pub fn first_free(proposed: &Path) -> PathBuf {
    if !proposed.exists() {
        return proposed.to_path_buf();
    }
    let stem = proposed
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = proposed
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let parent = proposed.parent().unwrap_or_else(|| Path::new(""));

    (2..)
        .map(|n| parent.join(format!("{stem} ({n}){ext}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| proposed.to_path_buf())
}
