use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dedup::{ContentHash, HashIndex};

/// Reserved top-level key holding the hash index.
pub const HASH_KEY: &str = "hash";
/// Key used for a notebook whose name collides with [`HASH_KEY`].
const RENAMED_HASH_NOTEBOOK: &str = "hash (notebook)";

/// One note, resource or archive outcome. Archive-level failures carry
/// neither `note` nor `success`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeEntry {
    pub file: String,
    pub notebook: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// 1-based attachment position for resource entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<ContentHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OutcomeEntry {
    pub fn archive_failed(file: &str, notebook: &str, error: impl ToString) -> Self {
        OutcomeEntry {
            file: file.to_string(),
            notebook: notebook.to_string(),
            note: None,
            resource: None,
            success: None,
            file_path: None,
            file_hash: None,
            error: Some(error.to_string()),
        }
    }

    pub fn note_ok(file: &str, notebook: &str, note: &str, path: &Path, hash: ContentHash) -> Self {
        OutcomeEntry {
            file: file.to_string(),
            notebook: notebook.to_string(),
            note: Some(note.to_string()),
            resource: None,
            success: Some(true),
            file_path: Some(path.display().to_string()),
            file_hash: Some(hash),
            error: None,
        }
    }

    pub fn note_failed(file: &str, notebook: &str, note: &str, error: impl ToString) -> Self {
        OutcomeEntry {
            file: file.to_string(),
            notebook: notebook.to_string(),
            note: Some(note.to_string()),
            resource: None,
            success: Some(false),
            file_path: None,
            file_hash: None,
            error: Some(error.to_string()),
        }
    }

    pub fn for_resource(mut self, position: usize) -> Self {
        self.resource = Some(position);
        self
    }

    pub fn is_success(&self) -> bool {
        self.success == Some(true)
    }

    pub fn is_archive_failure(&self) -> bool {
        self.note.is_none() && self.error.is_some()
    }
}

/// Per-notebook outcomes plus the hash index, persisted as one JSON document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionLog {
    notebooks: BTreeMap<String, Vec<OutcomeEntry>>,
    hashes: HashIndex,
}

impl ExtractionLog {
    /// Load the log at `path`. A missing file is created with an empty log;
    /// an unreadable or corrupt one is ignored and the run starts empty.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            let log = ExtractionLog::default();
            log.persist(path)?;
            info!(path = %path.display(), "created empty extraction log");
            return Ok(log);
        }

        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read extraction log, starting empty");
                return Ok(ExtractionLog::default());
            }
        };
        Ok(Self::from_json(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "corrupt extraction log, starting empty");
            ExtractionLog::default()
        }))
    }

    /// Parse a log document, dropping notebook segments that do not parse
    /// rather than losing the whole file.
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let serde_json::Value::Object(map) = value else {
            anyhow::bail!("extraction log is not a JSON object");
        };

        let mut log = ExtractionLog::default();
        for (key, value) in map {
            if key == HASH_KEY {
                match serde_json::from_value::<HashIndex>(value) {
                    Ok(hashes) => log.hashes = hashes,
                    Err(e) => warn!(error = %e, "dropping unreadable hash index"),
                }
                continue;
            }
            match serde_json::from_value::<Vec<OutcomeEntry>>(value) {
                Ok(entries) => {
                    log.notebooks.insert(key, entries);
                }
                Err(e) => warn!(notebook = %key, error = %e, "dropping unreadable log segment"),
            }
        }
        Ok(log)
    }

    /// Write the whole log through a temporary sibling and rename it into
    /// place so readers never observe a partial document.
    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut ser)?;
        out.push(b'\n');

        let tmp = tmp_path(path);
        fs::write(&tmp, &out).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| {
            format!("failed to move {} to {}", tmp.display(), path.display())
        })?;
        Ok(())
    }

    /// Log key for a notebook; the reserved hash key is never handed out.
    pub fn notebook_key(notebook: &str) -> &str {
        if notebook == HASH_KEY {
            RENAMED_HASH_NOTEBOOK
        } else {
            notebook
        }
    }

    /// Replace a notebook's outcomes with this run's.
    pub fn replace_notebook(&mut self, notebook: &str, entries: Vec<OutcomeEntry>) {
        self.notebooks
            .insert(Self::notebook_key(notebook).to_string(), entries);
    }

    pub fn entries(&self, notebook: &str) -> Option<&[OutcomeEntry]> {
        self.notebooks
            .get(Self::notebook_key(notebook))
            .map(Vec::as_slice)
    }

    pub fn notebooks(&self) -> impl Iterator<Item = (&str, &[OutcomeEntry])> {
        self.notebooks
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn hash_index(&self) -> &HashIndex {
        &self.hashes
    }

    pub fn hash_index_mut(&mut self) -> &mut HashIndex {
        &mut self.hashes
    }
}

/// Notebooks in key order, then the reserved hash entry last.
impl Serialize for ExtractionLog {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.notebooks.len() + 1))?;
        for (notebook, entries) in &self.notebooks {
            map.serialize_entry(notebook, entries)?;
        }
        map.serialize_entry(HASH_KEY, &self.hashes)?;
        map.end()
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(note: &str) -> OutcomeEntry {
        OutcomeEntry::note_ok(
            "Personal.enex",
            "Personal",
            note,
            Path::new("out/Personal/Todo/Todo.txt"),
            ContentHash::of(note.as_bytes()),
        )
    }

    #[test]
    fn missing_file_creates_placeholder() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("extraction_log.json");

        let log = ExtractionLog::load(&path).unwrap();
        assert_eq!(log, ExtractionLog::default());

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, serde_json::json!({ "hash": {} }));
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("extraction_log.json");
        fs::write(&path, "{ not json").unwrap();

        let log = ExtractionLog::load(&path).unwrap();
        assert!(log.hash_index().is_empty());
        assert_eq!(log.notebooks().count(), 0);
    }

    #[test]
    fn hash_entry_written_last() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("log.json");

        let mut log = ExtractionLog::default();
        log.replace_notebook("Zebra", vec![sample_entry("z")]);
        log.replace_notebook("Alpha", vec![sample_entry("a")]);
        log.hash_index_mut()
            .insert(ContentHash::of(b"a"), PathBuf::from("out/a.txt"));
        log.persist(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let alpha = text.find("\"Alpha\"").unwrap();
        let zebra = text.find("\"Zebra\"").unwrap();
        let hash = text.find("\"hash\": {").unwrap();
        assert!(alpha < zebra && zebra < hash);
        assert!(text.contains("\n    \"Alpha\""));
        assert!(!tmp.path().join("log.json.tmp").exists());

        assert_eq!(ExtractionLog::load(&path).unwrap(), log);
    }

    #[test]
    fn entry_keys_match_log_format() {
        let value = serde_json::to_value(sample_entry("Todo")).unwrap();
        let keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        for key in ["file", "notebook", "note", "success", "file_path", "file_hash"] {
            assert!(keys.contains(&key), "missing {key}");
        }
        assert!(!keys.contains(&"error"));

        let failed = serde_json::to_value(OutcomeEntry::archive_failed("X.enex", "X", "boom")).unwrap();
        assert_eq!(
            failed,
            serde_json::json!({ "file": "X.enex", "notebook": "X", "error": "boom" })
        );
    }

    #[test]
    fn unreadable_segment_dropped_rest_kept() {
        let raw = r#"{
            "Good": [{"file": "Good.enex", "notebook": "Good", "note": "n", "success": false, "error": "Note content is empty"}],
            "Bad": 42,
            "hash": {"abc": "out/x.txt"}
        }"#;
        let log = ExtractionLog::from_json(raw).unwrap();
        assert_eq!(log.entries("Good").unwrap().len(), 1);
        assert!(log.entries("Bad").is_none());
        assert_eq!(log.hash_index().len(), 1);
    }

    #[test]
    fn replace_keeps_other_notebooks() {
        let mut log = ExtractionLog::default();
        log.replace_notebook("Old", vec![sample_entry("kept")]);
        log.replace_notebook("New", vec![sample_entry("first")]);
        log.replace_notebook("New", vec![sample_entry("second")]);

        assert_eq!(log.entries("Old").unwrap()[0].note.as_deref(), Some("kept"));
        let new = log.entries("New").unwrap();
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].note.as_deref(), Some("second"));
    }

    #[test]
    fn notebook_named_hash_does_not_clobber_index() {
        let mut log = ExtractionLog::default();
        log.replace_notebook("hash", vec![sample_entry("x")]);
        log.hash_index_mut()
            .insert(ContentHash::of(b"x"), PathBuf::from("out/x.txt"));

        let reloaded = ExtractionLog::from_json(&serde_json::to_string(&log).unwrap()).unwrap();
        assert_eq!(reloaded.entries("hash").unwrap().len(), 1);
        assert_eq!(reloaded.hash_index().len(), 1);
    }
}
