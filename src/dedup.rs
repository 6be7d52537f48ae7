use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::layout;

/// Lowercase hex SHA-256 of the exact bytes written.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of(payload: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(payload);
        ContentHash(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content hash → path where that content was first materialized.
/// Persisted inside the extraction log and carried from run to run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashIndex(BTreeMap<ContentHash, PathBuf>);

impl HashIndex {
    pub fn get(&self, hash: &ContentHash) -> Option<&Path> {
        self.0.get(hash).map(PathBuf::as_path)
    }

    pub fn insert(&mut self, hash: ContentHash, path: PathBuf) -> Option<PathBuf> {
        self.0.insert(hash, path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Outcome of [`resolve`].
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub path: PathBuf,
    pub hash: ContentHash,
    /// False when the content already existed and nothing was written.
    pub written: bool,
}

/// Materialize `payload` unless identical bytes are already on disk.
///
/// A hit in `index` whose file still exists is returned untouched. Otherwise
/// the payload goes to `proposed` (or the first free sibling name if another
/// file already occupies it) and the index is updated. Entries pointing at
/// files that have since disappeared are replaced.
pub fn resolve(payload: &[u8], proposed: &Path, index: &mut HashIndex) -> Result<Resolved> {
    let hash = ContentHash::of(payload);

    if let Some(existing) = index.get(&hash) {
        if existing.exists() {
            debug!(%hash, path = %existing.display(), "content already materialized");
            return Ok(Resolved {
                path: existing.to_path_buf(),
                hash,
                written: false,
            });
        }
        warn!(
            %hash,
            path = %existing.display(),
            "indexed file is missing, writing content again"
        );
    }

    let path = layout::first_free(proposed);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(&path, payload).with_context(|| format!("failed to write {}", path.display()))?;
    index.insert(hash.clone(), path.clone());

    Ok(Resolved {
        path,
        hash,
        written: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex() {
        assert_eq!(
            ContentHash::of(b"Buy milk").as_str(),
            "df3db8a9ea05f22ce0238a243ce14e9e7829f22b5fdec7e6536f656849e46db1"
        );
    }

    #[test]
    fn first_write_lands_at_proposed_path() {
        let tmp = tempfile::tempdir().unwrap();
        let mut index = HashIndex::default();
        let proposed = tmp.path().join("Book/Todo/Todo.txt");

        let r = resolve(b"Buy milk", &proposed, &mut index).unwrap();
        assert!(r.written);
        assert_eq!(r.path, proposed);
        assert_eq!(fs::read_to_string(&proposed).unwrap(), "Buy milk");
        assert_eq!(index.get(&r.hash), Some(proposed.as_path()));
    }

    #[test]
    fn identical_payloads_share_one_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mut index = HashIndex::default();
        let a = tmp.path().join("A/A.txt");
        let b = tmp.path().join("B/B.txt");

        let first = resolve(b"same line", &a, &mut index).unwrap();
        let second = resolve(b"same line", &b, &mut index).unwrap();

        assert!(first.written);
        assert!(!second.written);
        assert_eq!(first.path, second.path);
        assert_eq!(first.hash, second.hash);
        assert!(!b.exists());
        assert!(!tmp.path().join("B").exists());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn different_content_same_name_does_not_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        let mut index = HashIndex::default();
        let proposed = tmp.path().join("Todo.txt");

        resolve(b"one", &proposed, &mut index).unwrap();
        let r = resolve(b"two", &proposed, &mut index).unwrap();

        assert_eq!(r.path, tmp.path().join("Todo (2).txt"));
        assert_eq!(fs::read_to_string(&proposed).unwrap(), "one");
        assert_eq!(fs::read_to_string(&r.path).unwrap(), "two");
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn stale_entry_is_rewritten() {
        let tmp = tempfile::tempdir().unwrap();
        let mut index = HashIndex::default();
        let gone = tmp.path().join("old/Note.txt");
        index.insert(ContentHash::of(b"payload"), gone.clone());

        let proposed = tmp.path().join("new/Note.txt");
        let r = resolve(b"payload", &proposed, &mut index).unwrap();

        assert!(r.written);
        assert_eq!(r.path, proposed);
        assert_eq!(index.get(&r.hash), Some(proposed.as_path()));
        assert_eq!(index.len(), 1);
    }
}
