use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

const DEFAULT_CONFIG_FILE: &str = "enex-sync";
const ENV_PREFIX: &str = "ENEX";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub log_file: PathBuf,
    #[serde(default)]
    pub drive: DriveSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DriveSettings {
    pub access_token: Option<String>,
    /// Remote folder id the mirrored tree is created under; Drive root if unset.
    pub parent_folder: Option<String>,
    pub api_base: String,
}

impl Default for DriveSettings {
    fn default() -> Self {
        DriveSettings {
            access_token: None,
            parent_folder: None,
            api_base: "https://www.googleapis.com".to_string(),
        }
    }
}

impl Settings {
    /// Defaults, then `enex-sync.toml` (or `file`), then `ENEX_*` variables.
    /// `ENEX_DRIVE__ACCESS_TOKEN` sets `drive.access_token`.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let source = match file {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        Config::builder()
            .set_default("input_dir", "./input_data")?
            .set_default("output_dir", "./EverNote Notes")?
            .set_default("log_file", "./extraction_log.json")?
            .add_source(source)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_file_overrides_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("custom.toml");
        std::fs::write(
            &path,
            "input_dir = \"exports\"\n[drive]\nparent_folder = \"folder-123\"\n",
        )
        .unwrap();

        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.input_dir, PathBuf::from("exports"));
        assert_eq!(s.log_file, PathBuf::from("./extraction_log.json"));
        assert_eq!(s.drive.parent_folder.as_deref(), Some("folder-123"));
        assert_eq!(s.drive.api_base, "https://www.googleapis.com");
    }

    #[test]
    fn drive_token_read_from_environment() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("empty.toml");
        std::fs::write(&path, "").unwrap();

        std::env::set_var("ENEX_DRIVE__ACCESS_TOKEN", "tok-from-env");
        let s = Settings::load(Some(&path));
        std::env::remove_var("ENEX_DRIVE__ACCESS_TOKEN");

        assert_eq!(s.unwrap().drive.access_token.as_deref(), Some("tok-from-env"));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(Settings::load(Some(Path::new("tests/fixtures/nope.toml"))).is_err());
    }
}
