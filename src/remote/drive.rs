use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info};

use super::{AuthError, RemoteStore};
use crate::settings::DriveSettings;

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const BOUNDARY: &str = "enex-sync-part-boundary";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Mirrors the output tree into Google Drive using a pre-issued OAuth token.
pub struct GoogleDrive {
    client: Client,
    api_base: String,
    access_token: Option<String>,
    parent_folder: Option<String>,
}

/// Bearer token that passed verification.
#[derive(Debug, Clone)]
pub struct DriveCredential {
    access_token: String,
}

#[derive(Deserialize)]
struct CreatedFile {
    id: String,
}

impl GoogleDrive {
    pub fn new(settings: &DriveSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(GoogleDrive {
            client,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            access_token: settings.access_token.clone().filter(|t| !t.trim().is_empty()),
            parent_folder: settings.parent_folder.clone(),
        })
    }

    fn create_folder(&self, cred: &DriveCredential, name: &str, parent: Option<&str>) -> Result<String> {
        info!("Creating folder: {}", name);
        let mut metadata = serde_json::json!({ "name": name, "mimeType": FOLDER_MIME });
        if let Some(parent) = parent {
            metadata["parents"] = serde_json::json!([parent]);
        }

        let resp = self
            .client
            .post(format!("{}/drive/v3/files?fields=id", self.api_base))
            .bearer_auth(&cred.access_token)
            .json(&metadata)
            .send()
            .with_context(|| format!("failed to create folder {name}"))?;
        let created: CreatedFile = check(resp, name)?.json()?;
        Ok(created.id)
    }

    fn upload_file(&self, cred: &DriveCredential, path: &Path, parent: &str) -> Result<()> {
        let name = file_name(path);
        info!("Uploading file: {} from {}", name, path.parent().unwrap_or(path).display());
        let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let metadata = serde_json::json!({ "name": name, "parents": [parent] });

        let resp = self
            .client
            .post(format!(
                "{}/upload/drive/v3/files?uploadType=multipart&fields=id",
                self.api_base
            ))
            .bearer_auth(&cred.access_token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={BOUNDARY}"),
            )
            .body(multipart_body(&metadata, &bytes))
            .send()
            .with_context(|| format!("failed to upload {}", path.display()))?;
        check(resp, &name)?;
        Ok(())
    }

    fn upload_folder(&self, cred: &DriveCredential, local: &Path, parent: Option<&str>) -> Result<()> {
        let folder_id = self.create_folder(cred, &file_name(local), parent)?;

        let mut items = fs::read_dir(local)
            .with_context(|| format!("failed to list {}", local.display()))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        items.sort();

        for item in items {
            if item.is_dir() {
                self.upload_folder(cred, &item, Some(&folder_id))?;
            } else {
                self.upload_file(cred, &item, &folder_id)?;
            }
        }
        Ok(())
    }
}

impl RemoteStore for GoogleDrive {
    type Credential = DriveCredential;

    fn authenticate(&self) -> Result<DriveCredential, AuthError> {
        let token = self.access_token.clone().ok_or(AuthError::MissingToken)?;
        let resp = self
            .client
            .get(format!("{}/drive/v3/about?fields=user", self.api_base))
            .bearer_auth(&token)
            .send()
            .map_err(|e| AuthError::Unreachable(e.to_string()))?;

        match resp.status() {
            s if s.is_success() => {
                debug!("drive token verified");
                Ok(DriveCredential {
                    access_token: token,
                })
            }
            s => Err(AuthError::Rejected(s.as_u16())),
        }
    }

    fn upload(&self, credential: &DriveCredential, root: &Path) -> Result<()> {
        if !root.is_dir() {
            bail!("{} is not a directory", root.display());
        }
        self.upload_folder(credential, root, self.parent_folder.as_deref())
    }
}

fn check(resp: reqwest::blocking::Response, what: &str) -> Result<reqwest::blocking::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        bail!("drive refused {what} (HTTP {}): {body}", status.as_u16());
    }
    bail!("drive request for {what} failed (HTTP {}): {body}", status.as_u16())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// `multipart/related` body: JSON metadata part followed by the raw bytes.
fn multipart_body(metadata: &serde_json::Value, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 256);
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata.to_string().as_bytes());
    body.extend_from_slice(format!("\r\n--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_token_fails_before_network() {
        let drive = GoogleDrive::new(&DriveSettings {
            access_token: Some("  ".into()),
            ..DriveSettings::default()
        })
        .unwrap();
        assert!(matches!(drive.authenticate(), Err(AuthError::MissingToken)));
    }

    #[test]
    fn unreachable_host_is_auth_error() {
        let drive = GoogleDrive::new(&DriveSettings {
            access_token: Some("token".into()),
            parent_folder: None,
            api_base: "http://127.0.0.1:9".into(),
        })
        .unwrap();
        assert!(matches!(drive.authenticate(), Err(AuthError::Unreachable(_))));
    }

    #[test]
    fn multipart_layout() {
        let body = multipart_body(&serde_json::json!({ "name": "Todo.txt" }), b"Buy milk");
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with(&format!("--{BOUNDARY}\r\nContent-Type: application/json")));
        assert!(text.contains("{\"name\":\"Todo.txt\"}\r\n"));
        assert!(text.contains("\r\n\r\nBuy milk\r\n"));
        assert!(text.ends_with(&format!("--{BOUNDARY}--\r\n")));
    }
}
