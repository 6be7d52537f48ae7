pub mod drive;

use std::path::Path;

use thiserror::Error;

pub use drive::GoogleDrive;

/// Authentication failures. Always fatal to the upload step.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no access token configured (set drive.access_token or ENEX_DRIVE__ACCESS_TOKEN)")]
    MissingToken,
    #[error("credentials rejected by remote store (HTTP {0})")]
    Rejected(u16),
    #[error("remote store unreachable: {0}")]
    Unreachable(String),
}

/// Remote backend the finished output tree is mirrored to.
pub trait RemoteStore {
    type Credential;

    fn authenticate(&self) -> Result<Self::Credential, AuthError>;

    /// Mirror `root` and everything below it. Only called once the tree and
    /// the extraction log are final.
    fn upload(&self, credential: &Self::Credential, root: &Path) -> anyhow::Result<()>;
}
