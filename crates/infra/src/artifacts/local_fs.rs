//! Filesystem-backed artifact store.
//!
//! `bucket/key` resolves to `<root>/<bucket>/<key>`.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, instrument};

use helpline_core::{AccountSid, ArtifactLocation, ContactId};

use super::{ArtifactStore, ArtifactStoreError};

#[derive(Debug, Clone)]
pub struct LocalFsArtifactStore {
    root: PathBuf,
}

impl LocalFsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a location under the root, refusing anything that would escape it.
    pub fn resolve(&self, location: &ArtifactLocation) -> Result<PathBuf, ArtifactStoreError> {
        let relative = Path::new(&location.bucket).join(&location.key);
        let escapes = location.bucket.is_empty()
            || location.key.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(ArtifactStoreError::InvalidLocation(location.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ArtifactStore for LocalFsArtifactStore {
    #[instrument(skip(self, _contact_id), fields(account_sid = %account_sid, location = %location), err)]
    async fn delete(
        &self,
        account_sid: &AccountSid,
        _contact_id: ContactId,
        location: &ArtifactLocation,
    ) -> Result<(), ArtifactStoreError> {
        let path = self.resolve(location)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "artifact already deleted");
                Ok(())
            }
            Err(e) => Err(ArtifactStoreError::Storage(format!(
                "failed to delete {}: {e}",
                path.display()
            ))),
        }
    }
}
