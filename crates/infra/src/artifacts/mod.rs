//! External artifact storage (where retrieved transcripts end up).

pub mod in_memory;
pub mod local_fs;

use std::sync::Arc;

use async_trait::async_trait;

use helpline_core::{AccountSid, ArtifactLocation, ContactId};

pub use in_memory::InMemoryArtifactStore;
pub use local_fs::LocalFsArtifactStore;

/// Artifact store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ArtifactStoreError {
    #[error("invalid artifact location {0}")]
    InvalidLocation(String),
    #[error("artifact storage error: {0}")]
    Storage(String),
}

/// Deletes stored artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Delete one artifact. Deleting an artifact that is already gone succeeds.
    async fn delete(
        &self,
        account_sid: &AccountSid,
        contact_id: ContactId,
        location: &ArtifactLocation,
    ) -> Result<(), ArtifactStoreError>;
}

#[async_trait]
impl<A> ArtifactStore for Arc<A>
where
    A: ArtifactStore + ?Sized,
{
    async fn delete(
        &self,
        account_sid: &AccountSid,
        contact_id: ContactId,
        location: &ArtifactLocation,
    ) -> Result<(), ArtifactStoreError> {
        (**self).delete(account_sid, contact_id, location).await
    }
}
