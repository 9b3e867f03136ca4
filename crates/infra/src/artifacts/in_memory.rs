//! In-memory artifact store for tests/dev.

use std::collections::HashSet;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use helpline_core::{AccountSid, ArtifactLocation, ContactId};

use super::{ArtifactStore, ArtifactStoreError};

#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    artifacts: RwLock<HashSet<ArtifactLocation>>,
    deleted: RwLock<Vec<ArtifactLocation>>,
    fail_deletes: AtomicBool,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, location: ArtifactLocation) {
        self.artifacts.write().unwrap().insert(location);
    }

    pub fn contains(&self, location: &ArtifactLocation) -> bool {
        self.artifacts.read().unwrap().contains(location)
    }

    /// Locations successfully deleted, in call order.
    pub fn deleted(&self) -> Vec<ArtifactLocation> {
        self.deleted.read().unwrap().clone()
    }

    /// Make subsequent deletes fail.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn delete(
        &self,
        _account_sid: &AccountSid,
        _contact_id: ContactId,
        location: &ArtifactLocation,
    ) -> Result<(), ArtifactStoreError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(ArtifactStoreError::Storage(format!(
                "delete rejected for {location}"
            )));
        }
        self.artifacts.write().unwrap().remove(location);
        self.deleted.write().unwrap().push(location.clone());
        Ok(())
    }
}
