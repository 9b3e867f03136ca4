//! In-memory contact records for tests/dev.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use helpline_core::{
    AccountSid, ArtifactLocation, ContactId, ContactSnapshot, ConversationMedia,
    ConversationMediaId,
};

use super::{ContactRecords, ContactRecordsError};

#[derive(Debug, Clone)]
struct ContactEntry {
    snapshot: ContactSnapshot,
    media: Vec<ConversationMedia>,
}

/// In-memory contacts keyed by `(account, contact)`.
#[derive(Debug, Default)]
pub struct InMemoryContactRecords {
    contacts: RwLock<HashMap<(AccountSid, ContactId), ContactEntry>>,
    fail_writes: AtomicBool,
}

impl InMemoryContactRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a contact and its media.
    pub fn insert_contact(&self, snapshot: ContactSnapshot, media: Vec<ConversationMedia>) {
        let key = (snapshot.account_sid.clone(), snapshot.id);
        self.contacts
            .write()
            .unwrap()
            .insert(key, ContactEntry { snapshot, media });
    }

    /// Make subsequent attach calls fail with a storage error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Synchronous snapshot lookup (used by the in-memory job store join).
    pub fn snapshot_of(
        &self,
        account_sid: &AccountSid,
        contact_id: ContactId,
    ) -> Option<ContactSnapshot> {
        self.contacts
            .read()
            .unwrap()
            .get(&(account_sid.clone(), contact_id))
            .map(|e| e.snapshot.clone())
    }

    /// Synchronous media lookup.
    pub fn media_of(&self, account_sid: &AccountSid, contact_id: ContactId) -> Vec<ConversationMedia> {
        self.contacts
            .read()
            .unwrap()
            .get(&(account_sid.clone(), contact_id))
            .map(|e| e.media.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ContactRecords for InMemoryContactRecords {
    async fn conversation_media(
        &self,
        account_sid: &AccountSid,
        contact_id: ContactId,
    ) -> Result<Vec<ConversationMedia>, ContactRecordsError> {
        Ok(self.media_of(account_sid, contact_id))
    }

    async fn attach_artifact_location(
        &self,
        account_sid: &AccountSid,
        contact_id: ContactId,
        media_id: ConversationMediaId,
        location: &ArtifactLocation,
    ) -> Result<(), ContactRecordsError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ContactRecordsError::Storage(
                "contact records unavailable".to_string(),
            ));
        }

        let mut contacts = self.contacts.write().unwrap();
        let media = contacts
            .get_mut(&(account_sid.clone(), contact_id))
            .and_then(|e| e.media.iter_mut().find(|m| m.id == media_id))
            .ok_or(ContactRecordsError::MediaNotFound {
                contact_id,
                media_id,
            })?;
        media.location = Some(location.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{contact_snapshot, pending_transcript, test_account};

    #[tokio::test]
    async fn attach_sets_location_once_known() {
        let records = InMemoryContactRecords::new();
        records.insert_contact(contact_snapshot(1), vec![pending_transcript(1, 11)]);
        let location = ArtifactLocation::new("docs", "transcripts/a.json");

        records
            .attach_artifact_location(&test_account(), ContactId::new(1), ConversationMediaId::new(11), &location)
            .await
            .unwrap();

        let found = records
            .artifact_location(&test_account(), ContactId::new(1), ConversationMediaId::new(11))
            .await
            .unwrap();
        assert_eq!(found, Some(location));
    }

    #[tokio::test]
    async fn attach_to_unknown_media_fails() {
        let records = InMemoryContactRecords::new();
        records.insert_contact(contact_snapshot(1), Vec::new());

        let err = records
            .attach_artifact_location(
                &test_account(),
                ContactId::new(1),
                ConversationMediaId::new(99),
                &ArtifactLocation::new("b", "k"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ContactRecordsError::MediaNotFound { .. }));
    }
}
