//! Primary-record layer, as seen by the job subsystem.
//!
//! The contact store itself lives elsewhere; jobs only need to read a
//! contact's media and to attach a retrieved artifact. Contact snapshots
//! reach the publisher through the job store's due-set join.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;

use helpline_core::{
    AccountSid, ArtifactLocation, ContactId, ConversationMedia, ConversationMediaId,
};

pub use in_memory::InMemoryContactRecords;
pub use postgres::PostgresContactRecords;

/// Contact records error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ContactRecordsError {
    #[error("conversation media {media_id} not found for contact {contact_id}")]
    MediaNotFound {
        contact_id: ContactId,
        media_id: ConversationMediaId,
    },
    #[error("contact records storage error: {0}")]
    Storage(String),
}

/// Read/attach access to contacts and their conversation media.
#[async_trait]
pub trait ContactRecords: Send + Sync {
    /// Conversation media of a contact.
    async fn conversation_media(
        &self,
        account_sid: &AccountSid,
        contact_id: ContactId,
    ) -> Result<Vec<ConversationMedia>, ContactRecordsError>;

    /// Record where a media's artifact has been stored.
    ///
    /// Setting the same location twice is a no-op.
    async fn attach_artifact_location(
        &self,
        account_sid: &AccountSid,
        contact_id: ContactId,
        media_id: ConversationMediaId,
        location: &ArtifactLocation,
    ) -> Result<(), ContactRecordsError>;

    /// Stored artifact location of one media, if any.
    async fn artifact_location(
        &self,
        account_sid: &AccountSid,
        contact_id: ContactId,
        media_id: ConversationMediaId,
    ) -> Result<Option<ArtifactLocation>, ContactRecordsError> {
        let media = self.conversation_media(account_sid, contact_id).await?;
        Ok(media
            .into_iter()
            .find(|m| m.id == media_id)
            .and_then(|m| m.location))
    }
}

#[async_trait]
impl<R> ContactRecords for Arc<R>
where
    R: ContactRecords + ?Sized,
{
    async fn conversation_media(
        &self,
        account_sid: &AccountSid,
        contact_id: ContactId,
    ) -> Result<Vec<ConversationMedia>, ContactRecordsError> {
        (**self).conversation_media(account_sid, contact_id).await
    }

    async fn attach_artifact_location(
        &self,
        account_sid: &AccountSid,
        contact_id: ContactId,
        media_id: ConversationMediaId,
        location: &ArtifactLocation,
    ) -> Result<(), ContactRecordsError> {
        (**self)
            .attach_artifact_location(account_sid, contact_id, media_id, location)
            .await
    }

    async fn artifact_location(
        &self,
        account_sid: &AccountSid,
        contact_id: ContactId,
        media_id: ConversationMediaId,
    ) -> Result<Option<ArtifactLocation>, ContactRecordsError> {
        (**self)
            .artifact_location(account_sid, contact_id, media_id)
            .await
    }
}
