//! Read-only views of the owning contact record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{AccountSid, ContactId, ConversationMediaId};

/// Point-in-time copy of the owning contact, attached to outbound job
/// messages so the external worker does not need to query it.
///
/// Staleness is acceptable: the snapshot is taken when the job is selected
/// for publishing, not when it is consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactSnapshot {
    pub id: ContactId,
    pub account_sid: AccountSid,
    pub task_id: Option<String>,
    pub channel_sid: Option<String>,
    pub service_sid: Option<String>,
    pub twilio_worker_id: Option<String>,
    pub time_of_contact: Option<DateTime<Utc>>,
}

/// Where an artifact lives in external storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactLocation {
    pub bucket: String,
    pub key: String,
}

impl ArtifactLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl core::fmt::Display for ArtifactLocation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Kind of media attached to a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MediaKind {
    /// Chat transcript retrieved from the conversation platform.
    Transcript,
    /// Voice recording, stored by the telephony platform itself.
    Recording,
}

/// A conversation media entry of a contact.
///
/// `location` is absent until the artifact has been stored externally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMedia {
    pub id: ConversationMediaId,
    pub contact_id: ContactId,
    pub account_sid: AccountSid,
    pub kind: MediaKind,
    pub location: Option<ArtifactLocation>,
}

impl ConversationMedia {
    /// A transcript whose artifact has not been stored yet.
    pub fn is_pending_transcript(&self) -> bool {
        self.kind == MediaKind::Transcript && self.location.is_none()
    }
}
