//! Shared test fixtures.

use helpline_core::{
    AccountSid, ArtifactLocation, ContactId, ContactSnapshot, ConversationMedia,
    ConversationMediaId, MediaKind,
};

pub(crate) fn test_account() -> AccountSid {
    AccountSid::new("AC-test").unwrap()
}

pub(crate) fn contact_snapshot(id: i64) -> ContactSnapshot {
    ContactSnapshot {
        id: ContactId::new(id),
        account_sid: test_account(),
        task_id: Some(format!("WT{id}")),
        channel_sid: Some("CH-test".to_string()),
        service_sid: Some("IS-test".to_string()),
        twilio_worker_id: Some("WK-test".to_string()),
        time_of_contact: None,
    }
}

pub(crate) fn pending_transcript(contact_id: i64, media_id: i64) -> ConversationMedia {
    ConversationMedia {
        id: ConversationMediaId::new(media_id),
        contact_id: ContactId::new(contact_id),
        account_sid: test_account(),
        kind: MediaKind::Transcript,
        location: None,
    }
}

pub(crate) fn stored_transcript(
    contact_id: i64,
    media_id: i64,
    location: ArtifactLocation,
) -> ConversationMedia {
    ConversationMedia {
        location: Some(location),
        ..pending_transcript(contact_id, media_id)
    }
}
