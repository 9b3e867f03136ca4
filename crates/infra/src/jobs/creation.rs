//! Job creation alongside a newly written contact.

use std::collections::HashSet;

use tracing::debug;

use helpline_core::{ContactJobType, ContactSnapshot, ConversationMedia};

use super::store::{JobStore, JobStoreError};
use super::types::{ContactJob, NewContactJob};

/// Jobs a contact needs: one transcript retrieval per pending transcript,
/// deduplicated by `(job type, media)`.
pub fn jobs_for_contact(
    contact: &ContactSnapshot,
    media: &[ConversationMedia],
) -> Vec<NewContactJob> {
    let mut seen = HashSet::new();
    media
        .iter()
        .filter(|m| m.contact_id == contact.id && m.account_sid == contact.account_sid)
        .filter(|m| m.is_pending_transcript())
        .filter(|m| seen.insert((ContactJobType::RetrieveContactTranscript, m.id)))
        .map(|m| {
            NewContactJob::retrieve_transcript(contact.account_sid.clone(), contact.id, m.id)
        })
        .collect()
}

/// Create the jobs of a just-written contact.
///
/// Only a newly created contact gets jobs; rewriting an existing one creates
/// nothing, so duplicate submissions never duplicate jobs. Runs in `uow` when
/// given (the contact's own write), otherwise in a unit of work committed
/// here. Any failure leaves `uow` to be dropped, rolling back the contact too.
pub async fn create_jobs_for_contact<S: JobStore>(
    store: &S,
    uow: Option<&mut S::Tx>,
    contact: &ContactSnapshot,
    media: &[ConversationMedia],
    newly_created: bool,
) -> Result<Vec<ContactJob>, JobStoreError> {
    if !newly_created {
        return Ok(Vec::new());
    }

    let wanted = jobs_for_contact(contact, media);
    if wanted.is_empty() {
        return Ok(Vec::new());
    }

    let created = match uow {
        Some(tx) => create_all(store, tx, wanted).await?,
        None => {
            let mut tx = store.begin().await?;
            let created = create_all(store, &mut tx, wanted).await?;
            store.commit(tx).await?;
            created
        }
    };

    debug!(
        account_sid = %contact.account_sid,
        contact_id = %contact.id,
        count = created.len(),
        "created contact jobs"
    );
    Ok(created)
}

async fn create_all<S: JobStore>(
    store: &S,
    tx: &mut S::Tx,
    wanted: Vec<NewContactJob>,
) -> Result<Vec<ContactJob>, JobStoreError> {
    let mut created = Vec::with_capacity(wanted.len());
    for job in wanted {
        created.push(store.create_job(tx, job).await?);
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use helpline_core::{ArtifactLocation, ContactId, MediaKind};

    use crate::jobs::store::InMemoryJobStore;
    use crate::testing::{contact_snapshot, pending_transcript, stored_transcript, test_account};

    #[tokio::test]
    async fn duplicate_media_in_one_call_yields_one_job() {
        let store = InMemoryJobStore::new();
        let contact = contact_snapshot(1);
        let media = vec![pending_transcript(1, 11), pending_transcript(1, 11)];

        let created = create_jobs_for_contact(&store, None, &contact, &media, true)
            .await
            .unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(
            store
                .list_jobs_for_contact(&test_account(), ContactId::new(1))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn only_pending_transcripts_of_new_contacts_get_jobs() {
        let store = InMemoryJobStore::new();
        let contact = contact_snapshot(1);
        let mut recording = pending_transcript(1, 13);
        recording.kind = MediaKind::Recording;
        let media = vec![
            pending_transcript(1, 11),
            stored_transcript(1, 12, ArtifactLocation::new("b", "k")),
            recording,
            pending_transcript(2, 14),
        ];

        let created = create_jobs_for_contact(&store, None, &contact, &media, true)
            .await
            .unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].transcript_payload().unwrap().conversation_media_id.get(), 11);

        let again = create_jobs_for_contact(&store, None, &contact, &media, false)
            .await
            .unwrap();
        assert!(again.is_empty());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn jobs_share_the_callers_unit_of_work() {
        let store = InMemoryJobStore::new();
        let contact = contact_snapshot(1);
        let media = vec![pending_transcript(1, 11), pending_transcript(1, 12)];

        {
            let mut tx = store.begin().await.unwrap();
            create_jobs_for_contact(&store, Some(&mut tx), &contact, &media, true)
                .await
                .unwrap();
            // caller fails its own write and drops the unit of work
        }
        assert!(store.is_empty());

        let mut tx = store.begin().await.unwrap();
        create_jobs_for_contact(&store, Some(&mut tx), &contact, &media, true)
            .await
            .unwrap();
        assert!(store.is_empty());
        store.commit(tx).await.unwrap();
        assert_eq!(store.len(), 2);
    }
}
