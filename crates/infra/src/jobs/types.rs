//! Core contact job types.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use helpline_core::{
    AccountSid, ContactId, ContactJobId, ContactJobType, ContactSnapshot, ConversationMediaId,
    DomainError,
};

/// Completion message recorded when the external worker reports success.
pub const SUCCESS_MESSAGE: &str = "Job processed successfully";

/// Completion message recorded when a job exhausts its attempts.
pub const ATTEMPTS_LIMIT_MESSAGE: &str = "Attempts limit reached";

/// One unit of background work tied to a contact.
///
/// `job_type` is kept as the stored text tag: rows written by another version
/// of the service may carry a tag this build does not know, and those must
/// still be loadable so they can be reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactJob {
    pub id: ContactJobId,
    pub contact_id: ContactId,
    pub account_sid: AccountSid,
    pub job_type: String,
    pub requested: DateTime<Utc>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub number_of_attempts: u32,
    pub completed: Option<DateTime<Utc>>,
    pub completion_payload: Option<JsonValue>,
    pub additional_payload: Option<JsonValue>,
}

impl ContactJob {
    /// Eligible to be (re)published.
    ///
    /// Not completed, attempts below `max_attempts`, and either never
    /// attempted or last attempted strictly before `last_attempted_before`.
    pub fn is_due(&self, last_attempted_before: DateTime<Utc>, max_attempts: u32) -> bool {
        self.completed.is_none()
            && self.number_of_attempts < max_attempts
            && self.last_attempt.is_none_or(|at| at < last_attempted_before)
    }

    pub fn is_completed(&self) -> bool {
        self.completed.is_some()
    }

    /// Parse the stored tag into the closed set of job types.
    pub fn parsed_job_type(&self) -> Result<ContactJobType, DomainError> {
        ContactJobType::from_str(&self.job_type)
    }

    /// Parse the stored completion payload, if any.
    pub fn completion(&self) -> Option<CompletionPayload> {
        self.completion_payload
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Conversation media targeted by a retrieve-transcript job.
    pub fn transcript_payload(&self) -> Option<RetrieveTranscriptPayload> {
        self.additional_payload
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// A due job together with a fresh snapshot of its contact.
#[derive(Debug, Clone, PartialEq)]
pub struct DueContactJob {
    pub job: ContactJob,
    pub contact: ContactSnapshot,
}

/// Input for creating a job.
#[derive(Debug, Clone, PartialEq)]
pub struct NewContactJob {
    pub job_type: ContactJobType,
    pub account_sid: AccountSid,
    pub contact_id: ContactId,
    pub additional_payload: Option<JsonValue>,
}

impl NewContactJob {
    pub fn retrieve_transcript(
        account_sid: AccountSid,
        contact_id: ContactId,
        conversation_media_id: ConversationMediaId,
    ) -> Self {
        Self {
            job_type: ContactJobType::RetrieveContactTranscript,
            account_sid,
            contact_id,
            additional_payload: Some(serde_json::json!(RetrieveTranscriptPayload {
                conversation_media_id,
            })),
        }
    }

    /// Build the stored row as of `requested`.
    pub fn into_job(self, requested: DateTime<Utc>) -> ContactJob {
        ContactJob {
            id: ContactJobId::new(),
            contact_id: self.contact_id,
            account_sid: self.account_sid,
            job_type: self.job_type.as_str().to_string(),
            requested,
            last_attempt: None,
            number_of_attempts: 0,
            completed: None,
            completion_payload: None,
            additional_payload: self.additional_payload,
        }
    }
}

/// `additionalPayload` of a retrieve-transcript job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveTranscriptPayload {
    pub conversation_media_id: ConversationMediaId,
}

/// Result descriptor stored when a job is completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<JsonValue>,
}

impl CompletionPayload {
    pub fn success(value: JsonValue) -> Self {
        Self {
            message: SUCCESS_MESSAGE.to_string(),
            value: Some(value),
        }
    }

    pub fn attempts_limit_reached() -> Self {
        Self {
            message: ATTEMPTS_LIMIT_MESSAGE.to_string(),
            value: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.message == SUCCESS_MESSAGE
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::json!(self)
    }
}

/// Append-only record of one failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailureRecord {
    pub contact_job_id: ContactJobId,
    pub attempt_number: u32,
    pub payload: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// Job statistics for one account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl JobStats {
    pub(crate) fn record(&mut self, job: &ContactJob) {
        match job.completion() {
            None if !job.is_completed() => self.pending += 1,
            Some(payload) if payload.is_success() => self.succeeded += 1,
            _ => self.failed += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn test_job() -> ContactJob {
        NewContactJob::retrieve_transcript(
            AccountSid::new("AC1").unwrap(),
            ContactId::new(1),
            ConversationMediaId::new(2),
        )
        .into_job(Utc::now())
    }

    #[test]
    fn new_job_starts_pending_and_due() {
        let job = test_job();
        assert_eq!(job.number_of_attempts, 0);
        assert!(job.last_attempt.is_none());
        assert!(job.is_due(Utc::now(), 20));
        assert_eq!(
            job.parsed_job_type().unwrap(),
            ContactJobType::RetrieveContactTranscript
        );
        assert_eq!(
            job.transcript_payload().unwrap().conversation_media_id,
            ConversationMediaId::new(2)
        );
    }

    #[test]
    fn recently_attempted_job_waits_for_retry_interval() {
        let now = Utc::now();
        let retry = Duration::seconds(60);
        let mut job = test_job();
        job.number_of_attempts = 1;
        job.last_attempt = Some(now - Duration::seconds(30));

        assert!(!job.is_due(now - retry, 20));
        assert!(job.is_due(now + Duration::seconds(31) - retry, 20));
    }

    #[test]
    fn completed_or_exhausted_jobs_are_never_due() {
        let mut job = test_job();
        job.number_of_attempts = 20;
        assert!(!job.is_due(Utc::now(), 20));

        let mut job = test_job();
        job.completed = Some(Utc::now());
        assert!(!job.is_due(Utc::now(), 20));
    }

    #[test]
    fn completion_payload_shapes() {
        let ok = CompletionPayload::success(serde_json::json!({"bucket": "b", "key": "k"}));
        assert_eq!(ok.to_json()["message"], SUCCESS_MESSAGE);
        assert_eq!(ok.to_json()["value"]["bucket"], "b");

        let limit = CompletionPayload::attempts_limit_reached();
        assert_eq!(
            limit.to_json(),
            serde_json::json!({"message": ATTEMPTS_LIMIT_MESSAGE})
        );
        assert!(!limit.is_success());
    }

    #[test]
    fn unknown_stored_tag_is_reported() {
        let mut job = test_job();
        job.job_type = "scrub-transcript".into();
        assert!(matches!(
            job.parsed_job_type(),
            Err(DomainError::UnrecognizedJobType(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn due_predicate_matches_definition(
            attempts in 0u32..30,
            max in 1u32..30,
            last_attempt_offset in proptest::option::of(-600i64..600),
            completed in any::<bool>(),
        ) {
            let now = Utc::now();
            let mut job = test_job();
            job.number_of_attempts = attempts;
            job.last_attempt = last_attempt_offset.map(|s| now + Duration::seconds(s));
            job.completed = completed.then_some(now);

            let expected = !completed
                && attempts < max
                && last_attempt_offset.is_none_or(|s| s < 0);

            prop_assert_eq!(job.is_due(now, max), expected);
        }
    }
}
