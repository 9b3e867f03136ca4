//! Wire messages exchanged with the external transcript worker.
//!
//! Both directions are closed tagged unions keyed by `jobType`, so adding a job
//! type means adding one variant here and the compiler points at every
//! publisher / completion handler that must learn about it.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use helpline_core::{AccountSid, ContactId, ContactJobId, ContactJobType, ConversationMediaId};

/// Message published for each due job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "jobType")]
pub enum PublishMessage {
    #[serde(rename = "retrieve-transcript")]
    RetrieveContactTranscript(RetrieveTranscriptPublish),
}

/// Payload of a retrieve-transcript publish message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveTranscriptPublish {
    pub job_id: ContactJobId,
    pub account_sid: AccountSid,
    pub contact_id: ContactId,
    pub conversation_media_id: ConversationMediaId,
    pub channel_sid: String,
    pub service_sid: String,
    pub task_id: String,
    pub twilio_worker_id: Option<String>,
    pub file_path: String,
    pub attempt_number: u32,
}

impl PublishMessage {
    pub fn job_type(&self) -> ContactJobType {
        match self {
            PublishMessage::RetrieveContactTranscript(_) => ContactJobType::RetrieveContactTranscript,
        }
    }

    pub fn job_id(&self) -> ContactJobId {
        match self {
            PublishMessage::RetrieveContactTranscript(m) => m.job_id,
        }
    }

    pub fn account_sid(&self) -> &AccountSid {
        match self {
            PublishMessage::RetrieveContactTranscript(m) => &m.account_sid,
        }
    }

    pub fn attempt_number(&self) -> u32 {
        match self {
            PublishMessage::RetrieveContactTranscript(m) => m.attempt_number,
        }
    }
}

/// Outcome flag reported by the external worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptResult {
    Success,
    Failure,
}

/// Message the external worker emits after each attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "jobType")]
pub enum CompletionMessage {
    #[serde(rename = "retrieve-transcript")]
    RetrieveContactTranscript(RetrieveTranscriptCompletion),
}

/// Completion payload of a retrieve-transcript attempt.
///
/// `attempt_payload` is an artifact location (`{bucket, key}`) on success and
/// an opaque error description on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveTranscriptCompletion {
    pub job_id: ContactJobId,
    pub account_sid: AccountSid,
    pub contact_id: ContactId,
    pub conversation_media_id: ConversationMediaId,
    pub task_id: String,
    pub channel_sid: String,
    pub service_sid: String,
    pub twilio_worker_id: Option<String>,
    pub file_path: String,
    #[serde(default)]
    pub attempt_number: Option<u32>,
    pub attempt_result: AttemptResult,
    #[serde(default)]
    pub attempt_payload: JsonValue,
}

/// Why a completion message body could not be turned into a [`CompletionMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionParseError {
    #[error("malformed completion message: {0}")]
    Malformed(String),

    #[error("unrecognized job type in completion message: {0}")]
    UnrecognizedJobType(String),
}

impl CompletionMessage {
    /// Parse and validate a raw queue body.
    ///
    /// The `jobType` tag is checked against the closed set before the rest of
    /// the body is decoded, so an unknown job type is reported as such rather
    /// than as a generic shape error.
    pub fn parse(body: &str) -> Result<Self, CompletionParseError> {
        let value: JsonValue = serde_json::from_str(body)
            .map_err(|e| CompletionParseError::Malformed(e.to_string()))?;

        let tag = value
            .get("jobType")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| CompletionParseError::Malformed("missing jobType".to_string()))?;

        ContactJobType::from_str(tag)
            .map_err(|_| CompletionParseError::UnrecognizedJobType(tag.to_string()))?;

        serde_json::from_value(value).map_err(|e| CompletionParseError::Malformed(e.to_string()))
    }

    pub fn job_type(&self) -> ContactJobType {
        match self {
            CompletionMessage::RetrieveContactTranscript(_) => {
                ContactJobType::RetrieveContactTranscript
            }
        }
    }

    pub fn job_id(&self) -> ContactJobId {
        match self {
            CompletionMessage::RetrieveContactTranscript(m) => m.job_id,
        }
    }

    pub fn account_sid(&self) -> &AccountSid {
        match self {
            CompletionMessage::RetrieveContactTranscript(m) => &m.account_sid,
        }
    }

    pub fn attempt_number(&self) -> Option<u32> {
        match self {
            CompletionMessage::RetrieveContactTranscript(m) => m.attempt_number,
        }
    }

    pub fn attempt_result(&self) -> AttemptResult {
        match self {
            CompletionMessage::RetrieveContactTranscript(m) => m.attempt_result,
        }
    }

    pub fn attempt_payload(&self) -> &JsonValue {
        match self {
            CompletionMessage::RetrieveContactTranscript(m) => &m.attempt_payload,
        }
    }
}
