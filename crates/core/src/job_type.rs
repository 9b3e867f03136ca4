//! The closed set of contact job types.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Job type tag for routing to the appropriate publisher / completion handler.
///
/// Stored as text (`retrieve-transcript`) so rows written by other versions of
/// the service stay readable; unknown tags surface as
/// [`DomainError::UnrecognizedJobType`] when parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContactJobType {
    /// Retrieve the transcript of a chat conversation into the artifact store.
    #[serde(rename = "retrieve-transcript")]
    RetrieveContactTranscript,
}

impl ContactJobType {
    pub const ALL: [ContactJobType; 1] = [ContactJobType::RetrieveContactTranscript];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContactJobType::RetrieveContactTranscript => "retrieve-transcript",
        }
    }
}

impl core::fmt::Display for ContactJobType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContactJobType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::unrecognized_job_type(s))
    }
}
