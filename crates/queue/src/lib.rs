//! External job queue boundary: wire messages and the queue abstraction.

pub mod in_memory;
pub mod messages;
pub mod queue;

pub use in_memory::InMemoryJobQueue;
pub use messages::{
    AttemptResult, CompletionMessage, CompletionParseError, PublishMessage,
    RetrieveTranscriptCompletion, RetrieveTranscriptPublish,
};
pub use queue::{JobQueue, QueueError, ReceivedMessage};
