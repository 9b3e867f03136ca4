//! `helpline-core` — domain building blocks for the contact-job subsystem.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod contact;
pub mod error;
pub mod id;
pub mod job_type;

pub use contact::{ArtifactLocation, ContactSnapshot, ConversationMedia, MediaKind};
pub use error::DomainError;
pub use id::{AccountSid, ContactId, ContactJobId, ConversationMediaId};
pub use job_type::ContactJobType;
