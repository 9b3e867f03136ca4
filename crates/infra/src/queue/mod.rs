//! Job queue transports.
//!
//! The in-memory queue lives in `helpline-queue`; production transports live
//! here behind cargo features.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsJobQueue, StreamKeys};
