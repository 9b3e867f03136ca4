//! Infrastructure of the contact job subsystem: job store, contact records,
//! artifact storage, queue transports and the periodic loops tying them
//! together.

pub mod artifacts;
pub mod config;
pub mod contacts;
pub mod jobs;
pub mod queue;
pub mod workers;

pub use config::{ConfigError, JobsConfig};

#[cfg(test)]
mod testing;

mod integration_tests;
