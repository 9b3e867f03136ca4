//! Background loops.

pub mod periodic;

pub use periodic::{PeriodicWorker, WorkerHandle};
