//! Dispatch job queue

mod manager;

pub use manager::{QueueManager, DISPATCH_QUEUE};
