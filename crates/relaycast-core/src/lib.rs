//! Relaycast Core - Campaign dispatch engine
//!
//! This crate paces and sends campaign messages to the messaging platform,
//! tracks per-recipient deliveries so interrupted runs can resume, and
//! consumes dispatch jobs from the database-backed queue.

pub mod dispatch;
pub mod queue;

pub use dispatch::{
    DispatchOutcome, DispatchWorker, MessagingGateway, RateGate, SendOptions, SendOutcome,
    TelegramGateway,
};
pub use queue::{QueueManager, DISPATCH_QUEUE};
