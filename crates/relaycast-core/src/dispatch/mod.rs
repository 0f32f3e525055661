//! Campaign dispatch - Rate gate, messaging gateway and the dispatch worker

mod gateway;
mod rate_gate;
mod worker;

pub use gateway::{MessagingGateway, SendOptions, SendOutcome, TelegramGateway, RATE_LIMITED};
pub use rate_gate::RateGate;
pub use worker::{DispatchOutcome, DispatchWorker};
