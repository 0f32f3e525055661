//! Relaycast Common - Shared types and utilities
//!
//! This crate provides configuration, the error type, and the identifier
//! and wire types shared across all Relaycast components.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
