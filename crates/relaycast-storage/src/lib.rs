//! Relaycast Storage - Database access for campaign dispatch
//!
//! This crate provides the PostgreSQL pool, embedded migrations, row models,
//! repositories, and the subscriber targeting predicate.

pub mod db;
pub mod models;
pub mod repository;
pub mod targeting;

pub use db::DatabasePool;
pub use models::*;
pub use repository::*;
pub use targeting::TargetFilter;
