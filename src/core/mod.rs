//! Shared primitives for the pool: store and broker, errors, config, clock,
//! retry policy, background task supervision, logging and redaction.

pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod output;
pub mod redact;
pub mod retry;
pub mod schemas;
pub mod store;
pub mod supervisor;
pub mod time;
