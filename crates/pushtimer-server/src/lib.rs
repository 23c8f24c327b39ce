//! pushtimer server library
//!
//! Per-subscriber durable web-push scheduling:
//! - `SQLite` partition storage with self-healing schema
//! - One actor per partition key, owning a single durable alarm
//! - Timer-fired delivery through a pluggable push transport
//! - Axum routes for subscription intake and diagnostics

pub mod delivery;
pub mod partition;
pub mod push;
pub mod routes;
pub mod storage;
