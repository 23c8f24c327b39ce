//! `pushtimer` Core Library
//!
//! Shared functionality for `pushtimer` components:
//! - Configuration resolution and hierarchy
//! - `SQLite` pool helpers and database errors
//! - Tracing initialisation and scheduler telemetry (OTLP export behind
//!   the `metrics` feature)
//! - Common error types

pub mod config;
pub mod db;
pub mod error;
pub mod metrics;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
