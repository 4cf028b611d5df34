//! Shared types for the Orrery analytics pipeline
//!
//! Error type, configuration file resolution, and calendar helpers
//! used by the ETL crate.

pub mod config;
pub mod error;
pub mod time;

pub use error::{Error, Result};
