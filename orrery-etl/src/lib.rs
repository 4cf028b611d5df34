//! orrery-etl - E-commerce event analytics core
//!
//! Ingests order event batches and streams into a SQLite star schema,
//! tracking every load attempt, quarantining bad records, scoring
//! customers (RFM segments and lifetime value), and flagging anomalous
//! daily metrics online.

pub mod analytics;
pub mod config;
pub mod db;
pub mod error;
pub mod gen;
pub mod ingest;
pub mod types;
pub mod utils;
pub mod writer;

pub use crate::config::PipelineConfig;
pub use crate::error::{EtlError, EtlResult};
pub use crate::ingest::pipeline::{ingest_directory, ingest_file, IngestOutcome, PipelineContext};
