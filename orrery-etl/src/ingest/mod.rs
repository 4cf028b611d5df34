//! Ingestion: source reading, validation, and pipeline orchestration

pub mod pipeline;
pub mod reader;
pub mod stream;
pub mod validator;
