//! Customer enrichment and online anomaly detection

pub mod anomaly;
pub mod rfm;
