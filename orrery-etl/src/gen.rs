//! Synthetic order event generator
//!
//! Produces NDJSON batches with realistic skew for demos and tests: a
//! small set of heavy customers, log-ish amount spread, weighted order
//! statuses, and an optional fraction of deliberately broken records
//! for exercising the quarantine path. Seeded, so a run is
//! reproducible.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use crate::error::EtlResult;

const CATEGORIES: [&str; 6] = [
    "electronics",
    "books",
    "clothing",
    "home",
    "toys",
    "grocery",
];

// Weighted status distribution: most orders complete
const STATUS_WEIGHTS: [(&str, u32); 7] = [
    ("delivered", 50),
    ("shipped", 15),
    ("processing", 10),
    ("confirmed", 10),
    ("pending", 5),
    ("cancelled", 5),
    ("refunded", 5),
];

#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    pub orders: usize,
    pub customers: usize,
    pub products: usize,
    /// Spread of order timestamps back from `now`
    pub days: i64,
    pub seed: u64,
    /// Fraction of records emitted broken (missing field or bad value)
    pub invalid_fraction: f64,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            orders: 1000,
            customers: 100,
            products: 30,
            days: 365,
            seed: 42,
            invalid_fraction: 0.0,
        }
    }
}

/// Generate one batch of NDJSON lines
pub fn generate_orders(options: &GeneratorOptions, now: DateTime<Utc>) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut lines = Vec::with_capacity(options.orders);

    for n in 0..options.orders {
        // Squaring the draw skews volume toward low customer indices
        let draw: f64 = rng.gen();
        let customer = (draw * draw * options.customers as f64) as usize;
        let product = rng.gen_range(0..options.products);
        let category = CATEGORIES[product % CATEGORIES.len()];
        let amount = (rng.gen_range(5.0_f64..200.0) * rng.gen_range(0.5_f64..3.0) * 100.0).round() / 100.0;
        let ts = now - Duration::minutes(rng.gen_range(0..options.days * 24 * 60));
        let status = weighted_status(&mut rng);

        let mut payload = json!({
            "order_id": format!("ORD-{:08}", n),
            "customer_id": format!("CUST-{:05}", customer),
            "product_id": format!("SKU-{:04}", product),
            "product_name": format!("Product {}", product),
            "amount": amount,
            "timestamp": ts.to_rfc3339(),
            "status": status,
            "category": category,
        });

        if rng.gen::<f64>() < options.invalid_fraction {
            corrupt(&mut rng, &mut payload);
        }

        lines.push(payload.to_string());
    }

    lines
}

/// Generate a batch and write it as an NDJSON file
pub async fn write_batch_file(
    path: &Path,
    options: &GeneratorOptions,
    now: DateTime<Utc>,
) -> EtlResult<usize> {
    let lines = generate_orders(options, now);
    let body = lines.join("\n") + "\n";
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, body).await?;
    tracing::info!(path = %path.display(), orders = lines.len(), "Synthetic batch written");
    Ok(lines.len())
}

fn weighted_status(rng: &mut StdRng) -> &'static str {
    let total: u32 = STATUS_WEIGHTS.iter().map(|(_, w)| w).sum();
    let mut pick = rng.gen_range(0..total);
    for (status, weight) in STATUS_WEIGHTS {
        if pick < weight {
            return status;
        }
        pick -= weight;
    }
    "delivered"
}

fn corrupt(rng: &mut StdRng, payload: &mut serde_json::Value) {
    let obj = match payload.as_object_mut() {
        Some(obj) => obj,
        None => return,
    };
    match rng.gen_range(0..3) {
        0 => {
            obj.remove("customer_id");
        }
        1 => {
            obj.insert("amount".to_string(), json!(-1.0));
        }
        _ => {
            obj.insert("timestamp".to_string(), json!("not-a-timestamp"));
        }
    }
}
