//! Core record types flowing through the pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One raw record as produced by the source reader
///
/// Immutable once created; the payload is the parsed JSON line (or the
/// raw line wrapped as a JSON string when the line was not valid JSON,
/// so the validator can quarantine it with a reason instead of the
/// reader aborting the batch).
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub record_id: Uuid,
    pub payload: serde_json::Value,
    /// Origin identifier (file path or stream partition/offset span)
    pub source_id: String,
    /// SHA-256 over the normalized payload bytes of this record
    pub content_hash: String,
    pub received_at: DateTime<Utc>,
}

/// Order lifecycle status vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub const ALL: [&'static str; 7] = [
        "pending",
        "confirmed",
        "processing",
        "shipped",
        "delivered",
        "cancelled",
        "refunded",
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "confirmed" => Some(OrderStatus::Confirmed),
            "processing" => Some(OrderStatus::Processing),
            "shipped" => Some(OrderStatus::Shipped),
            "delivered" => Some(OrderStatus::Delivered),
            "cancelled" => Some(OrderStatus::Cancelled),
            "refunded" => Some(OrderStatus::Refunded),
            _ => None,
        }
    }

    /// Cancelled and refunded orders are excluded from revenue and RFM
    /// aggregation
    pub fn excluded_from_revenue(&self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Refunded)
    }
}

/// A validated, typed order event ready for the star-schema writer
#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub order_number: String,
    pub customer_key: String,
    pub product_sku: String,
    pub product_name: Option<String>,
    pub amount: f64,
    pub order_ts: DateTime<Utc>,
    pub status: OrderStatus,
    pub category: String,
}

impl OrderRecord {
    /// Convert a validated payload into a typed order record
    ///
    /// Validation has already checked presence, kinds, and ranges; this
    /// conversion still returns a reason on failure so a record that
    /// slips through malformed is quarantined rather than panicking.
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, String> {
        let obj = payload
            .as_object()
            .ok_or_else(|| "payload is not a JSON object".to_string())?;

        let str_field = |name: &str| -> Result<String, String> {
            obj.get(name)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .ok_or_else(|| format!("field '{}' missing or not a string", name))
        };

        let amount = obj
            .get("amount")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| "field 'amount' missing or not numeric".to_string())?;

        let ts_raw = str_field("timestamp")?;
        let order_ts = DateTime::parse_from_rfc3339(&ts_raw)
            .map_err(|e| format!("field 'timestamp' is not RFC 3339: {}", e))?
            .with_timezone(&Utc);

        let status_raw = str_field("status")?;
        let status = OrderStatus::parse(&status_raw)
            .ok_or_else(|| format!("field 'status' has unknown value '{}'", status_raw))?;

        Ok(OrderRecord {
            order_number: str_field("order_id")?,
            customer_key: str_field("customer_id")?,
            product_sku: str_field("product_id")?,
            product_name: obj
                .get("product_name")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            amount,
            order_ts,
            status,
            category: str_field("category")?,
        })
    }
}
