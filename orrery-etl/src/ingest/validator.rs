//! Record validation against a per-table rule set
//!
//! Pure: takes records in, partitions them into accepted and
//! quarantined with reasons, and tallies failures per field. Writing
//! the quarantined rows is the pipeline's job, not the validator's.

use std::collections::BTreeMap;

use chrono::DateTime;
use regex::Regex;
use serde_json::Value;

use crate::error::{EtlError, EtlResult};
use crate::types::{OrderStatus, RawRecord};

/// Expected value kind for a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Timestamp,
}

/// Validation rule for a single field
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub field: String,
    pub required: bool,
    pub kind: FieldKind,
    /// Inclusive numeric bounds, applied to Integer/Float kinds
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub pattern: Option<Regex>,
    pub allowed: Option<Vec<String>>,
}

impl FieldRule {
    pub fn new(field: &str, kind: FieldKind) -> Self {
        Self {
            field: field.to_string(),
            required: true,
            kind,
            min: None,
            max: None,
            pattern: None,
            allowed: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn pattern(mut self, pattern: &str) -> EtlResult<Self> {
        self.pattern = Some(
            Regex::new(pattern)
                .map_err(|e| EtlError::Validation(format!("bad pattern for '{}': {}", self.field, e)))?,
        );
        Ok(self)
    }

    pub fn allowed(mut self, values: &[&str]) -> Self {
        self.allowed = Some(values.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Check one payload against this rule; `None` means it passes
    fn check(&self, payload: &Value) -> Option<String> {
        let value = match payload.get(&self.field) {
            Some(v) if !v.is_null() => v,
            _ => {
                if self.required {
                    return Some(format!("field '{}' is required", self.field));
                }
                return None;
            }
        };

        match self.kind {
            FieldKind::String => {
                let Some(s) = value.as_str() else {
                    return Some(format!("field '{}' must be a string", self.field));
                };
                if let Some(pattern) = &self.pattern {
                    if !pattern.is_match(s) {
                        return Some(format!("field '{}' does not match expected format", self.field));
                    }
                }
                if let Some(allowed) = &self.allowed {
                    if !allowed.iter().any(|a| a == s) {
                        return Some(format!("field '{}' has unknown value '{}'", self.field, s));
                    }
                }
            }
            FieldKind::Integer => {
                let Some(n) = value.as_i64() else {
                    return Some(format!("field '{}' must be an integer", self.field));
                };
                if let Some(reason) = self.check_bounds(n as f64) {
                    return Some(reason);
                }
            }
            FieldKind::Float => {
                let Some(n) = value.as_f64() else {
                    return Some(format!("field '{}' must be numeric", self.field));
                };
                if !n.is_finite() {
                    return Some(format!("field '{}' is not finite", self.field));
                }
                if let Some(reason) = self.check_bounds(n) {
                    return Some(reason);
                }
            }
            FieldKind::Timestamp => {
                let Some(s) = value.as_str() else {
                    return Some(format!("field '{}' must be an RFC 3339 string", self.field));
                };
                if DateTime::parse_from_rfc3339(s).is_err() {
                    return Some(format!("field '{}' is not a valid RFC 3339 timestamp", self.field));
                }
            }
        }

        None
    }

    fn check_bounds(&self, n: f64) -> Option<String> {
        if let Some(min) = self.min {
            if n < min {
                return Some(format!("field '{}' below minimum {}", self.field, min));
            }
        }
        if let Some(max) = self.max {
            if n > max {
                return Some(format!("field '{}' above maximum {}", self.field, max));
            }
        }
        None
    }
}

/// Ordered rule set for one target table
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub target_table: String,
    pub rules: Vec<FieldRule>,
}

impl RuleSet {
    /// Rules for the order event table
    pub fn orders() -> EtlResult<Self> {
        Ok(Self {
            target_table: "fact_orders".to_string(),
            rules: vec![
                FieldRule::new("order_id", FieldKind::String).pattern(r"^[A-Za-z0-9_-]+$")?,
                FieldRule::new("customer_id", FieldKind::String).pattern(r"^[A-Za-z0-9_-]+$")?,
                FieldRule::new("product_id", FieldKind::String),
                FieldRule::new("amount", FieldKind::Float).range(0.0, 1_000_000.0),
                FieldRule::new("timestamp", FieldKind::Timestamp),
                FieldRule::new("status", FieldKind::String).allowed(&OrderStatus::ALL),
                FieldRule::new("category", FieldKind::String),
                FieldRule::new("product_name", FieldKind::String).optional(),
            ],
        })
    }

    /// Every (field, reason) failure for a record; empty means it passes
    ///
    /// All rules run even after one fails, so the failure tally counts
    /// each bad field, not just the first.
    fn check(&self, payload: &Value) -> Vec<(String, String)> {
        if !payload.is_object() {
            return vec![(
                "_record".to_string(),
                "payload is not a JSON object".to_string(),
            )];
        }
        self.rules
            .iter()
            .filter_map(|rule| rule.check(payload).map(|reason| (rule.field.clone(), reason)))
            .collect()
    }
}

/// Result of validating one batch
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub accepted: Vec<RawRecord>,
    pub quarantined: Vec<(RawRecord, String)>,
    /// Failure count per field name
    pub field_failures: BTreeMap<String, u64>,
}

impl ValidationReport {
    pub fn total(&self) -> usize {
        self.accepted.len() + self.quarantined.len()
    }
}

/// Apply a rule set to a batch of records
pub fn validate_batch(rules: &RuleSet, records: Vec<RawRecord>) -> ValidationReport {
    let mut report = ValidationReport::default();

    for record in records {
        let failures = rules.check(&record.payload);
        if failures.is_empty() {
            report.accepted.push(record);
        } else {
            for (field, _) in &failures {
                *report.field_failures.entry(field.clone()).or_insert(0) += 1;
            }
            let reason = failures
                .iter()
                .map(|(_, reason)| reason.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            report.quarantined.push((record, reason));
        }
    }

    tracing::debug!(
        target_table = %rules.target_table,
        accepted = report.accepted.len(),
        quarantined = report.quarantined.len(),
        "Batch validated"
    );

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn record(payload: Value) -> RawRecord {
        RawRecord {
            record_id: Uuid::new_v4(),
            payload,
            source_id: "test".to_string(),
            content_hash: "h".to_string(),
            received_at: Utc::now(),
        }
    }

    fn good_order() -> Value {
        json!({
            "order_id": "ORD-1",
            "customer_id": "CUST-1",
            "product_id": "SKU-1",
            "amount": 42.0,
            "timestamp": "2025-03-01T00:00:00Z",
            "status": "delivered",
            "category": "books",
        })
    }

    #[test]
    fn test_valid_record_accepted() {
        let rules = RuleSet::orders().unwrap();
        let report = validate_batch(&rules, vec![record(good_order())]);
        assert_eq!(report.accepted.len(), 1);
        assert!(report.quarantined.is_empty());
    }

    #[test]
    fn test_missing_required_field() {
        let rules = RuleSet::orders().unwrap();
        let mut payload = good_order();
        payload.as_object_mut().unwrap().remove("customer_id");

        let report = validate_batch(&rules, vec![record(payload)]);
        assert_eq!(report.quarantined.len(), 1);
        assert!(report.quarantined[0].1.contains("customer_id"));
        assert_eq!(report.field_failures.get("customer_id"), Some(&1));
    }

    #[test]
    fn test_negative_amount_rejected() {
        let rules = RuleSet::orders().unwrap();
        let mut payload = good_order();
        payload["amount"] = json!(-10.0);

        let report = validate_batch(&rules, vec![record(payload)]);
        assert_eq!(report.quarantined.len(), 1);
        assert!(report.quarantined[0].1.contains("minimum"));
    }

    #[test]
    fn test_unknown_status_rejected() {
        let rules = RuleSet::orders().unwrap();
        let mut payload = good_order();
        payload["status"] = json!("teleported");

        let report = validate_batch(&rules, vec![record(payload)]);
        assert_eq!(report.quarantined.len(), 1);
        assert!(report.quarantined[0].1.contains("status"));
    }

    #[test]
    fn test_non_object_payload_rejected() {
        let rules = RuleSet::orders().unwrap();
        let report = validate_batch(&rules, vec![record(json!("not json at all"))]);
        assert_eq!(report.quarantined.len(), 1);
        assert!(report.quarantined[0].1.contains("JSON object"));
    }

    #[test]
    fn test_every_bad_field_is_tallied() {
        let rules = RuleSet::orders().unwrap();
        let mut payload = good_order();
        payload.as_object_mut().unwrap().remove("customer_id");
        payload["amount"] = json!(-5.0);

        let report = validate_batch(&rules, vec![record(payload)]);
        assert_eq!(report.quarantined.len(), 1);
        assert_eq!(report.field_failures.get("customer_id"), Some(&1));
        assert_eq!(report.field_failures.get("amount"), Some(&1));

        let reason = &report.quarantined[0].1;
        assert!(reason.contains("customer_id"));
        assert!(reason.contains("minimum"));
    }

    #[test]
    fn test_counts_add_up() {
        let rules = RuleSet::orders().unwrap();
        let records = vec![
            record(good_order()),
            record(json!({"order_id": "ORD-2"})),
            record(good_order()),
        ];
        let report = validate_batch(&rules, records);
        assert_eq!(report.total(), 3);
        assert_eq!(report.accepted.len(), 2);
        assert_eq!(report.quarantined.len(), 1);
    }
}
