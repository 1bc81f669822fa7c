//! Traffic report ingestion
//!
//! Nodes push observer events for every service wired to an observer. Stats
//! events of rule services overwrite that rule's traffic counters; anything
//! else is ignored.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::model::{RuleId, TrafficSample};
use crate::store::RuleStore;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ObserverReport {
    #[serde(default)]
    pub events: Vec<ObserverEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ObserverEvent {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub service: String,
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default)]
    pub stats: Option<ObserverStats>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObserverStats {
    #[serde(default)]
    pub total_conns: u64,
    #[serde(default)]
    pub current_conns: u64,
    #[serde(default)]
    pub input_bytes: u64,
    #[serde(default)]
    pub output_bytes: u64,
    #[serde(default)]
    pub total_errs: u64,
}

impl From<ObserverStats> for TrafficSample {
    fn from(stats: ObserverStats) -> Self {
        let clamp = |v: u64| i64::try_from(v).unwrap_or(i64::MAX);
        TrafficSample {
            input_bytes: clamp(stats.input_bytes),
            output_bytes: clamp(stats.output_bytes),
            requests: clamp(stats.total_conns),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Rule id encoded in a service name: `rule-<id>`, or the older
/// `forward-<id>` and `tunnel-<id>` forms
pub fn parse_service_id(service: &str) -> Option<RuleId> {
    let digits = ["rule-", "forward-", "tunnel-"]
        .iter()
        .find_map(|prefix| service.strip_prefix(prefix))?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

pub struct TrafficIngestor {
    rules: Arc<dyn RuleStore>,
}

impl TrafficIngestor {
    pub fn new(rules: Arc<dyn RuleStore>) -> Self {
        Self { rules }
    }

    pub async fn ingest(&self, report: &ObserverReport) -> IngestSummary {
        let mut summary = IngestSummary::default();

        for event in &report.events {
            let Some(stats) = event.stats.filter(|_| event.event_type == "stats") else {
                summary.skipped += 1;
                continue;
            };
            let Some(rule_id) = parse_service_id(&event.service) else {
                debug!("Ignoring stats for service '{}'", event.service);
                summary.skipped += 1;
                continue;
            };

            match self.rules.update_traffic(rule_id, stats.into()).await {
                Ok(true) => summary.applied += 1,
                Ok(false) => {
                    debug!(rule_id, "Stats for unknown rule");
                    summary.skipped += 1;
                }
                Err(e) => {
                    warn!(rule_id, "Failed to record traffic: {}", e);
                    summary.failed += 1;
                }
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_service_id() {
        assert_eq!(parse_service_id("rule-12"), Some(12));
        assert_eq!(parse_service_id("forward-3"), Some(3));
        assert_eq!(parse_service_id("tunnel-7"), Some(7));
        assert_eq!(parse_service_id("tunnel-3-relay"), None);
        assert_eq!(parse_service_id("rule-"), None);
        assert_eq!(parse_service_id("rule-+4"), None);
        assert_eq!(parse_service_id("observer-edge-1"), None);
    }

    #[test]
    fn test_report_wire_format() {
        let report: ObserverReport = serde_json::from_str(
            r#"{"events":[{"kind":"service","service":"rule-1","type":"stats",
                "stats":{"totalConns":4,"currentConns":1,"inputBytes":100,"outputBytes":250,"totalErrs":0}}]}"#,
        )
        .unwrap();

        let stats = report.events[0].stats.unwrap();
        let sample = TrafficSample::from(stats);
        assert_eq!(sample.input_bytes, 100);
        assert_eq!(sample.output_bytes, 250);
        assert_eq!(sample.requests, 4);
    }
}
