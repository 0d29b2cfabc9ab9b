//! Prometheus counters for the hub.
//!
//! Metrics live in a registry owned by [`HubMetrics`] rather than the global
//! default, so every `AppState` (and every test) starts from zero.

use prometheus::{opts, CounterVec, Encoder, Registry, TextEncoder};

pub struct HubMetrics {
    registry: Registry,
    webhook_events_total: CounterVec,
    credential_tests_total: CounterVec,
    dispatch_total: CounterVec,
}

impl HubMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let webhook_events_total = CounterVec::new(
            opts!("chathub_webhook_events_total", "Inbound webhook envelopes by kind"),
            &["service", "kind"],
        )?;
        let credential_tests_total = CounterVec::new(
            opts!("chathub_credential_tests_total", "Credential connectivity tests by outcome"),
            &["service", "outcome"],
        )?;
        let dispatch_total = CounterVec::new(
            opts!("chathub_dispatch_total", "Outbound reply dispatches by outcome"),
            &["outcome"],
        )?;

        registry.register(Box::new(webhook_events_total.clone()))?;
        registry.register(Box::new(credential_tests_total.clone()))?;
        registry.register(Box::new(dispatch_total.clone()))?;

        Ok(Self {
            registry,
            webhook_events_total,
            credential_tests_total,
            dispatch_total,
        })
    }

    pub fn webhook_event(&self, service: &str, kind: &str) {
        self.webhook_events_total.with_label_values(&[service, kind]).inc();
    }

    /// `outcome` is one of `success`, `failure`, `error`.
    pub fn credential_test(&self, service: &str, outcome: &str) {
        self.credential_tests_total.with_label_values(&[service, outcome]).inc();
    }

    /// `outcome` is one of `delivered`, `skipped`, `failed`.
    pub fn dispatch(&self, outcome: &str) {
        self.dispatch_total.with_label_values(&[outcome]).inc();
    }

    /// Text exposition format for `GET /metrics`.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_show_up_in_exposition() {
        let metrics = HubMetrics::new().unwrap();
        metrics.dispatch("skipped");
        metrics.credential_test("SLACK", "failure");
        let output = metrics.encode();
        assert!(output.contains("chathub_dispatch_total{outcome=\"skipped\"} 1"));
        assert!(output.contains("chathub_credential_tests_total"));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = HubMetrics::new().unwrap();
        let b = HubMetrics::new().unwrap();
        a.webhook_event("SLACK", "event_callback");
        assert!(!b.encode().contains("event_callback"));
    }
}
