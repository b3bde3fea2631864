use crate::Result;

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

pub struct AclMetrics {
    pub authorize_allowed: IntCounter,
    pub authorize_denied: IntCounter,
    pub rule_mutations: IntCounter,
    pub refresh_success: IntCounter,
    pub refresh_failure: IntCounter,
    pub rules: IntGauge,
    pub registry: Registry,
}

impl AclMetrics {
    pub fn new() -> Result<Arc<Self>> {
        let registry = Registry::new();

        let authorize_allowed = IntCounter::new(
            "acl_authorize_allowed_total",
            "Total number of authorization requests granted",
        )?;

        let authorize_denied = IntCounter::new(
            "acl_authorize_denied_total",
            "Total number of authorization requests denied",
        )?;

        let rule_mutations = IntCounter::new(
            "acl_rule_mutations_total",
            "Total number of ACL rules added or deleted",
        )?;

        let refresh_success = IntCounter::new(
            "acl_refresh_success_total",
            "Total number of successful rule refreshes from the leader",
        )?;

        let refresh_failure = IntCounter::new(
            "acl_refresh_failure_total",
            "Total number of failed rule refreshes from the leader",
        )?;

        let rules = IntGauge::new("acl_rules", "Number of ACL rules in the live store")?;

        registry.register(Box::new(authorize_allowed.clone()))?;
        registry.register(Box::new(authorize_denied.clone()))?;
        registry.register(Box::new(rule_mutations.clone()))?;
        registry.register(Box::new(refresh_success.clone()))?;
        registry.register(Box::new(refresh_failure.clone()))?;
        registry.register(Box::new(rules.clone()))?;

        Ok(Arc::new(Self {
            authorize_allowed,
            authorize_denied,
            rule_mutations,
            refresh_success,
            refresh_failure,
            rules,
            registry,
        }))
    }

    /// Text exposition format of every registered metric
    pub fn encode_text(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_text_lists_metrics() {
        let metrics = AclMetrics::new().unwrap();
        metrics.authorize_allowed.inc();
        metrics.rules.set(3);

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("acl_authorize_allowed_total 1"));
        assert!(text.contains("acl_rules 3"));
    }
}
