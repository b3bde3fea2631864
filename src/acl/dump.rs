//! ACL dump document, used for replication to followers and for export.

use super::rules::AclRule;
use crate::error::{Result, RustAclError};
use crate::types::{RuleId, ZoneId};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One rule in a dump. `string` is informational and ignored on parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRuleRecord {
    pub id: RuleId,
    pub user: u64,
    pub resource: u64,
    pub rights: u64,
    pub zone: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string: Option<String>,
}

impl From<&AclRule> for AclRuleRecord {
    fn from(rule: &AclRule) -> Self {
        Self {
            id: rule.id(),
            user: rule.user(),
            resource: rule.resource(),
            rights: rule.rights().bits(),
            zone: rule.zone(),
            string: Some(rule.to_string()),
        }
    }
}

/// Full snapshot of a rule store, ordered by rule id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclDump {
    pub generated_at: DateTime<Utc>,
    pub zone_id: ZoneId,
    pub rules: Vec<AclRuleRecord>,
}

impl AclDump {
    pub fn new<'a, I: IntoIterator<Item = &'a AclRule>>(zone_id: ZoneId, rules: I) -> Self {
        let mut rules: Vec<AclRuleRecord> = rules.into_iter().map(AclRuleRecord::from).collect();
        rules.sort_by_key(|record| record.id);
        Self {
            generated_at: Utc::now(),
            zone_id,
            rules,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| RustAclError::Refresh(format!("invalid ACL dump: {}", e)))
    }

    /// Validate every record into a rule. The first malformed record fails the whole dump.
    pub fn to_rules(&self) -> Result<Vec<AclRule>> {
        self.rules
            .iter()
            .map(|record| {
                AclRule::from_raw(record.id, record.user, record.resource, record.rights, record.zone).map_err(
                    |e| RustAclError::Refresh(format!("rule {} in dump rejected: {}", record.id, e)),
                )
            })
            .collect()
    }
}
