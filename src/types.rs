//! Numeric identifiers shared by the rule engine and its callers.

pub type UserId = u32;
pub type GroupId = u32;
pub type ClusterId = u32;
pub type ZoneId = u32;
pub type ObjectId = u32;
pub type RuleId = u32;
