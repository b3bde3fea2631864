//! Reverse Search
//!
//! Answers "which objects of a type may this principal act on" in one pass
//! over the principal's rule buckets, so listings can be filtered without
//! authorizing every object individually.

use super::encoding::{MatchKey, ObjectType, Rights, Scope, ScopedId, ID_MASK};
use super::store::RuleStore;
use crate::types::{ClusterId, GroupId, ObjectId, ZoneId};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Switches for scopes a caller does not want considered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReverseSearchOptions {
    pub disable_all: bool,
    pub disable_cluster: bool,
    pub disable_group: bool,
}

/// Objects a principal may act on
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReverseSearchResult {
    /// Every object of the type
    pub all: bool,
    /// Individually granted object ids
    pub oids: BTreeSet<ObjectId>,
    /// Groups whose objects are granted
    pub gids: BTreeSet<GroupId>,
    /// Clusters whose objects are granted
    pub cids: BTreeSet<ClusterId>,
}

impl ReverseSearchResult {
    pub fn everything() -> Self {
        Self {
            all: true,
            ..Default::default()
        }
    }

    /// Whether an object with these attributes is covered by the result
    pub fn covers(&self, oid: ObjectId, gid: GroupId, cluster_ids: &BTreeSet<ClusterId>) -> bool {
        self.all
            || self.oids.contains(&oid)
            || self.gids.contains(&gid)
            || cluster_ids.iter().any(|cid| self.cids.contains(cid))
    }

    fn grant_all(&mut self) {
        self.all = true;
        self.oids.clear();
        self.cids.clear();
    }
}

/// Scan the buckets of `user_keys` for rules of `object_type` granting `op` in `zone_id`
pub fn reverse_search(
    rules: &RuleStore,
    user_keys: &[u64],
    zone_id: ZoneId,
    object_type: ObjectType,
    op: Rights,
    options: ReverseSearchOptions,
) -> ReverseSearchResult {
    let zone = MatchKey::zone(ScopedId::individual(zone_id));
    let zone_all = MatchKey::zone(ScopedId::all());
    let type_bit = object_type.code();

    let mut result = ReverseSearchResult::default();

    for user in user_keys {
        for rule in rules.bucket(*user) {
            if !rule.rights().contains(op) {
                continue;
            }
            if !(zone.matches(rule.zone()) || zone_all.matches(rule.zone())) {
                continue;
            }

            let resource = rule.resource();
            if resource & type_bit == 0 {
                continue;
            }
            let id = (resource & ID_MASK) as u32;

            match Scope::from_bits(resource) {
                Some(Scope::All) => {
                    if !options.disable_all {
                        result.grant_all();
                    }
                }
                Some(Scope::Individual) => {
                    if !result.all {
                        result.oids.insert(id);
                    }
                }
                Some(Scope::Group) => {
                    if !options.disable_group {
                        result.gids.insert(id);
                    }
                }
                Some(Scope::Cluster) => {
                    if !options.disable_cluster && !result.all {
                        result.cids.insert(id);
                    }
                }
                None => {}
            }
        }
    }

    result
}
