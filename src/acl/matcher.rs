//! Matching Engine
//!
//! Builds the request-side keys for one authorization question and tests them
//! against the rules of one principal identity. A single rule must cover the
//! full requested rights; grants are never aggregated across rules.

use super::encoding::{MatchKey, ObjectType, ResourceSpec, Rights, ScopedId};
use super::rules::{AclRule, RuleSpec};
use super::store::RuleStore;
use crate::types::{ClusterId, GroupId, ObjectId, RuleId, UserId, ZoneId};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Administrative lock placed on an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum LockLevel {
    #[default]
    None,
    /// Blocks USE, MANAGE and ADMIN operations
    Use,
    /// Blocks MANAGE and ADMIN operations
    Manage,
    /// Blocks ADMIN operations
    Admin,
    /// Blocks every operation
    All,
}

impl LockLevel {
    /// Whether the lock denies an operation requesting `op`
    pub fn blocks(self, op: Rights) -> bool {
        let op_level = if op.contains(Rights::ADMIN) {
            3
        } else if op.contains(Rights::MANAGE) {
            2
        } else if op.contains(Rights::USE) {
            1
        } else {
            0
        };

        match self {
            LockLevel::None => false,
            LockLevel::All => true,
            LockLevel::Use => op_level >= 1,
            LockLevel::Manage => op_level >= 2,
            LockLevel::Admin => op_level >= 3,
        }
    }
}

/// UNIX-style owner/group/other permission bits of an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObjectPermissions {
    pub owner: Rights,
    pub group: Rights,
    pub other: Rights,
}

/// Description of the object a request targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub object_id: ObjectId,
    pub object_type: ObjectType,
    pub owner_id: UserId,
    pub owner_group_id: GroupId,
    pub cluster_ids: BTreeSet<ClusterId>,
    pub zone_id: ZoneId,
    pub locked: LockLevel,
    pub permissions: Option<ObjectPermissions>,
}

impl ResourceDescriptor {
    pub fn new(object_id: ObjectId, object_type: ObjectType) -> Self {
        Self {
            object_id,
            object_type,
            owner_id: 0,
            owner_group_id: 0,
            cluster_ids: BTreeSet::new(),
            zone_id: 0,
            locked: LockLevel::None,
            permissions: None,
        }
    }

    pub fn with_owner(mut self, owner_id: UserId, owner_group_id: GroupId) -> Self {
        self.owner_id = owner_id;
        self.owner_group_id = owner_group_id;
        self
    }

    pub fn with_group(mut self, owner_group_id: GroupId) -> Self {
        self.owner_group_id = owner_group_id;
        self
    }

    pub fn with_clusters<I: IntoIterator<Item = ClusterId>>(mut self, cluster_ids: I) -> Self {
        self.cluster_ids = cluster_ids.into_iter().collect();
        self
    }

    pub fn in_zone(mut self, zone_id: ZoneId) -> Self {
        self.zone_id = zone_id;
        self
    }

    pub fn with_lock(mut self, locked: LockLevel) -> Self {
        self.locked = locked;
        self
    }

    pub fn with_permissions(mut self, permissions: ObjectPermissions) -> Self {
        self.permissions = Some(permissions);
        self
    }

    /// Temporary rules derived from the object's own permission bits
    pub fn permission_rules(&self) -> RuleStore {
        let Some(perms) = self.permissions else {
            return RuleStore::new();
        };

        let resource = ResourceSpec::object(self.object_type, self.object_id);
        let grants = [
            (ScopedId::individual(self.owner_id), perms.owner),
            (ScopedId::group(self.owner_group_id), perms.group),
            (ScopedId::all(), perms.other),
        ];

        let rules = grants
            .into_iter()
            .filter(|(_, rights)| !rights.is_empty())
            .enumerate()
            .filter_map(|(i, (user, rights))| {
                let spec = RuleSpec::new(user, resource, rights, ScopedId::all());
                AclRule::from_spec(i as RuleId, &spec).ok()
            });

        // The three user keys differ, so ids and tuples are unique
        RuleStore::from_rules(rules).unwrap_or_default()
    }
}

/// Request-side keys for one (object, operation) question
#[derive(Debug, Clone)]
pub struct AuthKeys {
    oid: MatchKey,
    gid: MatchKey,
    cids: Vec<MatchKey>,
    all: MatchKey,
    zone: MatchKey,
    zone_all: MatchKey,
    rights: Rights,
}

impl AuthKeys {
    pub fn for_descriptor(descriptor: &ResourceDescriptor, op: Rights) -> Self {
        let object_type = descriptor.object_type;
        Self {
            oid: MatchKey::resource(object_type, ScopedId::individual(descriptor.object_id)),
            gid: MatchKey::resource(object_type, ScopedId::group(descriptor.owner_group_id)),
            cids: descriptor
                .cluster_ids
                .iter()
                .map(|cid| MatchKey::resource(object_type, ScopedId::cluster(*cid)))
                .collect(),
            all: MatchKey::resource(object_type, ScopedId::all()),
            zone: MatchKey::zone(ScopedId::individual(descriptor.zone_id)),
            zone_all: MatchKey::zone(ScopedId::all()),
            rights: op,
        }
    }

    fn resource_matches(&self, resource: u64) -> bool {
        self.oid.matches(resource)
            || self.gid.matches(resource)
            || self.all.matches(resource)
            || self.cids.iter().any(|key| key.matches(resource))
    }

    fn zone_matches(&self, zone: u64) -> bool {
        self.zone.matches(zone) || self.zone_all.matches(zone)
    }

    fn grants(&self, rule: &AclRule) -> bool {
        rule.rights().contains(self.rights)
            && self.zone_matches(rule.zone())
            && self.resource_matches(rule.resource())
    }
}

/// First rule in the bucket of `user_key` that grants the request
pub fn match_rules(user_key: u64, keys: &AuthKeys, rules: &RuleStore) -> Option<RuleId> {
    rules
        .bucket(user_key)
        .find(|rule| rule.user() == user_key && keys.grants(rule))
        .map(AclRule::id)
}

/// [`match_rules`] against `tmp_rules` first, then against the live `rules`
pub fn match_rules_wrapper(
    user_key: u64,
    keys: &AuthKeys,
    tmp_rules: &RuleStore,
    rules: &RuleStore,
) -> Option<MatchedRule> {
    if let Some(id) = match_rules(user_key, keys, tmp_rules) {
        return Some(MatchedRule::Temporary(id));
    }
    match_rules(user_key, keys, rules).map(MatchedRule::Stored)
}

/// Where the granting rule came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedRule {
    Temporary(RuleId),
    Stored(RuleId),
}

/// Match keys for every identity of a principal, in evaluation order:
/// the user itself, each of its groups, then every user
pub fn principal_keys(uid: UserId, groups: &BTreeSet<GroupId>) -> Vec<u64> {
    std::iter::once(ScopedId::individual(uid).encode())
        .chain(groups.iter().map(|gid| ScopedId::group(*gid).encode()))
        .chain(std::iter::once(ScopedId::all().encode()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(specs: &[&str]) -> RuleStore {
        let rules = specs
            .iter()
            .enumerate()
            .map(|(i, s)| AclRule::from_spec(i as RuleId, &s.parse().unwrap()).unwrap());
        RuleStore::from_rules(rules).unwrap()
    }

    #[test]
    fn test_individual_group_cluster_and_all_resource_keys() {
        let store = store_with(&[
            "#9 HOST/#42 USE",
            "#9 VM/@3 USE",
            "#9 DATASTORE/%7 USE",
            "#9 NET/* USE",
        ]);
        let user = ScopedId::individual(9).encode();

        let host = ResourceDescriptor::new(42, ObjectType::Host);
        assert_eq!(match_rules(user, &AuthKeys::for_descriptor(&host, Rights::USE), &store), Some(0));

        let vm = ResourceDescriptor::new(100, ObjectType::Vm).with_group(3);
        assert_eq!(match_rules(user, &AuthKeys::for_descriptor(&vm, Rights::USE), &store), Some(1));

        let ds = ResourceDescriptor::new(1, ObjectType::Datastore).with_clusters([3, 7]);
        assert_eq!(match_rules(user, &AuthKeys::for_descriptor(&ds, Rights::USE), &store), Some(2));

        let net = ResourceDescriptor::new(5000, ObjectType::Net);
        assert_eq!(match_rules(user, &AuthKeys::for_descriptor(&net, Rights::USE), &store), Some(3));

        let other_ds = ResourceDescriptor::new(1, ObjectType::Datastore).with_clusters([3]);
        assert_eq!(match_rules(user, &AuthKeys::for_descriptor(&other_ds, Rights::USE), &store), None);
    }

    #[test]
    fn test_zone_scope() {
        let store = store_with(&["#9 VM/* USE #1", "#9 IMAGE/* USE *"]);
        let user = ScopedId::individual(9).encode();

        let vm_zone0 = ResourceDescriptor::new(1, ObjectType::Vm).in_zone(0);
        let vm_zone1 = ResourceDescriptor::new(1, ObjectType::Vm).in_zone(1);
        assert_eq!(match_rules(user, &AuthKeys::for_descriptor(&vm_zone0, Rights::USE), &store), None);
        assert_eq!(match_rules(user, &AuthKeys::for_descriptor(&vm_zone1, Rights::USE), &store), Some(0));

        let image = ResourceDescriptor::new(1, ObjectType::Image).in_zone(17);
        assert_eq!(match_rules(user, &AuthKeys::for_descriptor(&image, Rights::USE), &store), Some(1));
    }

    #[test]
    fn test_single_rule_must_cover_all_rights() {
        let store = store_with(&["#9 VM/#1 USE", "#9 VM/#1 MANAGE"]);
        let user = ScopedId::individual(9).encode();
        let vm = ResourceDescriptor::new(1, ObjectType::Vm);
        let keys = AuthKeys::for_descriptor(&vm, Rights::USE | Rights::MANAGE);
        assert_eq!(match_rules(user, &keys, &store), None);
    }

    #[test]
    fn test_wrapper_prefers_temporary_rules() {
        let store = store_with(&["#9 VM/#1 USE"]);
        let user = ScopedId::individual(9).encode();
        let vm = ResourceDescriptor::new(1, ObjectType::Vm)
            .with_owner(9, 1)
            .with_permissions(ObjectPermissions {
                owner: Rights::USE | Rights::MANAGE,
                ..Default::default()
            });
        let tmp = vm.permission_rules();
        assert_eq!(tmp.len(), 1);

        let keys = AuthKeys::for_descriptor(&vm, Rights::USE);
        assert_eq!(
            match_rules_wrapper(user, &keys, &tmp, &store),
            Some(MatchedRule::Temporary(0))
        );
        assert_eq!(
            match_rules_wrapper(user, &keys, &RuleStore::new(), &store),
            Some(MatchedRule::Stored(0))
        );
    }

    #[test]
    fn test_lock_levels() {
        assert!(!LockLevel::None.blocks(Rights::ADMIN));
        assert!(LockLevel::Use.blocks(Rights::USE));
        assert!(LockLevel::Use.blocks(Rights::MANAGE));
        assert!(!LockLevel::Manage.blocks(Rights::USE));
        assert!(LockLevel::Manage.blocks(Rights::USE | Rights::ADMIN));
        assert!(!LockLevel::Admin.blocks(Rights::MANAGE));
        assert!(!LockLevel::Use.blocks(Rights::CREATE));
        assert!(LockLevel::All.blocks(Rights::CREATE));
    }

    #[test]
    fn test_principal_keys_order() {
        let groups: BTreeSet<GroupId> = [5, 2].into_iter().collect();
        let keys = principal_keys(9, &groups);
        assert_eq!(
            keys,
            vec![
                ScopedId::individual(9).encode(),
                ScopedId::group(2).encode(),
                ScopedId::group(5).encode(),
                ScopedId::all().encode(),
            ]
        );
    }
}
