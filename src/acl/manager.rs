//! ACL Manager
//!
//! Owns the live [`RuleStore`] behind one exclusive lock and exposes the
//! authorization, reverse search and mutation API. Every public operation
//! takes the lock for the duration of its index access; mutations also run
//! their storage round-trip under the lock so the in-memory store never
//! diverges from storage.
//!
//! One manager is built per process and shared as `Arc<AclManager>` with every
//! subsystem that needs authorization.

use super::dump::AclDump;
use super::encoding::{ObjectType, ResourceSpec, Rights, ScopedId, ID_MASK, SCOPE_MASK};
use super::matcher::{match_rules_wrapper, principal_keys, AuthKeys, MatchedRule, ResourceDescriptor};
use super::reverse::{self, ReverseSearchOptions, ReverseSearchResult};
use super::rules::{validate_fields, AclRule, RuleSpec};
use super::storage::{AclRuleRow, AclStorage};
use super::store::RuleStore;
use crate::config::{Config, NodeRole};
use crate::error::{Result, RustAclError};
use crate::metrics::AclMetrics;
use crate::types::{ClusterId, GroupId, ObjectId, RuleId, UserId, ZoneId};

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct AclManager {
    /// Live rule set; the only shared mutable state
    store: Mutex<RuleStore>,
    storage: Arc<dyn AclStorage>,
    zone_id: ZoneId,
    role: NodeRole,
    admin_uid: UserId,
    admin_gid: GroupId,
    metrics: Arc<AclMetrics>,
}

impl AclManager {
    pub fn new(config: &Config, storage: Arc<dyn AclStorage>, metrics: Arc<AclMetrics>) -> Self {
        Self {
            store: Mutex::new(RuleStore::new()),
            storage,
            zone_id: config.node.zone_id,
            role: config.node.role,
            admin_uid: config.authorization.admin_uid,
            admin_gid: config.authorization.admin_gid,
            metrics,
        }
    }

    pub fn zone_id(&self) -> ZoneId {
        self.zone_id
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn metrics(&self) -> &Arc<AclMetrics> {
        &self.metrics
    }

    /// Create the persistent ACL table if absent
    pub fn bootstrap(&self) -> Result<()> {
        self.storage.bootstrap()
    }

    /// Populate the store at process start. Leaders load their storage;
    /// followers stay empty until the first refresh swap.
    pub fn start(&self) -> Result<usize> {
        match self.role {
            NodeRole::Leader => self.reload(),
            NodeRole::Follower => {
                info!("ACL store for zone {} will be filled by the refresh loop", self.zone_id);
                Ok(0)
            }
        }
    }

    /// Replace the live store with the full content of storage
    pub fn reload(&self) -> Result<usize> {
        let rows = self.storage.select_all()?;
        let mut fresh = RuleStore::new();

        // Skipped rows keep their primary keys in storage
        if let Some(highest) = rows.iter().map(|row| row.id).max() {
            fresh.reserve_ids(highest.saturating_add(1));
        }

        for row in rows {
            let rule = match row.to_rule() {
                Ok(rule) => rule,
                Err(e) => {
                    warn!("Skipping stored ACL rule {}: {}", row.id, e);
                    continue;
                }
            };
            if let Some(existing) = fresh.find_tuple(rule.user(), rule.resource(), rule.rights().bits(), rule.zone()) {
                warn!("Skipping stored ACL rule {}: duplicate of rule {}", rule.id(), existing.id());
                continue;
            }
            fresh.insert(rule)?;
        }

        let count = fresh.len();
        let mut store = self.store.lock();
        fresh.reserve_ids(store.next_id());
        let _previous = std::mem::replace(&mut *store, fresh);
        self.metrics.rules.set(count as i64);
        info!("Loaded {} ACL rules from storage", count);
        Ok(count)
    }

    /// Atomically swap the whole store for `rules`. Readers observe either the
    /// previous rule set or this one, never a mix.
    pub fn replace_rules(&self, rules: Vec<AclRule>) -> Result<usize> {
        let fresh = RuleStore::from_rules(rules)?;
        let count = fresh.len();

        let previous = {
            let mut store = self.store.lock();
            std::mem::replace(&mut *store, fresh)
        };
        self.metrics.rules.set(count as i64);
        debug!("Replaced {} ACL rules with {}", previous.len(), count);
        Ok(count)
    }

    /// Can `uid`, member of `groups`, perform `op` on the described object?
    pub fn authorize(
        &self,
        uid: UserId,
        groups: &BTreeSet<GroupId>,
        descriptor: &ResourceDescriptor,
        op: Rights,
    ) -> bool {
        let tmp_rules = descriptor.permission_rules();
        self.authorize_with_rules(uid, groups, descriptor, op, &tmp_rules)
    }

    /// [`Self::authorize`] with caller-supplied temporary rules evaluated
    /// before the live store. The store is never modified.
    pub fn authorize_with_rules(
        &self,
        uid: UserId,
        groups: &BTreeSet<GroupId>,
        descriptor: &ResourceDescriptor,
        op: Rights,
        tmp_rules: &RuleStore,
    ) -> bool {
        let allowed = if self.is_admin(uid, groups) {
            self.oneadmin_authorize(descriptor, op)
        } else if descriptor.locked.blocks(op) {
            debug!(
                "Denied {} on locked {} {} for user {}",
                op, descriptor.object_type, descriptor.object_id, uid
            );
            false
        } else {
            let keys = AuthKeys::for_descriptor(descriptor, op);
            let user_keys = principal_keys(uid, groups);
            let store = self.store.lock();
            let matched = user_keys
                .iter()
                .find_map(|user| match_rules_wrapper(*user, &keys, tmp_rules, &store));
            drop(store);

            match matched {
                Some(MatchedRule::Stored(id)) => {
                    debug!("User {} granted {} on {} {} by rule {}", uid, op, descriptor.object_type, descriptor.object_id, id);
                    true
                }
                Some(MatchedRule::Temporary(_)) => {
                    debug!("User {} granted {} on {} {} by object permissions", uid, op, descriptor.object_type, descriptor.object_id);
                    true
                }
                None => false,
            }
        };

        if allowed {
            self.metrics.authorize_allowed.inc();
        } else {
            self.metrics.authorize_denied.inc();
        }
        allowed
    }

    /// Administrative bypass: granted unless the object is locked for `op`
    pub fn oneadmin_authorize(&self, descriptor: &ResourceDescriptor, op: Rights) -> bool {
        !descriptor.locked.blocks(op)
    }

    /// Every object of `object_type` that `uid` may perform `op` on. The
    /// administrative identity gets `all` unless `disable_all` is set, in
    /// which case the rules are scanned like for any other user.
    pub fn reverse_search(
        &self,
        uid: UserId,
        groups: &BTreeSet<GroupId>,
        object_type: ObjectType,
        op: Rights,
        options: ReverseSearchOptions,
    ) -> ReverseSearchResult {
        if self.is_admin(uid, groups) && !options.disable_all {
            return ReverseSearchResult::everything();
        }

        let user_keys = principal_keys(uid, groups);
        let store = self.store.lock();
        reverse::reverse_search(&store, &user_keys, self.zone_id, object_type, op, options)
    }

    /// Validate, persist and index a new rule
    pub fn add_rule(&self, user: u64, resource: u64, rights: u64, zone: u64) -> Result<RuleId> {
        self.ensure_writable("add_rule")?;
        validate_fields(user, resource, rights, zone)?;

        let mut store = self.store.lock();
        if let Some(existing) = store.find_tuple(user, resource, rights, zone) {
            return Err(RustAclError::Duplicate {
                existing: existing.id(),
            });
        }

        let rule = AclRule::from_raw(store.next_id(), user, resource, rights, zone)?;
        self.storage.insert(&AclRuleRow::from(&rule))?;
        store.insert(rule)?;
        let count = store.len();
        drop(store);

        self.metrics.rule_mutations.inc();
        self.metrics.rules.set(count as i64);
        info!("Added ACL rule {}: {}", rule.id(), rule);
        Ok(rule.id())
    }

    pub fn add_rule_spec(&self, spec: &RuleSpec) -> Result<RuleId> {
        let (user, resource, rights, zone) = spec.encode();
        self.add_rule(user, resource, rights, zone)
    }

    /// Delete a rule by id from storage, then from both indices
    pub fn del_rule(&self, id: RuleId) -> Result<AclRule> {
        self.ensure_writable("del_rule")?;

        let mut store = self.store.lock();
        if !store.contains(id) {
            return Err(RustAclError::NotFound(format!("ACL rule {}", id)));
        }
        let rule = self.delete_locked(&mut store, id)?;
        let count = store.len();
        drop(store);

        self.metrics.rules.set(count as i64);
        info!("Deleted ACL rule {}: {}", id, rule);
        Ok(rule)
    }

    /// Delete the rule with exactly this tuple
    pub fn del_rule_matching(&self, user: u64, resource: u64, rights: u64, zone: u64) -> Result<RuleId> {
        self.ensure_writable("del_rule_matching")?;

        let mut store = self.store.lock();
        let id = store
            .find_tuple(user, resource, rights, zone)
            .map(AclRule::id)
            .ok_or_else(|| {
                RustAclError::NotFound(format!(
                    "ACL rule 0x{:x} 0x{:x} 0x{:x} 0x{:x}",
                    user, resource, rights, zone
                ))
            })?;
        let rule = self.delete_locked(&mut store, id)?;
        let count = store.len();
        drop(store);

        self.metrics.rules.set(count as i64);
        info!("Deleted ACL rule {}: {}", id, rule);
        Ok(id)
    }

    /// Rules granting to user `uid`, or granting on user object `uid`
    pub fn del_uid_rules(&self, uid: UserId) -> Result<usize> {
        let user = ScopedId::individual(uid).encode();
        let resource = ResourceSpec::object(ObjectType::User, uid).encode();
        self.del_matching("user", uid, |rule| rule.user() == user || rule.resource() == resource)
    }

    /// Rules granting to group `gid`, on objects of group `gid`, or on group object `gid`
    pub fn del_gid_rules(&self, gid: GroupId) -> Result<usize> {
        let user = ScopedId::group(gid).encode();
        let scoped = ScopedId::group(gid).encode();
        let resource = ResourceSpec::object(ObjectType::Group, gid).encode();
        self.del_matching("group", gid, |rule| {
            rule.user() == user || scoped_part(rule.resource()) == scoped || rule.resource() == resource
        })
    }

    /// Rules on objects of cluster `cid`, or on cluster object `cid`
    pub fn del_cid_rules(&self, cid: ClusterId) -> Result<usize> {
        let scoped = ScopedId::cluster(cid).encode();
        let resource = ResourceSpec::object(ObjectType::Cluster, cid).encode();
        self.del_matching("cluster", cid, |rule| {
            scoped_part(rule.resource()) == scoped || rule.resource() == resource
        })
    }

    /// Rules restricted to zone `zid`, or on zone object `zid`
    pub fn del_zid_rules(&self, zid: ZoneId) -> Result<usize> {
        let zone = ScopedId::individual(zid).encode();
        let resource = ResourceSpec::object(ObjectType::Zone, zid).encode();
        self.del_matching("zone", zid, |rule| rule.zone() == zone || rule.resource() == resource)
    }

    /// Rules on exactly one object
    pub fn del_resource_rules(&self, oid: ObjectId, object_type: ObjectType) -> Result<usize> {
        let resource = ResourceSpec::object(object_type, oid).encode();
        self.del_matching(object_type.name(), oid, |rule| rule.resource() == resource)
    }

    /// Full snapshot for replication and export
    pub fn dump(&self) -> AclDump {
        let store = self.store.lock();
        AclDump::new(self.zone_id, store.iter())
    }

    pub fn rules(&self) -> Vec<AclRule> {
        self.store.lock().iter().copied().collect()
    }

    pub fn get_rule(&self, id: RuleId) -> Option<AclRule> {
        self.store.lock().get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }

    fn is_admin(&self, uid: UserId, groups: &BTreeSet<GroupId>) -> bool {
        uid == self.admin_uid || groups.contains(&self.admin_gid)
    }

    fn ensure_writable(&self, operation: &str) -> Result<()> {
        match self.role {
            NodeRole::Leader => Ok(()),
            NodeRole::Follower => Err(RustAclError::ReadOnly(format!(
                "{} called on a follower of zone {}",
                operation, self.zone_id
            ))),
        }
    }

    /// Storage first: a failed delete leaves the rule indexed
    fn delete_locked(&self, store: &mut RuleStore, id: RuleId) -> Result<AclRule> {
        self.storage.delete(id)?;
        let rule = store
            .remove(id)
            .ok_or_else(|| RustAclError::NotFound(format!("ACL rule {}", id)))?;
        self.metrics.rule_mutations.inc();
        Ok(rule)
    }

    fn del_matching<F: Fn(&AclRule) -> bool>(&self, what: &str, id: u32, predicate: F) -> Result<usize> {
        self.ensure_writable("bulk delete")?;

        let mut store = self.store.lock();
        let ids = store.ids_where(predicate);
        let mut deleted = 0;

        for rule_id in ids {
            if let Err(e) = self.delete_locked(&mut store, rule_id) {
                warn!(
                    "Stopped deleting ACL rules for {} {} after {} deletions: {}",
                    what, id, deleted, e
                );
                self.metrics.rules.set(store.len() as i64);
                return Err(e);
            }
            deleted += 1;
        }
        self.metrics.rules.set(store.len() as i64);
        drop(store);

        if deleted > 0 {
            info!("Deleted {} ACL rules referencing {} {}", deleted, what, id);
        }
        Ok(deleted)
    }
}

/// Scope and id of a field, without its object types
fn scoped_part(field: u64) -> u64 {
    field & (SCOPE_MASK | ID_MASK)
}
