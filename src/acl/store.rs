//! Rule Store
//!
//! Rules live once in a slot arena. Two indices reference the same slots by
//! handle: one keyed by the encoded user field (the match key), one keyed by
//! rule id. Removing a rule frees its slot only after both indices drop the
//! handle. The store is not synchronized itself; [`super::manager::AclManager`]
//! owns it behind a single lock.

use super::rules::AclRule;
use crate::error::{Result, RustAclError};
use crate::types::RuleId;

use std::collections::{BTreeMap, HashMap};

/// Stable index of a rule slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RuleHandle(usize);

/// Arena-backed rule set with user and id indices
#[derive(Debug, Default, Clone)]
pub struct RuleStore {
    slots: Vec<Option<AclRule>>,
    free: Vec<usize>,
    by_user: HashMap<u64, Vec<RuleHandle>>,
    by_id: BTreeMap<RuleId, RuleHandle>,
    next_id: RuleId,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a full rule list, rejecting repeated ids and tuples
    pub fn from_rules<I: IntoIterator<Item = AclRule>>(rules: I) -> Result<Self> {
        let mut store = Self::new();
        for rule in rules {
            if let Some(existing) = store.find_tuple(rule.user(), rule.resource(), rule.rights().bits(), rule.zone()) {
                return Err(RustAclError::Duplicate {
                    existing: existing.id(),
                });
            }
            store.insert(rule)?;
        }
        Ok(store)
    }

    /// Next id to hand out: one past the highest id ever inserted
    pub fn next_id(&self) -> RuleId {
        self.next_id
    }

    /// Never hand out ids below `floor`
    pub fn reserve_ids(&mut self, floor: RuleId) {
        self.next_id = self.next_id.max(floor);
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn get(&self, id: RuleId) -> Option<&AclRule> {
        self.by_id.get(&id).and_then(|handle| self.slot(*handle))
    }

    pub fn contains(&self, id: RuleId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Insert into both indices. The caller has already checked for duplicate tuples.
    pub fn insert(&mut self, rule: AclRule) -> Result<()> {
        if self.by_id.contains_key(&rule.id()) {
            return Err(RustAclError::Duplicate { existing: rule.id() });
        }

        let handle = match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(rule);
                RuleHandle(index)
            }
            None => {
                self.slots.push(Some(rule));
                RuleHandle(self.slots.len() - 1)
            }
        };

        self.by_user.entry(rule.user()).or_default().push(handle);
        self.by_id.insert(rule.id(), handle);
        self.next_id = self.next_id.max(rule.id().saturating_add(1));
        Ok(())
    }

    /// Remove from both indices and free the slot
    pub fn remove(&mut self, id: RuleId) -> Option<AclRule> {
        let handle = self.by_id.remove(&id)?;
        let rule = self.slots.get_mut(handle.0)?.take()?;

        if let Some(bucket) = self.by_user.get_mut(&rule.user()) {
            bucket.retain(|h| *h != handle);
            if bucket.is_empty() {
                self.by_user.remove(&rule.user());
            }
        }
        self.free.push(handle.0);
        Some(rule)
    }

    /// Rules whose user field equals `user`
    pub fn bucket(&self, user: u64) -> impl Iterator<Item = &AclRule> + '_ {
        self.by_user
            .get(&user)
            .into_iter()
            .flat_map(|handles| handles.iter())
            .filter_map(move |handle| self.slot(*handle))
    }

    /// All rules in id order
    pub fn iter(&self) -> impl Iterator<Item = &AclRule> + '_ {
        self.by_id.values().filter_map(move |handle| self.slot(*handle))
    }

    /// Rule with an identical tuple, searched in the bucket of `user`
    pub fn find_tuple(&self, user: u64, resource: u64, rights: u64, zone: u64) -> Option<&AclRule> {
        self.bucket(user)
            .find(|rule| rule.same_tuple(user, resource, rights, zone))
    }

    /// Ids of every rule matching `predicate`, in id order
    pub fn ids_where<F: Fn(&AclRule) -> bool>(&self, predicate: F) -> Vec<RuleId> {
        self.iter().filter(|rule| predicate(rule)).map(AclRule::id).collect()
    }

    fn slot(&self, handle: RuleHandle) -> Option<&AclRule> {
        self.slots.get(handle.0).and_then(Option::as_ref)
    }
}
