//! ACL Rules
//!
//! An [`AclRule`] is four encoded fields plus a persistent id. Rules are only
//! built through [`AclRule::from_raw`], which enforces well-formedness, so every
//! rule in a store can be decoded back into its typed parts.

use super::encoding::{
    ObjectTypes, ResourceSpec, Rights, Scope, ScopedId, ID_MASK, SCOPE_MASK, TYPE_MASK,
};
use crate::error::{Result, RustAclError};
use crate::types::RuleId;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Immutable ACL rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AclRule {
    id: RuleId,
    user: u64,
    resource: u64,
    rights: u64,
    zone: u64,
}

impl AclRule {
    /// Validate the four fields and build a rule
    pub fn from_raw(id: RuleId, user: u64, resource: u64, rights: u64, zone: u64) -> Result<Self> {
        validate_fields(user, resource, rights, zone)?;
        Ok(Self {
            id,
            user,
            resource,
            rights,
            zone,
        })
    }

    pub fn from_spec(id: RuleId, spec: &RuleSpec) -> Result<Self> {
        let (user, resource, rights, zone) = spec.encode();
        Self::from_raw(id, user, resource, rights, zone)
    }

    pub fn id(&self) -> RuleId {
        self.id
    }

    pub fn user(&self) -> u64 {
        self.user
    }

    pub fn resource(&self) -> u64 {
        self.resource
    }

    pub fn rights(&self) -> Rights {
        Rights::from_bits(self.rights)
    }

    pub fn zone(&self) -> u64 {
        self.zone
    }

    /// Same user, resource, rights and zone, regardless of id
    pub fn same_tuple(&self, user: u64, resource: u64, rights: u64, zone: u64) -> bool {
        self.user == user && self.resource == resource && self.rights == rights && self.zone == zone
    }

    /// Typed view of the fields. Cannot fail for a validated rule.
    pub fn spec(&self) -> RuleSpec {
        RuleSpec {
            user: decode_scoped(self.user),
            resource: ResourceSpec {
                types: ObjectTypes::from_field(self.resource),
                target: decode_scoped(self.resource),
            },
            rights: self.rights(),
            zone: decode_scoped(self.zone),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_id(self, id: RuleId) -> Self {
        Self { id, ..self }
    }
}

impl fmt::Display for AclRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.spec().fmt(f)
    }
}

fn decode_scoped(field: u64) -> ScopedId {
    ScopedId::decode(field).unwrap_or(ScopedId {
        scope: Scope::All,
        id: 0,
    })
}

/// Typed rule tuple without an id, as written by operators: `@5 HOST/#42 USE *`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleSpec {
    pub user: ScopedId,
    pub resource: ResourceSpec,
    pub rights: Rights,
    pub zone: ScopedId,
}

impl RuleSpec {
    pub fn new(user: ScopedId, resource: ResourceSpec, rights: Rights, zone: ScopedId) -> Self {
        Self {
            user,
            resource,
            rights,
            zone,
        }
    }

    /// Encoded `(user, resource, rights, zone)` fields
    pub fn encode(&self) -> (u64, u64, u64, u64) {
        (
            self.user.encode(),
            self.resource.encode(),
            self.rights.bits(),
            self.zone.encode(),
        )
    }
}

impl fmt::Display for RuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.user, self.resource, self.rights, self.zone)
    }
}

/// Parses `USER RESOURCE RIGHTS [ZONE]`; the zone defaults to `*`.
impl FromStr for RuleSpec {
    type Err = RustAclError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        let zone = match parts.len() {
            3 => ScopedId::all(),
            4 => parts[3].parse()?,
            _ => {
                return Err(RustAclError::Parse(format!(
                    "rule '{}' must have 3 or 4 components: USER RESOURCE RIGHTS [ZONE]",
                    s
                )))
            }
        };
        Ok(RuleSpec {
            user: parts[0].parse()?,
            resource: parts[1].parse()?,
            rights: parts[2].parse()?,
            zone,
        })
    }
}

/// Check every field and report all failures in one error
pub fn validate_fields(user: u64, resource: u64, rights: u64, zone: u64) -> Result<()> {
    let mut errors = Vec::new();

    check_scoped_field(
        "user",
        user,
        &[Scope::Individual, Scope::Group, Scope::All],
        &mut errors,
    );
    if user & TYPE_MASK != 0 {
        errors.push("user field must not carry object types".to_string());
    }

    check_scoped_field("resource", resource, &Scope::VARIANTS, &mut errors);
    let types = ObjectTypes::from_field(resource);
    if types.is_empty() {
        errors.push("resource field must name at least one object type".to_string());
    }
    if types.unknown_bits() != 0 {
        errors.push(format!(
            "resource field has unknown object type bits 0x{:016x}",
            types.unknown_bits()
        ));
    }

    let rights = Rights::from_bits(rights);
    if rights.is_empty() {
        errors.push("rights must not be empty".to_string());
    }
    if rights.unknown_bits() != 0 {
        errors.push(format!("rights has unknown bits 0x{:x}", rights.unknown_bits()));
    }

    check_scoped_field("zone", zone, &[Scope::Individual, Scope::All], &mut errors);
    if zone & TYPE_MASK != 0 {
        errors.push("zone field must not carry object types".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(RustAclError::Malformed(errors.join("; ")))
    }
}

fn check_scoped_field(name: &str, field: u64, allowed: &[Scope], errors: &mut Vec<String>) {
    match Scope::from_bits(field) {
        None => errors.push(format!(
            "{} field must carry exactly one scope, found 0x{:x}",
            name,
            (field & SCOPE_MASK) >> 32
        )),
        Some(scope) if !allowed.contains(&scope) => {
            errors.push(format!("{} field cannot use {:?} scope", name, scope))
        }
        Some(Scope::All) if field & ID_MASK != 0 => {
            errors.push(format!("{} field with ALL scope must not carry an id", name))
        }
        Some(_) => {}
    }
}
