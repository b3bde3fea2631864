//! Scoped Identifier Encoding
//!
//! Every masked ACL field is a single `u64` built from three disjoint bit ranges:
//!
//! ```text
//!  63                          36 35  32 31                             0
//! +------------------------------+------+--------------------------------+
//! |   object type codes (28)     |scope |          numeric id (32)       |
//! +------------------------------+------+--------------------------------+
//! ```
//!
//! - Bits 0-31: numeric id (user, group, cluster, zone or object id)
//! - Bits 32-35: scope tag, exactly one bit set
//! - Bits 36-63: object type codes, one bit per type (resource field only)
//!
//! Because the ranges are disjoint, OR-combination is lossless and a single
//! AND with a mask isolates either the type+scope part or the id. Callers never
//! do arithmetic on encoded values; they build [`ScopedId`]s and [`MatchKey`]s.

use crate::error::{Result, RustAclError};
use crate::types::ObjectId;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

/// Numeric id range
pub const ID_MASK: u64 = 0x0000_0000_FFFF_FFFF;
/// Scope tag range
pub const SCOPE_MASK: u64 = 0x0000_000F_0000_0000;
/// Object type range
pub const TYPE_MASK: u64 = 0xFFFF_FFF0_0000_0000;

/// How the numeric id of a masked field is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scope {
    /// A single user, object or zone (`#id`)
    Individual,
    /// Every member of a group, or every object owned by a group (`@id`)
    Group,
    /// Every user, object or zone (`*`)
    All,
    /// Every object belonging to a cluster (`%id`)
    Cluster,
}

impl Scope {
    pub const VARIANTS: [Scope; 4] = [Scope::Individual, Scope::Group, Scope::All, Scope::Cluster];

    /// Tag bit carried in the scope range
    #[inline(always)]
    pub const fn tag(self) -> u64 {
        match self {
            Scope::Individual => 0x0000_0001_0000_0000,
            Scope::Group => 0x0000_0002_0000_0000,
            Scope::All => 0x0000_0004_0000_0000,
            Scope::Cluster => 0x0000_0008_0000_0000,
        }
    }

    /// Decode the scope range of `bits`. Returns `None` unless exactly one known tag is set.
    pub fn from_bits(bits: u64) -> Option<Scope> {
        let tag = bits & SCOPE_MASK;
        Self::VARIANTS.into_iter().find(|scope| scope.tag() == tag)
    }

    fn prefix(self) -> &'static str {
        match self {
            Scope::Individual => "#",
            Scope::Group => "@",
            Scope::All => "*",
            Scope::Cluster => "%",
        }
    }
}

/// Object types that can be named by the resource field of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectType {
    Vm,
    Host,
    Net,
    Image,
    User,
    Template,
    Group,
    Datastore,
    Cluster,
    Document,
    Zone,
    SecGroup,
    Vdc,
    VRouter,
    Marketplace,
    MarketplaceApp,
    VmGroup,
    VnTemplate,
}

impl ObjectType {
    pub const VARIANTS: [ObjectType; 18] = [
        ObjectType::Vm,
        ObjectType::Host,
        ObjectType::Net,
        ObjectType::Image,
        ObjectType::User,
        ObjectType::Template,
        ObjectType::Group,
        ObjectType::Datastore,
        ObjectType::Cluster,
        ObjectType::Document,
        ObjectType::Zone,
        ObjectType::SecGroup,
        ObjectType::Vdc,
        ObjectType::VRouter,
        ObjectType::Marketplace,
        ObjectType::MarketplaceApp,
        ObjectType::VmGroup,
        ObjectType::VnTemplate,
    ];

    /// Type code bit in the object type range. Bit 43 is reserved.
    #[inline(always)]
    pub const fn code(self) -> u64 {
        match self {
            ObjectType::Vm => 1 << 36,
            ObjectType::Host => 1 << 37,
            ObjectType::Net => 1 << 38,
            ObjectType::Image => 1 << 39,
            ObjectType::User => 1 << 40,
            ObjectType::Template => 1 << 41,
            ObjectType::Group => 1 << 42,
            ObjectType::Datastore => 1 << 44,
            ObjectType::Cluster => 1 << 45,
            ObjectType::Document => 1 << 46,
            ObjectType::Zone => 1 << 47,
            ObjectType::SecGroup => 1 << 48,
            ObjectType::Vdc => 1 << 49,
            ObjectType::VRouter => 1 << 50,
            ObjectType::Marketplace => 1 << 51,
            ObjectType::MarketplaceApp => 1 << 52,
            ObjectType::VmGroup => 1 << 53,
            ObjectType::VnTemplate => 1 << 54,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ObjectType::Vm => "VM",
            ObjectType::Host => "HOST",
            ObjectType::Net => "NET",
            ObjectType::Image => "IMAGE",
            ObjectType::User => "USER",
            ObjectType::Template => "TEMPLATE",
            ObjectType::Group => "GROUP",
            ObjectType::Datastore => "DATASTORE",
            ObjectType::Cluster => "CLUSTER",
            ObjectType::Document => "DOCUMENT",
            ObjectType::Zone => "ZONE",
            ObjectType::SecGroup => "SECGROUP",
            ObjectType::Vdc => "VDC",
            ObjectType::VRouter => "VROUTER",
            ObjectType::Marketplace => "MARKETPLACE",
            ObjectType::MarketplaceApp => "MARKETPLACEAPP",
            ObjectType::VmGroup => "VMGROUP",
            ObjectType::VnTemplate => "VNTEMPLATE",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ObjectType {
    type Err = RustAclError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        Self::VARIANTS
            .into_iter()
            .find(|t| t.name() == upper)
            .ok_or_else(|| RustAclError::Parse(format!("unknown object type '{}'", s)))
    }
}

/// Set of object types, stored directly in the object type range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ObjectTypes(u64);

impl ObjectTypes {
    pub const EMPTY: Self = Self(0);

    /// Union of every known type code
    pub const KNOWN_BITS: u64 = {
        let mut bits = 0u64;
        let mut i = 0;
        while i < ObjectType::VARIANTS.len() {
            bits |= ObjectType::VARIANTS[i].code();
            i += 1;
        }
        bits
    };

    pub fn single(object_type: ObjectType) -> Self {
        Self(object_type.code())
    }

    /// Extract the type range of an encoded field, including unknown bits
    pub fn from_field(field: u64) -> Self {
        Self(field & TYPE_MASK)
    }

    #[inline(always)]
    pub const fn bits(self) -> u64 {
        self.0
    }

    pub fn contains(self, object_type: ObjectType) -> bool {
        self.0 & object_type.code() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Bits in the type range that do not name a known type
    pub fn unknown_bits(self) -> u64 {
        self.0 & !Self::KNOWN_BITS
    }

    pub fn iter(self) -> impl Iterator<Item = ObjectType> {
        ObjectType::VARIANTS.into_iter().filter(move |t| self.contains(*t))
    }
}

impl From<ObjectType> for ObjectTypes {
    fn from(object_type: ObjectType) -> Self {
        Self::single(object_type)
    }
}

impl BitOr<ObjectType> for ObjectTypes {
    type Output = ObjectTypes;

    fn bitor(self, rhs: ObjectType) -> ObjectTypes {
        ObjectTypes(self.0 | rhs.code())
    }
}

impl BitOr for ObjectType {
    type Output = ObjectTypes;

    fn bitor(self, rhs: ObjectType) -> ObjectTypes {
        ObjectTypes(self.code() | rhs.code())
    }
}

impl FromIterator<ObjectType> for ObjectTypes {
    fn from_iter<I: IntoIterator<Item = ObjectType>>(iter: I) -> Self {
        Self(iter.into_iter().fold(0, |bits, t| bits | t.code()))
    }
}

impl fmt::Display for ObjectTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(ObjectType::name).collect();
        f.write_str(&names.join("+"))
    }
}

impl FromStr for ObjectTypes {
    type Err = RustAclError;

    fn from_str(s: &str) -> Result<Self> {
        let mut types = ObjectTypes::EMPTY;
        for name in s.split('+').filter(|n| !n.trim().is_empty()) {
            types = types | name.parse::<ObjectType>()?;
        }
        if types.is_empty() {
            return Err(RustAclError::Parse(format!("no object type in '{}'", s)));
        }
        Ok(types)
    }
}

/// Bitmask of grantable operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rights(u64);

impl Rights {
    pub const NONE: Rights = Rights(0);
    pub const USE: Rights = Rights(0x1);
    pub const MANAGE: Rights = Rights(0x2);
    pub const ADMIN: Rights = Rights(0x4);
    pub const CREATE: Rights = Rights(0x8);

    pub const KNOWN_BITS: u64 = 0xF;

    const NAMED: [(Rights, &'static str); 4] = [
        (Rights::USE, "USE"),
        (Rights::MANAGE, "MANAGE"),
        (Rights::ADMIN, "ADMIN"),
        (Rights::CREATE, "CREATE"),
    ];

    pub const fn from_bits(bits: u64) -> Self {
        Rights(bits)
    }

    #[inline(always)]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Superset law: `self` grants `requested` iff every requested bit is present
    #[inline(always)]
    pub const fn contains(self, requested: Rights) -> bool {
        self.0 & requested.0 == requested.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn unknown_bits(self) -> u64 {
        self.0 & !Self::KNOWN_BITS
    }
}

impl BitOr for Rights {
    type Output = Rights;

    fn bitor(self, rhs: Rights) -> Rights {
        Rights(self.0 | rhs.0)
    }
}

impl BitOrAssign for Rights {
    fn bitor_assign(&mut self, rhs: Rights) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Rights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMED
            .iter()
            .filter(|(right, _)| self.contains(*right))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            return f.write_str("NONE");
        }
        f.write_str(&names.join("+"))
    }
}

impl FromStr for Rights {
    type Err = RustAclError;

    fn from_str(s: &str) -> Result<Self> {
        let mut rights = Rights::NONE;
        for name in s.split('+').filter(|n| !n.trim().is_empty()) {
            let upper = name.trim().to_ascii_uppercase();
            let (right, _) = Self::NAMED
                .iter()
                .find(|(_, n)| *n == upper)
                .ok_or_else(|| RustAclError::Parse(format!("unknown right '{}'", name)))?;
            rights |= *right;
        }
        if rights.is_empty() {
            return Err(RustAclError::Parse(format!("no rights in '{}'", s)));
        }
        Ok(rights)
    }
}

/// A numeric id tagged with its scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopedId {
    pub scope: Scope,
    pub id: u32,
}

impl ScopedId {
    pub const fn individual(id: u32) -> Self {
        Self { scope: Scope::Individual, id }
    }

    pub const fn group(id: u32) -> Self {
        Self { scope: Scope::Group, id }
    }

    pub const fn cluster(id: u32) -> Self {
        Self { scope: Scope::Cluster, id }
    }

    pub const fn all() -> Self {
        Self { scope: Scope::All, id: 0 }
    }

    /// Scope tag OR numeric id. The id is dropped for `All`.
    #[inline(always)]
    pub const fn encode(self) -> u64 {
        make_id(self.scope, self.id)
    }

    /// Decode the scope and id ranges of a field, ignoring the type range
    pub fn decode(field: u64) -> Option<Self> {
        let scope = Scope::from_bits(field)?;
        Some(Self {
            scope,
            id: (field & ID_MASK) as u32,
        })
    }
}

impl fmt::Display for ScopedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            Scope::All => f.write_str("*"),
            scope => write!(f, "{}{}", scope.prefix(), self.id),
        }
    }
}

impl FromStr for ScopedId {
    type Err = RustAclError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "*" {
            return Ok(ScopedId::all());
        }
        let mut chars = s.chars();
        let scope = match chars.next() {
            Some('#') => Scope::Individual,
            Some('@') => Scope::Group,
            Some('%') => Scope::Cluster,
            _ => return Err(RustAclError::Parse(format!("invalid scoped id '{}'", s))),
        };
        let id = chars
            .as_str()
            .parse::<u32>()
            .map_err(|e| RustAclError::Parse(format!("invalid id in '{}': {}", s, e)))?;
        Ok(ScopedId { scope, id })
    }
}

/// Build a scope-tagged id. `All` carries no id bits.
#[inline(always)]
pub const fn make_id(scope: Scope, numeric_id: u32) -> u64 {
    match scope {
        Scope::All => scope.tag(),
        _ => scope.tag() | numeric_id as u64,
    }
}

/// Comparison mask for a field of the given types and scope.
///
/// The id range is included for every scope except `All`, so an `All` key
/// matches regardless of the numeric id on the other side.
#[inline(always)]
pub const fn make_type_mask(types: ObjectTypes, scope: Scope) -> u64 {
    match scope {
        Scope::All => types.bits() | scope.tag(),
        _ => types.bits() | scope.tag() | ID_MASK,
    }
}

/// A masked comparison: `field & mask == value`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatchKey {
    mask: u64,
    value: u64,
}

impl MatchKey {
    /// Key for the resource field of a request on one object type
    pub const fn resource(object_type: ObjectType, target: ScopedId) -> Self {
        let types = ObjectTypes(object_type.code());
        Self {
            mask: make_type_mask(types, target.scope),
            value: types.bits() | target.encode(),
        }
    }

    /// Key for a zone field (no type bits)
    pub const fn zone(target: ScopedId) -> Self {
        Self {
            mask: make_type_mask(ObjectTypes::EMPTY, target.scope),
            value: target.encode(),
        }
    }

    #[inline(always)]
    pub const fn matches(self, field: u64) -> bool {
        field & self.mask == self.value
    }
}

/// Resource half of a rule: a set of types plus one scoped target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub types: ObjectTypes,
    pub target: ScopedId,
}

impl ResourceSpec {
    pub fn new(types: impl Into<ObjectTypes>, target: ScopedId) -> Self {
        Self {
            types: types.into(),
            target,
        }
    }

    /// Single object of a type
    pub fn object(object_type: ObjectType, oid: ObjectId) -> Self {
        Self::new(object_type, ScopedId::individual(oid))
    }

    pub fn encode(self) -> u64 {
        self.types.bits() | self.target.encode()
    }

    pub fn decode(field: u64) -> Option<Self> {
        Some(Self {
            types: ObjectTypes::from_field(field),
            target: ScopedId::decode(field)?,
        })
    }
}

impl fmt::Display for ResourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.types, self.target)
    }
}

impl FromStr for ResourceSpec {
    type Err = RustAclError;

    fn from_str(s: &str) -> Result<Self> {
        let (types, target) = s
            .split_once('/')
            .ok_or_else(|| RustAclError::Parse(format!("resource '{}' must be TYPES/ID", s)))?;
        Ok(ResourceSpec {
            types: types.parse()?,
            target: target.parse()?,
        })
    }
}
