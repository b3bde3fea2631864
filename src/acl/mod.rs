//! Access control lists: rule encoding, the indexed rule store, forward and
//! reverse authorization, persistence and follower replication.

pub mod dump;
pub mod encoding;
pub mod manager;
pub mod matcher;
pub mod refresh;
pub mod reverse;
pub mod rules;
pub mod storage;
pub mod store;

pub use dump::{AclDump, AclRuleRecord};
pub use encoding::{MatchKey, ObjectType, ObjectTypes, ResourceSpec, Rights, Scope, ScopedId};
pub use manager::AclManager;
pub use matcher::{LockLevel, ObjectPermissions, ResourceDescriptor};
pub use refresh::{AclRefresher, DumpSource, FileDumpSource, RefreshHealth};
pub use reverse::{ReverseSearchOptions, ReverseSearchResult};
pub use rules::{AclRule, RuleSpec};
pub use storage::{AclRuleRow, AclStorage, FileAclStorage, InMemoryAclStorage};
pub use store::RuleStore;
