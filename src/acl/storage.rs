//! ACL Persistent Storage Layer
//!
//! One row per rule: `(id, user, resource, rights, zone)`. Encoded fields are
//! stored as `i64` with bit-preserving casts, matching a BIGINT column. Calls
//! are synchronous; the manager issues them while holding the store lock so
//! memory and storage cannot diverge.

use super::rules::AclRule;
use crate::error::{Result, RustAclError};
use crate::types::RuleId;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Persisted form of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRuleRow {
    pub id: RuleId,
    pub user: i64,
    pub resource: i64,
    pub rights: i64,
    pub zone: i64,
}

impl AclRuleRow {
    /// Validate the row back into a rule
    pub fn to_rule(&self) -> Result<AclRule> {
        AclRule::from_raw(
            self.id,
            self.user as u64,
            self.resource as u64,
            self.rights as u64,
            self.zone as u64,
        )
    }
}

impl From<&AclRule> for AclRuleRow {
    fn from(rule: &AclRule) -> Self {
        Self {
            id: rule.id(),
            user: rule.user() as i64,
            resource: rule.resource() as i64,
            rights: rule.rights().bits() as i64,
            zone: rule.zone() as i64,
        }
    }
}

/// Relational store holding the ACL table
pub trait AclStorage: Send + Sync {
    /// Create the ACL table if absent. Idempotent.
    fn bootstrap(&self) -> Result<()>;

    /// Every stored row
    fn select_all(&self) -> Result<Vec<AclRuleRow>>;

    fn insert(&self, row: &AclRuleRow) -> Result<()>;

    fn delete(&self, id: RuleId) -> Result<()>;
}

/// In-memory storage for tests and ephemeral nodes
#[derive(Debug, Default)]
pub struct InMemoryAclStorage {
    rows: RwLock<BTreeMap<RuleId, AclRuleRow>>,
    bootstrapped: AtomicBool,
    fail_writes: AtomicBool,
}

impl InMemoryAclStorage {
    /// Create a storage whose table already exists
    pub fn new() -> Self {
        Self {
            bootstrapped: AtomicBool::new(true),
            ..Default::default()
        }
    }

    /// Create a storage with no table; `select_all` fails until `bootstrap`
    pub fn unbootstrapped() -> Self {
        Self::default()
    }

    /// Make every subsequent insert and delete fail (fault injection)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn row_count(&self) -> usize {
        self.rows.read().len()
    }

    fn check_writable(&self) -> Result<()> {
        if !self.bootstrapped.load(Ordering::SeqCst) {
            return Err(RustAclError::Persistence("acl table does not exist".to_string()));
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RustAclError::Persistence("injected write failure".to_string()));
        }
        Ok(())
    }
}

impl AclStorage for InMemoryAclStorage {
    fn bootstrap(&self) -> Result<()> {
        self.bootstrapped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn select_all(&self) -> Result<Vec<AclRuleRow>> {
        if !self.bootstrapped.load(Ordering::SeqCst) {
            return Err(RustAclError::Persistence("acl table does not exist".to_string()));
        }
        Ok(self.rows.read().values().copied().collect())
    }

    fn insert(&self, row: &AclRuleRow) -> Result<()> {
        self.check_writable()?;
        let mut rows = self.rows.write();
        if rows.contains_key(&row.id) {
            return Err(RustAclError::Persistence(format!(
                "primary key violation: row {} already exists",
                row.id
            )));
        }
        rows.insert(row.id, *row);
        Ok(())
    }

    fn delete(&self, id: RuleId) -> Result<()> {
        self.check_writable()?;
        self.rows.write().remove(&id);
        Ok(())
    }
}

/// On-disk table document
#[derive(Debug, Default, Serialize, Deserialize)]
struct AclTableFile {
    table: String,
    rows: Vec<AclRuleRow>,
}

const TABLE_NAME: &str = "acl";

/// JSON file backed storage. Each write rewrites the table through a
/// temporary file and an atomic rename.
#[derive(Debug)]
pub struct FileAclStorage {
    path: PathBuf,
    rows: Mutex<Option<BTreeMap<RuleId, AclRuleRow>>>,
}

impl FileAclStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rows: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<BTreeMap<RuleId, AclRuleRow>> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RustAclError::Persistence(format!(
                "acl table {} cannot be read: {}",
                path.display(),
                e
            ))
        })?;
        let table: AclTableFile = serde_json::from_str(&content)
            .map_err(|e| RustAclError::Persistence(format!("acl table {} is corrupt: {}", path.display(), e)))?;
        if table.table != TABLE_NAME {
            return Err(RustAclError::Persistence(format!(
                "{} holds table '{}', expected '{}'",
                path.display(),
                table.table,
                TABLE_NAME
            )));
        }
        Ok(table.rows.into_iter().map(|row| (row.id, row)).collect())
    }

    fn write(&self, rows: &BTreeMap<RuleId, AclRuleRow>) -> Result<()> {
        let table = AclTableFile {
            table: TABLE_NAME.to_string(),
            rows: rows.values().copied().collect(),
        };
        let json = serde_json::to_string_pretty(&table)?;

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)
            .and_then(|_| std::fs::rename(&tmp, &self.path))
            .map_err(|e| RustAclError::Persistence(format!("failed to write {}: {}", self.path.display(), e)))
    }

    /// Apply `change` to a copy of the table, persist it, then commit the copy
    fn modify<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<RuleId, AclRuleRow>) -> Result<()>,
    {
        let mut cached = self.rows.lock();
        let mut rows = match cached.as_ref() {
            Some(rows) => rows.clone(),
            None => Self::load(&self.path)?,
        };
        change(&mut rows)?;
        self.write(&rows)?;
        *cached = Some(rows);
        Ok(())
    }
}

impl AclStorage for FileAclStorage {
    fn bootstrap(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let rows = BTreeMap::new();
        self.write(&rows)?;
        *self.rows.lock() = Some(rows);
        Ok(())
    }

    fn select_all(&self) -> Result<Vec<AclRuleRow>> {
        let rows = Self::load(&self.path)?;
        let all = rows.values().copied().collect();
        *self.rows.lock() = Some(rows);
        Ok(all)
    }

    fn insert(&self, row: &AclRuleRow) -> Result<()> {
        self.modify(|rows| {
            if rows.contains_key(&row.id) {
                return Err(RustAclError::Persistence(format!(
                    "primary key violation: row {} already exists",
                    row.id
                )));
            }
            rows.insert(row.id, *row);
            Ok(())
        })
    }

    fn delete(&self, id: RuleId) -> Result<()> {
        self.modify(|rows| {
            rows.remove(&id);
            Ok(())
        })
    }
}
