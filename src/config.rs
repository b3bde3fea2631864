use crate::types::{GroupId, UserId, ZoneId};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub storage: StorageConfig,
    pub refresh: RefreshConfig,
    pub authorization: AuthorizationConfig,
}

/// Replication role of this instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Owns writes and persists rules
    #[default]
    Leader,
    /// Federation slave: mirrors the leader's rules and rejects writes
    Follower,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub zone_id: ZoneId,
    pub role: NodeRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the ACL table file
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/acl_rules.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Period between pulls from the leader, in milliseconds
    pub interval_ms: u64,
    /// Leader dump file: read by followers (required), published by leaders when set
    pub dump_path: Option<PathBuf>,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            dump_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationConfig {
    /// User that bypasses ACL evaluation
    pub admin_uid: UserId,
    /// Group whose members bypass ACL evaluation
    pub admin_gid: GroupId,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            admin_uid: 0,
            admin_gid: 0,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::error::RustAclError::Config(e.to_string()))
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.storage.path.as_os_str().is_empty() {
            return Err(crate::error::RustAclError::InvalidConfig(
                "storage.path cannot be empty".to_string(),
            ));
        }

        self.refresh.validate(self.node.role)?;

        Ok(())
    }
}

impl RefreshConfig {
    pub fn validate(&self, role: NodeRole) -> crate::Result<()> {
        if self.interval_ms < 100 {
            return Err(crate::error::RustAclError::InvalidConfig(
                "refresh.interval_ms must be at least 100".to_string(),
            ));
        }

        if role == NodeRole::Follower && self.dump_path.is_none() {
            return Err(crate::error::RustAclError::InvalidConfig(
                "refresh.dump_path is required when node.role is follower".to_string(),
            ));
        }

        Ok(())
    }

    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.interval_ms)
    }
}
