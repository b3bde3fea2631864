//! Persistence and replication round trips for the ACL manager

use pretty_assertions::assert_eq;
use rustacl::acl::{
    AclDump, AclManager, AclStorage, FileAclStorage, InMemoryAclStorage, ObjectType, ResourceDescriptor, Rights,
};
use rustacl::config::NodeRole;
use rustacl::metrics::AclMetrics;
use rustacl::Config;
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::TempDir;

fn manager_on(config: &Config, storage: Arc<dyn AclStorage>) -> AclManager {
    AclManager::new(config, storage, AclMetrics::new().unwrap())
}

#[test]
fn test_file_store_survives_restart() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage.path = dir.path().join("data").join("acl_rules.json");

    let manager = manager_on(&config, Arc::new(FileAclStorage::new(&config.storage.path)));
    manager.bootstrap().unwrap();
    assert_eq!(manager.start().unwrap(), 0);

    for rule in ["@5 HOST/#42 USE *", "#3 VM+IMAGE/@7 MANAGE #0", "* NET/%2 USE *", "#4 ZONE/#0 ADMIN"] {
        manager.add_rule_spec(&rule.parse().unwrap()).unwrap();
    }
    manager.del_rule(1).unwrap();

    let restarted = manager_on(&config, Arc::new(FileAclStorage::new(&config.storage.path)));
    assert_eq!(restarted.start().unwrap(), 3);
    assert_eq!(restarted.rules(), manager.rules());

    let strings: Vec<String> = restarted.rules().iter().map(|r| r.to_string()).collect();
    assert_eq!(strings, vec!["@5 HOST/#42 USE *", "* NET/%2 USE *", "#4 ZONE/#0 ADMIN *"]);
}

#[test]
fn test_startup_fails_without_table() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing.json");
    let manager = manager_on(&Config::default(), Arc::new(FileAclStorage::new(&path)));
    assert!(manager.start().is_err());
}

#[test]
fn test_failed_writes_never_diverge_from_storage() {
    let storage = Arc::new(InMemoryAclStorage::new());
    let manager = manager_on(&Config::default(), storage.clone());

    let rules = ["#1 VM/* USE *", "#2 VM/* USE *", "#3 VM/* USE *", "#4 VM/* USE *", "#5 VM/* USE *"];
    for (i, rule) in rules.iter().enumerate() {
        storage.set_fail_writes(i % 2 == 1);
        let _ = manager.add_rule_spec(&rule.parse().unwrap());
    }
    storage.set_fail_writes(false);
    assert_eq!(manager.len(), 3);

    storage.set_fail_writes(true);
    assert!(manager.del_uid_rules(1).is_err());
    storage.set_fail_writes(false);
    assert_eq!(manager.del_uid_rules(3).unwrap(), 1);

    let reloaded = manager_on(&Config::default(), storage.clone());
    reloaded.start().unwrap();
    assert_eq!(reloaded.rules(), manager.rules());
    assert_eq!(storage.row_count(), manager.len());
}

#[test]
fn test_follower_decides_like_leader_after_dump() {
    let leader = manager_on(&Config::default(), Arc::new(InMemoryAclStorage::new()));
    for rule in ["@5 HOST/#42 USE *", "#9 DATASTORE/%3 USE+MANAGE *", "* NET/* USE #1"] {
        leader.add_rule_spec(&rule.parse().unwrap()).unwrap();
    }

    let mut config = Config::default();
    config.node.role = NodeRole::Follower;
    config.node.zone_id = 1;
    let follower = manager_on(&config, Arc::new(InMemoryAclStorage::unbootstrapped()));
    assert_eq!(follower.start().unwrap(), 0);

    let dump = AclDump::from_json(&leader.dump().to_json().unwrap()).unwrap();
    assert_eq!(follower.replace_rules(dump.to_rules().unwrap()).unwrap(), 3);
    assert_eq!(follower.rules(), leader.rules());

    let requests = [
        (9, vec![5], ResourceDescriptor::new(42, ObjectType::Host), Rights::USE),
        (9, vec![], ResourceDescriptor::new(1, ObjectType::Datastore).with_clusters([3]), Rights::MANAGE),
        (7, vec![], ResourceDescriptor::new(8, ObjectType::Net).in_zone(1), Rights::USE),
        (7, vec![], ResourceDescriptor::new(8, ObjectType::Net).in_zone(0), Rights::USE),
        (9, vec![6], ResourceDescriptor::new(42, ObjectType::Host), Rights::USE),
    ];
    for (uid, groups, descriptor, op) in requests {
        let groups: BTreeSet<u32> = groups.into_iter().collect();
        assert_eq!(
            follower.authorize(uid, &groups, &descriptor, op),
            leader.authorize(uid, &groups, &descriptor, op)
        );
    }
}
