//! Engine-level behavior of the ACL manager
//!
//! - rights superset law
//! - wildcard, group and cluster resource scopes
//! - reverse search agreeing with forward authorization
//! - whole-store swaps never observed half-applied

use rustacl::acl::{
    AclManager, AclRule, InMemoryAclStorage, ObjectType, ResourceDescriptor, ReverseSearchOptions, Rights,
};
use rustacl::config::NodeRole;
use rustacl::metrics::AclMetrics;
use rustacl::{Config, RustAclError};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn create_test_manager(rules: &[&str]) -> AclManager {
    let manager = AclManager::new(
        &Config::default(),
        Arc::new(InMemoryAclStorage::new()),
        AclMetrics::new().unwrap(),
    );
    for rule in rules {
        manager.add_rule_spec(&rule.parse().unwrap()).unwrap();
    }
    manager
}

fn set(ids: &[u32]) -> BTreeSet<u32> {
    ids.iter().copied().collect()
}

#[test]
fn test_single_rule_superset_law() {
    for granted in 1..16u64 {
        let rights = Rights::from_bits(granted);
        let manager = create_test_manager(&[&format!("#1 VM/#1 {} *", rights)]);
        let vm = ResourceDescriptor::new(1, ObjectType::Vm);

        for requested in 1..16u64 {
            let op = Rights::from_bits(requested);
            assert_eq!(
                manager.authorize(1, &BTreeSet::new(), &vm, op),
                granted & requested == requested,
                "granted {} requested {}",
                rights,
                op
            );
        }
    }
}

#[test]
fn test_wildcard_rule_grants_every_object() {
    let manager = create_test_manager(&["#1 VM/* USE *"]);
    for oid in [0, 1, 99, u32::MAX] {
        let vm = ResourceDescriptor::new(oid, ObjectType::Vm)
            .with_group(oid % 7)
            .with_clusters([oid % 3]);
        assert!(manager.authorize(1, &set(&[4]), &vm, Rights::USE));
        assert!(!manager.authorize(2, &set(&[4]), &vm, Rights::USE));
    }

    let image = ResourceDescriptor::new(1, ObjectType::Image);
    assert!(!manager.authorize(1, &BTreeSet::new(), &image, Rights::USE));
}

#[test]
fn test_cluster_scoped_rule() {
    let manager = create_test_manager(&["#1 DATASTORE/%4 USE *"]);
    let ds = |clusters: &[u32]| ResourceDescriptor::new(10, ObjectType::Datastore).with_clusters(clusters.iter().copied());

    assert!(manager.authorize(1, &BTreeSet::new(), &ds(&[1, 4]), Rights::USE));
    assert!(!manager.authorize(1, &BTreeSet::new(), &ds(&[1, 2]), Rights::USE));
    assert!(!manager.authorize(1, &BTreeSet::new(), &ds(&[]), Rights::USE));
}

#[test]
fn test_group_member_inherits_group_rules() {
    let manager = create_test_manager(&["@5 HOST/#42 USE *", "@6 HOST/#42 MANAGE *"]);
    let host = ResourceDescriptor::new(42, ObjectType::Host);

    assert!(manager.authorize(9, &set(&[5]), &host, Rights::USE));
    assert!(!manager.authorize(9, &set(&[5]), &host, Rights::MANAGE));
    assert!(manager.authorize(9, &set(&[5, 6]), &host, Rights::MANAGE));
    assert!(!manager.authorize(9, &set(&[5, 6]), &host, Rights::USE | Rights::MANAGE));
}

#[test]
fn test_tuples_differing_in_rights_are_distinct() {
    let manager = create_test_manager(&["#1 VM/#1 USE *"]);
    assert!(manager.add_rule_spec(&"#1 VM/#1 USE+MANAGE *".parse().unwrap()).is_ok());
    assert!(matches!(
        manager.add_rule_spec(&"#1 VM/#1 USE".parse().unwrap()),
        Err(RustAclError::Duplicate { existing: 0 })
    ));
    assert_eq!(manager.len(), 2);
}

#[test]
fn test_reverse_search_agrees_with_authorize() {
    let manager = create_test_manager(&[
        "#1 VM/#3 USE *",
        "@2 VM/@1 USE *",
        "#1 VM/%2 USE+MANAGE *",
        "#1 VM/#7 USE #5",
        "#1 IMAGE/* USE *",
        "@9 VM/* USE *",
    ]);
    let groups = set(&[2]);

    for op in [Rights::USE, Rights::MANAGE] {
        let result = manager.reverse_search(1, &groups, ObjectType::Vm, op, ReverseSearchOptions::default());
        assert!(!result.all);

        for oid in 0..20 {
            let gid = oid % 3;
            let clusters = set(&[oid % 4]);
            let vm = ResourceDescriptor::new(oid, ObjectType::Vm)
                .with_group(gid)
                .with_clusters(clusters.iter().copied());

            assert_eq!(
                result.covers(oid, gid, &clusters),
                manager.authorize(1, &groups, &vm, op),
                "object {} with {}",
                oid,
                op
            );
        }
    }

    let as_member = manager.reverse_search(1, &set(&[9]), ObjectType::Vm, Rights::USE, Default::default());
    assert!(as_member.all);
    assert!(as_member.oids.is_empty());
}

#[test]
fn test_follower_swap_is_atomic_for_readers() {
    let mut config = Config::default();
    config.node.role = NodeRole::Follower;
    let manager = Arc::new(AclManager::new(
        &config,
        Arc::new(InMemoryAclStorage::new()),
        AclMetrics::new().unwrap(),
    ));

    let snapshot = |user: u32, count: u32| -> Vec<AclRule> {
        (0..count)
            .map(|oid| {
                AclRule::from_spec(oid, &format!("#{} VM/#{} USE *", user, oid).parse().unwrap()).unwrap()
            })
            .collect()
    };
    let first = snapshot(1, 50);
    let second = snapshot(2, 80);
    manager.replace_rules(first.clone()).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let reader = {
        let manager = manager.clone();
        let stop = stop.clone();
        let (first, second) = (first.clone(), second.clone());
        std::thread::spawn(move || {
            let mut reads = 0;
            loop {
                let rules = manager.rules();
                assert!(rules == first || rules == second, "observed a mixed rule set");
                reads += 1;
                if stop.load(Ordering::SeqCst) {
                    break reads;
                }
            }
        })
    };

    for round in 0..200 {
        let next = if round % 2 == 0 { second.clone() } else { first.clone() };
        manager.replace_rules(next).unwrap();
    }
    stop.store(true, Ordering::SeqCst);

    let reads = reader.join().unwrap();
    assert!(reads > 0);
    assert_eq!(manager.rules(), first);
}
